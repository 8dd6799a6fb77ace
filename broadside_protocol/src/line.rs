// Newline-delimited text framing.
//
// Outbound frames are one of:
// - a plain line (`[SYSTEM]`, `[CHAT]`, `[GAME]`, `[ERROR]` texts), or
// - a grid block: the literal line `GRID`, then the rendering's header line
//   and ten rows, then an empty line. Clients buffer from `GRID` until the
//   empty line and render the block as a unit.
//
// Each outbound frame is assembled into one buffer and written with a
// single `write_all` + flush, so a grid block can never interleave with
// another frame written through the same writer.
//
// Inbound frames are plain newline-terminated strings, tagged `UserInput`;
// the line codec has no inbound type byte. A line that is not valid UTF-8
// is reported as `ReadEvent::Corrupt` — the newline was still consumed, so
// the stream stays in sync and the session continues.

use std::io::{self, BufRead, BufReader, Read, Write};

use crate::frame::{Frame, FrameKind};
use crate::{FrameRead, FrameWrite, ReadEvent};

/// Read half of a newline-framed connection.
pub struct LineReader<R: Read> {
    inner: BufReader<R>,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }
}

impl<R: Read> FrameRead for LineReader<R> {
    fn read_frame(&mut self) -> io::Result<ReadEvent> {
        let mut raw = Vec::new();
        let n = self.inner.read_until(b'\n', &mut raw)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed",
            ));
        }
        while raw.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
            raw.pop();
        }
        match String::from_utf8(raw) {
            Ok(text) => Ok(ReadEvent::Frame(Frame::new(FrameKind::UserInput, text))),
            Err(_) => Ok(ReadEvent::Corrupt("line is not valid UTF-8".into())),
        }
    }
}

/// Write half of a newline-framed connection.
pub struct LineWriter<W: Write> {
    inner: W,
}

impl<W: Write> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write> FrameWrite for LineWriter<W> {
    fn write_frame(&mut self, kind: FrameKind, text: &str) -> io::Result<()> {
        let block = match kind {
            FrameKind::BoardUpdate => format!("GRID\n{text}\n\n"),
            _ => format!("{text}\n"),
        };
        self.inner.write_all(block.as_bytes())?;
        self.inner.flush()
    }
}
