// broadside_protocol — wire protocol for the Broadside session server.
//
// This crate defines the framing used between the server and its clients
// over TCP. It is shared by both sides of the wire and has no dependency on
// the game model or the server.
//
// Two interchangeable framings exist over the same byte stream, and a
// server process picks exactly one at startup:
//
// - `line.rs`:   newline-delimited UTF-8 text. Board renderings travel as a
//                `GRID` block (the literal line `GRID`, a header line, ten
//                grid rows, then an empty line) written atomically so a
//                client never interleaves other output into a grid.
// - `packet.rs`: a length-prefixed binary envelope
//                `seq(2) | type(1) | payload_len(2) | payload | checksum(1)`
//                (big-endian) with a one-byte additive checksum. A checksum
//                mismatch is a recoverable decode fault, not a reason to
//                drop the connection.
//
// Both framings implement the same pair of capabilities, `FrameRead` and
// `FrameWrite`, exchanging `(FrameKind, text)` frames. The reader surfaces
// corrupt frames as `ReadEvent::Corrupt` so the session can warn and
// continue; only transport-level failures (EOF, socket errors) surface as
// `io::Error`.
//
// Design decisions:
// - **Text payloads.** Every frame body is human-readable text; the game
//   never ships binary state. The packet framing exists for deployments
//   that want sequencing and corruption detection on unreliable links.
// - **No async runtime.** Codecs work over plain `std::io::Read`/`Write`,
//   compatible with blocking TCP streams and in-memory buffers alike.

pub mod frame;
pub mod line;
pub mod packet;

use std::io;
use std::net::TcpStream;

pub use frame::{CodecKind, Frame, FrameKind};
pub use line::{LineReader, LineWriter};
pub use packet::{PacketReader, PacketWriter, encode_packet};

/// One successful read from a framed stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadEvent {
    /// A well-formed frame.
    Frame(Frame),
    /// A corrupt frame (bad checksum, unknown type, invalid UTF-8). The
    /// stream itself is still in sync; the caller should warn and keep
    /// reading.
    Corrupt(String),
}

/// The read half of a framed connection.
pub trait FrameRead {
    /// Read the next frame. `Err` means the transport is gone (EOF is
    /// `UnexpectedEof`); corrupt-but-recoverable frames come back as
    /// `Ok(ReadEvent::Corrupt)`.
    fn read_frame(&mut self) -> io::Result<ReadEvent>;
}

/// The write half of a framed connection.
pub trait FrameWrite {
    /// Write one frame and flush it.
    fn write_frame(&mut self, kind: FrameKind, text: &str) -> io::Result<()>;
}

/// Build the read half for a TCP stream using the process-wide codec choice.
pub fn reader_for(codec: CodecKind, stream: TcpStream) -> Box<dyn FrameRead + Send> {
    match codec {
        CodecKind::Line => Box::new(LineReader::new(stream)),
        CodecKind::Packet => Box::new(PacketReader::new(stream)),
    }
}

/// Build the write half for a TCP stream using the process-wide codec choice.
pub fn writer_for(codec: CodecKind, stream: TcpStream) -> Box<dyn FrameWrite + Send> {
    match codec {
        CodecKind::Line => Box::new(LineWriter::new(stream)),
        CodecKind::Packet => Box::new(PacketWriter::new(stream)),
    }
}
