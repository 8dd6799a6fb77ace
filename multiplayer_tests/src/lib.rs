// Shared harness for the end-to-end session server tests.
//
// `TestClient` is a mock player: a plain TCP socket speaking the line
// framing, with helpers to scan the inbound stream for expected lines and
// to walk through placement prompts. Everything it ever read is kept in
// `seen`, both for negative assertions ("bob was never given a turn") and
// for a readable dump when an expectation times out.
//
// The reader is deliberately hand-rolled over a raw `TcpStream` with a
// carry buffer rather than `BufReader::read_line`, so a read timeout
// between lines can never lose a partially buffered line.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

/// How long `expect` scans before giving up and dumping the transcript.
const EXPECT_DEADLINE: Duration = Duration::from_secs(10);

pub struct TestClient {
    pub name: String,
    stream: TcpStream,
    carry: Vec<u8>,
    pub seen: Vec<String>,
}

impl TestClient {
    /// Connect and perform the username handshake.
    pub fn connect(addr: SocketAddr, name: &str) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let mut client = Self {
            name: name.to_string(),
            stream,
            carry: Vec::new(),
            seen: Vec::new(),
        };
        client.send(name);
        client
    }

    pub fn send(&mut self, line: &str) {
        let mut data = line.as_bytes().to_vec();
        data.push(b'\n');
        self.stream.write_all(&data).unwrap();
    }

    /// Read lines until one contains `needle`, recording everything seen.
    /// Panics with the full transcript if the deadline passes.
    pub fn expect(&mut self, needle: &str) -> String {
        let deadline = Instant::now() + EXPECT_DEADLINE;
        while Instant::now() < deadline {
            if let Some(line) = self.next_line() {
                self.seen.push(line.clone());
                if line.contains(needle) {
                    return line;
                }
            }
        }
        panic!(
            "{}: timed out waiting for {needle:?}; transcript:\n{}",
            self.name,
            self.seen.join("\n")
        );
    }

    /// Whether any line seen so far contains `needle`.
    pub fn saw(&self, needle: &str) -> bool {
        self.seen.iter().any(|line| line.contains(needle))
    }

    /// Answer the placement prompts with one ship per row, horizontal,
    /// starting in column 1 at the given row letters.
    pub fn place_fleet_rows(&mut self, rows: [char; 5]) {
        for row in rows {
            self.expect("Enter start coordinate");
            self.send(&format!("{row}1"));
            self.expect("Enter orientation");
            self.send("H");
        }
        self.expect("All ships placed!");
    }

    /// One complete line if available within the read timeout.
    fn next_line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.carry.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = self.carry.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw).trim_end().to_string();
                return Some(line);
            }
            let mut buf = [0u8; 1024];
            match self.stream.read(&mut buf) {
                Ok(0) => panic!(
                    "{}: connection closed; transcript:\n{}",
                    self.name,
                    self.seen.join("\n")
                ),
                Ok(n) => self.carry.extend_from_slice(&buf[..n]),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return None;
                }
                Err(e) => panic!("{}: read error: {e}", self.name),
            }
        }
    }
}
