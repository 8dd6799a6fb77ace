// Integration smoke test for the session server.
//
// Starts a server on localhost, connects mock TCP clients, and exercises
// the admission path end to end: welcomes and queue positions, duplicate /
// capacity / empty-username rejections, commands, the rate limiter, and
// the packet framing (handshake, corrupt-frame recovery).
//
// Each client is a plain TCP socket — the line clients write raw
// newline-terminated strings, the packet clients use the protocol crate's
// envelope. Match flow itself is covered by the `multiplayer_tests`
// member; this file stays on the connection-management layer.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use broadside_protocol::{CodecKind, FrameKind, FrameRead, PacketReader, ReadEvent, encode_packet};
use broadside_server::{ServerConfig, start_server};

fn test_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        countdown_secs: 0,
        input_rate_per_second: 1000,
        ..ServerConfig::default()
    }
}

/// Minimal line-framed client: raw strings out, line scanning in.
struct LineClient {
    stream: TcpStream,
    carry: Vec<u8>,
    seen: Vec<String>,
}

impl LineClient {
    fn connect(addr: SocketAddr, name: &str) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let mut client = Self {
            stream,
            carry: Vec::new(),
            seen: Vec::new(),
        };
        client.send(name);
        client
    }

    fn send(&mut self, line: &str) {
        let mut data = line.as_bytes().to_vec();
        data.push(b'\n');
        self.stream.write_all(&data).unwrap();
    }

    /// Scan inbound lines until one contains `needle`. Tolerates the
    /// server closing the connection (rejection paths) as long as the
    /// expected line arrived first.
    fn expect(&mut self, needle: &str) -> String {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            match self.next_line() {
                Ok(Some(line)) => {
                    self.seen.push(line.clone());
                    if line.contains(needle) {
                        return line;
                    }
                }
                Ok(None) => {}
                Err(_) => break, // closed
            }
        }
        panic!("timed out waiting for {needle:?}; saw:\n{}", self.seen.join("\n"));
    }

    fn next_line(&mut self) -> Result<Option<String>, ()> {
        loop {
            if let Some(pos) = self.carry.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = self.carry.drain(..=pos).collect();
                return Ok(Some(String::from_utf8_lossy(&raw).trim_end().to_string()));
            }
            let mut buf = [0u8; 1024];
            match self.stream.read(&mut buf) {
                Ok(0) => return Err(()),
                Ok(n) => self.carry.extend_from_slice(&buf[..n]),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return Ok(None);
                }
                Err(_) => return Err(()),
            }
        }
    }
}

#[test]
fn welcome_names_role_and_queue_position() {
    let (handle, addr) = start_server(test_config()).unwrap();

    let mut alice = LineClient::connect(addr, "alice");
    alice.expect("Welcome to Broadside, alice!");
    alice.expect("You're in line to play. Queue position 1 of 1.");
    alice.expect("Type /help for commands.");

    alice.send("/status");
    alice.expect("Waiting in the queue at position 1 of 1.");

    handle.stop();
}

#[test]
fn duplicate_username_is_refused() {
    let (handle, addr) = start_server(test_config()).unwrap();

    let mut alice = LineClient::connect(addr, "alice");
    alice.expect("Welcome to Broadside, alice!");

    let mut imposter = LineClient::connect(addr, "alice");
    imposter.expect("Connection refused: that username is already taken.");

    handle.stop();
}

#[test]
fn connection_cap_is_enforced() {
    let config = ServerConfig {
        max_connections: 1,
        ..test_config()
    };
    let (handle, addr) = start_server(config).unwrap();

    let mut alice = LineClient::connect(addr, "alice");
    alice.expect("Welcome to Broadside, alice!");

    let mut bob = LineClient::connect(addr, "bob");
    bob.expect("Connection refused: the server is full, try again later.");

    handle.stop();
}

#[test]
fn empty_username_is_refused() {
    let (handle, addr) = start_server(test_config()).unwrap();

    let mut nameless = LineClient::connect(addr, "");
    nameless.expect("Connection refused: a username is required.");

    handle.stop();
}

#[test]
fn unknown_commands_get_an_error_line() {
    let (handle, addr) = start_server(test_config()).unwrap();

    let mut alice = LineClient::connect(addr, "alice");
    alice.expect("Type /help for commands.");
    alice.send("/dance");
    alice.expect("[ERROR] Unknown command '/dance'. Type /help.");
    alice.send("/HELP");
    alice.expect("Commands: /help, /status, /chat <text>, /quit.");

    handle.stop();
}

#[test]
fn quit_outside_a_match_disconnects_and_frees_the_name() {
    let (handle, addr) = start_server(test_config()).unwrap();

    let mut alice = LineClient::connect(addr, "alice");
    alice.expect("Welcome to Broadside, alice!");
    alice.send("/quit");
    alice.expect("Goodbye!");

    // "Goodbye!" is written while the /quit event is being handled, and
    // removal completes inside that same handling — so a connection made
    // after seeing it is admitted under the freed name.
    let mut again = LineClient::connect(addr, "alice");
    again.expect("Welcome to Broadside, alice!");

    handle.stop();
}

#[test]
fn rate_limiter_warns_and_drops() {
    let config = ServerConfig {
        input_rate_per_second: 1,
        ..test_config()
    };
    let (handle, addr) = start_server(config).unwrap();

    let mut alice = LineClient::connect(addr, "alice");
    alice.expect("Type /help for commands.");
    // Two back-to-back commands: the second lands inside the minimum
    // spacing and is dropped with a warning.
    alice.send("/status");
    alice.send("/status");
    alice.expect("You're sending input too fast. The last line was ignored.");

    handle.stop();
}

// --- Packet framing ---

/// Minimal packet-framed client.
struct PacketClient {
    stream: TcpStream,
    reader: PacketReader<TcpStream>,
    next_seq: u16,
}

impl PacketClient {
    fn connect(addr: SocketAddr, name: &str) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        let reader = PacketReader::new(stream.try_clone().unwrap());
        let mut client = Self {
            stream,
            reader,
            next_seq: 0,
        };
        client.send(name);
        client
    }

    fn send(&mut self, text: &str) {
        let packet = encode_packet(self.next_seq, FrameKind::UserInput, text.as_bytes()).unwrap();
        self.next_seq = self.next_seq.wrapping_add(1);
        self.stream.write_all(&packet).unwrap();
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    /// Read frames until one's text contains `needle`.
    fn expect(&mut self, needle: &str) -> (FrameKind, String) {
        let mut seen = Vec::new();
        for _ in 0..200 {
            match self.reader.read_frame() {
                Ok(ReadEvent::Frame(frame)) => {
                    if frame.text.contains(needle) {
                        return (frame.kind, frame.text);
                    }
                    seen.push(frame.text);
                }
                Ok(ReadEvent::Corrupt(reason)) => panic!("corrupt inbound frame: {reason}"),
                Err(e) => panic!("read failed waiting for {needle:?}: {e}; saw:\n{}", seen.join("\n")),
            }
        }
        panic!("never saw {needle:?}; saw:\n{}", seen.join("\n"));
    }
}

#[test]
fn packet_codec_handshake_and_commands() {
    let config = ServerConfig {
        codec: CodecKind::Packet,
        ..test_config()
    };
    let (handle, addr) = start_server(config).unwrap();

    let mut alice = PacketClient::connect(addr, "alice");
    let (kind, text) = alice.expect("Welcome to Broadside, alice!");
    assert_eq!(kind, FrameKind::SystemMessage);
    assert!(text.starts_with("[SYSTEM]"));

    alice.send("/status");
    alice.expect("Waiting in the queue at position 1 of 1.");

    handle.stop();
}

#[test]
fn corrupt_packet_is_warned_about_and_skipped() {
    let config = ServerConfig {
        codec: CodecKind::Packet,
        ..test_config()
    };
    let (handle, addr) = start_server(config).unwrap();

    let mut alice = PacketClient::connect(addr, "alice");
    alice.expect("Type /help for commands.");

    // Break the checksum byte; the server must warn and keep the session.
    let mut bad = encode_packet(99, FrameKind::UserInput, b"/status").unwrap();
    let last = bad.len() - 1;
    bad[last] = bad[last].wrapping_add(1);
    alice.send_raw(&bad);
    let (kind, _) = alice.expect("Ignored a corrupted frame");
    assert_eq!(kind, FrameKind::Error);

    // The stream is still in sync.
    alice.send("/status");
    alice.expect("Waiting in the queue at position 1 of 1.");

    handle.stop();
}

#[test]
fn grid_blocks_arrive_atomically() {
    // Two players reach placement; the first board render must arrive as
    // one uninterrupted GRID block: marker, header, ten rows, blank line.
    let (handle, addr) = start_server(test_config()).unwrap();

    let mut alice = LineClient::connect(addr, "alice");
    let mut bob = LineClient::connect(addr, "bob");
    bob.expect("Welcome to Broadside, bob!");

    alice.expect("GRID");
    let mut block = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Ok(Some(line)) = alice.next_line() {
            if line.is_empty() {
                break;
            }
            block.push(line);
        }
    }
    assert_eq!(block.len(), 11, "header plus ten rows, got: {block:?}");
    assert!(block[0].contains(" 1 2 3 4 5 6 7 8 910"));
    for (i, row) in block[1..].iter().enumerate() {
        let label = (b'A' + i as u8) as char;
        assert!(
            row.starts_with(label),
            "row {i} should start with {label}: {row:?}"
        );
    }

    handle.stop();
}
