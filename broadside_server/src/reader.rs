// Per-client reader thread.
//
// One reader per live transport. It turns the framed byte stream into
// typed `ServerEvent`s on the main loop's channel and stops on EOF,
// transport error, or server shutdown (the socket is closed under it).
//
// The rate limit is enforced here, before an event ever reaches the main
// loop: a frame arriving sooner than the configured minimum spacing after
// the previously accepted one is dropped with a single warning to the
// client. Dropped frames do not count as moves and never reach a match
// controller, so they cannot reset timeout clocks.
//
// Corrupt frames (bad checksum, invalid UTF-8) are forwarded as
// `DecodeError` events; the session continues.

use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info};

use broadside_protocol::{FrameRead, ReadEvent};

use crate::client::ClientWriter;
use crate::server::ServerEvent;

pub fn spawn_reader(
    id: String,
    gen_tag: u64,
    source: Box<dyn FrameRead + Send>,
    writer: Arc<ClientWriter>,
    events: Sender<ServerEvent>,
    min_spacing: Duration,
) -> JoinHandle<()> {
    thread::spawn(move || read_loop(id, gen_tag, source, writer, events, min_spacing))
}

fn read_loop(
    id: String,
    gen_tag: u64,
    mut source: Box<dyn FrameRead + Send>,
    writer: Arc<ClientWriter>,
    events: Sender<ServerEvent>,
    min_spacing: Duration,
) {
    let mut last_accepted: Option<Instant> = None;
    loop {
        match source.read_frame() {
            Ok(ReadEvent::Frame(frame)) => {
                let now = Instant::now();
                if last_accepted.is_some_and(|at| now.duration_since(at) < min_spacing) {
                    debug!("{id}: dropped input, rate limit");
                    writer.system("You're sending input too fast. The last line was ignored.");
                    continue;
                }
                last_accepted = Some(now);
                let event = ServerEvent::LineFrom {
                    id: id.clone(),
                    line: frame.text,
                };
                if events.send(event).is_err() {
                    break; // server loop is gone
                }
            }
            Ok(ReadEvent::Corrupt(reason)) => {
                let event = ServerEvent::DecodeError {
                    id: id.clone(),
                    reason,
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            Err(e) => {
                info!("{id}: transport closed ({e})");
                let _ = events.send(ServerEvent::Disconnected { id, gen_tag });
                break;
            }
        }
    }
}
