// TCP accept loop and the main event loop.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Listener thread** (`TcpListener::accept()` loop): accepts new TCP
//   connections and sends `ServerEvent::NewConnection` to the main thread.
// - **Reader threads** (one per client, `reader.rs`): produce `LineFrom` /
//   `DecodeError` / `Disconnected` events.
// - **Match controller threads** (one per match, `game_loop.rs`): report
//   `MatchFinished` when a game winds down.
// - **Main thread**: performs the username handshake on new connections,
//   owns command dispatch and move routing, opens reconnect windows, and
//   drives matchmaking. It is the only place admission decisions are made.
//
// The registry mutex serializes all role and queue mutation. It is never
// held across network I/O: every handler snapshots the writers it needs
// and sends after the guard drops. Outbound writes themselves are
// serialized per client by `ClientWriter`.
//
// Admission order for a new connection, per the handshake contract:
// 1. An open reconnect window for the username splices the new transport
//    into the existing client (capacity is not re-checked — the seat was
//    never released).
// 2. Otherwise capacity, then duplicate/empty username, reject with one
//    `[ERROR]` line before close.
//
// Shutdown: `ServerHandle::stop` flips the flag; the accept loop and main
// loop drain out, every client gets a goodbye line best effort, and
// dropping the registry closes the sockets, which in turn stops the
// reader threads.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use broadside_protocol::{FrameKind, FrameWrite, ReadEvent, reader_for, writer_for};

use crate::client::{ClientWriter, PlayerEvent, Role};
use crate::commands::{self, CommandEffect};
use crate::config::ServerConfig;
use crate::game_loop::{MatchRuntime, PlayerSeat, spawn_match};
use crate::lock;
use crate::reader::spawn_reader;
use crate::registry::Registry;

/// How long a fresh connection has to present its username.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Events funnelled into the main thread from the listener, the per-client
/// readers, and the match controllers.
#[derive(Debug)]
pub enum ServerEvent {
    NewConnection {
        stream: TcpStream,
    },
    LineFrom {
        id: String,
        line: String,
    },
    DecodeError {
        id: String,
        reason: String,
    },
    Disconnected {
        id: String,
        /// Transport generation the reporting reader was spawned for.
        gen_tag: u64,
    },
    MatchFinished {
        players: [String; 2],
    },
}

/// Handle returned by `start_server` to control the running server.
pub struct ServerHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Signal the server to stop and wait for it to shut down.
    pub fn stop(self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread {
            let _ = handle.join();
        }
    }
}

/// Start the session server on a background thread. Returns a handle for
/// stopping it and the actual bound address (useful when port 0 is used to
/// let the OS pick a free port).
pub fn start_server(config: ServerConfig) -> io::Result<(ServerHandle, SocketAddr)> {
    let listener = TcpListener::bind((config.host.as_str(), config.port))?;
    let addr = listener.local_addr()?;
    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_clone = keep_running.clone();

    let thread = thread::spawn(move || {
        run_server(listener, config, keep_running_clone);
    });
    info!("listening on {addr}");

    Ok((
        ServerHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

struct ServerContext {
    registry: Arc<Mutex<Registry>>,
    events: Sender<ServerEvent>,
    config: ServerConfig,
    shutdown: Arc<AtomicBool>,
}

/// Main server loop. Runs until `keep_running` is set to false.
fn run_server(listener: TcpListener, config: ServerConfig, keep_running: Arc<AtomicBool>) {
    let registry = Arc::new(Mutex::new(Registry::new(config.max_connections)));
    let (tx, rx) = mpsc::channel::<ServerEvent>();

    // Set the listener to non-blocking so the accept thread can check
    // keep_running periodically.
    listener.set_nonblocking(true).ok();

    let keep_running_listener = keep_running.clone();
    let tx_listener = tx.clone();
    thread::spawn(move || {
        while keep_running_listener.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    stream.set_nonblocking(false).ok();
                    let _ = tx_listener.send(ServerEvent::NewConnection { stream });
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(_) => break,
            }
        }
    });

    let ctx = ServerContext {
        registry,
        events: tx,
        config,
        shutdown: keep_running.clone(),
    };

    while keep_running.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                handle_event(&ctx, event);
                // Drain any additional events that arrived during handling.
                while let Ok(event) = rx.try_recv() {
                    handle_event(&ctx, event);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    // Goodbye lines best effort; dropping the registry closes the sockets,
    // which stops the reader threads.
    let writers = lock(&ctx.registry).all_writers();
    for writer in writers {
        writer.system("Server shutting down. Goodbye.");
    }
    info!("server stopped");
}

fn handle_event(ctx: &ServerContext, event: ServerEvent) {
    match event {
        ServerEvent::NewConnection { stream } => handle_new_connection(ctx, stream),
        ServerEvent::LineFrom { id, line } => handle_line(ctx, &id, line),
        ServerEvent::DecodeError { id, reason } => {
            warn!("{id}: corrupt frame ({reason})");
            let writer = lock(&ctx.registry).get(&id).map(|c| c.writer.clone());
            if let Some(writer) = writer {
                writer.error_line(&format!("Ignored a corrupted frame ({reason})."));
            }
        }
        ServerEvent::Disconnected { id, gen_tag } => handle_disconnect(ctx, &id, gen_tag),
        ServerEvent::MatchFinished { players } => handle_match_finished(ctx, players),
    }
}

/// What the admission check decided, computed under the registry lock and
/// acted on after it.
enum Admission {
    Spliced {
        writer: Arc<ClientWriter>,
        input_tx: Option<SyncSender<PlayerEvent>>,
        gen_tag: u64,
    },
    Admitted {
        writer: Arc<ClientWriter>,
        role: Role,
    },
    Rejected {
        writer: Arc<ClientWriter>,
        reason: String,
    },
}

/// Handle a new TCP connection: read the username handshake, then splice,
/// admit, or reject.
fn handle_new_connection(ctx: &ServerContext, stream: TcpStream) {
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)).ok();
    let Ok(read_stream) = stream.try_clone() else {
        return;
    };
    let Ok(write_stream) = stream.try_clone() else {
        return;
    };
    let mut source = reader_for(ctx.config.codec, read_stream);
    let mut sink = writer_for(ctx.config.codec, write_stream);

    // The first inbound frame is the username.
    let username = match source.read_frame() {
        Ok(ReadEvent::Frame(frame)) => frame.text.trim().to_string(),
        Ok(ReadEvent::Corrupt(reason)) => {
            debug!("handshake rejected: corrupt frame ({reason})");
            let _ = sink.write_frame(FrameKind::Error, "[ERROR] Malformed handshake.");
            return;
        }
        Err(e) => {
            debug!("handshake failed: {e}");
            return;
        }
    };

    let admission = decide_admission(ctx, &username, sink);

    match admission {
        Admission::Rejected { writer, reason } => {
            info!("{username}: rejected ({reason})");
            writer.error_line(&format!("Connection refused: {reason}."));
            // Dropping the writer closes the connection.
        }
        Admission::Spliced {
            writer,
            input_tx,
            gen_tag,
        } => {
            info!("{username}: reconnected, transport spliced (gen {gen_tag})");
            stream.set_read_timeout(None).ok();
            writer.system(&format!("Welcome back, {username}! Rejoining your match..."));
            if let Some(tx) = input_tx {
                if tx.try_send(PlayerEvent::Reconnected).is_err() {
                    warn!("{username}: reconnect raced the end of the match");
                }
            }
            spawn_reader(
                username,
                gen_tag,
                source,
                writer,
                ctx.events.clone(),
                ctx.config.min_input_spacing(),
            );
        }
        Admission::Admitted { writer, role } => {
            info!("{username}: admitted as {role:?}");
            stream.set_read_timeout(None).ok();
            let (position, total) = {
                let reg = lock(&ctx.registry);
                (reg.position(&username).unwrap_or(0), reg.queue_size())
            };
            writer.system(&format!("Welcome to Broadside, {username}!"));
            match role {
                Role::WaitingPlayer => writer.system(&format!(
                    "You're in line to play. Queue position {position} of {total}."
                )),
                Role::WaitingSpectator => writer.system(&format!(
                    "You're queued as a spectator. Queue position {position} of {total}."
                )),
                Role::ActiveSpectator => writer.system(&format!(
                    "A match is in progress; you're watching it. Queue position {position} of {total}."
                )),
                // Nobody is admitted straight into a seat.
                Role::ActivePlayer => {}
            }
            writer.system("Type /help for commands.");
            spawn_reader(
                username,
                0,
                source,
                writer,
                ctx.events.clone(),
                ctx.config.min_input_spacing(),
            );
            try_promote(ctx);
        }
    }
}

fn decide_admission(
    ctx: &ServerContext,
    username: &str,
    sink: Box<dyn FrameWrite + Send>,
) -> Admission {
    let mut reg = lock(&ctx.registry);

    // Reconnect window first: an open window for this username means the
    // seat is still held and the new transport is spliced in.
    let in_window = reg.get(username).is_some_and(|c| {
        c.disconnected && c.reconnect_deadline.is_some_and(|d| Instant::now() < d)
    });
    if in_window {
        if let Some(client) = reg.get_mut(username) {
            client.writer.replace(sink);
            client.disconnected = false;
            client.reconnect_deadline = None;
            client.transport_gen += 1;
            return Admission::Spliced {
                writer: client.writer.clone(),
                input_tx: client.input_tx.clone(),
                gen_tag: client.transport_gen,
            };
        }
    }

    let writer = ClientWriter::new(sink);
    match reg.admit(username, writer.clone()) {
        Ok(role) => Admission::Admitted { writer, role },
        Err(error) => Admission::Rejected {
            writer,
            reason: error.to_string(),
        },
    }
}

/// A non-command line: a move token for a seated player, chat for everyone
/// else.
fn handle_line(ctx: &ServerContext, id: &str, line: String) {
    if let Some(command) = commands::parse(&line) {
        debug!("{id}: command {command:?}");
        match commands::run(&ctx.registry, id, command) {
            CommandEffect::None => {}
            CommandEffect::Disconnect => remove_client(ctx, id),
        }
        return;
    }

    enum Route {
        Seat(SyncSender<PlayerEvent>, Arc<ClientWriter>),
        Chat(&'static str, Vec<Arc<ClientWriter>>),
    }
    let route = {
        let reg = lock(&ctx.registry);
        match reg.get(id) {
            Some(c) if c.role == Role::ActivePlayer => c
                .input_tx
                .clone()
                .map(|tx| Route::Seat(tx, c.writer.clone())),
            Some(c) => Some(Route::Chat(c.role.chat_label(), reg.writers_except(id))),
            None => None,
        }
    };
    match route {
        Some(Route::Seat(tx, writer)) => match tx.try_send(PlayerEvent::Line(line)) {
            Ok(()) => {}
            // Bounded channel backpressure: refuse rather than queue without
            // limit. The dropped line never counts as a move.
            Err(TrySendError::Full(_)) => {
                writer.system("Input buffer full; slow down.");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("{id}: move arrived after the match ended");
            }
        },
        Some(Route::Chat(label, recipients)) => {
            let text = line.trim();
            if text.is_empty() {
                return;
            }
            let formatted = format!("[CHAT] {label} {id}: {text}");
            for recipient in recipients {
                recipient.chat(&formatted);
            }
        }
        None => {}
    }
}

fn handle_disconnect(ctx: &ServerContext, id: &str, gen_tag: u64) {
    enum Action {
        OpenWindow(Option<SyncSender<PlayerEvent>>),
        Remove,
        Ignore,
    }
    let action = {
        let mut reg = lock(&ctx.registry);
        let in_match = reg.match_running();
        match reg.get_mut(id) {
            None => Action::Ignore, // already removed
            // A reader from a pre-splice transport; the client is healthy.
            Some(c) if c.transport_gen != gen_tag => Action::Ignore,
            Some(c) if in_match && c.role == Role::ActivePlayer => {
                if c.quitting || c.disconnected {
                    Action::Ignore
                } else {
                    c.disconnected = true;
                    c.reconnect_deadline = Some(Instant::now() + ctx.config.reconnect_window());
                    Action::OpenWindow(c.input_tx.clone())
                }
            }
            Some(_) => Action::Remove,
        }
    };
    match action {
        Action::OpenWindow(Some(tx)) => {
            info!("{id}: transport failed mid-match, reconnect window open");
            // Blocking send is fine: the controller drains both channels on
            // every timer slice.
            let _ = tx.send(PlayerEvent::Disconnected);
        }
        Action::OpenWindow(None) => warn!("{id}: seated player without an input channel"),
        Action::Remove => {
            info!("{id}: disconnected outside a match, removing");
            remove_client(ctx, id);
        }
        Action::Ignore => {}
    }
}

fn handle_match_finished(ctx: &ServerContext, players: [String; 2]) {
    {
        let mut reg = lock(&ctx.registry);
        for id in &players {
            let gone = reg
                .get(id)
                .is_some_and(|c| c.quitting || c.disconnected);
            if gone {
                info!("{id}: left during the match, removing");
                reg.remove(id);
            }
        }
        reg.finish_match(&players);
    }
    announce_queue_positions(ctx);
    try_promote(ctx);
}

fn remove_client(ctx: &ServerContext, id: &str) {
    let removed = lock(&ctx.registry).remove(id).is_some();
    if removed {
        info!("{id}: removed from the registry");
        announce_queue_positions(ctx);
        try_promote(ctx);
    }
}

/// Tell every queued client its current position. Writers are snapshotted
/// under the lock, written after.
fn announce_queue_positions(ctx: &ServerContext) {
    let snapshot = lock(&ctx.registry).queue_snapshot();
    for (writer, position, total) in snapshot {
        writer.system(&format!("You are number {position} of {total} in the queue."));
    }
}

/// Promote the two front-most waiting clients into a match, if possible.
fn try_promote(ctx: &ServerContext) {
    let promoted = {
        let mut reg = lock(&ctx.registry);
        reg.promote_front_pair().and_then(|pair| {
            let writer0 = reg.get(&pair.ids[0]).map(|c| c.writer.clone())?;
            let writer1 = reg.get(&pair.ids[1]).map(|c| c.writer.clone())?;
            Some((pair, writer0, writer1))
        })
    };
    let Some((pair, writer0, writer1)) = promoted else {
        return;
    };
    let [id0, id1] = pair.ids;
    let [inputs0, inputs1] = pair.inputs;
    info!("promoting {id0} and {id1} into a match");
    let seats = [
        PlayerSeat {
            id: id0,
            writer: writer0,
            inputs: inputs0,
        },
        PlayerSeat {
            id: id1,
            writer: writer1,
            inputs: inputs1,
        },
    ];
    let runtime = MatchRuntime {
        registry: ctx.registry.clone(),
        events: ctx.events.clone(),
        config: ctx.config.clone(),
        shutdown: ctx.shutdown.clone(),
    };
    spawn_match(seats, runtime);
}
