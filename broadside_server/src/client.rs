// Per-client state: role, outbound writer, and the match input channel.
//
// `ClientWriter` is the single serialization point for everything the
// server sends to one client. All outbound writes go through its mutex, so
// a grid block written by a match controller can never interleave with a
// chat line written by the main loop. Write errors are swallowed (and
// logged at debug): the client's reader thread will observe the broken pipe
// and raise the one true disconnect signal. This keeps every disconnect on
// a single path instead of two racing ones.
//
// The writer's inner sink can be replaced wholesale — that is the reconnect
// splice. Dropping the old boxed sink closes the stale socket half.

use std::sync::{Arc, Mutex, PoisonError};
use std::sync::mpsc::SyncSender;
use std::time::Instant;

use log::debug;

use broadside_protocol::{FrameKind, FrameWrite};

/// Where a client currently stands in the session lifecycle. Mutated only
/// under the registry lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Queued and in line for a seat in the next match.
    WaitingPlayer,
    /// Queued behind the next match's players.
    WaitingSpectator,
    /// Seated in the running match.
    ActivePlayer,
    /// Watching the running match from the queue.
    ActiveSpectator,
}

impl Role {
    /// The label used in chat prefixes.
    pub fn chat_label(self) -> &'static str {
        match self {
            Role::WaitingPlayer | Role::ActivePlayer => "Player",
            Role::WaitingSpectator | Role::ActiveSpectator => "Spectator",
        }
    }
}

/// Events delivered to a match controller through a player's input channel.
///
/// `Line` carries raw move-phase input (coordinates, orientation tokens,
/// the literal `quit`). The rest are control signals the main loop injects
/// so the controller's timed receive can switch over plain outcomes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlayerEvent {
    Line(String),
    Quit,
    Disconnected,
    Reconnected,
}

/// Serialized outbound sink for one client.
pub struct ClientWriter {
    sink: Mutex<Box<dyn FrameWrite + Send>>,
}

impl ClientWriter {
    pub fn new(sink: Box<dyn FrameWrite + Send>) -> Arc<Self> {
        Arc::new(Self {
            sink: Mutex::new(sink),
        })
    }

    /// Swap in a fresh transport (reconnect splice). The stale sink is
    /// dropped, closing its socket half.
    pub fn replace(&self, sink: Box<dyn FrameWrite + Send>) {
        let mut guard = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = sink;
    }

    /// Write one frame. Errors are logged and swallowed; the reader thread
    /// detects dead transports.
    pub fn send(&self, kind: FrameKind, text: &str) {
        let mut guard = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = guard.write_frame(kind, text) {
            debug!("dropped outbound frame: {e}");
        }
    }

    pub fn system(&self, text: &str) {
        self.send(FrameKind::SystemMessage, &format!("[SYSTEM] {text}"));
    }

    pub fn error_line(&self, text: &str) {
        self.send(FrameKind::Error, &format!("[ERROR] {text}"));
    }

    pub fn game(&self, text: &str) {
        self.send(FrameKind::GameState, &format!("[GAME] {text}"));
    }

    /// Relay an already-formatted `[CHAT] ...` line.
    pub fn chat(&self, text: &str) {
        self.send(FrameKind::ChatMessage, text);
    }

    /// Send a board rendering as one atomic grid block.
    pub fn grid(&self, rendering: &str) {
        self.send(FrameKind::BoardUpdate, rendering);
    }
}

/// One live (or reconnect-pending) client.
pub struct Client {
    pub id: String,
    pub role: Role,
    pub writer: Arc<ClientWriter>,
    /// Present exactly while the client is an active player; created at
    /// promotion, destroyed at match end.
    pub input_tx: Option<SyncSender<PlayerEvent>>,
    /// True while a mid-match reconnect window is open for this client.
    pub disconnected: bool,
    pub reconnect_deadline: Option<Instant>,
    /// Set by `/quit` from inside a match; the client is removed once the
    /// match controller winds down.
    pub quitting: bool,
    /// Bumped on every reconnect splice. A reader thread reports the
    /// generation it was spawned for, so a stale reader's death can't be
    /// mistaken for a failure of the freshly spliced transport.
    pub transport_gen: u64,
}

impl Client {
    pub fn new(id: String, writer: Arc<ClientWriter>, role: Role) -> Self {
        Self {
            id,
            role,
            writer,
            input_tx: None,
            disconnected: false,
            reconnect_deadline: None,
            quitting: false,
            transport_gen: 0,
        }
    }
}
