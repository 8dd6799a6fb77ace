// Process-wide client registry and matchmaking queue.
//
// One `Registry` lives behind one mutex for the whole server. It owns the
// id → client map, every client's role, and the single ordered waiting
// queue. Admission, removal, promotion, and recycling all happen inside
// the lock, so role changes are atomic with input-channel creation and
// destruction. The lock is never held across network I/O: callers snapshot
// the writers they need and send after releasing it.
//
// Matchmaking policy:
// - One match runs at a time. While it runs, every queued client is an
//   active spectator of it; new admissions join the back of the queue as
//   spectators too.
// - With no match running, the first two queued clients are tagged waiting
//   players; promotion seats exactly those two.
// - At match end the surviving players go to the back of the queue and
//   everyone is re-tagged by position, so reported positions are always a
//   gap-free 1..N.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, sync_channel};

use crate::client::{Client, ClientWriter, PlayerEvent, Role};

/// Bound on each active player's input channel. Deep enough to hold a
/// pre-entered move or two, shallow enough that a flooding client hits
/// backpressure instead of growing a queue.
pub const INPUT_CHANNEL_CAPACITY: usize = 8;

/// Why an admission was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmitError {
    EmptyId,
    Capacity,
    DuplicateId,
}

impl fmt::Display for AdmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmitError::EmptyId => write!(f, "a username is required"),
            AdmitError::Capacity => write!(f, "the server is full, try again later"),
            AdmitError::DuplicateId => write!(f, "that username is already taken"),
        }
    }
}

/// The two seats produced by a successful promotion.
pub struct PromotedPair {
    pub ids: [String; 2],
    pub inputs: [Receiver<PlayerEvent>; 2],
}

pub struct Registry {
    clients: BTreeMap<String, Client>,
    queue: VecDeque<String>,
    match_running: bool,
    max_connections: usize,
}

impl Registry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            clients: BTreeMap::new(),
            queue: VecDeque::new(),
            match_running: false,
            max_connections,
        }
    }

    /// Admit a new client and seat it at the back of the queue. Checks run
    /// in admission order: capacity, then duplicate id. (The reconnect
    /// window is checked by the accept path before calling this.)
    pub fn admit(&mut self, id: &str, writer: Arc<ClientWriter>) -> Result<Role, AdmitError> {
        if id.is_empty() {
            return Err(AdmitError::EmptyId);
        }
        if self.clients.len() >= self.max_connections {
            return Err(AdmitError::Capacity);
        }
        if self.clients.contains_key(id) {
            return Err(AdmitError::DuplicateId);
        }

        let role = if self.match_running {
            Role::ActiveSpectator
        } else if self.waiting_player_count() < 2 {
            Role::WaitingPlayer
        } else {
            Role::WaitingSpectator
        };

        self.queue.push_back(id.to_string());
        self.clients
            .insert(id.to_string(), Client::new(id.to_string(), writer, role));
        Ok(role)
    }

    fn waiting_player_count(&self) -> usize {
        self.clients
            .values()
            .filter(|c| c.role == Role::WaitingPlayer)
            .count()
    }

    /// Hard-remove a client. Dropping the record drops its input sender, so
    /// a match controller reading that channel observes closure.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.queue.retain(|queued| queued != id);
        let removed = self.clients.remove(id);
        if removed.is_some() && !self.match_running {
            self.retag_waiting();
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Client> {
        self.clients.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn match_running(&self) -> bool {
        self.match_running
    }

    /// 1-based queue position, if the client is queued.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.queue.iter().position(|queued| queued == id).map(|i| i + 1)
    }

    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    /// Every queued client's writer with its position and the queue size,
    /// for position announcements after the lock is released.
    pub fn queue_snapshot(&self) -> Vec<(Arc<ClientWriter>, usize, usize)> {
        let total = self.queue.len();
        self.queue
            .iter()
            .enumerate()
            .filter_map(|(i, id)| {
                let client = self.clients.get(id)?;
                Some((client.writer.clone(), i + 1, total))
            })
            .collect()
    }

    /// Writers of everyone currently watching the match.
    pub fn spectator_writers(&self) -> Vec<Arc<ClientWriter>> {
        self.clients
            .values()
            .filter(|c| c.role == Role::ActiveSpectator && !c.disconnected)
            .map(|c| c.writer.clone())
            .collect()
    }

    /// Writers of every client except `exclude` (chat fan-out).
    pub fn writers_except(&self, exclude: &str) -> Vec<Arc<ClientWriter>> {
        self.clients
            .values()
            .filter(|c| c.id != exclude && !c.disconnected)
            .map(|c| c.writer.clone())
            .collect()
    }

    /// Every connected client's writer (shutdown notices).
    pub fn all_writers(&self) -> Vec<Arc<ClientWriter>> {
        self.clients
            .values()
            .filter(|c| !c.disconnected)
            .map(|c| c.writer.clone())
            .collect()
    }

    /// Ids of the players seated in the running match.
    pub fn active_player_ids(&self) -> Vec<&str> {
        self.clients
            .values()
            .filter(|c| c.role == Role::ActivePlayer)
            .map(|c| c.id.as_str())
            .collect()
    }

    /// Seat the two front-most queued clients if no match is running.
    /// Atomically flips their roles, creates their bounded input channels,
    /// and re-tags everyone left in the queue as an active spectator.
    pub fn promote_front_pair(&mut self) -> Option<PromotedPair> {
        if self.match_running || self.queue.len() < 2 {
            return None;
        }
        let first = self.queue.pop_front()?;
        let second = self.queue.pop_front()?;

        let mut inputs = Vec::with_capacity(2);
        for id in [&first, &second] {
            let (tx, rx) = sync_channel(INPUT_CHANNEL_CAPACITY);
            let client = self.clients.get_mut(id.as_str())?;
            client.role = Role::ActivePlayer;
            client.input_tx = Some(tx);
            inputs.push(rx);
        }
        for id in self.queue.iter() {
            if let Some(client) = self.clients.get_mut(id) {
                client.role = Role::ActiveSpectator;
            }
        }
        self.match_running = true;

        let mut inputs = inputs.into_iter();
        Some(PromotedPair {
            ids: [first, second],
            inputs: [inputs.next()?, inputs.next()?],
        })
    }

    /// Close out the running match: recycle the surviving players to the
    /// back of the queue, destroy their input channels, and re-tag every
    /// queued client by position. Callers remove quitters and dead
    /// transports before calling this.
    pub fn finish_match(&mut self, players: &[String; 2]) {
        self.match_running = false;
        for id in players {
            if let Some(client) = self.clients.get_mut(id) {
                client.input_tx = None;
                client.disconnected = false;
                client.reconnect_deadline = None;
                self.queue.push_back(id.clone());
            }
        }
        self.retag_waiting();
    }

    /// First two queued clients wait for a seat; everyone behind them waits
    /// as a spectator.
    fn retag_waiting(&mut self) {
        let order: Vec<String> = self.queue.iter().cloned().collect();
        for (i, id) in order.iter().enumerate() {
            if let Some(client) = self.clients.get_mut(id) {
                client.role = if i < 2 {
                    Role::WaitingPlayer
                } else {
                    Role::WaitingSpectator
                };
            }
        }
    }
}
