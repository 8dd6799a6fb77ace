// broadside_server — Battleship session server.
//
// A long-running TCP service that hosts turn-based two-player Battleship
// matches, admits any number of queued spectators, and keeps matches alive
// across transient disconnections. The game rules live in
// `broadside_game`; the wire framings live in `broadside_protocol`; this
// crate is the concurrent session controller that ties them to sockets.
//
// Module overview:
// - `config.rs`:    `ServerConfig` — every tunable (turn budget, reconnect
//                   window, strike limit, connection cap, rate limit,
//                   codec) with defaults, JSON file loading.
// - `client.rs`:    Per-client state — `Role`, the mutex-serialized
//                   `ClientWriter` outbound sink, `PlayerEvent`.
// - `registry.rs`:  The process-wide client map + matchmaking queue behind
//                   one mutex; admission, promotion, recycling.
// - `reader.rs`:    One reader thread per client, turning framed bytes
//                   into typed events with rate limiting.
// - `commands.rs`:  `/help`, `/status`, `/chat`, `/quit`.
// - `game_loop.rs`: The match controller — placement phase, the turn state
//                   machine, strikes and forfeits, spectator broadcasts.
// - `reconnect.rs`: Mid-match disconnect windows and transport splicing.
// - `server.rs`:    Listener thread, username handshake, the main event
//                   loop, `ServerHandle`.
//
// Concurrency model: std threads and mpsc channels only, no async runtime.
// Every timer is a sliced `recv_timeout`; there are no watcher threads.
// The server can run as a standalone binary (`main.rs`) or be embedded via
// the library API (`start_server`), which is how the integration tests
// drive it.

pub mod client;
pub mod commands;
pub mod config;
pub mod game_loop;
pub mod reader;
pub mod reconnect;
pub mod registry;
pub mod server;

#[cfg(test)]
pub(crate) mod testutil;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use config::ServerConfig;
pub use server::{ServerHandle, start_server};

/// Lock a mutex, riding through poisoning: a panicked holder must not take
/// the rest of the server down with it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
