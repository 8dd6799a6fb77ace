// The reconnect broker: mid-match disconnect windows.
//
// When an active player's transport fails, the main loop marks the client
// disconnected, stamps a reconnect deadline on it, and injects a
// `Disconnected` event into that player's input channel. The match
// controller then parks the turn here until the window resolves.
//
// The broker side of admission lives in the accept path: a new connection
// whose username matches a disconnected player inside the deadline is
// spliced into the existing client (writer swapped, input channel left
// intact) and a `Reconnected` event wakes this wait. Only one window can
// be open per username at a time — the `disconnected` flag is the window.
//
// While waiting, a countdown line goes out every second to the opponent
// and, best effort, to the disconnected player's writer: pre-splice those
// writes land on a dead socket and vanish; post-splice they reach the new
// transport. The remaining player's channel is watched the whole time so
// their own quit or transport failure still acts immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::TryRecvError;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::info;

use crate::client::PlayerEvent;
use crate::config::ServerConfig;
use crate::game_loop::{POLL_SLICE, Side};
use crate::lock;
use crate::registry::Registry;

/// How a reconnect window resolved.
pub(crate) enum RejoinOutcome {
    /// The player is back on a fresh transport; resume the turn.
    Rejoined,
    /// The deadline passed; the remaining player wins by forfeit.
    Expired,
    /// The disconnected player had a quit queued; the remaining player wins.
    DownQuit,
    /// The remaining player quit while waiting; the disconnected player wins.
    UpQuit,
    /// The remaining player's transport failed too.
    Abandoned,
    Shutdown,
}

/// Hold the match open until `down` reconnects, the deadline passes, or
/// the rest of the match falls apart. The deadline is the one stamped on
/// the registry entry at disconnect time, so the accept path and this wait
/// agree on when the window closes.
pub(crate) fn await_rejoin(
    down: &mut Side,
    up: &mut Side,
    registry: &Arc<Mutex<Registry>>,
    config: &ServerConfig,
    shutdown: &AtomicBool,
) -> RejoinOutcome {
    let deadline = lock(registry)
        .get(&down.id)
        .and_then(|c| c.reconnect_deadline)
        .unwrap_or_else(|| Instant::now() + config.reconnect_window());
    info!(
        "{}: holding their seat for up to {}s",
        down.id, config.reconnect_secs
    );
    let notice = format!(
        "{} lost their connection. Holding the match for up to {}s.",
        down.id, config.reconnect_secs
    );
    up.writer.system(&notice);
    down.writer.system(&notice);

    let mut next_tick = Instant::now() + Duration::from_secs(1);
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return RejoinOutcome::Shutdown;
        }
        let remaining = match deadline.checked_duration_since(Instant::now()) {
            Some(r) if !r.is_zero() => r,
            _ => return RejoinOutcome::Expired,
        };
        if Instant::now() >= next_tick {
            let countdown = format!(
                "Waiting for {} to reconnect... {}s left.",
                down.id,
                remaining.as_secs().max(1)
            );
            up.writer.system(&countdown);
            down.writer.system(&countdown);
            next_tick += Duration::from_secs(1);
        }

        // The remaining player's events still act immediately.
        loop {
            match up.inputs.try_recv() {
                Ok(PlayerEvent::Line(line)) => {
                    if line.trim().eq_ignore_ascii_case("quit") {
                        return RejoinOutcome::UpQuit;
                    }
                    up.bank_line(line);
                }
                Ok(PlayerEvent::Quit) => return RejoinOutcome::UpQuit,
                Ok(PlayerEvent::Disconnected) => return RejoinOutcome::Abandoned,
                Ok(PlayerEvent::Reconnected) => {}
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return RejoinOutcome::Abandoned,
            }
        }

        match down.inputs.recv_timeout(remaining.min(POLL_SLICE)) {
            Ok(PlayerEvent::Reconnected) => {
                info!("{}: reconnected inside the window", down.id);
                return RejoinOutcome::Rejoined;
            }
            // Residue sent before the transport died.
            Ok(PlayerEvent::Line(line)) => {
                if line.trim().eq_ignore_ascii_case("quit") {
                    return RejoinOutcome::DownQuit;
                }
                down.bank_line(line);
            }
            Ok(PlayerEvent::Quit) => return RejoinOutcome::DownQuit,
            Ok(PlayerEvent::Disconnected) => {} // stale repeat
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            // Removed from the registry: nobody is coming back.
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                return RejoinOutcome::Expired;
            }
        }
    }
}
