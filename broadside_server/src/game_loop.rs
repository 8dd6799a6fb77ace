// The match controller: one thread per match, sole owner of both grids.
//
// A controller owns the two grids, the turn pointer, the strike counters,
// and the receiving ends of both players' bounded input channels. Nothing
// else ever touches a grid; spectators and opponents only ever see
// renderings the controller publishes.
//
// Control flow is a plain switch over tagged outcomes. Every blocking
// receive is `recv_timeout` sliced into sub-second polls, so a 30-second
// turn budget still notices server shutdown and the waiting player's
// disconnect promptly. There are no watcher threads and no exceptions-as-
// control-flow: timeouts, closures, quits, and disconnects each map to one
// enum variant the state machine matches on.
//
// Phases:
// 1. Pairing announcement and the pre-match countdown.
// 2. Placement — both players place the canonical fleet concurrently, each
//    driven by its own scoped thread under a doubled inactivity budget.
//    Validation failures retry the same ship and never cost a strike.
// 3. Turns — the active player gets one move per inactivity budget.
//    Every resolved shot (hit, miss, or wasted repeat) passes the turn;
//    only an unparseable coordinate re-awaits the same player. Strikes
//    accumulate per player and reset on a valid move; reaching the limit
//    forfeits. A mid-turn transport failure on either seat opens the
//    reconnect window (`reconnect.rs`) instead of ending the match.
//
// The winner-decision line goes out before the final board renders, with
// identical phrasing to both sides, and the controller's last act is
// reporting `MatchFinished` back to the main loop for queue recycling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{info, warn};

use broadside_game::{Coord, FLEET, Grid, Orientation, ShotOutcome, View, render_side_by_side};

use crate::client::{ClientWriter, PlayerEvent};
use crate::config::ServerConfig;
use crate::lock;
use crate::reconnect::{self, RejoinOutcome};
use crate::registry::Registry;
use crate::server::ServerEvent;

/// Long waits are cut into slices this small so shutdown and the waiting
/// player's events stay responsive.
pub(crate) const POLL_SLICE: Duration = Duration::from_millis(100);

/// Cap on moves a player may bank while it isn't their turn.
const PENDING_LIMIT: usize = 8;

/// Everything a controller needs from the player it was handed at
/// promotion time.
pub struct PlayerSeat {
    pub id: String,
    pub writer: Arc<ClientWriter>,
    pub inputs: Receiver<PlayerEvent>,
}

/// Shared server context a match runs inside.
pub struct MatchRuntime {
    pub registry: Arc<Mutex<Registry>>,
    pub events: Sender<ServerEvent>,
    pub config: ServerConfig,
    pub shutdown: Arc<AtomicBool>,
}

/// Controller-side state for one seat.
pub(crate) struct Side {
    pub(crate) id: String,
    pub(crate) writer: Arc<ClientWriter>,
    pub(crate) inputs: Receiver<PlayerEvent>,
    pub(crate) grid: Grid,
    pub(crate) strikes: u32,
    pub(crate) pending: VecDeque<String>,
}

impl Side {
    fn new(seat: PlayerSeat) -> Self {
        Self {
            id: seat.id,
            writer: seat.writer,
            inputs: seat.inputs,
            grid: Grid::new(),
            strikes: 0,
            pending: VecDeque::new(),
        }
    }

    /// Bank an off-turn line for this player's next turn.
    pub(crate) fn bank_line(&mut self, line: String) {
        if self.pending.len() < PENDING_LIMIT {
            self.pending.push_back(line);
        } else {
            self.writer.system("Input ignored; wait for your turn.");
        }
    }
}

/// Why one player's part of the match fell apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MatchFail {
    Quit,
    Timeout,
    Disconnected,
    Closed,
    Shutdown,
    Internal,
}

impl MatchFail {
    fn describe(self) -> &'static str {
        match self {
            MatchFail::Quit => "quit",
            MatchFail::Timeout => "ran out of time",
            MatchFail::Disconnected | MatchFail::Closed => "lost their connection",
            MatchFail::Shutdown => "server shutdown",
            MatchFail::Internal => "server error",
        }
    }
}

/// Outcome of one timed receive on a single player's channel.
pub(crate) enum Await {
    Line(String),
    Quit,
    Timeout,
    Closed,
    Disconnected,
    Reconnected,
    Shutdown,
}

/// Timed receive with a hard deadline, sliced so shutdown stays visible.
pub(crate) fn recv_deadline(
    rx: &Receiver<PlayerEvent>,
    budget: Duration,
    shutdown: &AtomicBool,
) -> Await {
    let deadline = Instant::now() + budget;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return Await::Shutdown;
        }
        let remaining = match deadline.checked_duration_since(Instant::now()) {
            Some(r) if !r.is_zero() => r,
            _ => return Await::Timeout,
        };
        match rx.recv_timeout(remaining.min(POLL_SLICE)) {
            Ok(PlayerEvent::Line(line)) => return Await::Line(line),
            Ok(PlayerEvent::Quit) => return Await::Quit,
            Ok(PlayerEvent::Disconnected) => return Await::Disconnected,
            Ok(PlayerEvent::Reconnected) => return Await::Reconnected,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Await::Closed,
        }
    }
}

/// Sleep in slices; false if shutdown fired first.
fn sleep_unless_shutdown(shutdown: &AtomicBool, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        if remaining.is_zero() {
            break;
        }
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        thread::sleep(remaining.min(POLL_SLICE));
    }
    !shutdown.load(Ordering::SeqCst)
}

pub fn spawn_match(seats: [PlayerSeat; 2], runtime: MatchRuntime) -> JoinHandle<()> {
    thread::spawn(move || run_match(seats, runtime))
}

/// Run one match to completion. Public so the state machine can be driven
/// directly in tests without sockets.
pub fn run_match(seats: [PlayerSeat; 2], runtime: MatchRuntime) {
    let [seat0, seat1] = seats;
    let mut side0 = Side::new(seat0);
    let mut side1 = Side::new(seat1);
    let players = [side0.id.clone(), side1.id.clone()];
    info!("match starting: {} vs {}", side0.id, side1.id);

    side0.writer.game(&format!("You've been matched against {}!", side1.id));
    side1.writer.game(&format!("You've been matched against {}!", side0.id));
    let watchers = lock(&runtime.registry).spectator_writers();
    for watcher in watchers {
        watcher.system(&format!(
            "A match between {} and {} is starting.",
            side0.id, side1.id
        ));
    }

    let mut countdown_done = true;
    for n in (1..=runtime.config.countdown_secs).rev() {
        side0.writer.system(&format!("Match starting in {n}..."));
        side1.writer.system(&format!("Match starting in {n}..."));
        if !sleep_unless_shutdown(&runtime.shutdown, Duration::from_secs(1)) {
            countdown_done = false;
            break;
        }
    }

    if countdown_done && place_phase(&mut side0, &mut side1, &runtime) {
        turn_phase(&mut side0, &mut side1, &runtime);
    } else if !countdown_done {
        abort_for_shutdown(&side0, &side1);
    }

    info!("match finished: {} vs {}", side0.id, side1.id);
    let _ = runtime.events.send(ServerEvent::MatchFinished { players });
}

// --- Placement phase ---

/// Run both placement routines concurrently. Returns true if the match
/// should proceed to turns.
fn place_phase(side0: &mut Side, side1: &mut Side, runtime: &MatchRuntime) -> bool {
    let budget = runtime.config.place_budget();
    let shutdown = &runtime.shutdown;
    let (result0, result1) = thread::scope(|s| {
        let handle0 = s.spawn(|| place_fleet(side0, budget, shutdown));
        let handle1 = s.spawn(|| place_fleet(side1, budget, shutdown));
        (
            handle0.join().unwrap_or(Err(MatchFail::Internal)),
            handle1.join().unwrap_or(Err(MatchFail::Internal)),
        )
    });

    match (result0, result1) {
        (Ok(()), Ok(())) => true,
        (fail0, fail1) => {
            end_after_placement(side0, side1, fail0.err(), fail1.err(), runtime);
            false
        }
    }
}

/// Drive one player through placing the canonical fleet, ship by ship in
/// declared order. Validation failures retry the same ship without
/// consuming a strike; only inactivity, quits, and transport loss fail the
/// placement.
fn place_fleet(side: &mut Side, budget: Duration, shutdown: &AtomicBool) -> Result<(), MatchFail> {
    side.writer
        .system(&format!("Welcome, {}! Time to place your ships.", side.id));
    for (name, len) in FLEET {
        loop {
            side.writer.system("Here's your board:");
            side.writer.grid(&side.grid.render(View::Truth));
            side.writer.system(&format!("Place your {name} (size {len})."));
            side.writer.system("Enter start coordinate (like A1):");
            let Some(coord_line) = placement_input(side, budget, shutdown)? else {
                continue;
            };

            side.writer.system("Enter orientation ('H' or 'V'):");
            let Some(orient_line) = placement_input(side, budget, shutdown)? else {
                continue;
            };

            let at = match coord_line.parse::<Coord>() {
                Ok(at) => at,
                Err(e) => {
                    side.writer.error_line(&format!("Invalid input: {e}. Try again."));
                    continue;
                }
            };
            let orient = match orient_line.parse::<Orientation>() {
                Ok(orient) => orient,
                Err(e) => {
                    side.writer.error_line(&format!("Invalid input: {e}. Try again."));
                    continue;
                }
            };

            match side.grid.place_ship(name, at, orient, len) {
                Ok(()) => {
                    side.writer
                        .system(&format!("{name} placed successfully at {at}{orient}."));
                    break;
                }
                Err(e) => {
                    side.writer.error_line(&format!(
                        "Can't place {name} at {at}{orient}: {e}. Try again."
                    ));
                }
            }
        }
    }
    side.writer.system("All ships placed!");
    side.writer.grid(&side.grid.render(View::Truth));
    side.writer.system("Waiting for the other player...");
    Ok(())
}

/// One placement answer. `Ok(None)` means the prompt should be reissued
/// (a reconnect landed mid-prompt).
fn placement_input(
    side: &mut Side,
    budget: Duration,
    shutdown: &AtomicBool,
) -> Result<Option<String>, MatchFail> {
    if let Some(line) = side.pending.pop_front() {
        if line.trim().eq_ignore_ascii_case("quit") {
            return Err(MatchFail::Quit);
        }
        return Ok(Some(line));
    }
    match recv_deadline(&side.inputs, budget, shutdown) {
        Await::Line(line) => {
            if line.trim().eq_ignore_ascii_case("quit") {
                Err(MatchFail::Quit)
            } else {
                Ok(Some(line))
            }
        }
        Await::Reconnected => Ok(None),
        Await::Quit => Err(MatchFail::Quit),
        Await::Timeout => Err(MatchFail::Timeout),
        Await::Disconnected => Err(MatchFail::Disconnected),
        Await::Closed => Err(MatchFail::Closed),
        Await::Shutdown => Err(MatchFail::Shutdown),
    }
}

fn end_after_placement(
    side0: &Side,
    side1: &Side,
    fail0: Option<MatchFail>,
    fail1: Option<MatchFail>,
    runtime: &MatchRuntime,
) {
    if fail0 == Some(MatchFail::Shutdown) || fail1 == Some(MatchFail::Shutdown) {
        abort_for_shutdown(side0, side1);
        return;
    }
    if let Some(fail) = fail0 {
        side1.writer.system(&format!(
            "{} couldn't place ships ({}).",
            side0.id,
            fail.describe()
        ));
    }
    if let Some(fail) = fail1 {
        side0.writer.system(&format!(
            "{} couldn't place ships ({}).",
            side1.id,
            fail.describe()
        ));
    }
    match (fail0, fail1) {
        (Some(fail), None) => {
            let reason = placement_reason(&side0.id, fail);
            game_over(side1, side0, &reason, &runtime.registry);
        }
        (None, Some(fail)) => {
            let reason = placement_reason(&side1.id, fail);
            game_over(side0, side1, &reason, &runtime.registry);
        }
        _ => {
            let line = "GAME OVER! The match was abandoned before it began.";
            for side in [side0, side1] {
                side.writer.game(line);
                side.writer.system("Your final board:");
                side.writer.grid(&side.grid.render(View::Truth));
            }
            let watchers = lock(&runtime.registry).spectator_writers();
            for watcher in watchers {
                watcher.game(line);
            }
        }
    }
}

fn placement_reason(id: &str, fail: MatchFail) -> String {
    match fail {
        MatchFail::Quit => format!("{id} quit"),
        MatchFail::Timeout => format!("{id} took too long to place ships"),
        MatchFail::Disconnected | MatchFail::Closed => format!("{id} lost their connection"),
        MatchFail::Shutdown | MatchFail::Internal => "server error".to_string(),
    }
}

// --- Turn phase ---

/// What a completed wait for the active player's move means for the match.
enum TurnStep {
    Fired(Coord),
    TimedOut,
    WindowFor { me_down: bool },
    End { winner_is_me: bool, reason: String },
    Shutdown,
}

enum MoveWait {
    Move(String),
    MeQuit,
    MeTimeout,
    MeClosed,
    MeDisconnected,
    OppQuit,
    OppClosed,
    OppDisconnected,
    Shutdown,
}

fn turn_phase(side0: &mut Side, side1: &mut Side, runtime: &MatchRuntime) {
    side0.writer.game("Both players ready. Let the battle begin!");
    side1.writer.game("Both players ready. Let the battle begin!");
    broadcast_boards(runtime, side0, side1, true);

    let mut active = 0usize;
    loop {
        if runtime.shutdown.load(Ordering::SeqCst) {
            abort_for_shutdown(side0, side1);
            return;
        }
        let me_is_first = active == 0;
        let (me, opp) = if me_is_first {
            (&mut *side0, &mut *side1)
        } else {
            (&mut *side1, &mut *side0)
        };

        me.writer.game(&format!("--- {}, your turn! ---", me.id));
        me.writer.system(&format!("Your view of {}'s board:", opp.id));
        me.writer.grid(&opp.grid.render(View::Public));
        me.writer.system(&format!(
            "You have {} seconds to make your move. Enter a coordinate (like B5):",
            runtime.config.turn_secs
        ));
        opp.writer.system(&format!("Waiting for {} to move...", me.id));
        broadcast_boards(runtime, me, opp, me_is_first);

        let step = loop {
            match await_move(me, opp, runtime.config.turn_budget(), &runtime.shutdown) {
                MoveWait::Move(text) => {
                    let text = text.trim().to_string();
                    if text.eq_ignore_ascii_case("quit") {
                        break TurnStep::End {
                            winner_is_me: false,
                            reason: format!("{} quit", me.id),
                        };
                    }
                    match text.parse::<Coord>() {
                        Ok(at) => break TurnStep::Fired(at),
                        Err(e) => {
                            // No strike, no turn change; the timer restarts.
                            me.writer
                                .error_line(&format!("Invalid move '{text}': {e}. Try again."));
                        }
                    }
                }
                MoveWait::MeQuit => {
                    break TurnStep::End {
                        winner_is_me: false,
                        reason: format!("{} quit", me.id),
                    };
                }
                MoveWait::OppQuit => {
                    break TurnStep::End {
                        winner_is_me: true,
                        reason: format!("{} quit", opp.id),
                    };
                }
                MoveWait::MeTimeout => break TurnStep::TimedOut,
                MoveWait::MeDisconnected => break TurnStep::WindowFor { me_down: true },
                MoveWait::OppDisconnected => break TurnStep::WindowFor { me_down: false },
                MoveWait::MeClosed => {
                    break TurnStep::End {
                        winner_is_me: false,
                        reason: format!("{} left the server", me.id),
                    };
                }
                MoveWait::OppClosed => {
                    break TurnStep::End {
                        winner_is_me: true,
                        reason: format!("{} left the server", opp.id),
                    };
                }
                MoveWait::Shutdown => break TurnStep::Shutdown,
            }
        };

        match step {
            TurnStep::Fired(at) => {
                me.strikes = 0;
                let outcome = opp.grid.fire_at(at);
                announce_shot(me, opp, at, outcome);
                if !matches!(outcome, ShotOutcome::AlreadyShot) {
                    opp.writer.system("Your board after their shot:");
                    opp.writer.grid(&opp.grid.render(View::Truth));
                    broadcast_boards(runtime, me, opp, me_is_first);
                }
                if opp.grid.all_sunk() {
                    let reason = format!("All {}'s ships are sunk", opp.id);
                    game_over(me, opp, &reason, &runtime.registry);
                    return;
                }
                // Every resolved shot passes the turn, hits included; a
                // wasted repeat is still a spent turn.
                active = 1 - active;
            }
            TurnStep::TimedOut => {
                me.strikes += 1;
                let max = runtime.config.max_timeouts;
                if me.strikes >= max {
                    let reason = format!("{} forfeited after {max} timeouts", me.id);
                    game_over(opp, me, &reason, &runtime.registry);
                    return;
                }
                me.writer.system(&format!(
                    "Move timeout. Turn skipped. Warning: {}/{max} timeouts.",
                    me.strikes
                ));
                opp.writer.system(&format!(
                    "{} timed out. Their turn was skipped. They have {}/{max} timeouts.",
                    me.id, me.strikes
                ));
                active = 1 - active;
            }
            TurnStep::WindowFor { me_down } => {
                let (down, up) = if me_down { (&mut *me, &mut *opp) } else { (&mut *opp, &mut *me) };
                match reconnect::await_rejoin(down, up, &runtime.registry, &runtime.config, &runtime.shutdown) {
                    RejoinOutcome::Rejoined => {
                        up.writer
                            .system(&format!("{} reconnected. Resuming the match.", down.id));
                        // Re-run the turn from the banner with a fresh budget.
                    }
                    RejoinOutcome::Expired => {
                        let reason = format!("{} did not reconnect in time", down.id);
                        game_over(up, down, &reason, &runtime.registry);
                        return;
                    }
                    RejoinOutcome::DownQuit => {
                        let reason = format!("{} quit", down.id);
                        game_over(up, down, &reason, &runtime.registry);
                        return;
                    }
                    RejoinOutcome::UpQuit => {
                        let reason = format!("{} quit", up.id);
                        game_over(down, up, &reason, &runtime.registry);
                        return;
                    }
                    RejoinOutcome::Abandoned => {
                        warn!("both players gone; abandoning {} vs {}", side0.id, side1.id);
                        let line = "GAME OVER! Both players lost their connection.";
                        side0.writer.game(line);
                        side1.writer.game(line);
                        let watchers = lock(&runtime.registry).spectator_writers();
                        for watcher in watchers {
                            watcher.game(line);
                        }
                        return;
                    }
                    RejoinOutcome::Shutdown => {
                        abort_for_shutdown(side0, side1);
                        return;
                    }
                }
            }
            TurnStep::End { winner_is_me, reason } => {
                if winner_is_me {
                    game_over(me, opp, &reason, &runtime.registry);
                } else {
                    game_over(opp, me, &reason, &runtime.registry);
                }
                return;
            }
            TurnStep::Shutdown => {
                abort_for_shutdown(side0, side1);
                return;
            }
        }
    }
}

/// Wait for the active player's move while keeping the waiting player's
/// channel drained, so their quits and disconnects act immediately and
/// their early moves are banked for their next turn.
fn await_move(me: &mut Side, opp: &mut Side, budget: Duration, shutdown: &AtomicBool) -> MoveWait {
    if let Some(line) = me.pending.pop_front() {
        return MoveWait::Move(line);
    }
    let deadline = Instant::now() + budget;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return MoveWait::Shutdown;
        }
        loop {
            match opp.inputs.try_recv() {
                Ok(PlayerEvent::Line(line)) => {
                    if line.trim().eq_ignore_ascii_case("quit") {
                        return MoveWait::OppQuit;
                    }
                    opp.bank_line(line);
                }
                Ok(PlayerEvent::Quit) => return MoveWait::OppQuit,
                Ok(PlayerEvent::Disconnected) => return MoveWait::OppDisconnected,
                Ok(PlayerEvent::Reconnected) => {}
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return MoveWait::OppClosed,
            }
        }
        let remaining = match deadline.checked_duration_since(Instant::now()) {
            Some(r) if !r.is_zero() => r,
            _ => return MoveWait::MeTimeout,
        };
        match me.inputs.recv_timeout(remaining.min(POLL_SLICE)) {
            Ok(PlayerEvent::Line(line)) => return MoveWait::Move(line),
            Ok(PlayerEvent::Quit) => return MoveWait::MeQuit,
            Ok(PlayerEvent::Disconnected) => return MoveWait::MeDisconnected,
            Ok(PlayerEvent::Reconnected) => {}
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return MoveWait::MeClosed,
        }
    }
}

fn announce_shot(me: &Side, opp: &Side, at: Coord, outcome: ShotOutcome) {
    match outcome {
        ShotOutcome::Hit { sunk: Some(name) } => {
            me.writer
                .game(&format!("You fired at {at}: HIT! You sank their {name}!"));
            opp.writer
                .game(&format!("{} fired at {at}: HIT! Your {name} was SUNK!", me.id));
        }
        ShotOutcome::Hit { sunk: None } => {
            me.writer.game(&format!("You fired at {at}: HIT!"));
            opp.writer
                .game(&format!("{} fired at {at}: HIT! One of your ships was hit!", me.id));
        }
        ShotOutcome::Miss => {
            me.writer.game(&format!("You fired at {at}: MISS!"));
            opp.writer.game(&format!("{} fired at {at}: MISS!", me.id));
        }
        ShotOutcome::AlreadyShot => {
            me.writer.system(&format!(
                "You fired at {at}: you already shot there! Turn wasted."
            ));
            opp.writer.system(&format!(
                "{} fired at a spot they already tried. The turn passes.",
                me.id
            ));
        }
    }
}

/// Send the winner-decision line to both sides (identical phrasing), then
/// each side's final view, then tell the spectators.
fn game_over(winner: &Side, loser: &Side, reason: &str, registry: &Arc<Mutex<Registry>>) {
    let line = format!("GAME OVER! {} WINS! {reason}.", winner.id);
    winner.writer.game(&line);
    winner.writer.system("Final view of the enemy board:");
    winner.writer.grid(&loser.grid.render(View::Public));
    loser.writer.game(&line);
    loser.writer.system("Your final board:");
    loser.writer.grid(&loser.grid.render(View::Truth));
    let watchers = lock(registry).spectator_writers();
    for watcher in watchers {
        watcher.game(&line);
    }
    info!("{}", line);
}

fn abort_for_shutdown(side0: &Side, side1: &Side) {
    side0.writer.system("Server shutting down. The match is cancelled.");
    side1.writer.system("Server shutting down. The match is cancelled.");
}

/// Publish both public views side by side to every active spectator.
/// Writers are snapshotted under the registry lock; writing happens after
/// it is released.
fn broadcast_boards(runtime: &MatchRuntime, me: &Side, opp: &Side, me_is_first: bool) {
    let watchers = lock(&runtime.registry).spectator_writers();
    if watchers.is_empty() {
        return;
    }
    let (left, right) = if me_is_first { (me, opp) } else { (opp, me) };
    let caption = format!("{} (left) vs {} (right):", left.id, right.id);
    let pair = render_side_by_side(&left.grid, &right.grid);
    for watcher in watchers {
        watcher.system(&caption);
        watcher.grid(&pair);
    }
}
