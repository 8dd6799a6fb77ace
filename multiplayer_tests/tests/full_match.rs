// End-to-end scenarios against a live server over localhost TCP.
//
// Each test starts its own server on port 0 with budgets tuned for test
// speed (no pre-match countdown, a high input rate so prompt-paced clients
// never trip the rate limiter, and second-scale turn/reconnect budgets
// where a test exercises them). Clients are `TestClient` mocks from the
// harness crate — raw line-framed sockets, no game code.

use std::time::Duration;

use broadside_server::{ServerConfig, start_server};
use multiplayer_tests::TestClient;

fn test_config(turn_secs: u64, reconnect_secs: u64) -> ServerConfig {
    ServerConfig {
        port: 0, // OS picks a free port
        turn_secs,
        reconnect_secs,
        countdown_secs: 0,
        input_rate_per_second: 1000,
        ..ServerConfig::default()
    }
}

/// Standard row-per-ship layout: Carrier on the first row, Destroyer on
/// the last, all horizontal from column 1.
const ROWS_TOP: [char; 5] = ['A', 'B', 'C', 'D', 'E'];
/// The same layout shifted to the bottom half of the board, leaving the
/// top rows empty water.
const ROWS_BOTTOM: [char; 5] = ['F', 'G', 'H', 'I', 'J'];

#[test]
fn happy_path_seventeen_shot_win() {
    let (handle, addr) = start_server(test_config(30, 30)).unwrap();

    let mut alice = TestClient::connect(addr, "alice");
    alice.expect("Welcome to Broadside, alice!");
    let mut bob = TestClient::connect(addr, "bob");
    bob.expect("Welcome to Broadside, bob!");
    // A third client joins after the match spawned and watches it.
    let mut carol = TestClient::connect(addr, "carol");
    carol.expect("you're watching");

    alice.place_fleet_rows(ROWS_TOP);
    bob.place_fleet_rows(ROWS_TOP);

    alice.expect("Let the battle begin!");
    bob.expect("Let the battle begin!");

    // Alice walks every ship cell of bob's fleet in declared order. Every
    // shot passes the turn, so bob's sixteen interleaved turns go into
    // alice's empty bottom rows; alice's seventeenth hit ends the match.
    let shots = [
        "A1", "A2", "A3", "A4", "A5", "B1", "B2", "B3", "B4", "C1", "C2", "C3", "D1", "D2", "D3",
        "E1", "E2",
    ];
    let bob_misses = [
        "J1", "J2", "J3", "J4", "J5", "J6", "J7", "J8", "J9", "J10", "I1", "I2", "I3", "I4", "I5",
        "I6",
    ];
    for (i, shot) in shots.iter().enumerate() {
        alice.expect("Enter a coordinate (like B5):");
        alice.send(shot);
        alice.expect(&format!("You fired at {shot}: HIT!"));
        if i + 1 < shots.len() {
            bob.expect("Enter a coordinate (like B5):");
            bob.send(bob_misses[i]);
            bob.expect(&format!("You fired at {}: MISS!", bob_misses[i]));
        }
    }

    let game_over = alice.expect("GAME OVER!");
    assert!(game_over.contains("alice WINS!"), "got: {game_over}");
    assert!(game_over.contains("All bob's ships are sunk"));
    bob.expect("GAME OVER! alice WINS! All bob's ships are sunk.");

    // The loser saw each sinking from the other side, and every hit still
    // handed him the turn back.
    assert!(bob.saw("Your Carrier was SUNK!"));
    assert!(bob.saw("Your Destroyer was SUNK!"));
    assert!(bob.saw("--- bob, your turn!"));

    // The spectator watched the public pair and the verdict.
    carol.expect("GAME OVER! alice WINS!");
    assert!(carol.saw("alice (left) vs bob (right):"));
    assert!(carol.saw("GRID"));

    handle.stop();
}

#[test]
fn timeout_strike_then_forfeit() {
    let (handle, addr) = start_server(test_config(1, 30)).unwrap();

    let mut alice = TestClient::connect(addr, "alice");
    let mut bob = TestClient::connect(addr, "bob");
    // Alice's fleet sits on the bottom rows, so bob's probe at A1 misses.
    alice.place_fleet_rows(ROWS_BOTTOM);
    bob.place_fleet_rows(ROWS_TOP);

    // Turn 1: alice stays silent past the budget — strike one, turn swaps.
    alice.expect("--- alice, your turn!");
    alice.expect("Warning: 1/2 timeouts.");
    bob.expect("alice timed out");

    // Turn 2: bob fires into empty water.
    bob.expect("Enter a coordinate (like B5):");
    bob.send("A1");
    bob.expect("You fired at A1: MISS!");

    // Turn 3: alice stays silent again — strike two, forfeit.
    let game_over = bob.expect("GAME OVER!");
    assert!(game_over.contains("bob WINS!"), "got: {game_over}");
    assert!(game_over.contains("alice forfeited after 2 timeouts"));
    alice.expect("GAME OVER! bob WINS! alice forfeited after 2 timeouts.");

    handle.stop();
}

#[test]
fn invalid_input_keeps_the_turn_and_costs_nothing() {
    let (handle, addr) = start_server(test_config(30, 30)).unwrap();

    let mut alice = TestClient::connect(addr, "alice");
    let mut bob = TestClient::connect(addr, "bob");
    alice.place_fleet_rows(ROWS_TOP);
    bob.place_fleet_rows(ROWS_TOP);

    alice.expect("Enter a coordinate (like B5):");
    alice.send("ZZ");
    alice.expect("Invalid move 'ZZ'");

    // Still alice's move, on a fresh deadline: a valid shot goes through.
    alice.send("J10");
    alice.expect("You fired at J10: MISS!");
    assert!(
        !alice.saw("Turn skipped"),
        "an invalid move must not count as a timeout strike"
    );

    handle.stop();
}

#[test]
fn reconnect_within_the_window_resumes_the_turn() {
    let (handle, addr) = start_server(test_config(30, 10)).unwrap();

    let mut alice = TestClient::connect(addr, "alice");
    let mut bob = TestClient::connect(addr, "bob");
    alice.place_fleet_rows(ROWS_TOP);
    bob.place_fleet_rows(ROWS_TOP);

    // Alice's turn; her transport drops.
    alice.expect("Enter a coordinate (like B5):");
    drop(alice);
    bob.expect("alice lost their connection");
    bob.expect("Waiting for alice to reconnect...");

    // A new connection bearing the same username splices in.
    let mut alice = TestClient::connect(addr, "alice");
    alice.expect("Welcome back, alice!");
    bob.expect("alice reconnected. Resuming the match.");

    // Same state, fresh timer: still alice's turn, and her shot lands.
    alice.expect("Enter a coordinate (like B5):");
    alice.send("A1");
    alice.expect("You fired at A1: HIT!");

    handle.stop();
}

#[test]
fn reconnect_window_expiry_forfeits_the_match() {
    let (handle, addr) = start_server(test_config(30, 1)).unwrap();

    let mut alice = TestClient::connect(addr, "alice");
    let mut bob = TestClient::connect(addr, "bob");
    alice.place_fleet_rows(ROWS_TOP);
    bob.place_fleet_rows(ROWS_TOP);

    alice.expect("Enter a coordinate (like B5):");
    drop(alice);

    bob.expect("alice lost their connection");
    let game_over = bob.expect("GAME OVER!");
    assert!(game_over.contains("bob WINS!"), "got: {game_over}");
    assert!(game_over.contains("alice did not reconnect in time"));

    handle.stop();
}

#[test]
fn spectator_is_promoted_into_the_next_match() {
    let (handle, addr) = start_server(test_config(5, 30)).unwrap();

    let mut p1 = TestClient::connect(addr, "p1");
    let mut p2 = TestClient::connect(addr, "p2");
    let mut s1 = TestClient::connect(addr, "s1");
    s1.expect("you're watching");
    s1.expect("A match between p1 and p2 is starting.");

    // P1 places a full fleet; p2 concedes at the first prompt.
    p1.place_fleet_rows(ROWS_TOP);
    p2.expect("Enter start coordinate");
    p2.send("quit");

    p1.expect("GAME OVER! p1 WINS! p2 quit.");
    s1.expect("GAME OVER! p1 WINS! p2 quit.");

    // Recycling: the old players go to the back of the queue...
    p2.expect("You are number 3 of 3 in the queue.");
    // ...and the spectator plus the first surviving player are seated.
    s1.expect("You've been matched against p1!");
    s1.expect("Enter start coordinate");
    p1.expect("You've been matched against s1!");

    handle.stop();
}

#[test]
fn chat_reaches_everyone_except_the_sender() {
    let (handle, addr) = start_server(test_config(30, 30)).unwrap();

    let mut p1 = TestClient::connect(addr, "p1");
    let mut p2 = TestClient::connect(addr, "p2");
    let mut s1 = TestClient::connect(addr, "s1");
    s1.expect("you're watching");

    // A spectator's bare line is chat; it reaches both seated players.
    s1.send("good luck folks");
    p1.expect("[CHAT] Spectator s1: good luck folks");
    p2.expect("[CHAT] Spectator s1: good luck folks");

    // A seated player chats with the explicit command mid-placement.
    p1.send("/chat thanks");
    s1.expect("[CHAT] Player p1: thanks");
    assert!(!s1.saw("[CHAT] Spectator s1:"), "senders must not echo themselves");

    handle.stop();
}

#[test]
fn already_shot_wastes_the_turn_but_advances_it() {
    let (handle, addr) = start_server(test_config(30, 30)).unwrap();

    let mut alice = TestClient::connect(addr, "alice");
    let mut bob = TestClient::connect(addr, "bob");
    alice.place_fleet_rows(ROWS_TOP);
    bob.place_fleet_rows(ROWS_TOP);

    // Alice misses at J10, handing bob the turn; bob misses back; then
    // alice repeats her spent cell.
    alice.expect("Enter a coordinate (like B5):");
    alice.send("J10");
    alice.expect("You fired at J10: MISS!");

    bob.expect("Enter a coordinate (like B5):");
    bob.send("J10");
    bob.expect("You fired at J10: MISS!");

    alice.expect("Enter a coordinate (like B5):");
    alice.send("J10");
    alice.expect("you already shot there! Turn wasted.");
    bob.expect("alice fired at a spot they already tried.");

    // The wasted turn still advanced: bob is up again.
    bob.expect("--- bob, your turn!");

    handle.stop();
}

#[test]
fn server_shutdown_notifies_clients() {
    let (handle, addr) = start_server(test_config(30, 30)).unwrap();

    let mut alice = TestClient::connect(addr, "alice");
    alice.expect("Welcome to Broadside, alice!");

    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        handle.stop();
    });
    alice.expect("Server shutting down. Goodbye.");
    stopper.join().unwrap();
}
