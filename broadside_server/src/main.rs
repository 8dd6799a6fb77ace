// CLI entry point for the Broadside session server.
//
// Starts a standalone server that Battleship clients connect to over TCP.
// See `server.rs` for the networking architecture and `game_loop.rs` for
// the match state machine.
//
// Usage:
//   broadside [OPTIONS]
//     --host <ADDR>            Listen address (default: 127.0.0.1)
//     --port <PORT>            Listen port (default: 5001)
//     --codec <line|packet>    Wire framing (default: line)
//     --turn-secs <N>          Per-turn inactivity budget (default: 30)
//     --reconnect-secs <N>     Reconnect window (default: 30)
//     --max-timeouts <N>       Strikes before forfeit (default: 2)
//     --max-connections <N>    Connection cap (default: 6)
//     --countdown-secs <N>     Pre-match countdown (default: 5)
//     --input-rate <N>         Accepted lines per second (default: 2)
//     --config <FILE>          JSON config file, overridden by flags

use std::path::Path;

use broadside_server::{ServerConfig, start_server};

fn main() {
    env_logger::init();
    let config = parse_args();

    let (_handle, addr) = match start_server(config) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Failed to start server: {e}");
            std::process::exit(1);
        }
    };

    println!("Broadside listening on {addr}");
    println!("Press Ctrl+C to stop.");

    // The process exits on SIGINT/SIGTERM by default, which tears the
    // listener and client threads down with it; `ServerHandle::stop` exists
    // for embedders that want a graceful stop. Here we just park the main
    // thread.
    loop {
        std::thread::sleep(std::time::Duration::from_millis(500));
    }
}

/// Parse command-line arguments into a `ServerConfig`. Uses simple
/// `std::env::args()` matching — no clap dependency. A `--config` file is
/// loaded first; explicit flags override it regardless of order.
fn parse_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();

    // First pass: the config file, so flags can override it.
    let mut config = ServerConfig::default();
    let mut i = 1;
    while i < args.len() {
        if args[i] == "--config" {
            i += 1;
            let path = args.get(i).cloned().unwrap_or_else(|| {
                eprintln!("--config requires a file path");
                std::process::exit(1);
            });
            config = ServerConfig::load(Path::new(&path)).unwrap_or_else(|e| {
                eprintln!("{e}");
                std::process::exit(1);
            });
        }
        i += 1;
    }

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1; // handled in the first pass
            }
            "--host" => {
                i += 1;
                config.host = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--host requires an address");
                    std::process::exit(1);
                });
            }
            "--port" => {
                i += 1;
                config.port = parsed_flag(&args, i, "--port");
            }
            "--codec" => {
                i += 1;
                config.codec = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--codec requires 'line' or 'packet'");
                    std::process::exit(1);
                });
            }
            "--turn-secs" => {
                i += 1;
                config.turn_secs = parsed_flag(&args, i, "--turn-secs");
            }
            "--reconnect-secs" => {
                i += 1;
                config.reconnect_secs = parsed_flag(&args, i, "--reconnect-secs");
            }
            "--max-timeouts" => {
                i += 1;
                config.max_timeouts = parsed_flag(&args, i, "--max-timeouts");
            }
            "--max-connections" => {
                i += 1;
                config.max_connections = parsed_flag(&args, i, "--max-connections");
            }
            "--countdown-secs" => {
                i += 1;
                config.countdown_secs = parsed_flag(&args, i, "--countdown-secs");
            }
            "--input-rate" => {
                i += 1;
                config.input_rate_per_second = parsed_flag(&args, i, "--input-rate");
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config
}

fn parsed_flag<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> T {
    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
        eprintln!("{flag} requires a valid number");
        std::process::exit(1);
    })
}

fn print_usage() {
    println!("Usage: broadside [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --host <ADDR>            Listen address (default: 127.0.0.1)");
    println!("  --port <PORT>            Listen port (default: 5001)");
    println!("  --codec <line|packet>    Wire framing (default: line)");
    println!("  --turn-secs <N>          Per-turn inactivity budget (default: 30)");
    println!("  --reconnect-secs <N>     Reconnect window (default: 30)");
    println!("  --max-timeouts <N>       Strikes before forfeit (default: 2)");
    println!("  --max-connections <N>    Connection cap (default: 6)");
    println!("  --countdown-secs <N>     Pre-match countdown (default: 5)");
    println!("  --input-rate <N>         Accepted lines per second (default: 2)");
    println!("  --config <FILE>          JSON config file, overridden by flags");
    println!("  --help, -h               Show this help");
}
