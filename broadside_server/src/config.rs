// Server configuration.
//
// Every tunable named in the protocol docs lives here with its default:
// the per-turn inactivity budget, the reconnect window, the strike limit,
// the connection cap, the pre-match countdown, and the input rate limit.
// The placement budget is always twice the turn budget and is derived, not
// stored.
//
// A config can be loaded from a JSON file (`--config server.json`) and then
// overridden field by field from the command line; `#[serde(default)]`
// means a file only needs the fields it wants to change.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use broadside_protocol::CodecKind;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub host: String,
    /// Listen port. 0 lets the OS pick (used by tests).
    pub port: u16,
    /// Which framing this process speaks. Never mixed per session.
    pub codec: CodecKind,
    /// Per-turn inactivity budget, seconds.
    pub turn_secs: u64,
    /// Reconnect window after a mid-match transport failure, seconds.
    pub reconnect_secs: u64,
    /// Consecutive inactivity strikes before a player forfeits.
    pub max_timeouts: u32,
    /// Hard cap on simultaneously connected clients.
    pub max_connections: usize,
    /// Seconds counted down before the placement phase starts.
    pub countdown_secs: u64,
    /// Accepted inbound lines per second, per client.
    pub input_rate_per_second: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5001,
            codec: CodecKind::Line,
            turn_secs: 30,
            reconnect_secs: 30,
            max_timeouts: 2,
            max_connections: 6,
            countdown_secs: 5,
            input_rate_per_second: 2,
        }
    }
}

impl ServerConfig {
    /// How long the active player has to produce a move.
    pub fn turn_budget(&self) -> Duration {
        Duration::from_secs(self.turn_secs)
    }

    /// How long a placement step may take: twice the turn budget.
    pub fn place_budget(&self) -> Duration {
        Duration::from_secs(self.turn_secs * 2)
    }

    /// How long a disconnected player's seat is held open.
    pub fn reconnect_window(&self) -> Duration {
        Duration::from_secs(self.reconnect_secs)
    }

    /// Minimum spacing between accepted inbound lines.
    pub fn min_input_spacing(&self) -> Duration {
        Duration::from_secs(1) / self.input_rate_per_second.max(1)
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("can't read {}: {e}", path.display()))?;
        serde_json::from_str(&text).map_err(|e| format!("bad config {}: {e}", path.display()))
    }
}
