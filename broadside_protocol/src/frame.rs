// Frame vocabulary shared by both codecs.
//
// `FrameKind` carries the seven wire type codes. The line codec only
// distinguishes `BoardUpdate` (grid block) from everything else on the way
// out and tags all inbound lines `UserInput`; the packet codec carries the
// code explicitly in its type byte.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Wire frame types. The numeric values are the packet codec's type byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Player move, ship placement, or chat from a client.
    UserInput = 1,
    /// System messages from the server (welcome, errors, notices).
    SystemMessage = 2,
    /// Chat relayed between players and spectators.
    ChatMessage = 3,
    /// Board/grid renderings.
    BoardUpdate = 4,
    /// Game start, end, or status updates.
    GameState = 5,
    /// Error or invalid-frame notification.
    Error = 6,
    /// Acknowledgement (reserved for reliability layers).
    Ack = 7,
}

impl FrameKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(FrameKind::UserInput),
            2 => Some(FrameKind::SystemMessage),
            3 => Some(FrameKind::ChatMessage),
            4 => Some(FrameKind::BoardUpdate),
            5 => Some(FrameKind::GameState),
            6 => Some(FrameKind::Error),
            7 => Some(FrameKind::Ack),
            _ => None,
        }
    }
}

/// One logical message on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub text: String,
}

impl Frame {
    pub fn new(kind: FrameKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// Which framing a server process speaks. Selected once at startup; the two
/// framings are never mixed on one session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Line,
    Packet,
}

impl FromStr for CodecKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "line" => Ok(CodecKind::Line),
            "packet" => Ok(CodecKind::Packet),
            other => Err(format!("unknown codec '{other}' (expected 'line' or 'packet')")),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecKind::Line => write!(f, "line"),
            CodecKind::Packet => write!(f, "packet"),
        }
    }
}
