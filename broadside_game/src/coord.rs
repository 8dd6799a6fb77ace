// Board coordinates and ship orientation.
//
// The external coordinate form is `<letter><1..10>` — `A1` through `J10`,
// row letter first. Parsing is strict: two or three characters, a row letter
// in `A..J` (case-folded), and a column number in `1..10`. Anything else is
// an input error reported back to the offending client, never a protocol
// error. The internal form is a zero-based `(row, col)` pair.
//
// `Coord` round-trips: `Coord::from_str(s).to_string()` equals the
// canonical (uppercased) form of every valid `s`, and parsing a rendered
// coordinate yields the original value.

use std::fmt;
use std::str::FromStr;

/// Board edge length. The game is always played on a 10×10 grid.
pub const BOARD_SIZE: usize = 10;

/// A zero-based board position. Row 0 is `A`, column 0 is `1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coord {
    pub row: u8,
    pub col: u8,
}

impl Coord {
    /// Build a coordinate from zero-based indices, if in bounds.
    pub fn new(row: usize, col: usize) -> Option<Self> {
        if row < BOARD_SIZE && col < BOARD_SIZE {
            // BOARD_SIZE is 10, so these always fit in a u8.
            Some(Self {
                row: row as u8,
                col: col as u8,
            })
        } else {
            None
        }
    }
}

/// Why a coordinate string was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoordParseError {
    /// Not 2–3 characters.
    BadLength(String),
    /// Row letter outside `A..J`.
    BadRow(char),
    /// Column part is not a number.
    BadColumn(String),
    /// Parsed fine but lies outside the board.
    OutOfBounds(String),
}

impl fmt::Display for CoordParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordParseError::BadLength(s) => {
                write!(f, "bad format '{s}', should be like A1 or J10")
            }
            CoordParseError::BadRow(c) => {
                write!(f, "row letter '{c}' is wrong, need A-J")
            }
            CoordParseError::BadColumn(s) => {
                write!(f, "column part '{s}' isn't a number")
            }
            CoordParseError::OutOfBounds(s) => {
                write!(f, "coordinate {s} is outside the board (A1-J10)")
            }
        }
    }
}

impl std::error::Error for CoordParseError {}

impl FromStr for Coord {
    type Err = CoordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let canonical = s.trim().to_ascii_uppercase();
        if canonical.len() < 2 || canonical.len() > 3 {
            return Err(CoordParseError::BadLength(canonical));
        }

        let mut chars = canonical.chars();
        let row_letter = chars.next().ok_or(CoordParseError::BadLength(canonical.clone()))?;
        let col_digits: String = chars.collect();

        if !row_letter.is_ascii_uppercase() {
            return Err(CoordParseError::BadRow(row_letter));
        }
        let row = (row_letter as usize) - ('A' as usize);
        if row >= BOARD_SIZE {
            return Err(CoordParseError::BadRow(row_letter));
        }

        if !col_digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(CoordParseError::BadColumn(col_digits));
        }
        let col_number: usize = col_digits
            .parse()
            .map_err(|_| CoordParseError::BadColumn(col_digits.clone()))?;
        if !(1..=BOARD_SIZE).contains(&col_number) {
            return Err(CoordParseError::OutOfBounds(canonical));
        }

        Coord::new(row, col_number - 1).ok_or(CoordParseError::OutOfBounds(canonical))
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = (b'A' + self.row) as char;
        write!(f, "{}{}", letter, self.col + 1)
    }
}

/// Ship orientation. Horizontal extends toward larger columns, vertical
/// toward larger rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "H" => Ok(Orientation::Horizontal),
            "V" => Ok(Orientation::Vertical),
            other => Err(format!("need 'H' or 'V' for direction, got '{other}'")),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orientation::Horizontal => write!(f, "H"),
            Orientation::Vertical => write!(f, "V"),
        }
    }
}
