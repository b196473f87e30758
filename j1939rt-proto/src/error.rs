use std::{error, fmt};

/// Errors returned by the identifier codec and PGN dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A frame violated its `id`/`data` bounds.
    InvalidFrame(&'static str),
    /// A PGN did not fit in the 18-bit range J1939 reserves for it.
    InvalidPgn(u32),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidFrame(reason) => write!(f, "invalid frame: {}", reason),
            Error::InvalidPgn(pgn) => write!(f, "PGN 0x{:X} is out of the 18-bit range", pgn),
        }
    }
}

impl error::Error for Error {}
