use std::{error, fmt};

/// Errors produced by the Transport Protocol engine.
///
/// None of these ever bubble out of [`crate::TpEngine::on_frame`] — they
/// are surfaced through the engine's error sink so a malformed frame or a
/// stalled session can never abort delivery of the next frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpError {
    /// The control byte was unrecognized, or the frame was the wrong length.
    InvalidPacket(&'static str),
    /// A sequence gap or other internal invariant violation.
    AssemblyFailed { pgn: u32, sa: u8 },
    /// The gap between BAM and the first data packet exceeded T1.
    BamTimeout { pgn: u32, sa: u8 },
    /// RTS went unanswered for longer than T3.
    RtsTimeout { pgn: u32, sa: u8, da: u8 },
    /// CTS/EOM went unanswered for longer than T2/T4.
    CtsTimeout { pgn: u32, sa: u8, da: u8 },
}

impl fmt::Display for TpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TpError::InvalidPacket(reason) => write!(f, "invalid TP packet: {}", reason),
            TpError::AssemblyFailed { pgn, sa } => {
                write!(f, "assembly failed for PGN 0x{:X} from SA 0x{:X}", pgn, sa)
            }
            TpError::BamTimeout { pgn, sa } => {
                write!(f, "BAM timeout for PGN 0x{:X} from SA 0x{:X}", pgn, sa)
            }
            TpError::RtsTimeout { pgn, sa, da } => write!(
                f,
                "RTS timeout for PGN 0x{:X} ({:X} -> {:X})",
                pgn, sa, da
            ),
            TpError::CtsTimeout { pgn, sa, da } => write!(
                f,
                "CTS timeout for PGN 0x{:X} ({:X} -> {:X})",
                pgn, sa, da
            ),
        }
    }
}

impl error::Error for TpError {}
