use std::{error, fmt};

/// Errors returned by a CAN port.
#[derive(Debug)]
pub enum Error {
    /// An operation was attempted on a port that has already been closed.
    PortClosed,
    /// The frame violated its `id`/`data` bounds at send time.
    InvalidFrame(j1939rt_proto::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::PortClosed => write!(f, "operation attempted on a closed port"),
            Error::InvalidFrame(e) => write!(f, "invalid frame: {}", e),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::InvalidFrame(e) => Some(e),
            Error::PortClosed => None,
        }
    }
}

impl From<j1939rt_proto::Error> for Error {
    fn from(e: j1939rt_proto::Error) -> Self {
        Error::InvalidFrame(e)
    }
}
