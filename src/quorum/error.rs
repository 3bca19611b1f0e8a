use std::fmt;

use super::{child::ErrorCode, digest::HashError};

/// Setup-time failures. These are raised while a device is being opened or
/// reshaped, never while an operation is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    TooFewChildren { count: usize },
    ThresholdOutOfRange { threshold: u32, child_count: usize },
    VerifyWithRepair,
    MissingOption(&'static str),
    UnknownOption(String),
    InvalidValue { key: String, value: String },
    MissingChild(usize),
    UnknownDriver(String),
    UnknownChild(String),
    ChildOpen { descriptor: String, reason: String },
    ChildChangeInVerifyMode,
    BelowThreshold { threshold: u32, remaining: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ConfigError::*;
        match self {
            TooFewChildren { count } => write!(
                f,
                "at least 2 children are required, {} provided",
                count
            ),
            ThresholdOutOfRange {
                threshold,
                child_count,
            } => write!(
                f,
                "vote-threshold {} must be between 1 and {}",
                threshold, child_count
            ),
            VerifyWithRepair => write!(
                f,
                "rewrite-corrupted=on cannot be used with blkverify=on"
            ),
            MissingOption(key) => write!(f, "missing required option {}", key),
            UnknownOption(key) => write!(f, "unknown option {}", key),
            InvalidValue { key, value } => {
                write!(f, "invalid value {:?} for option {}", value, key)
            }
            MissingChild(index) => write!(f, "children.{} is missing", index),
            UnknownDriver(name) => write!(f, "unknown driver {}", name),
            UnknownChild(name) => write!(f, "no child named {}", name),
            ChildOpen { descriptor, reason } => {
                write!(f, "could not open child {}: {}", descriptor, reason)
            }
            ChildChangeInVerifyMode => {
                write!(f, "children cannot be changed in blkverify mode")
            }
            BelowThreshold {
                threshold,
                remaining,
            } => write!(
                f,
                "{} children would remain, below the vote threshold {}",
                remaining, threshold
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// The aggregate outcome of a failed operation. Individual child errors are
/// folded into a vote and only the decision surfaces here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Hash(HashError),
    /// The winning error code of an error vote, or a child's own code where
    /// no vote applies (fifo reads, length queries).
    Io(ErrorCode),
    QuorumNotReached {
        votes: usize,
        threshold: u32,
    },
    LengthMismatch {
        expected: u64,
        found: u64,
        child: String,
    },
    /// Only observed by whoever joins a cancelled [`OperationHandle`].
    ///
    /// [`OperationHandle`]: super::device::OperationHandle
    Cancelled,
}

impl Error {
    /// Maps the error onto the negative errno convention children use.
    pub fn errno(&self) -> ErrorCode {
        match self {
            Error::Hash(_) => ErrorCode::EIO,
            Error::Io(code) => *code,
            Error::QuorumNotReached { .. } => ErrorCode::EIO,
            Error::LengthMismatch { .. } => ErrorCode::EIO,
            Error::Cancelled => ErrorCode::ECANCELED,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Hash(e) => write!(f, "hash engine failure: {}", e),
            Error::Io(code) => write!(f, "i/o error: {}", code),
            Error::QuorumNotReached { votes, threshold } => write!(
                f,
                "quorum not reached: {} agreeing children, {} required",
                votes, threshold
            ),
            Error::LengthMismatch {
                expected,
                found,
                child,
            } => write!(
                f,
                "child {} reports length {}, expected {}",
                child, found, expected
            ),
            Error::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Hash(e) => Some(e),
            _ => None,
        }
    }
}

impl From<HashError> for Error {
    fn from(error: HashError) -> Self {
        Self::Hash(error)
    }
}
