//! Typed error boundary for everything that crosses a peer RPC or a dial.
//!
//! Local bookkeeping (hashing, ring arithmetic, finger/successor-list
//! mutation) never fails and stays infallible; only the operations that
//! leave the process can fail, and each failure mode gets its own variant
//! instead of a stringly-typed message a caller has to parse.

use tonic::Status;

#[derive(thiserror::Error, Debug, Clone)]
pub enum ChordError {
    #[error("no online successor available")]
    NoOnlineSuccessor,

    #[error("no immediate predecessor")]
    NoImmediatePredecessor,

    #[error("request redirected too many times")]
    TtlExpired,

    #[error("unknown key: {0}")]
    UnknownKey(String),

    #[error("dial to {0} failed: {1}")]
    DialFailed(String, String),

    #[error("rpc call failed: {0}")]
    CallFailed(String),

    #[error("suspicious ping reply from {0}")]
    SuspiciousPingReply(String),

    #[error("peer id collision with {0}")]
    IdCollision(String),
}

impl From<&ChordError> for Status {
    fn from(err: &ChordError) -> Status {
        match err {
            ChordError::NoOnlineSuccessor => Status::unavailable(err.to_string()),
            ChordError::NoImmediatePredecessor => Status::not_found(err.to_string()),
            ChordError::TtlExpired => Status::deadline_exceeded(err.to_string()),
            ChordError::UnknownKey(_) => Status::not_found(err.to_string()),
            ChordError::DialFailed(..) => Status::unavailable(err.to_string()),
            ChordError::CallFailed(_) => Status::unknown(err.to_string()),
            ChordError::SuspiciousPingReply(_) => Status::invalid_argument(err.to_string()),
            ChordError::IdCollision(_) => Status::already_exists(err.to_string()),
        }
    }
}

impl From<ChordError> for Status {
    fn from(err: ChordError) -> Status {
        Status::from(&err)
    }
}

/// Reconstructs a typed error from a peer's `Status` reply. Best-effort:
/// peers we don't control (or older/foreign implementations) just map to
/// `CallFailed` with the raw message preserved.
impl From<Status> for ChordError {
    fn from(status: Status) -> Self {
        use tonic::Code;
        match status.code() {
            Code::Unavailable => ChordError::NoOnlineSuccessor,
            Code::NotFound if status.message().contains("predecessor") => {
                ChordError::NoImmediatePredecessor
            }
            Code::NotFound => ChordError::UnknownKey(status.message().to_string()),
            Code::DeadlineExceeded => ChordError::TtlExpired,
            Code::InvalidArgument => ChordError::SuspiciousPingReply(status.message().to_string()),
            Code::AlreadyExists => ChordError::IdCollision(status.message().to_string()),
            _ => ChordError::CallFailed(status.message().to_string()),
        }
    }
}

impl From<tonic::transport::Error> for ChordError {
    fn from(err: tonic::transport::Error) -> Self {
        ChordError::DialFailed(String::new(), err.to_string())
    }
}
