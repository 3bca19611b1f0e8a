use std::{fmt, future::Future};

use futures::future::BoxFuture;
use tracing::trace;

/// A negative errno-style code reported by a child device. Success is
/// represented by `Ok(())`, never by a zero code inside an `Err`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub i64);

impl ErrorCode {
    pub const EPERM: ErrorCode = ErrorCode(-1);
    pub const EIO: ErrorCode = ErrorCode(-5);
    pub const EINVAL: ErrorCode = ErrorCode(-22);
    pub const ENOSPC: ErrorCode = ErrorCode(-28);
    pub const ECANCELED: ErrorCode = ErrorCode(-125);
    pub const ENOMEDIUM: ErrorCode = ErrorCode(-123);

    /// Flattens a child result into the signed value errors are voted on,
    /// zero standing for success.
    pub fn vote_value(result: ChildResult) -> i64 {
        match result {
            Ok(()) => 0,
            Err(code) => code.0,
        }
    }

    /// Inverse of [`ErrorCode::vote_value`].
    pub fn from_vote(value: i64) -> ChildResult {
        if value == 0 {
            Ok(())
        } else {
            Err(ErrorCode(value))
        }
    }

    fn name(&self) -> Option<&'static str> {
        Some(match *self {
            Self::EPERM => "operation not permitted",
            Self::EIO => "input/output error",
            Self::EINVAL => "invalid argument",
            Self::ENOSPC => "no space left on device",
            Self::ENOMEDIUM => "no medium found",
            Self::ECANCELED => "operation canceled",
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "error {}", self.0),
        }
    }
}

/// Completion status of one child request.
pub type ChildResult = Result<(), ErrorCode>;

/// Identifies one submitted child request so it can be cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The capability a child block device exposes to the quorum engine.
///
/// Every request is tagged with a [`RequestId`] so the engine can forward
/// cancellation for requests that are still outstanding when an operation
/// is torn down.
pub trait ChildDevice: Send + Sync {
    /// Node name used in notifications and logs.
    fn name(&self) -> &str;

    fn read<'a>(
        &'a self,
        id: RequestId,
        offset: u64,
        buf: &'a mut [u8],
    ) -> BoxFuture<'a, ChildResult>;

    fn write<'a>(
        &'a self,
        id: RequestId,
        offset: u64,
        buf: &'a [u8],
    ) -> BoxFuture<'a, ChildResult>;

    /// Writes `len` zero bytes. Devices with a cheaper way to zero a range
    /// should override this.
    fn write_zeroes(
        &self,
        id: RequestId,
        offset: u64,
        len: usize,
    ) -> BoxFuture<'_, ChildResult> {
        Box::pin(async move {
            let zeroes = vec![0u8; len];
            self.write(id, offset, &zeroes).await
        })
    }

    fn flush(&self, id: RequestId) -> BoxFuture<'_, ChildResult>;

    fn length(&self) -> BoxFuture<'_, Result<u64, ErrorCode>>;

    /// Asks the device to stop working on `id`. Cooperative: the device is
    /// expected to stop promptly, nothing waits for it.
    fn cancel(&self, id: RequestId);
}

/// One child's half of a fanned-out operation. It lives inside its parent
/// operation's `children` vector; the position in that vector is the child
/// index.
#[derive(Debug)]
pub(crate) struct ChildRequest {
    pub(crate) id: RequestId,
    /// Private scratch buffer for reads, empty for writes which share the
    /// caller's buffer.
    pub(crate) buffer: Vec<u8>,
    pub(crate) result: Option<ChildResult>,
}

impl ChildRequest {
    pub(crate) fn new(id: RequestId) -> Self {
        Self {
            id,
            buffer: Vec::new(),
            result: None,
        }
    }

    pub(crate) fn succeeded(&self) -> bool {
        matches!(self.result, Some(Ok(())))
    }
}

/// Forwards cancellation to the child if dropped before being completed.
struct Outstanding<'a> {
    child: &'a dyn ChildDevice,
    id: RequestId,
    armed: bool,
}

impl Drop for Outstanding<'_> {
    fn drop(&mut self) {
        if self.armed {
            trace!(child = self.child.name(), id = %self.id, "cancelling");
            self.child.cancel(self.id);
        }
    }
}

/// Drives a child request to completion. If the returned future is dropped
/// first, the child is told to cancel `id`.
pub(crate) async fn tracked<F>(
    child: &dyn ChildDevice,
    id: RequestId,
    request: F,
) -> ChildResult
where
    F: Future<Output = ChildResult>,
{
    let mut outstanding = Outstanding {
        child,
        id,
        armed: true,
    };
    let result = request.await;
    outstanding.armed = false;
    result
}
