// Notifications are advisory. They are handed to a sink and forgotten; a
// sink that drops them changes nothing about how an operation completes.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::warn;

/// Which kind of request a notification is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpType {
    Read,
    Write,
    Flush,
}

#[derive(Clone, Debug, PartialEq)]
pub enum QuorumEvent {
    /// A child failed a request, or returned data that lost the vote. `error`
    /// is empty for the latter.
    ReportBad {
        op: OpType,
        /// Node name of the quorum device.
        reference: String,
        /// Node name of the offending child.
        child: String,
        offset: u64,
        length: u64,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// Too few children succeeded or agreed for the request to be accepted.
    Failure {
        reference: String,
        offset: u64,
        length: u64,
        timestamp: DateTime<Utc>,
    },
}

impl QuorumEvent {
    /// The child named by a `ReportBad` event.
    pub fn child(&self) -> Option<&str> {
        match self {
            QuorumEvent::ReportBad { child, .. } => Some(child),
            QuorumEvent::Failure { .. } => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, QuorumEvent::Failure { .. })
    }
}

/// Where notifications go.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: QuorumEvent);
}

impl EventSink for mpsc::UnboundedSender<QuorumEvent> {
    fn emit(&self, event: QuorumEvent) {
        // a closed receiver just means nobody is listening anymore
        let _ = self.send(event);
    }
}

/// Logs every notification as a warning. The default sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: QuorumEvent) {
        match event {
            QuorumEvent::ReportBad {
                op,
                reference,
                child,
                offset,
                length,
                error,
                ..
            } => warn!(
                ?op,
                %reference,
                %child,
                offset,
                length,
                error = error.as_deref().unwrap_or("bad version"),
                "quorum child reported bad"
            ),
            QuorumEvent::Failure {
                reference,
                offset,
                length,
                ..
            } => warn!(%reference, offset, length, "quorum failure"),
        }
    }
}

/// Keeps notifications in memory so they can be inspected later.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<QuorumEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    pub fn events(&self) -> Vec<QuorumEvent> {
        self.lock().clone()
    }

    /// Drains the recorded events.
    pub fn take(&self) -> Vec<QuorumEvent> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QuorumEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: QuorumEvent) {
        self.lock().push(event);
    }
}
