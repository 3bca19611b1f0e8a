use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, debug_span, info, Instrument};

use super::{
    child::{ChildDevice, ErrorCode, RequestId},
    config::{Config, QuorumOptions, ReadPattern},
    digest::{Blake3Hasher, ContentHasher},
    error::{ConfigError, Error},
    event::{EventSink, OpType, QuorumEvent, TracingSink},
    operation::{Payload, QuorumOperation},
};

/// One logical block device backed by several children that vote on every
/// result.
///
/// Configuration and the child list are only read by operations, so any
/// number of operations may run against `&QuorumDevice` at once. Changing
/// the children takes `&mut self` and therefore waits until none are left.
pub struct QuorumDevice {
    pub(crate) node_name: String,
    pub(crate) config: Config,
    pub(crate) children: Vec<Arc<dyn ChildDevice>>,
    pub(crate) hasher: Arc<dyn ContentHasher>,
    pub(crate) events: Arc<dyn EventSink>,
    next_request: AtomicU64,
}

impl QuorumDevice {
    /// Validates `options` against `children` and builds the device. Index
    /// order of `children` is significant: fifo reads try them in order.
    pub fn new(
        node_name: impl Into<String>,
        options: &QuorumOptions,
        children: Vec<Arc<dyn ChildDevice>>,
    ) -> Result<Self, ConfigError> {
        let config = Config::validate(options, children.len())?;
        let node_name = node_name.into();
        info!(
            node = %node_name,
            children = children.len(),
            threshold = config.threshold(),
            pattern = %config.read_pattern(),
            verify = config.verify_mode(),
            repair = config.repair_on_read(),
            "opened quorum device"
        );
        Ok(Self {
            node_name,
            config,
            children,
            hasher: Arc::new(Blake3Hasher),
            events: Arc::new(TracingSink),
            next_request: AtomicU64::new(0),
        })
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn child_names(&self) -> Vec<&str> {
        self.children.iter().map(|c| c.name()).collect()
    }

    /// Fills `buf` with `buf.len()` bytes starting at `offset`.
    pub async fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
        let span = debug_span!(
            "quorum_read",
            node = %self.node_name,
            offset,
            len = buf.len()
        );
        async move {
            let op =
                QuorumOperation::new(self, OpType::Read, offset, buf.len());
            let result = match self.config.read_pattern() {
                ReadPattern::Quorum => op.read_quorum(buf).await,
                ReadPattern::Fifo => op.read_fifo(buf).await,
            };
            debug!(ok = result.is_ok(), "read complete");
            result
        }
        .instrument(span)
        .await
    }

    pub async fn write(&self, offset: u64, buf: &[u8]) -> Result<(), Error> {
        let span = debug_span!(
            "quorum_write",
            node = %self.node_name,
            offset,
            len = buf.len()
        );
        self.write_payload(offset, buf.len(), Payload::Data(buf))
            .instrument(span)
            .await
    }

    pub async fn write_zeroes(
        &self,
        offset: u64,
        len: usize,
    ) -> Result<(), Error> {
        let span = debug_span!(
            "quorum_write_zeroes",
            node = %self.node_name,
            offset,
            len
        );
        self.write_payload(offset, len, Payload::Zeroes)
            .instrument(span)
            .await
    }

    async fn write_payload(
        &self,
        offset: u64,
        len: usize,
        payload: Payload<'_>,
    ) -> Result<(), Error> {
        let op = QuorumOperation::new(self, OpType::Write, offset, len);
        let result = op.write(payload).await;
        debug!(ok = result.is_ok(), "write complete");
        result
    }

    pub async fn flush(&self) -> Result<(), Error> {
        let span = debug_span!("quorum_flush", node = %self.node_name);
        QuorumOperation::new(self, OpType::Flush, 0, 0)
            .flush()
            .instrument(span)
            .await
    }

    /// Length of the device. Every child must report the same length.
    pub async fn get_length(&self) -> Result<u64, Error> {
        let mut expected = None;
        for child in &self.children {
            let found = child.length().await.map_err(Error::Io)?;
            let first = *expected.get_or_insert(found);
            if first != found {
                return Err(Error::LengthMismatch {
                    expected: first,
                    found,
                    child: child.name().to_string(),
                });
            }
        }
        expected.ok_or(Error::Io(ErrorCode::ENOMEDIUM))
    }

    /// Appends a child. Not available in verify mode, which is defined for
    /// exactly two children.
    pub fn add_child(
        &mut self,
        child: Arc<dyn ChildDevice>,
    ) -> Result<(), ConfigError> {
        if self.config.verify_mode() {
            Err(ConfigError::ChildChangeInVerifyMode)?
        }
        info!(node = %self.node_name, child = child.name(), "adding child");
        self.children.push(child);
        self.config.set_child_count(self.children.len());
        Ok(())
    }

    /// Detaches the child named `name`. Refused if fewer children than the
    /// vote threshold would remain.
    pub fn remove_child(
        &mut self,
        name: &str,
    ) -> Result<Arc<dyn ChildDevice>, ConfigError> {
        if self.config.verify_mode() {
            Err(ConfigError::ChildChangeInVerifyMode)?
        }
        let index = self
            .children
            .iter()
            .position(|c| c.name() == name)
            .ok_or_else(|| ConfigError::UnknownChild(name.to_string()))?;
        let threshold = self.config.threshold();
        if self.children.len() <= threshold as usize {
            Err(ConfigError::BelowThreshold {
                threshold,
                remaining: self.children.len() - 1,
            })?
        }
        info!(node = %self.node_name, child = name, "removing child");
        let child = self.children.remove(index);
        self.config.set_child_count(self.children.len());
        Ok(child)
    }

    /// Reads `len` bytes at `offset` on the runtime and hands the result to
    /// `completion`. The completion runs exactly once unless the returned
    /// handle cancels the operation first.
    pub fn submit_read<F>(
        self: &Arc<Self>,
        offset: u64,
        len: usize,
        completion: F,
    ) -> OperationHandle
    where
        F: FnOnce(Result<Vec<u8>, Error>) + Send + 'static,
    {
        let device = Arc::clone(self);
        OperationHandle::spawn(async move {
            let mut buf = vec![0u8; len];
            let result = device.read(offset, &mut buf).await.map(|()| buf);
            completion(result);
        })
    }

    pub fn submit_write<F>(
        self: &Arc<Self>,
        offset: u64,
        data: Vec<u8>,
        completion: F,
    ) -> OperationHandle
    where
        F: FnOnce(Result<(), Error>) + Send + 'static,
    {
        let device = Arc::clone(self);
        OperationHandle::spawn(async move {
            completion(device.write(offset, &data).await);
        })
    }

    pub fn submit_flush<F>(self: &Arc<Self>, completion: F) -> OperationHandle
    where
        F: FnOnce(Result<(), Error>) + Send + 'static,
    {
        let device = Arc::clone(self);
        OperationHandle::spawn(async move {
            completion(device.flush().await);
        })
    }

    /// Cancels a submitted operation. Same as [`OperationHandle::cancel`].
    pub async fn cancel(&self, op: OperationHandle) {
        debug!(node = %self.node_name, "cancelling operation");
        op.cancel().await
    }

    pub(crate) fn child(&self, index: usize) -> &dyn ChildDevice {
        self.children[index].as_ref()
    }

    pub(crate) fn next_request_id(&self) -> RequestId {
        RequestId(self.next_request.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn report_bad(
        &self,
        op: OpType,
        index: usize,
        offset: u64,
        length: usize,
        error: Option<ErrorCode>,
    ) {
        self.events.emit(QuorumEvent::ReportBad {
            op,
            reference: self.node_name.clone(),
            child: self.child(index).name().to_string(),
            offset,
            length: length as u64,
            error: error.map(|code| code.to_string()),
            timestamp: Utc::now(),
        });
    }

    pub(crate) fn report_failure(&self, offset: u64, length: usize) {
        self.events.emit(QuorumEvent::Failure {
            reference: self.node_name.clone(),
            offset,
            length: length as u64,
            timestamp: Utc::now(),
        });
    }
}

/// A submitted operation running on the runtime.
pub struct OperationHandle {
    task: JoinHandle<()>,
}

impl OperationHandle {
    fn spawn<F>(operation: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self {
            task: tokio::spawn(operation),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Tears the operation down. Outstanding child requests are cancelled
    /// and the completion is never called. Returns once teardown is done.
    pub async fn cancel(self) {
        self.task.abort();
        match self.task.await {
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            _ => {}
        }
    }

    /// Waits for the operation, completion included, to finish.
    pub async fn join(self) -> Result<(), Error> {
        match self.task.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(Error::Cancelled),
        }
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::sync::oneshot;

    use super::*;
    use crate::disk::MemoryDisk;

    fn disks(n: usize, len: usize) -> Vec<Arc<MemoryDisk>> {
        (0..n)
            .map(|i| Arc::new(MemoryDisk::new(format!("disk{}", i), len)))
            .collect()
    }

    fn open(disks: &[Arc<MemoryDisk>], options: QuorumOptions) -> QuorumDevice {
        let children = disks
            .iter()
            .map(|d| d.clone() as Arc<dyn ChildDevice>)
            .collect();
        QuorumDevice::new("quorum0", &options, children).unwrap()
    }

    fn threshold(t: u32) -> QuorumOptions {
        QuorumOptions::builder().vote_threshold(t).build()
    }

    #[tokio::test]
    async fn length_must_agree() {
        let mut disks = disks(2, 4096);
        let device = open(&disks, threshold(1));
        assert_eq!(device.get_length().await, Ok(4096));

        disks.push(Arc::new(MemoryDisk::new("short", 2048)));
        let device = open(&disks, threshold(1));
        assert_eq!(
            device.get_length().await,
            Err(Error::LengthMismatch {
                expected: 4096,
                found: 2048,
                child: "short".into()
            })
        );

        disks[2].fail_length(Some(ErrorCode::ENOMEDIUM));
        assert_eq!(
            device.get_length().await,
            Err(Error::Io(ErrorCode::ENOMEDIUM))
        );
    }

    #[test]
    fn bad_configuration_fails_setup() {
        let disks = disks(2, 512);
        let children = disks
            .iter()
            .map(|d| d.clone() as Arc<dyn ChildDevice>)
            .collect();
        assert!(matches!(
            QuorumDevice::new("q", &threshold(3), children),
            Err(ConfigError::ThresholdOutOfRange { .. })
        ));
    }

    #[test]
    fn children_can_be_added_and_removed() {
        let disks = disks(3, 512);
        let mut device = open(&disks[..2], threshold(2));

        // two children, threshold two: nothing may go
        assert_eq!(
            device.remove_child("disk0").err(),
            Some(ConfigError::BelowThreshold {
                threshold: 2,
                remaining: 1
            })
        );

        device.add_child(disks[2].clone()).unwrap();
        assert_eq!(device.config().child_count(), 3);
        assert_eq!(device.child_names(), vec!["disk0", "disk1", "disk2"]);

        let removed = device.remove_child("disk0").unwrap();
        assert_eq!(removed.name(), "disk0");
        assert_eq!(device.child_names(), vec!["disk1", "disk2"]);
        assert_eq!(device.config().child_count(), 2);

        assert_eq!(
            device.remove_child("disk9").err(),
            Some(ConfigError::UnknownChild("disk9".into()))
        );
    }

    #[test]
    fn verify_mode_pins_the_children() {
        let disks = disks(3, 512);
        let options = QuorumOptions::builder()
            .vote_threshold(2)
            .blkverify(true)
            .build();
        let mut device = open(&disks[..2], options);
        assert_eq!(
            device.add_child(disks[2].clone()),
            Err(ConfigError::ChildChangeInVerifyMode)
        );
        assert_eq!(
            device.remove_child("disk0").err(),
            Some(ConfigError::ChildChangeInVerifyMode)
        );
    }

    #[tokio::test]
    async fn submitted_operations_complete_once() {
        let disks = disks(3, 4096);
        let device = Arc::new(open(&disks, threshold(2)));

        let (tx, rx) = oneshot::channel();
        device
            .submit_write(1024, vec![5u8; 512], move |result| {
                let _ = tx.send(result);
            })
            .join()
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), Ok(()));

        let (tx, rx) = oneshot::channel();
        let handle = device.submit_read(1024, 512, move |result| {
            let _ = tx.send(result);
        });
        assert_eq!(rx.await.unwrap(), Ok(vec![5u8; 512]));
        handle.join().await.unwrap();

        let (tx, rx) = oneshot::channel();
        device.submit_flush(move |result| {
            let _ = tx.send(result);
        });
        assert_eq!(rx.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn cancel_reaches_pending_children_only() {
        let disks = disks(3, 4096);
        disks[0].stall(true);
        disks[2].stall(true);
        let device = Arc::new(open(&disks, threshold(2)));

        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        let handle = device.submit_read(0, 512, move |_| {
            flag.store(true, Ordering::SeqCst);
        });
        while disks.iter().any(|d| d.reads() == 0) {
            tokio::task::yield_now().await;
        }
        assert!(!handle.is_finished());

        device.cancel(handle).await;

        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(disks[0].cancelled().len(), 1);
        assert!(disks[1].cancelled().is_empty());
        assert_eq!(disks[2].cancelled().len(), 1);
        assert_ne!(disks[0].cancelled(), disks[2].cancelled());
    }

    #[tokio::test]
    async fn cancelled_handle_joins_as_cancelled() {
        let disks = disks(2, 4096);
        disks[1].stall(true);
        let device = Arc::new(open(&disks, threshold(1)));

        let handle = device.submit_flush(|_| panic!("completion must not run"));
        while disks[1].flushes() == 0 {
            tokio::task::yield_now().await;
        }
        handle.task.abort();
        assert_eq!(handle.join().await, Err(Error::Cancelled));
        // flush is sequential, so only the stalled child was outstanding
        assert_eq!(disks[0].flushes(), 1);
        assert!(disks[0].cancelled().is_empty());
        assert_eq!(disks[1].cancelled().len(), 1);
    }

    #[tokio::test]
    async fn repeated_reads_are_stable() {
        let disks = disks(3, 1024);
        disks[2].corrupt(0, &[1u8; 64]);
        let events = Arc::new(crate::quorum::event::RecordingSink::new());
        let device = open(&disks, threshold(2)).with_events(events.clone());

        let reported = || -> Vec<Option<String>> {
            events
                .take()
                .iter()
                .map(|e| e.child().map(str::to_string))
                .collect()
        };

        let mut first = vec![0u8; 128];
        device.read(0, &mut first).await.unwrap();
        let first_events = reported();
        let mut second = vec![0u8; 128];
        device.read(0, &mut second).await.unwrap();
        let second_events = reported();

        assert_eq!(first, vec![0u8; 128]);
        assert_eq!(first, second);
        assert_eq!(first_events, vec![Some("disk2".to_string())]);
        assert_eq!(first_events, second_events);
    }
}
