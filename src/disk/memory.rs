use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard,
    },
    time::Duration,
};

use futures::future::{self, BoxFuture};
use rand::Rng;
use tracing::trace;

use crate::quorum::child::{ChildDevice, ChildResult, ErrorCode, RequestId};

/// A write that reached the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    pub id: RequestId,
    pub offset: u64,
    pub len: usize,
}

#[derive(Debug, Default)]
struct Faults {
    read: Option<ErrorCode>,
    write: Option<ErrorCode>,
    flush: Option<ErrorCode>,
    length: Option<ErrorCode>,
    stalled: bool,
    delay: Option<Duration>,
}

/// A RAM-backed child with knobs for failing, stalling and corrupting it.
pub struct MemoryDisk {
    name: String,
    data: Mutex<Vec<u8>>,
    faults: Mutex<Faults>,
    reads: AtomicUsize,
    flushes: AtomicUsize,
    writes: Mutex<Vec<WriteRecord>>,
    cancelled: Mutex<Vec<RequestId>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryDisk {
    /// A zero-filled disk of `len` bytes.
    pub fn new(name: impl Into<String>, len: usize) -> Self {
        Self::with_contents(name, vec![0; len])
    }

    pub fn with_contents(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data: Mutex::new(data),
            faults: Mutex::new(Faults::default()),
            reads: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    /// Makes every read fail with `code`, or succeed again with `None`.
    pub fn fail_reads(&self, code: Option<ErrorCode>) {
        lock(&self.faults).read = code;
    }

    pub fn fail_writes(&self, code: Option<ErrorCode>) {
        lock(&self.faults).write = code;
    }

    pub fn fail_flush(&self, code: Option<ErrorCode>) {
        lock(&self.faults).flush = code;
    }

    pub fn fail_length(&self, code: Option<ErrorCode>) {
        lock(&self.faults).length = code;
    }

    /// While stalled, new requests never complete until cancelled.
    pub fn stall(&self, stalled: bool) {
        lock(&self.faults).stalled = stalled;
    }

    /// Delays every request by `delay` before it is served.
    pub fn delay(&self, delay: Option<Duration>) {
        lock(&self.faults).delay = delay;
    }

    /// Overwrites bytes behind the engine's back.
    pub fn corrupt(&self, offset: usize, bytes: &[u8]) {
        lock(&self.data)[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Fills `len` bytes at `offset` with random garbage.
    pub fn scramble(&self, offset: usize, len: usize) {
        rand::thread_rng().fill(&mut lock(&self.data)[offset..offset + len]);
    }

    pub fn contents(&self) -> Vec<u8> {
        lock(&self.data).clone()
    }

    /// Number of reads submitted so far, served or not.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of flushes submitted so far.
    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        lock(&self.writes).clone()
    }

    /// Requests the engine cancelled, in the order it did so.
    pub fn cancelled(&self) -> Vec<RequestId> {
        lock(&self.cancelled).clone()
    }

    /// Waits out the configured delay, or forever when stalled.
    async fn admit(&self) {
        let (stalled, delay) = {
            let faults = lock(&self.faults);
            (faults.stalled, faults.delay)
        };
        if stalled {
            future::pending::<()>().await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn range(
        &self,
        offset: u64,
        len: usize,
    ) -> Result<(usize, usize), ErrorCode> {
        let start = usize::try_from(offset).map_err(|_| ErrorCode::EINVAL)?;
        let end = start.checked_add(len).ok_or(ErrorCode::EINVAL)?;
        if end > lock(&self.data).len() {
            return Err(ErrorCode::EINVAL);
        }
        Ok((start, end))
    }

    fn copy_out(&self, offset: u64, buf: &mut [u8]) -> ChildResult {
        if let Some(code) = lock(&self.faults).read {
            return Err(code);
        }
        let (start, end) = self.range(offset, buf.len())?;
        buf.copy_from_slice(&lock(&self.data)[start..end]);
        Ok(())
    }

    fn copy_in(&self, id: RequestId, offset: u64, buf: &[u8]) -> ChildResult {
        if let Some(code) = lock(&self.faults).write {
            return Err(code);
        }
        let (start, end) = self.range(offset, buf.len())?;
        lock(&self.data)[start..end].copy_from_slice(buf);
        lock(&self.writes).push(WriteRecord {
            id,
            offset,
            len: buf.len(),
        });
        Ok(())
    }
}

impl ChildDevice for MemoryDisk {
    fn name(&self) -> &str {
        &self.name
    }

    fn read<'a>(
        &'a self,
        id: RequestId,
        offset: u64,
        buf: &'a mut [u8],
    ) -> BoxFuture<'a, ChildResult> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            self.admit().await;
            trace!(disk = %self.name, %id, offset, len = buf.len(), "read");
            self.copy_out(offset, buf)
        })
    }

    fn write<'a>(
        &'a self,
        id: RequestId,
        offset: u64,
        buf: &'a [u8],
    ) -> BoxFuture<'a, ChildResult> {
        Box::pin(async move {
            self.admit().await;
            trace!(disk = %self.name, %id, offset, len = buf.len(), "write");
            self.copy_in(id, offset, buf)
        })
    }

    fn flush(&self, _id: RequestId) -> BoxFuture<'_, ChildResult> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            self.admit().await;
            match lock(&self.faults).flush {
                Some(code) => Err(code),
                None => Ok(()),
            }
        })
    }

    fn length(&self) -> BoxFuture<'_, Result<u64, ErrorCode>> {
        Box::pin(async move {
            if let Some(code) = lock(&self.faults).length {
                return Err(code);
            }
            Ok(lock(&self.data).len() as u64)
        })
    }

    fn cancel(&self, id: RequestId) {
        trace!(disk = %self.name, %id, "cancelled");
        lock(&self.cancelled).push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_reads_and_writes() {
        let disk = MemoryDisk::new("mem", 64);
        disk.write(RequestId(1), 8, &[9u8; 8]).await.unwrap();
        let mut buf = [0u8; 8];
        disk.read(RequestId(2), 8, &mut buf).await.unwrap();
        assert_eq!(buf, [9u8; 8]);
        assert_eq!(disk.reads(), 1);
        assert_eq!(
            disk.writes(),
            vec![WriteRecord {
                id: RequestId(1),
                offset: 8,
                len: 8
            }]
        );
        assert_eq!(disk.length().await, Ok(64));
    }

    #[tokio::test]
    async fn out_of_range_is_rejected() {
        let disk = MemoryDisk::new("mem", 16);
        let mut buf = [0u8; 8];
        assert_eq!(
            disk.read(RequestId(0), 12, &mut buf).await,
            Err(ErrorCode::EINVAL)
        );
    }

    #[tokio::test]
    async fn injected_faults_apply() {
        let disk = MemoryDisk::new("mem", 16);
        disk.fail_reads(Some(ErrorCode::EIO));
        disk.fail_length(Some(ErrorCode::ENOMEDIUM));
        let mut buf = [0u8; 4];
        assert_eq!(
            disk.read(RequestId(0), 0, &mut buf).await,
            Err(ErrorCode::EIO)
        );
        assert_eq!(disk.length().await, Err(ErrorCode::ENOMEDIUM));
        disk.fail_reads(None);
        assert_eq!(disk.read(RequestId(1), 0, &mut buf).await, Ok(()));
    }

    #[test]
    fn scramble_changes_contents() {
        let disk = MemoryDisk::new("mem", 4096);
        disk.scramble(0, 4096);
        // 4096 random bytes all being zero is not going to happen
        assert!(disk.contents().iter().any(|b| *b != 0));
    }
}
