// A quorum operation is the aggregate state of one logical request. It owns
// one child request per child and is only ever touched by the task that
// polls it: child completions are observed one at a time as the fan-in
// stream yields them, so none of this state needs a lock.
//
// Dropping an operation before it finishes drops every outstanding child
// future with it, and each of those forwards a cancel to its child.

use futures::{stream::FuturesUnordered, StreamExt};
use tracing::debug;

use super::{
    child::{tracked, ChildRequest, ChildResult, ErrorCode},
    device::QuorumDevice,
    error::Error,
    event::OpType,
    vote::ErrorTally,
};

/// What a write puts on the children.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Payload<'b> {
    Data(&'b [u8]),
    Zeroes,
}

pub(crate) struct QuorumOperation<'d> {
    pub(super) device: &'d QuorumDevice,
    pub(super) kind: OpType,
    pub(super) offset: u64,
    pub(super) length: usize,
    pub(super) children: Vec<ChildRequest>,
    pub(super) completed: usize,
    pub(super) successes: usize,
    /// Repair writes still outstanding. A repairing read finishes only once
    /// this is back to zero.
    pub(super) pending_repairs: usize,
    /// Next child to try. Only meaningful for fifo reads.
    pub(super) cursor: usize,
}

impl<'d> QuorumOperation<'d> {
    pub(crate) fn new(
        device: &'d QuorumDevice,
        kind: OpType,
        offset: u64,
        length: usize,
    ) -> Self {
        let children = (0..device.children.len())
            .map(|_| ChildRequest::new(device.next_request_id()))
            .collect();
        Self {
            device,
            kind,
            offset,
            length,
            children,
            completed: 0,
            successes: 0,
            pending_repairs: 0,
            cursor: 0,
        }
    }

    pub(super) fn child_count(&self) -> usize {
        self.children.len()
    }

    pub(super) fn threshold(&self) -> usize {
        self.device.config.threshold() as usize
    }

    /// Records one child's completion.
    pub(super) fn complete_child(&mut self, index: usize, result: ChildResult) {
        self.completed += 1;
        match result {
            Ok(()) => self.successes += 1,
            Err(code) => {
                debug!(
                    child = self.device.child(index).name(),
                    %code,
                    "child request failed"
                );
                self.device.report_bad(
                    self.kind,
                    index,
                    self.offset,
                    self.length,
                    Some(code),
                );
            }
        }
        self.children[index].result = Some(result);
    }

    /// Fails the operation when fewer children succeeded than the threshold
    /// requires. The reported error is the most common code among the
    /// children that failed.
    pub(super) fn check_io_quorum(&self) -> Result<(), Error> {
        if self.successes >= self.threshold() {
            return Ok(());
        }
        let mut tally = ErrorTally::new();
        for (index, request) in self.children.iter().enumerate() {
            if let Some(Err(code)) = request.result {
                tally.count(code.0, index);
            }
        }
        let code = tally
            .winner()
            .map(|w| ErrorCode(w.value))
            .unwrap_or(ErrorCode::EIO);
        debug!(
            successes = self.successes,
            threshold = self.threshold(),
            %code,
            "too many children failed"
        );
        self.device.report_failure(self.offset, self.length);
        Err(Error::Io(code))
    }

    /// Writes `payload` to every child in parallel and waits for all of
    /// them.
    pub(crate) async fn write(
        mut self,
        payload: Payload<'_>,
    ) -> Result<(), Error> {
        let device = self.device;
        let (offset, length) = (self.offset, self.length);
        let mut pending: FuturesUnordered<_> = self
            .children
            .iter()
            .enumerate()
            .map(|(index, request)| {
                let child = device.child(index);
                let id = request.id;
                async move {
                    let submitted = match payload {
                        Payload::Data(buf) => child.write(id, offset, buf),
                        Payload::Zeroes => {
                            child.write_zeroes(id, offset, length)
                        }
                    };
                    (index, tracked(child, id, submitted).await)
                }
            })
            .collect();

        while let Some((index, result)) = pending.next().await {
            self.complete_child(index, result);
        }
        debug_assert_eq!(self.completed, self.child_count());

        self.check_io_quorum()
    }

    /// Flushes the children one after another. Every child's result goes
    /// into an error vote and the winner, success included, is the result.
    pub(crate) async fn flush(mut self) -> Result<(), Error> {
        let device = self.device;
        let mut tally = ErrorTally::new();
        for index in 0..self.child_count() {
            let child = device.child(index);
            let id = self.children[index].id;
            let result = tracked(child, id, child.flush(id)).await;
            if let Err(code) = result {
                debug!(child = child.name(), %code, "child flush failed");
                device.report_bad(OpType::Flush, index, 0, 0, Some(code));
            }
            self.children[index].result = Some(result);
            self.completed += 1;
            tally.count(ErrorCode::vote_value(result), index);
        }

        match tally.winner() {
            Some(winner) => {
                ErrorCode::from_vote(winner.value).map_err(Error::Io)
            }
            None => Ok(()),
        }
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::sync::Arc;

    use crate::{
        disk::MemoryDisk,
        quorum::{
            child::ErrorCode,
            config::QuorumOptions,
            device::QuorumDevice,
            error::Error,
            event::{OpType, QuorumEvent, RecordingSink},
        },
        ChildDevice,
    };

    fn device(
        disks: &[Arc<MemoryDisk>],
        threshold: u32,
    ) -> (QuorumDevice, Arc<RecordingSink>) {
        let events = Arc::new(RecordingSink::new());
        let children = disks
            .iter()
            .map(|d| d.clone() as Arc<dyn ChildDevice>)
            .collect();
        let options =
            QuorumOptions::builder().vote_threshold(threshold).build();
        let device = QuorumDevice::new("quorum0", &options, children)
            .unwrap()
            .with_events(events.clone());
        (device, events)
    }

    fn disks(n: usize) -> Vec<Arc<MemoryDisk>> {
        (0..n)
            .map(|i| Arc::new(MemoryDisk::new(format!("disk{}", i), 4096)))
            .collect()
    }

    #[tokio::test]
    async fn write_survives_a_minority_failure() {
        let disks = disks(3);
        disks[1].fail_writes(Some(ErrorCode::EIO));
        let (device, events) = device(&disks, 2);

        device.write(512, &[7u8; 512]).await.unwrap();

        assert_eq!(disks[0].contents()[512..1024], [7u8; 512]);
        assert_eq!(disks[2].contents()[512..1024], [7u8; 512]);
        let events = events.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            QuorumEvent::ReportBad {
                op,
                child,
                offset,
                length,
                error,
                ..
            } => {
                assert_eq!(*op, OpType::Write);
                assert_eq!(child, "disk1");
                assert_eq!((*offset, *length), (512, 512));
                assert!(error.is_some());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn write_fails_with_the_tallied_code() {
        let disks = disks(3);
        disks[0].fail_writes(Some(ErrorCode::ENOSPC));
        disks[2].fail_writes(Some(ErrorCode::ENOSPC));
        let (device, events) = device(&disks, 2);

        let err = device.write(0, &[1u8; 512]).await.unwrap_err();

        assert_eq!(err, Error::Io(ErrorCode::ENOSPC));
        let events = events.events();
        assert_eq!(events.iter().filter(|e| e.is_failure()).count(), 1);
        assert_eq!(events.iter().filter(|e| !e.is_failure()).count(), 2);
    }

    #[tokio::test]
    async fn tied_write_errors_go_to_the_higher_child() {
        let disks = disks(3);
        disks[1].fail_writes(Some(ErrorCode::EIO));
        disks[2].fail_writes(Some(ErrorCode::ENOSPC));
        let (device, _) = device(&disks, 2);

        let err = device.write(0, &[1u8; 16]).await.unwrap_err();
        assert_eq!(err, Error::Io(ErrorCode::ENOSPC));
    }

    #[tokio::test]
    async fn write_zeroes_fans_out() {
        let disks = disks(2);
        for disk in &disks {
            disk.corrupt(0, &[0xffu8; 64]);
        }
        let (device, _) = device(&disks, 2);

        device.write_zeroes(0, 64).await.unwrap();
        for disk in &disks {
            assert_eq!(disk.contents()[..64], [0u8; 64]);
        }
    }

    #[tokio::test]
    async fn flush_votes_on_every_child() {
        let disks = disks(3);
        disks[2].fail_flush(Some(ErrorCode::EIO));
        let (device, events) = device(&disks, 3);

        // success holds the majority even though the threshold is 3
        device.flush().await.unwrap();
        let events = events.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].child(), Some("disk2"));

        disks[1].fail_flush(Some(ErrorCode::EIO));
        assert_eq!(device.flush().await, Err(Error::Io(ErrorCode::EIO)));
    }

    #[tokio::test]
    async fn flush_tie_goes_to_the_newest_code() {
        let disks = disks(2);
        disks[1].fail_flush(Some(ErrorCode::EIO));
        let (device, _) = device(&disks, 1);

        assert_eq!(device.flush().await, Err(Error::Io(ErrorCode::EIO)));
    }
}
