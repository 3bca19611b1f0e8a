// Reads come in two shapes. The quorum pattern reads every child into a
// private buffer, waits for all of them, and votes on the content. The fifo
// pattern reads one child at a time in index order and takes the first
// success without voting.

use futures::{stream::FuturesUnordered, StreamExt};
use tracing::{debug, error, warn};

use super::{
    child::tracked,
    error::Error,
    operation::QuorumOperation,
    vote::ContentTally,
};
use crate::hex::HexDisplayExt;

/// Granularity used when reporting where two children diverge.
pub const SECTOR_SIZE: u64 = 512;

/// Position of the first byte where `a` and `b` differ.
pub(crate) fn first_mismatch(a: &[u8], b: &[u8]) -> Option<usize> {
    a.iter()
        .zip(b)
        .position(|(x, y)| x != y)
        .or_else(|| (a.len() != b.len()).then(|| a.len().min(b.len())))
}

/// Verify mode diagnoses two children that must be byte-identical. Any
/// divergence ends the process on the spot and cannot be caught.
#[cold]
fn verify_mismatch(offset: u64) -> ! {
    let sector = offset / SECTOR_SIZE;
    error!(offset, sector, "quorum: contents mismatch in verify mode");
    eprintln!("quorum: contents mismatch at sector {}", sector);
    std::process::abort()
}

impl QuorumOperation<'_> {
    pub(crate) async fn read_quorum(
        mut self,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        let device = self.device;
        let (offset, length) = (self.offset, self.length);
        let mut pending: FuturesUnordered<_> = self
            .children
            .iter_mut()
            .enumerate()
            .map(|(index, request)| {
                let child = device.child(index);
                let id = request.id;
                let mut scratch = std::mem::take(&mut request.buffer);
                scratch.resize(length, 0);
                async move {
                    let result =
                        tracked(child, id, child.read(id, offset, &mut scratch))
                            .await;
                    (index, scratch, result)
                }
            })
            .collect();

        while let Some((index, scratch, result)) = pending.next().await {
            self.children[index].buffer = scratch;
            self.complete_child(index, result);
        }
        drop(pending);

        self.check_io_quorum()?;
        self.vote(buf).await
    }

    async fn vote(mut self, buf: &mut [u8]) -> Result<(), Error> {
        let successful: Vec<usize> = (0..self.child_count())
            .filter(|&i| self.children[i].succeeded())
            .collect();
        let reference = successful[0];

        let mut agreed = true;
        for &other in &successful[1..] {
            let mismatch = first_mismatch(
                &self.children[reference].buffer,
                &self.children[other].buffer,
            );
            if let Some(at) = mismatch {
                if self.device.config.verify_mode() {
                    verify_mismatch(self.offset + at as u64);
                }
                debug!(reference, other, at, "children disagree");
                agreed = false;
                break;
            }
        }
        if agreed {
            buf.copy_from_slice(&self.children[reference].buffer);
            return Ok(());
        }

        let mut tally = ContentTally::new();
        for &index in &successful {
            let digest =
                self.device.hasher.digest(&self.children[index].buffer)?;
            tally.count(digest, index);
        }
        let winner = match tally.winner() {
            Some(winner) => winner,
            None => return Err(Error::QuorumNotReached {
                votes: 0,
                threshold: self.threshold() as u32,
            }),
        };
        debug!(
            digest = %winner.value.hex().short(8),
            votes = winner.count,
            versions = tally.versions().count(),
            "content vote"
        );

        if winner.count < self.threshold() {
            warn!(
                votes = winner.count,
                threshold = self.threshold(),
                "no version reached the threshold"
            );
            self.device.report_failure(self.offset, self.length);
            return Err(Error::QuorumNotReached {
                votes: winner.count,
                threshold: self.threshold() as u32,
            });
        }

        let source = winner.representative();
        buf.copy_from_slice(&self.children[source].buffer);

        let dissenters = tally.dissenters(&winner.value);
        for &index in &dissenters {
            warn!(
                child = self.device.child(index).name(),
                "child returned a bad version"
            );
            self.device.report_bad(
                self.kind,
                index,
                self.offset,
                self.length,
                None,
            );
        }

        if self.device.config.repair_on_read() && !dissenters.is_empty() {
            self.repair(source, &dissenters).await;
        }
        Ok(())
    }

    /// Rewrites the winning content onto `targets`. Failures are logged and
    /// otherwise ignored; the read completes once every rewrite has.
    async fn repair(&mut self, source: usize, targets: &[usize]) {
        let device = self.device;
        let offset = self.offset;
        let content = &self.children[source].buffer;

        // set before anything is issued so the count cannot hit zero early
        self.pending_repairs = targets.len();
        let mut pending: FuturesUnordered<_> = targets
            .iter()
            .map(|&index| {
                let child = device.child(index);
                let id = device.next_request_id();
                async move {
                    let result =
                        tracked(child, id, child.write(id, offset, content))
                            .await;
                    (index, result)
                }
            })
            .collect();

        while self.pending_repairs > 0 {
            let (index, result) = match pending.next().await {
                Some(done) => done,
                None => break,
            };
            self.pending_repairs -= 1;
            match result {
                Ok(()) => {
                    debug!(child = device.child(index).name(), "repaired")
                }
                Err(code) => debug!(
                    child = device.child(index).name(),
                    %code,
                    "repair write failed"
                ),
            }
        }
        debug_assert_eq!(self.pending_repairs, 0);
    }

    pub(crate) async fn read_fifo(
        mut self,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        let device = self.device;
        loop {
            let index = self.cursor;
            let child = device.child(index);
            let id = self.children[index].id;
            let mut scratch = std::mem::take(&mut self.children[index].buffer);
            scratch.resize(self.length, 0);

            let result =
                tracked(child, id, child.read(id, self.offset, &mut scratch))
                    .await;
            self.children[index].buffer = scratch;
            self.complete_child(index, result);

            match result {
                Ok(()) => {
                    buf.copy_from_slice(&self.children[index].buffer);
                    return Ok(());
                }
                Err(_) if self.cursor + 1 < self.child_count() => {
                    self.cursor += 1;
                    debug!(next = self.cursor, "trying next child");
                }
                Err(code) => return Err(Error::Io(code)),
            }
        }
    }
}
