// Votes are grouped by value equality and counted. The version list keeps
// the scan order of a head-inserted list: the version created last is the
// first one looked at when picking a winner. Ties go to whichever tied
// version is met first in that order, so the outcome of a tie depends only
// on the child indices values were counted with, never on hashing or
// allocation order.

use super::digest::Digest;

/// One distinct value seen during a vote, with the children that produced
/// it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteVersion<V> {
    pub value: V,
    pub count: usize,
    pub members: Vec<usize>,
}

impl<V> VoteVersion<V> {
    /// The child whose data stands for this version.
    pub fn representative(&self) -> usize {
        self.members[0]
    }
}

/// Groups candidate values by equality and picks a majority.
#[derive(Debug, Clone)]
pub struct VoteTally<V> {
    // Oldest first. Scans walk it in reverse.
    versions: Vec<VoteVersion<V>>,
}

/// Tally over read buffer digests.
pub type ContentTally = VoteTally<Digest>;

/// Tally over child error codes, zero meaning success.
pub type ErrorTally = VoteTally<i64>;

impl<V: PartialEq> VoteTally<V> {
    pub fn new() -> Self {
        Self {
            versions: Vec::new(),
        }
    }

    /// Records that child `index` produced `value`.
    pub fn count(&mut self, value: V, index: usize) {
        match self.versions.iter_mut().find(|v| v.value == value) {
            Some(version) => {
                version.count += 1;
                version.members.push(index);
            }
            None => self.versions.push(VoteVersion {
                value,
                count: 1,
                members: vec![index],
            }),
        }
    }

    /// Versions in scan order, most recently created first.
    pub fn versions(&self) -> impl Iterator<Item = &VoteVersion<V>> {
        self.versions.iter().rev()
    }

    /// The version with the strictly highest count, the first one scanned
    /// winning ties. `None` when nothing was counted.
    pub fn winner(&self) -> Option<&VoteVersion<V>> {
        let mut max = 0;
        let mut winner = None;
        for version in self.versions() {
            if version.count > max {
                max = version.count;
                winner = Some(version);
            }
        }
        winner
    }

    /// Children that voted for something other than `value`.
    pub fn dissenters(&self, value: &V) -> Vec<usize> {
        self.versions()
            .filter(|v| v.value != *value)
            .flat_map(|v| v.members.iter().copied())
            .collect()
    }

    /// Total number of votes counted.
    pub fn total(&self) -> usize {
        self.versions.iter().map(|v| v.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

impl<V: PartialEq> Default for VoteTally<V> {
    fn default() -> Self {
        Self::new()
    }
}
