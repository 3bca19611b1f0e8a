//! A replicated block-storage filter.
//!
//! A [`QuorumDevice`] presents one logical block device backed by several
//! child devices. Reads and writes fan out to the children and the results
//! are reconciled by majority vote, so silent corruption or failure of a
//! minority of children is tolerated. Corrupted children can optionally be
//! healed by rewriting the winning content to them.

pub mod hex;
pub mod quorum;

#[cfg(feature = "memory")]
pub mod disk;

pub use quorum::SECTOR_SIZE;
pub use quorum::{
    child::{ChildDevice, ErrorCode, RequestId},
    config::{Config, QuorumOptions, ReadPattern},
    device::{OperationHandle, QuorumDevice},
    digest::{Blake3Hasher, ContentHasher, Digest, HashError},
    error::{ConfigError, Error},
    event::{EventSink, OpType, QuorumEvent, RecordingSink, TracingSink},
    registry::{ChildResolver, DriverFactory, DriverRegistry, QuorumDriver},
};
