// The quorum engine. A logical request becomes one operation that fans out
// to the children, waits for them, and settles the result by vote.

pub mod child;
pub mod config;
pub mod device;
pub mod digest;
pub mod error;
pub mod event;
mod operation;
pub mod options;
mod read;
pub mod registry;
pub mod vote;

pub use read::SECTOR_SIZE;
