// Child devices that ship with the crate.

mod memory;

pub use memory::{MemoryDisk, WriteRecord};
