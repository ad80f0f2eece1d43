//! Bundled cache drivers

pub mod memory;

pub use memory::{start_auto_cleanup, MemoryDriver};
