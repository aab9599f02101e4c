//! Checkpoint persistence
//!
//! Cursors and watermarks are stored per key with atomic writes and advisory
//! file locks.

pub mod checkpoint;
pub mod lock;
pub mod store;

pub use checkpoint::{cursor_key, watermark_key, CheckpointRecord};
pub use lock::CollectionLock;
pub use store::{
    checkpoint_file_name, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, ResumeError,
};
