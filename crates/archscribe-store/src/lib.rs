// ABOUTME: Storage layer for archscribe tasks: JSON persistence and the message state handler.
// ABOUTME: The handler serializes all mutations of a task's message sequences behind one lock.

pub mod handler;
pub mod storage;

pub use handler::{MessageState, MessageStateHandler, StoreError};
pub use storage::{FileStorage, MemoryStorage, MessageStorage, StorageError};
