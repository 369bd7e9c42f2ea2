// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use storage::buffer::BufferPoolManager;
pub use storage::buffer::BufferPoolError;
pub use index::btree::BPlusTree;
pub use index::btree::BTreeError;
pub use transaction::{LockManager, TransactionManager};
