pub mod error;
pub mod index;
pub mod node;
pub mod serialization;

pub use error::BTreeError;
pub use index::{BPlusTree, BPlusTreeIter};
pub use node::{InternalNode, LeafNode, TreeNode};
