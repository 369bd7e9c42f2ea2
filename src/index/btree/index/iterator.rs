use std::sync::Arc;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::storage::buffer::BufferPoolManager;
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{LeafNode, TreeNode};
use crate::index::btree::serialization::deserialize_node;
use super::base::BPlusTree;

/// Ordered cursor over the leaf chain. Holds the current leaf pinned and
/// releases the pin when it advances past the leaf or is dropped.
pub struct BPlusTreeIter<K> {
    buffer_pool: Arc<BufferPoolManager>,
    leaf: Option<LeafNode<K>>,
    index: usize,
}

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Iterate from the smallest key
    pub fn iter(&self) -> Result<BPlusTreeIter<K>, BTreeError> {
        let root = self.root_page_id.lock();
        if *root == INVALID_PAGE_ID {
            return Ok(BPlusTreeIter::end(self.buffer_pool.clone()));
        }

        let (_page, leaf) = self.find_leftmost_leaf(*root)?;
        Ok(BPlusTreeIter {
            buffer_pool: self.buffer_pool.clone(),
            leaf: Some(leaf),
            index: 0,
        })
    }

    /// Iterate from the first entry whose key is >= `key`
    pub fn iter_from(&self, key: &K) -> Result<BPlusTreeIter<K>, BTreeError> {
        let root = self.root_page_id.lock();
        if *root == INVALID_PAGE_ID {
            return Ok(BPlusTreeIter::end(self.buffer_pool.clone()));
        }

        let (_page, leaf) = self.find_leaf(*root, key)?;
        // key_index may equal the leaf size; the first next() rolls over to
        // the following leaf in that case.
        let index = leaf.key_index(key);
        Ok(BPlusTreeIter {
            buffer_pool: self.buffer_pool.clone(),
            leaf: Some(leaf),
            index,
        })
    }
}

impl<K> BPlusTreeIter<K> {
    fn end(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            leaf: None,
            index: 0,
        }
    }
}

impl<K> Iterator for BPlusTreeIter<K>
where
    K: Clone + Ord + for<'de> Deserialize<'de>,
{
    type Item = (K, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let leaf = self.leaf.as_ref()?;

            if self.index < leaf.size() {
                let entry = leaf.entries[self.index].clone();
                self.index += 1;
                return Some(entry);
            }

            // Exhausted this leaf: release it and follow the chain
            let next_page_id = leaf.next_page_id;
            self.buffer_pool.unpin_page(leaf.page_id, false);
            self.leaf = None;

            if next_page_id == INVALID_PAGE_ID {
                return None;
            }

            let page = match self.buffer_pool.fetch_page(next_page_id) {
                Ok(page) => page,
                Err(e) => {
                    warn!("index iterator stopped: {}", e);
                    return None;
                }
            };
            let decoded = {
                let guard = page.read();
                deserialize_node::<K>(&guard)
            };
            match decoded {
                Ok(TreeNode::Leaf(next_leaf)) => {
                    self.leaf = Some(next_leaf);
                    self.index = 0;
                }
                Ok(TreeNode::Internal(_)) | Err(_) => {
                    warn!("index iterator hit a non-leaf page {}", next_page_id);
                    self.buffer_pool.unpin_page(next_page_id, false);
                    return None;
                }
            }
        }
    }
}

impl<K> Drop for BPlusTreeIter<K> {
    fn drop(&mut self) {
        if let Some(leaf) = self.leaf.take() {
            self.buffer_pool.unpin_page(leaf.page_id, false);
        }
    }
}
