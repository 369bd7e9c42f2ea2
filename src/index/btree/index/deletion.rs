use log::debug;
use serde::{Deserialize, Serialize};

use crate::common::types::{PageId, PagePtr, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{InternalNode, LeafNode, TreeNode};
use crate::index::btree::serialization::{serialize_internal, serialize_leaf};
use super::base::BPlusTree;

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Delete the entry for `key`. Absent keys are a no-op. Underflowing
    /// nodes borrow from or merge with a sibling; the rebalance can walk
    /// all the way up and shrink the tree.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let mut root = self.root_page_id.lock();
        if *root == INVALID_PAGE_ID {
            return Ok(());
        }

        let (leaf_page, mut leaf) = self.find_leaf(*root, key)?;
        let leaf_page_id = leaf.page_id;
        let old_size = leaf.size();
        let new_size = leaf.remove_and_delete_record(key);

        if new_size == old_size {
            self.buffer_pool.unpin_page(leaf_page_id, false);
            return Ok(());
        }

        if new_size < leaf.min_size() {
            self.coalesce_or_redistribute(&mut root, leaf_page, TreeNode::Leaf(leaf))
        } else {
            serialize_leaf(&leaf, &mut leaf_page.write())?;
            self.buffer_pool.unpin_page(leaf_page_id, true);
            Ok(())
        }
    }

    /// An underflowing node either borrows one entry from a sibling (if the
    /// sibling has spares) or merges into it. Takes ownership of the pinned
    /// node and releases it on every path.
    fn coalesce_or_redistribute(
        &self,
        root: &mut PageId,
        node_page: PagePtr,
        node: TreeNode<K>,
    ) -> Result<(), BTreeError> {
        let parent_page_id = node.parent_page_id();
        if parent_page_id == INVALID_PAGE_ID {
            return self.adjust_root(root, node_page, node);
        }

        let (parent_page, parent_node) = self.fetch_tree_node(parent_page_id)?;
        let mut parent = match parent_node {
            TreeNode::Internal(internal) => internal,
            TreeNode::Leaf(_) => {
                self.buffer_pool.unpin_page(parent_page_id, false);
                self.buffer_pool.unpin_page(node.page_id(), false);
                return Err(BTreeError::InvalidPageFormat);
            }
        };

        let node_index = match parent.value_index(node.page_id()) {
            Some(index) => index,
            None => {
                self.buffer_pool.unpin_page(parent_page_id, false);
                self.buffer_pool.unpin_page(node.page_id(), false);
                return Err(BTreeError::IntegrityViolation(format!(
                    "page {} missing from parent {}",
                    node.page_id(),
                    parent_page_id
                )));
            }
        };

        // Prefer the left sibling; the leftmost child falls back to the right
        let sibling_index = if node_index == 0 { 1 } else { node_index - 1 };
        let sibling_page_id = parent.value_at(sibling_index);
        let (sibling_page, sibling_node) = self.fetch_tree_node(sibling_page_id)?;

        match (node, sibling_node) {
            (TreeNode::Leaf(leaf), TreeNode::Leaf(sibling)) => self.rebalance_leaf(
                root, parent_page, parent, node_page, leaf, sibling_page, sibling, node_index,
            ),
            (TreeNode::Internal(internal), TreeNode::Internal(sibling)) => self
                .rebalance_internal(
                    root, parent_page, parent, node_page, internal, sibling_page, sibling,
                    node_index,
                ),
            (node, _) => {
                self.buffer_pool.unpin_page(parent_page_id, false);
                self.buffer_pool.unpin_page(node.page_id(), false);
                self.buffer_pool.unpin_page(sibling_page_id, false);
                Err(BTreeError::InvalidPageFormat)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn rebalance_leaf(
        &self,
        root: &mut PageId,
        parent_page: PagePtr,
        mut parent: InternalNode<K>,
        node_page: PagePtr,
        mut node: LeafNode<K>,
        sibling_page: PagePtr,
        mut sibling: LeafNode<K>,
        node_index: usize,
    ) -> Result<(), BTreeError> {
        let parent_page_id = parent.page_id;

        if sibling.size() > sibling.min_size() {
            // Redistribute one entry and refresh the parent separator
            if node_index == 0 {
                sibling.move_first_to_end_of(&mut node);
                parent.set_key_at(1, sibling.key_at(0).clone());
            } else {
                sibling.move_last_to_front_of(&mut node);
                parent.set_key_at(node_index, node.key_at(0).clone());
            }

            serialize_leaf(&node, &mut node_page.write())?;
            self.buffer_pool.unpin_page(node.page_id, true);
            serialize_leaf(&sibling, &mut sibling_page.write())?;
            self.buffer_pool.unpin_page(sibling.page_id, true);
            serialize_internal(&parent, &mut parent_page.write())?;
            self.buffer_pool.unpin_page(parent_page_id, true);
            return Ok(());
        }

        // Coalesce, always merging the right node into the left
        let (left_page, mut left, mut right, separator_index) = if node_index == 0 {
            (node_page, node, sibling, 1)
        } else {
            (sibling_page, sibling, node, node_index)
        };

        debug!("merging leaf {} into {}", right.page_id, left.page_id);
        right.move_all_to(&mut left);
        parent.remove(separator_index);

        serialize_leaf(&left, &mut left_page.write())?;
        self.buffer_pool.unpin_page(left.page_id, true);

        self.buffer_pool.unpin_page(right.page_id, false);
        self.buffer_pool.delete_page(right.page_id)?;

        self.finish_parent(root, parent_page, parent)
    }

    #[allow(clippy::too_many_arguments)]
    fn rebalance_internal(
        &self,
        root: &mut PageId,
        parent_page: PagePtr,
        mut parent: InternalNode<K>,
        node_page: PagePtr,
        mut node: InternalNode<K>,
        sibling_page: PagePtr,
        mut sibling: InternalNode<K>,
        node_index: usize,
    ) -> Result<(), BTreeError> {
        let parent_page_id = parent.page_id;

        if sibling.size() > sibling.min_size() {
            // Borrow one child through the parent separator
            if node_index == 0 {
                let middle_key = parent.key_at(1).clone();
                let moved = sibling.move_first_to_end_of(&mut node, middle_key);
                parent.set_key_at(1, sibling.key_at(0).clone());
                self.reparent(moved, node.page_id)?;
            } else {
                let middle_key = parent.key_at(node_index).clone();
                let moved = sibling.move_last_to_front_of(&mut node, middle_key);
                parent.set_key_at(node_index, node.key_at(0).clone());
                self.reparent(moved, node.page_id)?;
            }

            serialize_internal(&node, &mut node_page.write())?;
            self.buffer_pool.unpin_page(node.page_id, true);
            serialize_internal(&sibling, &mut sibling_page.write())?;
            self.buffer_pool.unpin_page(sibling.page_id, true);
            serialize_internal(&parent, &mut parent_page.write())?;
            self.buffer_pool.unpin_page(parent_page_id, true);
            return Ok(());
        }

        // Coalesce right into left, pulling the separator down into the
        // right node's vacant slot-0 key
        let (left_page, mut left, mut right, separator_index) = if node_index == 0 {
            (node_page, node, sibling, 1)
        } else {
            (sibling_page, sibling, node, node_index)
        };

        let middle_key = parent.key_at(separator_index).clone();
        let moved_children = right.move_all_to(&mut left, middle_key);
        parent.remove(separator_index);

        for child in moved_children {
            self.reparent(child, left.page_id)?;
        }

        serialize_internal(&left, &mut left_page.write())?;
        self.buffer_pool.unpin_page(left.page_id, true);

        self.buffer_pool.unpin_page(right.page_id, false);
        self.buffer_pool.delete_page(right.page_id)?;

        self.finish_parent(root, parent_page, parent)
    }

    /// After a merge removed a separator, the parent may underflow in turn
    fn finish_parent(
        &self,
        root: &mut PageId,
        parent_page: PagePtr,
        parent: InternalNode<K>,
    ) -> Result<(), BTreeError> {
        let parent_is_root = parent.parent_page_id == INVALID_PAGE_ID;
        let parent_min = if parent_is_root { 2 } else { parent.min_size() };

        if parent.size() < parent_min {
            self.coalesce_or_redistribute(root, parent_page, TreeNode::Internal(parent))
        } else {
            let parent_page_id = parent.page_id;
            serialize_internal(&parent, &mut parent_page.write())?;
            self.buffer_pool.unpin_page(parent_page_id, true);
            Ok(())
        }
    }

    /// The rebalance reached the root. Two cases shrink the tree: an empty
    /// root leaf empties the whole tree, and a one-child root internal node
    /// promotes its child.
    fn adjust_root(
        &self,
        root: &mut PageId,
        node_page: PagePtr,
        node: TreeNode<K>,
    ) -> Result<(), BTreeError> {
        match node {
            TreeNode::Leaf(leaf) => {
                if leaf.size() == 0 {
                    let page_id = leaf.page_id;
                    self.buffer_pool.unpin_page(page_id, false);
                    self.buffer_pool.delete_page(page_id)?;
                    *root = INVALID_PAGE_ID;
                    self.update_root_record(INVALID_PAGE_ID)
                } else {
                    serialize_leaf(&leaf, &mut node_page.write())?;
                    self.buffer_pool.unpin_page(leaf.page_id, true);
                    Ok(())
                }
            }
            TreeNode::Internal(mut internal) => {
                if internal.size() == 1 {
                    let new_root = internal.remove_and_return_only_child();
                    debug!("collapsing root {} into child {}", internal.page_id, new_root);
                    self.reparent(new_root, INVALID_PAGE_ID)?;
                    *root = new_root;
                    self.update_root_record(new_root)?;

                    let old_root = internal.page_id;
                    self.buffer_pool.unpin_page(old_root, false);
                    self.buffer_pool.delete_page(old_root)?;
                    Ok(())
                } else {
                    serialize_internal(&internal, &mut node_page.write())?;
                    self.buffer_pool.unpin_page(internal.page_id, true);
                    Ok(())
                }
            }
        }
    }
}
