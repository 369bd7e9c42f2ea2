use serde::{Deserialize, Serialize};

use crate::common::types::{PageId, PagePtr, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{InternalNode, LeafNode, TreeNode};
use crate::index::btree::serialization::{serialize_internal, serialize_leaf};
use super::base::BPlusTree;

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Insert a key/rid pair. Returns false (and changes nothing) when the
    /// key is already present.
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        let mut root = self.root_page_id.lock();

        if *root == INVALID_PAGE_ID {
            self.start_new_tree(&mut root, key, rid)?;
            return Ok(true);
        }

        let (leaf_page, mut leaf) = self.find_leaf(*root, &key)?;
        let leaf_page_id = leaf.page_id;
        let old_size = leaf.size();
        let new_size = leaf.insert(key, rid);

        if new_size == old_size {
            self.buffer_pool.unpin_page(leaf_page_id, false);
            return Ok(false);
        }

        if new_size >= self.leaf_max_size {
            self.split_leaf(&mut root, leaf_page, leaf)?;
        } else {
            serialize_leaf(&leaf, &mut leaf_page.write())?;
            self.buffer_pool.unpin_page(leaf_page_id, true);
        }
        Ok(true)
    }

    /// First insert into an empty tree: a fresh leaf becomes the root
    fn start_new_tree(&self, root: &mut PageId, key: K, rid: Rid) -> Result<(), BTreeError> {
        let (page, page_id) = self.buffer_pool.new_page()?;
        let mut leaf = LeafNode::new(page_id, INVALID_PAGE_ID, self.leaf_max_size);
        leaf.insert(key, rid);

        serialize_leaf(&leaf, &mut page.write())?;
        self.buffer_pool.unpin_page(page_id, true);

        *root = page_id;
        self.update_root_record(page_id)
    }

    /// A leaf reached max size: carve off its upper half into a new right
    /// sibling and push the sibling's first key up.
    fn split_leaf(
        &self,
        root: &mut PageId,
        leaf_page: PagePtr,
        mut leaf: LeafNode<K>,
    ) -> Result<(), BTreeError> {
        let (sibling_page, sibling_page_id) = self.buffer_pool.new_page()?;
        let mut sibling = LeafNode::new(sibling_page_id, leaf.parent_page_id, self.leaf_max_size);
        leaf.move_half_to(&mut sibling);
        let separator = sibling.key_at(0).clone();

        self.insert_into_parent(
            root,
            leaf_page,
            TreeNode::Leaf(leaf),
            separator,
            sibling_page,
            TreeNode::Leaf(sibling),
        )
    }

    /// Hook a freshly split `(left, right)` pair under their parent,
    /// creating a new root when the old root was the one that split, and
    /// recursing when the parent itself overflows. Stores and unpins both
    /// nodes on every path.
    fn insert_into_parent(
        &self,
        root: &mut PageId,
        left_page: PagePtr,
        mut left: TreeNode<K>,
        key: K,
        right_page: PagePtr,
        mut right: TreeNode<K>,
    ) -> Result<(), BTreeError> {
        let parent_page_id = left.parent_page_id();

        if parent_page_id == INVALID_PAGE_ID {
            // The old root split: the tree grows one level
            let (root_page, root_page_id) = self.buffer_pool.new_page()?;
            let mut new_root =
                InternalNode::new(root_page_id, INVALID_PAGE_ID, self.internal_max_size);
            new_root.populate_new_root(left.page_id(), key, right.page_id());
            left.set_parent_page_id(root_page_id);
            right.set_parent_page_id(root_page_id);

            self.write_tree_node(&left_page, &left)?;
            self.write_tree_node(&right_page, &right)?;
            serialize_internal(&new_root, &mut root_page.write())?;

            self.buffer_pool.unpin_page(left.page_id(), true);
            self.buffer_pool.unpin_page(right.page_id(), true);
            self.buffer_pool.unpin_page(root_page_id, true);

            *root = root_page_id;
            return self.update_root_record(root_page_id);
        }

        // Write the split pair back before touching the parent
        let left_page_id = left.page_id();
        let right_page_id = right.page_id();
        self.write_tree_node(&left_page, &left)?;
        self.write_tree_node(&right_page, &right)?;
        self.buffer_pool.unpin_page(left_page_id, true);
        self.buffer_pool.unpin_page(right_page_id, true);

        let (parent_page, parent_node) = self.fetch_tree_node(parent_page_id)?;
        let mut parent = match parent_node {
            TreeNode::Internal(node) => node,
            TreeNode::Leaf(_) => {
                self.buffer_pool.unpin_page(parent_page_id, false);
                return Err(BTreeError::InvalidPageFormat);
            }
        };

        let new_size = match parent.insert_node_after(left_page_id, key, right_page_id) {
            Some(size) => size,
            None => {
                self.buffer_pool.unpin_page(parent_page_id, false);
                return Err(BTreeError::IntegrityViolation(format!(
                    "page {} missing from parent {}",
                    left_page_id, parent_page_id
                )));
            }
        };

        if new_size > self.internal_max_size {
            let (new_page, new_page_id) = self.buffer_pool.new_page()?;
            let mut parent_sibling =
                InternalNode::new(new_page_id, parent.parent_page_id, self.internal_max_size);
            let moved_children = parent.move_half_to(&mut parent_sibling);
            for child in moved_children {
                self.reparent(child, new_page_id)?;
            }
            let separator = parent_sibling.key_at(0).clone();

            self.insert_into_parent(
                root,
                parent_page,
                TreeNode::Internal(parent),
                separator,
                new_page,
                TreeNode::Internal(parent_sibling),
            )
        } else {
            serialize_internal(&parent, &mut parent_page.write())?;
            self.buffer_pool.unpin_page(parent_page_id, true);
            Ok(())
        }
    }
}
