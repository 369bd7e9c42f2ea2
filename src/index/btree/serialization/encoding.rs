use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::common::types::{Page, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{InternalNode, LeafNode, NodeType, TreeNode};

// Common node header layout:
// - page_type: u32 (1 = leaf, 2 = internal)
// - lsn: u32
// - size: i32
// - max_size: i32
// - parent_page_id: i32
// - page_id: i32
// Leaf nodes append next_page_id: i32.
pub(crate) const NODE_HEADER_SIZE: usize = 24;
pub(crate) const LEAF_HEADER_SIZE: usize = NODE_HEADER_SIZE + 4;

/// Serialize a B+Tree node to a page
pub fn serialize_node<K>(node: &TreeNode<K>, page: &mut Page) -> Result<(), BTreeError>
where
    K: Serialize + Clone + Ord,
{
    match node {
        TreeNode::Leaf(leaf) => serialize_leaf(leaf, page),
        TreeNode::Internal(internal) => serialize_internal(internal, page),
    }
}

pub fn serialize_leaf<K>(node: &LeafNode<K>, page: &mut Page) -> Result<(), BTreeError>
where
    K: Serialize + Clone + Ord,
{
    page.data.fill(0);
    write_common_header(
        page,
        NodeType::Leaf,
        node.size(),
        node.max_size,
        node.parent_page_id,
        node.page_id,
    );
    LittleEndian::write_i32(&mut page.data[24..28], node.next_page_id);

    let mut offset = LEAF_HEADER_SIZE;
    for (key, rid) in &node.entries {
        offset = write_key(page, offset, key)?;
        if offset + 8 > PAGE_SIZE {
            return Err(BTreeError::NodeTooLarge);
        }
        LittleEndian::write_i32(&mut page.data[offset..offset + 4], rid.page_id);
        LittleEndian::write_u32(&mut page.data[offset + 4..offset + 8], rid.slot_num);
        offset += 8;
    }

    Ok(())
}

pub fn serialize_internal<K>(node: &InternalNode<K>, page: &mut Page) -> Result<(), BTreeError>
where
    K: Serialize + Clone + Ord,
{
    page.data.fill(0);
    write_common_header(
        page,
        NodeType::Internal,
        node.size(),
        node.max_size,
        node.parent_page_id,
        node.page_id,
    );

    let mut offset = NODE_HEADER_SIZE;
    for (key, child) in &node.entries {
        // Slot 0's key is semantically unused but written uniformly
        offset = write_key(page, offset, key)?;
        if offset + 4 > PAGE_SIZE {
            return Err(BTreeError::NodeTooLarge);
        }
        LittleEndian::write_i32(&mut page.data[offset..offset + 4], *child);
        offset += 4;
    }

    Ok(())
}

fn write_common_header(
    page: &mut Page,
    node_type: NodeType,
    size: usize,
    max_size: usize,
    parent_page_id: i32,
    page_id: i32,
) {
    LittleEndian::write_u32(&mut page.data[0..4], node_type as u32);
    LittleEndian::write_u32(&mut page.data[4..8], 0); // lsn, reserved
    LittleEndian::write_i32(&mut page.data[8..12], size as i32);
    LittleEndian::write_i32(&mut page.data[12..16], max_size as i32);
    LittleEndian::write_i32(&mut page.data[16..20], parent_page_id);
    LittleEndian::write_i32(&mut page.data[20..24], page_id);
}

fn write_key<K: Serialize>(page: &mut Page, offset: usize, key: &K) -> Result<usize, BTreeError> {
    let key_bytes = bincode::serialize(key)
        .map_err(|_| BTreeError::SerializationError("Failed to serialize key".to_string()))?;

    if offset + 2 + key_bytes.len() > PAGE_SIZE {
        return Err(BTreeError::NodeTooLarge);
    }

    LittleEndian::write_u16(&mut page.data[offset..offset + 2], key_bytes.len() as u16);
    page.data[offset + 2..offset + 2 + key_bytes.len()].copy_from_slice(&key_bytes);
    Ok(offset + 2 + key_bytes.len())
}
