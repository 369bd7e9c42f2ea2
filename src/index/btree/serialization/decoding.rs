use byteorder::{ByteOrder, LittleEndian};
use serde::Deserialize;

use crate::common::types::{Page, Rid, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{InternalNode, LeafNode, TreeNode};
use super::encoding::{LEAF_HEADER_SIZE, NODE_HEADER_SIZE};

/// Deserialize a B+Tree node from a page
pub fn deserialize_node<K>(page: &Page) -> Result<TreeNode<K>, BTreeError>
where
    K: for<'de> Deserialize<'de> + Clone + Ord,
{
    let page_type = LittleEndian::read_u32(&page.data[0..4]);
    let size = LittleEndian::read_i32(&page.data[8..12]);
    let max_size = LittleEndian::read_i32(&page.data[12..16]);
    let parent_page_id = LittleEndian::read_i32(&page.data[16..20]);
    let page_id = LittleEndian::read_i32(&page.data[20..24]);

    if size < 0 || max_size < 0 {
        return Err(BTreeError::InvalidPageFormat);
    }
    let size = size as usize;

    match page_type {
        1 => {
            let next_page_id = LittleEndian::read_i32(&page.data[24..28]);
            let mut entries = Vec::with_capacity(size);
            let mut offset = LEAF_HEADER_SIZE;
            for _ in 0..size {
                let (key, next) = read_key::<K>(page, offset)?;
                offset = next;
                if offset + 8 > PAGE_SIZE {
                    return Err(BTreeError::DeserializationError(
                        "Not enough data for Rid".to_string(),
                    ));
                }
                let rid_page = LittleEndian::read_i32(&page.data[offset..offset + 4]);
                let rid_slot = LittleEndian::read_u32(&page.data[offset + 4..offset + 8]);
                offset += 8;
                entries.push((key, Rid::new(rid_page, rid_slot)));
            }
            Ok(TreeNode::Leaf(LeafNode {
                page_id,
                parent_page_id,
                max_size: max_size as usize,
                next_page_id,
                entries,
            }))
        }
        2 => {
            let mut entries = Vec::with_capacity(size);
            let mut offset = NODE_HEADER_SIZE;
            for _ in 0..size {
                let (key, next) = read_key::<K>(page, offset)?;
                offset = next;
                if offset + 4 > PAGE_SIZE {
                    return Err(BTreeError::DeserializationError(
                        "Not enough data for child pointer".to_string(),
                    ));
                }
                let child = LittleEndian::read_i32(&page.data[offset..offset + 4]);
                offset += 4;
                entries.push((key, child));
            }
            Ok(TreeNode::Internal(InternalNode {
                page_id,
                parent_page_id,
                max_size: max_size as usize,
                entries,
            }))
        }
        _ => Err(BTreeError::InvalidPageFormat),
    }
}

fn read_key<K>(page: &Page, offset: usize) -> Result<(K, usize), BTreeError>
where
    K: for<'de> Deserialize<'de>,
{
    if offset + 2 > PAGE_SIZE {
        return Err(BTreeError::DeserializationError(
            "Key length out of bounds".to_string(),
        ));
    }
    let key_len = LittleEndian::read_u16(&page.data[offset..offset + 2]) as usize;
    let start = offset + 2;
    if start + key_len > PAGE_SIZE {
        return Err(BTreeError::DeserializationError(
            "Key data out of bounds".to_string(),
        ));
    }
    let key = bincode::deserialize(&page.data[start..start + key_len])
        .map_err(|_| BTreeError::DeserializationError("Failed to deserialize key".to_string()))?;
    Ok((key, start + key_len))
}
