use std::mem;

use crate::common::types::{Rid, PAGE_SIZE};
use super::encoding::{LEAF_HEADER_SIZE, NODE_HEADER_SIZE};

// Each serialized entry carries a 2-byte key length prefix
const KEY_PREFIX_SIZE: usize = 2;

/// Derive how many entries a leaf node can hold for the given key type.
/// This is an estimate from the in-memory key width; variable-width
/// serialized keys stay safe because serialization rejects overflow.
pub fn calculate_leaf_capacity<K>() -> usize {
    let entry_size = KEY_PREFIX_SIZE + mem::size_of::<K>() + mem::size_of::<Rid>();
    ((PAGE_SIZE - LEAF_HEADER_SIZE) / entry_size).max(3)
}

/// Derive how many children an internal node can hold for the given key type
pub fn calculate_internal_capacity<K>() -> usize {
    let entry_size = KEY_PREFIX_SIZE + mem::size_of::<K>() + 4;
    ((PAGE_SIZE - NODE_HEADER_SIZE) / entry_size).max(4)
}
