mod capacity;
mod decoding;
mod encoding;

pub use capacity::{calculate_internal_capacity, calculate_leaf_capacity};
pub use decoding::deserialize_node;
pub use encoding::{serialize_internal, serialize_leaf, serialize_node};
