//! Filesystem primitives shared across features.

pub mod copy;
pub mod tree_hash;

pub use copy::{CopyFilter, copy_tree, copy_tree_excluding, dir_size};
pub use tree_hash::hash_tree;
