mod bplus_tree;
mod btree_iterator;

pub use bplus_tree::BPlusTreeIndex;
pub use btree_iterator::TreeIndexIterator;
