mod btree_page;
mod common;
mod table_page;

pub use btree_page::{
    BPlusTreeInternalPageCodec, BPlusTreeLeafPageCodec, BPlusTreePageCodec, HeaderPageCodec,
};
pub use common::{CommonCodec, RidCodec};
pub use table_page::TablePageCodec;

/// A decoded value together with the number of bytes consumed.
pub type DecodedData<T> = (T, usize);
