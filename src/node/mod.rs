//! Node codec: encode/decode internal and leaf B+Tree nodes within one page.
//!
//! Every tree page carries a fixed `NodeHeader` followed by a fixed-width
//! body. Because every entry has a size known in advance from the tree's
//! `node_key_size`/`record_size`, bodies are packed tightly with no
//! cell-pointer indirection and no free-space bookkeeping: offsets are
//! computed directly from `key_count` and the declared widths.

mod codec;
mod header;

pub use codec::{
    internal_child, internal_delete_separator, internal_insert_separator, internal_key,
    internal_set_child, internal_set_key, leaf_delete_at, leaf_insert_at, leaf_key,
    leaf_key_count, leaf_record, leaf_update_record_at, validate_page_capacity, NodeLayout,
};
pub use header::{NodeHeader, NodeType, NODE_HEADER_SIZE};
