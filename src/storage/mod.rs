mod btree;
pub mod cursor;
mod node;
mod pager;
mod row;

pub use btree::Table;
pub use row::{encode_key, key_to_str, Row, KEY_SIZE, ROW_SIZE};

/// Layout constants for the `.constants` meta-command (spec.md §6).
#[derive(Debug, Clone, Copy)]
pub struct Constants {
    pub row_size: usize,
    pub common_node_header_size: usize,
    pub leaf_node_header_size: usize,
    pub leaf_node_cell_size: usize,
    pub leaf_node_space_for_cells: usize,
    pub leaf_node_max_cells: usize,
}

pub fn constants() -> Constants {
    Constants {
        row_size: ROW_SIZE,
        common_node_header_size: node::COMMON_NODE_HEADER_SIZE,
        leaf_node_header_size: node::LEAF_NODE_HEADER_SIZE,
        leaf_node_cell_size: node::LEAF_NODE_CELL_SIZE,
        leaf_node_space_for_cells: node::LEAF_NODE_SPACE_FOR_CELLS,
        leaf_node_max_cells: node::LEAF_NODE_MAX_CELLS,
    }
}
