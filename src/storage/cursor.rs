//! Cursor positioning: `table_find`/`table_start` locate a `(page_num,
//! cell_num)` position in leaf-cell key order; `advance` walks the leaf
//! chain. A cursor is plain data — it borrows nothing, and is only
//! valid until the next call that mutates the tree (spec.md §5, §9:
//! "no cursor or iterator may outlive the operation that produced it").
use super::btree::Table;
use super::node::NodeType;
use super::row::KEY_SIZE;
use crate::errors::Error;

#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    pub page_num: u32,
    pub cell_num: u32,
    pub end_of_table: bool,
}

impl Cursor {
    /// The leftmost leaf cell, descending the left spine from the root.
    /// Equivalent to (and replaces) probing for a sentinel minimum key:
    /// this works regardless of what the smallest key in the tree
    /// actually is.
    pub fn table_start(table: &mut Table) -> Result<Cursor, Error> {
        let mut page_num = table.root_page_num;
        loop {
            let node = table.pager.get_page(page_num)?;
            let node_type = node.borrow().node_type()?;
            match node_type {
                NodeType::Leaf => {
                    let num_cells = node.borrow().leaf_num_cells();
                    return Ok(Cursor {
                        page_num,
                        cell_num: 0,
                        end_of_table: num_cells == 0,
                    });
                }
                NodeType::Internal => {
                    let child = node.borrow().internal_child(0)?;
                    page_num = child;
                }
            }
        }
    }

    /// Locates the leftmost leaf cell with key `>= key`; if the leaf
    /// holds no such cell, `cell_num` is the insertion index
    /// (`num_cells`). Duplicates: this is also the leftmost occurrence
    /// of an equal key, which is what search and delete need. Insert
    /// needs the far end of the equal-key run instead, to keep
    /// duplicates in insertion order — see `Table::find_insert_position`.
    pub fn table_find(table: &mut Table, key: &[u8; KEY_SIZE]) -> Result<Cursor, Error> {
        let mut page_num = table.root_page_num;
        loop {
            let node = table.pager.get_page(page_num)?;
            let node_type = node.borrow().node_type()?;
            match node_type {
                NodeType::Leaf => {
                    let cell_num = leaf_find(&node.borrow(), key)?;
                    return Ok(Cursor {
                        page_num,
                        cell_num,
                        end_of_table: false,
                    });
                }
                NodeType::Internal => {
                    let child = internal_find(&node.borrow(), key)?;
                    page_num = child;
                }
            }
        }
    }

    /// Advances to the next cell in key order, following the leaf chain
    /// when the current page is exhausted.
    pub fn advance(&mut self, table: &mut Table) -> Result<(), Error> {
        let node = table.pager.get_page(self.page_num)?;
        let node = node.borrow();
        self.cell_num += 1;
        if self.cell_num >= node.leaf_num_cells() {
            let next = node.leaf_next_leaf();
            if next == 0 {
                self.end_of_table = true;
            } else {
                self.page_num = next;
                self.cell_num = 0;
            }
        }
        Ok(())
    }
}

/// Leftmost index `i` in `[0, num_cells]` with `key <= cell_key(i)` (or
/// `num_cells` if no such cell exists).
fn leaf_find(node: &super::node::Node, key: &[u8; KEY_SIZE]) -> Result<u32, Error> {
    let mut lo = 0u32;
    let mut hi = node.leaf_num_cells();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let mid_key = node.leaf_key(mid as usize)?;
        if key <= mid_key {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Ok(lo)
}

/// Leftmost index `i` in `[0, num_keys]` with `key <= key_i` (or
/// `num_keys`, the rightmost child, if no such key exists). The child
/// to recurse into is `internal_child(i)` directly: by the tree's
/// invariant `max_key(child(i)) <= key_i`, so the leftmost occurrence
/// of a duplicated key straddling a separator is still found by
/// descending leftward first.
fn internal_find(node: &super::node::Node, key: &[u8; KEY_SIZE]) -> Result<u32, Error> {
    let mut lo = 0u32;
    let mut hi = node.internal_num_keys();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let mid_key = node.internal_key(mid)?;
        if key <= mid_key {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    node.internal_child(lo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::row::Row;

    #[test]
    fn start_on_empty_table_is_end_of_table() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut table = Table::open(tmp.path()).unwrap();
        let cursor = Cursor::table_start(&mut table).unwrap();
        assert_eq!(cursor.page_num, 0);
        assert_eq!(cursor.cell_num, 0);
        assert!(cursor.end_of_table);
    }

    #[test]
    fn find_positions_at_leftmost_equal_key() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut table = Table::open(tmp.path()).unwrap();
        for (a, b) in [(1, "b"), (2, "b"), (3, "d")] {
            table.insert(&Row::new(a, b).unwrap()).unwrap();
        }
        let key = crate::storage::row::encode_key("b").unwrap();
        let cursor = Cursor::table_find(&mut table, &key).unwrap();
        assert_eq!(cursor.cell_num, 0);
    }
}
