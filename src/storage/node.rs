//! The on-disk node layout: a fixed-size page interpreted as either a
//! leaf or an internal B+tree node.
//!
//! A node is nothing but offset arithmetic over a `[u8; PAGE_SIZE]`
//! buffer — a common 6-byte header (type, is_root, parent), followed by
//! a leaf or internal header, followed by a packed array of fixed-width
//! cells. There is no free list and no variable-length anything: every
//! cell in a leaf is exactly a serialized row (see `super::row`), and
//! every cell in an internal node is a (child page, separator key) pair.
use crate::err;
use crate::errors::Error;

pub const PAGE_SIZE: usize = 4096;

// --- Common node header: type(1) + is_root(1) + parent(4) ---
const NODE_TYPE_OFFSET: usize = 0;
const NODE_TYPE_SIZE: usize = 1;
const IS_ROOT_OFFSET: usize = NODE_TYPE_OFFSET + NODE_TYPE_SIZE;
const IS_ROOT_SIZE: usize = 1;
const PARENT_OFFSET: usize = IS_ROOT_OFFSET + IS_ROOT_SIZE;
const PARENT_SIZE: usize = 4;
pub const COMMON_NODE_HEADER_SIZE: usize = NODE_TYPE_SIZE + IS_ROOT_SIZE + PARENT_SIZE;

// --- Leaf header: num_cells(4) + next_leaf(4), after the common header ---
const LEAF_NUM_CELLS_OFFSET: usize = COMMON_NODE_HEADER_SIZE;
const LEAF_NUM_CELLS_SIZE: usize = 4;
const LEAF_NEXT_LEAF_OFFSET: usize = LEAF_NUM_CELLS_OFFSET + LEAF_NUM_CELLS_SIZE;
const LEAF_NEXT_LEAF_SIZE: usize = 4;
pub const LEAF_NODE_HEADER_SIZE: usize =
    COMMON_NODE_HEADER_SIZE + LEAF_NUM_CELLS_SIZE + LEAF_NEXT_LEAF_SIZE;

// --- Leaf cell: key(12) + value(4) ---
pub const LEAF_NODE_KEY_SIZE: usize = 12;
const LEAF_NODE_VALUE_SIZE: usize = 4;
pub const LEAF_NODE_CELL_SIZE: usize = LEAF_NODE_KEY_SIZE + LEAF_NODE_VALUE_SIZE;
pub const LEAF_NODE_SPACE_FOR_CELLS: usize = PAGE_SIZE - LEAF_NODE_HEADER_SIZE;
pub const LEAF_NODE_MAX_CELLS: usize = LEAF_NODE_SPACE_FOR_CELLS / LEAF_NODE_CELL_SIZE - 1;
pub const LEAF_NODE_RIGHT_SPLIT_COUNT: usize = (LEAF_NODE_MAX_CELLS + 1) / 2;
pub const LEAF_NODE_LEFT_SPLIT_COUNT: usize =
    (LEAF_NODE_MAX_CELLS + 1) - LEAF_NODE_RIGHT_SPLIT_COUNT;
pub const LEAF_NODE_MIN_CELLS: usize = LEAF_NODE_MAX_CELLS / 2;

// --- Internal header: num_keys(4) + right_child(4), after the common header ---
const INTERNAL_NUM_KEYS_OFFSET: usize = COMMON_NODE_HEADER_SIZE;
const INTERNAL_NUM_KEYS_SIZE: usize = 4;
const INTERNAL_RIGHT_CHILD_OFFSET: usize = INTERNAL_NUM_KEYS_OFFSET + INTERNAL_NUM_KEYS_SIZE;
const INTERNAL_RIGHT_CHILD_SIZE: usize = 4;
pub const INTERNAL_NODE_HEADER_SIZE: usize =
    COMMON_NODE_HEADER_SIZE + INTERNAL_NUM_KEYS_SIZE + INTERNAL_RIGHT_CHILD_SIZE;

// --- Internal cell: child(4) + key(12) ---
const INTERNAL_NODE_CHILD_SIZE: usize = 4;
const INTERNAL_NODE_KEY_SIZE: usize = 12;
const INTERNAL_NODE_CELL_SIZE: usize = INTERNAL_NODE_CHILD_SIZE + INTERNAL_NODE_KEY_SIZE;
const INTERNAL_NODE_SPACE_FOR_CELLS: usize = PAGE_SIZE - INTERNAL_NODE_HEADER_SIZE;
pub const INTERNAL_NODE_MAX_CELLS: usize =
    INTERNAL_NODE_SPACE_FOR_CELLS / INTERNAL_NODE_CELL_SIZE - 1;
pub const INTERNAL_NODE_MIN_CELLS: usize = 1;

/// Sentinel meaning "no child here yet" for a freshly initialized
/// internal node's right-child slot. Distinct from `0`, which is a
/// valid (root) page number.
pub const INVALID_PAGE_NUM: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Internal = 0,
    Leaf = 1,
}

/// A fixed-width page, interpreted as either a leaf or internal node.
///
/// `Node` owns its buffer; the pager hands out `Ref`/`RefMut` views onto
/// one of these per page slot. Key comparisons are byte-wise `memcmp`
/// over the 12-byte NUL-padded key buffer, equivalent to C `strcmp` for
/// the key shapes this system accepts (no embedded NULs, no bytes past
/// the first NUL matter).
#[derive(Debug, Clone)]
pub struct Node {
    data: [u8; PAGE_SIZE],
}

impl Node {
    pub fn zeroed() -> Self {
        Node {
            data: [0u8; PAGE_SIZE],
        }
    }

    pub fn from_bytes(data: [u8; PAGE_SIZE]) -> Self {
        Node { data }
    }

    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    // --- common header ---

    pub fn node_type(&self) -> Result<NodeType, Error> {
        match self.data[NODE_TYPE_OFFSET] {
            0 => Ok(NodeType::Internal),
            1 => Ok(NodeType::Leaf),
            other => Err(err!(Storage, "invalid node type byte {}", other)),
        }
    }

    pub fn set_node_type(&mut self, t: NodeType) {
        self.data[NODE_TYPE_OFFSET] = t as u8;
    }

    pub fn is_root(&self) -> bool {
        self.data[IS_ROOT_OFFSET] != 0
    }

    pub fn set_is_root(&mut self, is_root: bool) {
        self.data[IS_ROOT_OFFSET] = is_root as u8;
    }

    pub fn parent(&self) -> u32 {
        read_u32(&self.data, PARENT_OFFSET)
    }

    pub fn set_parent(&mut self, page_num: u32) {
        write_u32(&mut self.data, PARENT_OFFSET, page_num);
    }

    // --- leaf header ---

    pub fn leaf_num_cells(&self) -> u32 {
        read_u32(&self.data, LEAF_NUM_CELLS_OFFSET)
    }

    pub fn set_leaf_num_cells(&mut self, n: u32) {
        write_u32(&mut self.data, LEAF_NUM_CELLS_OFFSET, n);
    }

    pub fn leaf_next_leaf(&self) -> u32 {
        read_u32(&self.data, LEAF_NEXT_LEAF_OFFSET)
    }

    pub fn set_leaf_next_leaf(&mut self, page_num: u32) {
        write_u32(&mut self.data, LEAF_NEXT_LEAF_OFFSET, page_num);
    }

    pub fn initialize_leaf(&mut self) {
        self.set_node_type(NodeType::Leaf);
        self.set_is_root(false);
        self.set_leaf_num_cells(0);
        self.set_leaf_next_leaf(0);
    }

    fn leaf_cell_offset(&self, cell_num: usize) -> Result<usize, Error> {
        if cell_num > LEAF_NODE_MAX_CELLS {
            return Err(err!(
                Storage,
                "leaf cell {} exceeds LEAF_NODE_MAX_CELLS {}",
                cell_num,
                LEAF_NODE_MAX_CELLS
            ));
        }
        Ok(LEAF_NODE_HEADER_SIZE + cell_num * LEAF_NODE_CELL_SIZE)
    }

    pub fn leaf_cell(&self, cell_num: usize) -> Result<&[u8], Error> {
        let off = self.leaf_cell_offset(cell_num)?;
        Ok(&self.data[off..off + LEAF_NODE_CELL_SIZE])
    }

    pub fn set_leaf_cell(&mut self, cell_num: usize, bytes: &[u8; LEAF_NODE_CELL_SIZE]) -> Result<(), Error> {
        let off = self.leaf_cell_offset(cell_num)?;
        self.data[off..off + LEAF_NODE_CELL_SIZE].copy_from_slice(bytes);
        Ok(())
    }

    pub fn leaf_key(&self, cell_num: usize) -> Result<&[u8; LEAF_NODE_KEY_SIZE], Error> {
        let cell = self.leaf_cell(cell_num)?;
        Ok(cell[..LEAF_NODE_KEY_SIZE].try_into().unwrap())
    }

    pub fn leaf_value(&self, cell_num: usize) -> Result<&[u8], Error> {
        let cell = self.leaf_cell(cell_num)?;
        Ok(&cell[LEAF_NODE_KEY_SIZE..])
    }

    /// The last key in the node: cell `num_cells - 1` for a leaf, key
    /// `num_keys - 1` for an internal node. Fatal if the node is empty
    /// (an empty non-root node or an empty internal node is itself an
    /// invariant violation; an empty root leaf is handled by callers
    /// before they ever ask for its max key).
    pub fn max_key(&self) -> Result<[u8; LEAF_NODE_KEY_SIZE], Error> {
        match self.node_type()? {
            NodeType::Leaf => {
                let n = self.leaf_num_cells();
                if n == 0 {
                    return Err(err!(Storage, "max_key on an empty leaf"));
                }
                Ok(*self.leaf_key(n as usize - 1)?)
            }
            NodeType::Internal => {
                let n = self.internal_num_keys();
                if n == 0 {
                    return Err(err!(Storage, "max_key on an internal node with zero keys"));
                }
                Ok(*self.internal_key(n - 1)?)
            }
        }
    }

    // --- internal header ---

    pub fn internal_num_keys(&self) -> u32 {
        read_u32(&self.data, INTERNAL_NUM_KEYS_OFFSET)
    }

    pub fn set_internal_num_keys(&mut self, n: u32) {
        write_u32(&mut self.data, INTERNAL_NUM_KEYS_OFFSET, n);
    }

    pub fn internal_right_child(&self) -> u32 {
        read_u32(&self.data, INTERNAL_RIGHT_CHILD_OFFSET)
    }

    pub fn set_internal_right_child(&mut self, page_num: u32) {
        write_u32(&mut self.data, INTERNAL_RIGHT_CHILD_OFFSET, page_num);
    }

    pub fn initialize_internal(&mut self) {
        self.set_node_type(NodeType::Internal);
        self.set_is_root(false);
        self.set_internal_num_keys(0);
        // INVALID_PAGE_NUM, not 0: page 0 is always the root, so leaving
        // this zeroed would make an uninitialized node look like a
        // parent of the root.
        self.set_internal_right_child(INVALID_PAGE_NUM);
    }

    fn internal_cell_offset(&self, cell_num: u32) -> Result<usize, Error> {
        if cell_num as usize > INTERNAL_NODE_MAX_CELLS {
            return Err(err!(
                Storage,
                "internal cell {} exceeds INTERNAL_NODE_MAX_CELLS {}",
                cell_num,
                INTERNAL_NODE_MAX_CELLS
            ));
        }
        Ok(INTERNAL_NODE_HEADER_SIZE + cell_num as usize * INTERNAL_NODE_CELL_SIZE)
    }

    fn internal_cell(&self, cell_num: u32) -> Result<&[u8], Error> {
        let off = self.internal_cell_offset(cell_num)?;
        Ok(&self.data[off..off + INTERNAL_NODE_CELL_SIZE])
    }

    fn set_internal_cell(&mut self, cell_num: u32, bytes: &[u8; INTERNAL_NODE_CELL_SIZE]) -> Result<(), Error> {
        let off = self.internal_cell_offset(cell_num)?;
        self.data[off..off + INTERNAL_NODE_CELL_SIZE].copy_from_slice(bytes);
        Ok(())
    }

    /// Child pointer at index `i`. Returns the rightmost child when
    /// `i == num_keys`; fatal when `i > num_keys`.
    pub fn internal_child(&self, i: u32) -> Result<u32, Error> {
        let num_keys = self.internal_num_keys();
        if i > num_keys {
            return Err(err!(
                Storage,
                "internal child index {} exceeds num_keys {}",
                i,
                num_keys
            ));
        }
        if i == num_keys {
            Ok(self.internal_right_child())
        } else {
            let cell = self.internal_cell(i)?;
            Ok(u32::from_le_bytes(cell[..4].try_into().unwrap()))
        }
    }

    pub fn set_internal_child(&mut self, i: u32, child: u32) -> Result<(), Error> {
        let num_keys = self.internal_num_keys();
        if i > num_keys {
            return Err(err!(
                Storage,
                "internal child index {} exceeds num_keys {}",
                i,
                num_keys
            ));
        }
        if i == num_keys {
            self.set_internal_right_child(child);
            Ok(())
        } else {
            let key = *self.internal_key(i)?;
            let mut bytes = [0u8; INTERNAL_NODE_CELL_SIZE];
            bytes[..4].copy_from_slice(&child.to_le_bytes());
            bytes[4..].copy_from_slice(&key);
            self.set_internal_cell(i, &bytes)
        }
    }

    pub fn internal_key(&self, key_num: u32) -> Result<&[u8; INTERNAL_NODE_KEY_SIZE], Error> {
        let num_keys = self.internal_num_keys();
        if key_num >= num_keys {
            return Err(err!(
                Storage,
                "internal key index {} exceeds num_keys {}",
                key_num,
                num_keys
            ));
        }
        let cell = self.internal_cell(key_num)?;
        Ok(cell[4..].try_into().unwrap())
    }

    pub fn set_internal_key(&mut self, key_num: u32, key: &[u8; INTERNAL_NODE_KEY_SIZE]) -> Result<(), Error> {
        let child = self.internal_child(key_num)?;
        let mut bytes = [0u8; INTERNAL_NODE_CELL_SIZE];
        bytes[..4].copy_from_slice(&child.to_le_bytes());
        bytes[4..].copy_from_slice(key);
        self.set_internal_cell(key_num, &bytes)
    }

    /// Writes a full (child, key) cell at index `i`, shifting nothing.
    pub fn set_internal_cell_pair(&mut self, i: u32, child: u32, key: &[u8; INTERNAL_NODE_KEY_SIZE]) -> Result<(), Error> {
        let mut bytes = [0u8; INTERNAL_NODE_CELL_SIZE];
        bytes[..4].copy_from_slice(&child.to_le_bytes());
        bytes[4..].copy_from_slice(key);
        self.set_internal_cell(i, &bytes)
    }

    /// Raw (child, key) pair at index `i`, for shifting cells during
    /// insert/delete.
    pub fn internal_cell_pair(&self, i: u32) -> Result<(u32, [u8; INTERNAL_NODE_KEY_SIZE]), Error> {
        let cell = self.internal_cell(i)?;
        let child = u32::from_le_bytes(cell[..4].try_into().unwrap());
        let key = cell[4..].try_into().unwrap();
        Ok((child, key))
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacities_match_spec() {
        assert_eq!(LEAF_NODE_MAX_CELLS, 254);
        assert_eq!(LEAF_NODE_LEFT_SPLIT_COUNT, 128);
        assert_eq!(LEAF_NODE_RIGHT_SPLIT_COUNT, 127);
        assert_eq!(LEAF_NODE_MIN_CELLS, 127);
        assert_eq!(INTERNAL_NODE_MAX_CELLS, 254);
        assert_eq!(INTERNAL_NODE_MIN_CELLS, 1);
    }

    #[test]
    fn leaf_roundtrips_cells() {
        let mut node = Node::zeroed();
        node.initialize_leaf();
        let mut cell = [0u8; LEAF_NODE_CELL_SIZE];
        cell[..LEAF_NODE_KEY_SIZE].copy_from_slice(b"hello\0\0\0\0\0\0\0");
        cell[LEAF_NODE_KEY_SIZE..].copy_from_slice(&42u32.to_le_bytes());
        node.set_leaf_cell(0, &cell).unwrap();
        node.set_leaf_num_cells(1);

        assert_eq!(node.leaf_key(0).unwrap(), b"hello\0\0\0\0\0\0\0");
        assert_eq!(u32::from_le_bytes(node.leaf_value(0).unwrap().try_into().unwrap()), 42);
    }

    #[test]
    fn internal_child_uses_rightmost_at_num_keys() {
        let mut node = Node::zeroed();
        node.initialize_internal();
        node.set_internal_num_keys(1);
        node.set_internal_cell_pair(0, 7, b"aaaaaaaaaaaa").unwrap();
        node.set_internal_right_child(9);

        assert_eq!(node.internal_child(0).unwrap(), 7);
        assert_eq!(node.internal_child(1).unwrap(), 9);
        assert!(node.internal_child(2).is_err());
    }
}
