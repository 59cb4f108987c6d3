//! The pager: translates page numbers into in-memory nodes, loading
//! pages from the database file lazily and flushing them back on
//! request. There is no eviction and no free list — a page, once
//! touched, stays resident for the life of the process, and a page
//! freed by a merge is simply never reused (spec.md §4.1, §4.6).
use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::rc::Rc;

use crate::err;
use crate::errors::Error;
use crate::storage::node::{Node, PAGE_SIZE};

/// Upper bound on resident pages. A single table's worth of rows tops
/// out well under this for any database file a test or a human would
/// actually grow by hand; hitting it is an aborted-operation condition,
/// not a silent truncation.
pub const MAX_PAGES: usize = 4096;

/// A page slot is an `Rc<RefCell<Node>>` rather than the node itself:
/// `heapless::Vec`'s backing array is inline, and `Node` is a full
/// `PAGE_SIZE` buffer, so storing nodes directly would make the pager
/// itself several megabytes. Cloning the `Rc` out of `get_page` also
/// lets two pages (say, a node and its new split sibling) stay
/// independently borrowed at once without fighting the pager's own
/// `&mut self`.
type Slot = Option<Rc<RefCell<Node>>>;

pub struct Pager {
    file: File,
    /// Pages readable from the file as of `open`. Pages at or past this
    /// index are new and read back as all-zero until first flushed.
    file_pages: u32,
    /// High-water mark: one past the highest page number ever touched.
    num_pages: u32,
    pages: heapless::Vec<Slot, MAX_PAGES>,
}

impl Pager {
    /// Opens (creating if needed) the database file at `path`. The file
    /// length must be an exact multiple of `PAGE_SIZE`; anything else
    /// means the file was truncated or is not one of ours.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();
        if len % PAGE_SIZE as u64 != 0 {
            return Err(err!(
                Storage,
                "db file length {} is not a multiple of page size {}",
                len,
                PAGE_SIZE
            ));
        }
        let file_pages = (len / PAGE_SIZE as u64) as u32;
        Ok(Pager {
            file,
            file_pages,
            num_pages: file_pages,
            pages: heapless::Vec::new(),
        })
    }

    /// One past the highest page number currently in use — the page
    /// number a new page should be allocated at.
    pub fn unused_page_num(&self) -> u32 {
        self.num_pages
    }

    fn ensure_slot(&mut self, page_num: u32) -> Result<(), Error> {
        if page_num as usize >= MAX_PAGES {
            return Err(err!(
                Storage,
                "page {} exceeds MAX_PAGES {}",
                page_num,
                MAX_PAGES
            ));
        }
        while self.pages.len() <= page_num as usize {
            self.pages
                .push(None)
                .map_err(|_| err!(Storage, "pager slot array is full"))?;
        }
        Ok(())
    }

    /// Returns the node at `page_num`, reading it from the file on
    /// first access. Loading past the current high-water mark extends
    /// the table by one page (this is how new leaf/internal pages come
    /// into existence — see `Table::insert`).
    pub fn get_page(&mut self, page_num: u32) -> Result<Rc<RefCell<Node>>, Error> {
        self.ensure_slot(page_num)?;
        if self.pages[page_num as usize].is_none() {
            let mut node = Node::zeroed();
            if page_num < self.file_pages {
                let mut buf = [0u8; PAGE_SIZE];
                self.file.seek(SeekFrom::Start(
                    page_num as u64 * PAGE_SIZE as u64,
                ))?;
                self.file.read_exact(&mut buf)?;
                node = Node::from_bytes(buf);
            }
            self.pages[page_num as usize] = Some(Rc::new(RefCell::new(node)));
        }
        if page_num >= self.num_pages {
            self.num_pages = page_num + 1;
        }
        Ok(self.pages[page_num as usize].clone().unwrap())
    }

    /// Writes the resident page at `page_num` back to the file.
    /// Flushing a page that was never loaded is a programming error in
    /// the caller (there is nothing to flush), not a recoverable state.
    pub fn flush(&mut self, page_num: u32) -> Result<(), Error> {
        let slot = self
            .pages
            .get(page_num as usize)
            .and_then(|s| s.as_ref())
            .ok_or_else(|| err!(Storage, "flush of unloaded page {}", page_num))?;
        let bytes = *slot.borrow().as_bytes();
        self.file
            .seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))?;
        self.file.write_all(&bytes)?;
        Ok(())
    }

    /// Flushes every resident page and syncs the file to disk.
    pub fn close(&mut self) -> Result<(), Error> {
        for page_num in 0..self.num_pages {
            if self.pages[page_num as usize].is_some() {
                self.flush(page_num)?;
            }
        }
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::node::NodeType;

    #[test]
    fn new_pages_start_zeroed_past_file_end() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut pager = Pager::open(tmp.path()).unwrap();
        assert_eq!(pager.unused_page_num(), 0);

        let page = pager.get_page(0).unwrap();
        page.borrow_mut().initialize_leaf();
        assert_eq!(pager.unused_page_num(), 1);
        assert_eq!(page.borrow().node_type().unwrap(), NodeType::Leaf);
    }

    #[test]
    fn flush_then_reopen_round_trips() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        {
            let mut pager = Pager::open(tmp.path()).unwrap();
            let page = pager.get_page(0).unwrap();
            page.borrow_mut().initialize_leaf();
            page.borrow_mut().set_leaf_num_cells(3);
            pager.close().unwrap();
        }
        {
            let mut pager = Pager::open(tmp.path()).unwrap();
            assert_eq!(pager.unused_page_num(), 1);
            let page = pager.get_page(0).unwrap();
            assert_eq!(page.borrow().leaf_num_cells(), 3);
        }
    }

    #[test]
    fn rejects_corrupt_file_length() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), [0u8; 10]).unwrap();
        assert!(Pager::open(tmp.path()).is_err());
    }

    #[test]
    fn two_pages_can_be_borrowed_independently() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut pager = Pager::open(tmp.path()).unwrap();
        let a = pager.get_page(0).unwrap();
        let b = pager.get_page(1).unwrap();
        let _a_ref = a.borrow_mut();
        let _b_ref = b.borrow_mut();
    }
}
