//! A session owns the one table this process was invoked against. Where
//! the teacher's `Session` held an open `Database` of many named
//! tables, spec.md fixes the scope at a single file passed on the
//! command line (spec.md §1, §6), so a session here is just the table
//! plus the path it was opened from, kept around for log context.
use std::path::{Path, PathBuf};

use crate::errors::Error;
use crate::storage::Table;

pub struct Session {
    pub table: Table,
    pub path: PathBuf,
}

impl Session {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let table = Table::open(path)?;
        Ok(Session {
            table,
            path: path.to_path_buf(),
        })
    }

    pub fn close(&mut self) -> Result<(), Error> {
        self.table.close()
    }
}
