//! Statement parsing and dispatch: `insert <a> <b>`, `select [b]`,
//! `delete <b>` against the one fixed-schema table (spec.md §6).
use crate::errors::Error;
use crate::storage::{Row, Table};
use tracing::info;

pub enum Statement {
    Insert { a: u32, b: String },
    SelectAll,
    SelectKey(String),
    Delete(String),
}

/// Parses a statement line (meta-commands are handled by the shell
/// before this is ever called).
pub fn parse(line: &str) -> Result<Statement, Error> {
    let mut parts = line.split_whitespace();
    let keyword = parts.next().ok_or_else(|| Error::Syntax("Syntax error.".to_string()))?;

    match keyword {
        "insert" => {
            let a_str = parts.next().ok_or_else(|| Error::Syntax("Syntax error.".to_string()))?;
            let b = parts.next().ok_or_else(|| Error::Syntax("Syntax error.".to_string()))?;
            if parts.next().is_some() {
                return Err(Error::Syntax("Syntax error.".to_string()));
            }
            let a: i64 = a_str
                .parse()
                .map_err(|_| Error::Syntax("Syntax error.".to_string()))?;
            if a < 0 {
                return Err(Error::Command(
                    "Column `a` must be positive.".to_string(),
                ));
            }
            let a: u32 = a
                .try_into()
                .map_err(|_| Error::Command("Column `a` must be positive.".to_string()))?;
            Ok(Statement::Insert {
                a,
                b: b.to_string(),
            })
        }
        "select" => match parts.next() {
            None => Ok(Statement::SelectAll),
            Some(b) => {
                if parts.next().is_some() {
                    return Err(Error::Syntax("Syntax error.".to_string()));
                }
                Ok(Statement::SelectKey(b.to_string()))
            }
        },
        "delete" => {
            let b = parts.next().ok_or_else(|| Error::Syntax("Syntax error.".to_string()))?;
            if parts.next().is_some() {
                return Err(Error::Syntax("Syntax error.".to_string()));
            }
            Ok(Statement::Delete(b.to_string()))
        }
        _ => Err(Error::Syntax("Syntax error.".to_string())),
    }
}

/// Runs a parsed statement, printing its result directly (rows or
/// `(Empty)`). Returns `Ok(())` on anything but a fatal storage error.
pub fn execute(table: &mut Table, statement: Statement) -> Result<(), Error> {
    match statement {
        Statement::Insert { a, b } => {
            let row = Row::new(a, &b)?;
            table.insert(&row)?;
            info!(a, b = %row.b_str(), "inserted row");
        }
        Statement::SelectAll => {
            let rows = table.traverse()?;
            print_rows(&rows);
        }
        Statement::SelectKey(b) => {
            let rows = table.search(&b)?;
            print_rows(&rows);
        }
        Statement::Delete(b) => {
            let deleted = table.delete(&b)?;
            info!(key = %b, deleted, "deleted rows");
        }
    }
    Ok(())
}

fn print_rows(rows: &[Row]) {
    if rows.is_empty() {
        println!("(Empty)");
        return;
    }
    for row in rows {
        println!("{}", row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_insert() {
        match parse("insert 7 hello").unwrap() {
            Statement::Insert { a, b } => {
                assert_eq!(a, 7);
                assert_eq!(b, "hello");
            }
            _ => panic!("expected Insert"),
        }
    }

    #[test]
    fn rejects_negative_a() {
        let err = parse("insert -1 hello").unwrap_err();
        assert_eq!(err.to_string(), "Column `a` must be positive.");
    }

    #[test]
    fn rejects_non_numeric_a() {
        let err = parse("insert abc hello").unwrap_err();
        assert_eq!(err.to_string(), "Syntax error.");
    }

    #[test]
    fn select_with_no_argument_selects_all() {
        assert!(matches!(parse("select").unwrap(), Statement::SelectAll));
    }

    #[test]
    fn select_with_argument_selects_key() {
        match parse("select hello").unwrap() {
            Statement::SelectKey(b) => assert_eq!(b, "hello"),
            _ => panic!("expected SelectKey"),
        }
    }

    #[test]
    fn delete_without_key_is_a_syntax_error() {
        assert!(parse("delete").is_err());
    }

    #[test]
    fn unrecognized_keyword_is_a_syntax_error() {
        assert!(parse("frobnicate").is_err());
    }
}
