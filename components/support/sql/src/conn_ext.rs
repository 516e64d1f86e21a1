/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use rusqlite::{
    self, types::FromSql, Connection, Params, Result as SqlResult, Row, Transaction,
    TransactionBehavior,
};
use std::ops::Deref;

/// Convenience helpers shared by `rusqlite::Connection` and friends. You must
/// import `ConnExt` to call these on anything.
pub trait ConnExt {
    /// The method you need to implement to opt in to all of this.
    fn conn(&self) -> &Connection;

    /// Execute all the provided statements, one after another.
    fn execute_all(&self, stmts: &[&str]) -> SqlResult<()> {
        let conn = self.conn();
        for sql in stmts {
            conn.execute(sql, [])?;
        }
        Ok(())
    }

    /// Like `Connection::execute`, but caches the prepared statement.
    fn execute_cached<P: Params>(&self, sql: &str, params: P) -> SqlResult<usize> {
        let mut stmt = self.conn().prepare_cached(sql)?;
        stmt.execute(params)
    }

    /// Execute a query returning a single value in a single row.
    fn query_one<T: FromSql>(&self, sql: &str) -> SqlResult<T> {
        self.conn().query_row(sql, [], |row| row.get(0))
    }

    /// Like `query_one`, but with parameters, and `None` when no row matches.
    fn try_query_one<T: FromSql, P: Params>(&self, sql: &str, params: P) -> SqlResult<Option<T>> {
        use rusqlite::OptionalExtension;
        let mut stmt = self.conn().prepare_cached(sql)?;
        stmt.query_row(params, |row| row.get(0)).optional()
    }

    /// Run the mapper over a single row, or return `None` if there isn't one.
    fn try_query_row<T, E, P, F>(&self, sql: &str, params: P, mapper: F) -> Result<Option<T>, E>
    where
        P: Params,
        E: From<rusqlite::Error>,
        F: FnOnce(&Row<'_>) -> Result<T, E>,
    {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(sql)?;
        let mut rows = stmt.query(params)?;
        Ok(match rows.next()? {
            None => None,
            Some(row) => Some(mapper(row)?),
        })
    }

    /// Collect every row of a query through a fallible mapper.
    fn query_rows_and_then<T, E, P, F>(&self, sql: &str, params: P, mapper: F) -> Result<Vec<T>, E>
    where
        P: Params,
        E: From<rusqlite::Error>,
        F: FnMut(&Row<'_>) -> Result<T, E>,
    {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(sql)?;
        let mut mapper = mapper;
        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(mapper(row)?);
        }
        Ok(out)
    }

    /// Begin a transaction on a shared connection. See `UncheckedTransaction`.
    fn unchecked_transaction(&self) -> SqlResult<UncheckedTransaction<'_>> {
        UncheckedTransaction::new(self.conn(), TransactionBehavior::Deferred)
    }

    /// Like `unchecked_transaction`, but takes the write lock up front, which
    /// writers should prefer so they fail fast rather than upgrade mid-way.
    fn unchecked_transaction_imm(&self) -> SqlResult<UncheckedTransaction<'_>> {
        UncheckedTransaction::new(self.conn(), TransactionBehavior::Immediate)
    }
}

impl ConnExt for Connection {
    #[inline]
    fn conn(&self) -> &Connection {
        self
    }
}

impl ConnExt for Transaction<'_> {
    #[inline]
    fn conn(&self) -> &Connection {
        self
    }
}

/// rusqlite wants a `&mut Connection` to start a `Transaction`, which doesn't
/// work for connections shared behind a lock. This offers the same commit /
/// rollback-on-drop contract over an immutable connection; the caller takes on
/// the responsibility of never nesting them.
pub struct UncheckedTransaction<'conn> {
    conn: &'conn Connection,
    done: bool,
}

impl<'conn> UncheckedTransaction<'conn> {
    pub fn new(conn: &'conn Connection, behavior: TransactionBehavior) -> SqlResult<Self> {
        let begin = match behavior {
            TransactionBehavior::Deferred => "BEGIN DEFERRED",
            TransactionBehavior::Immediate => "BEGIN IMMEDIATE",
            TransactionBehavior::Exclusive => "BEGIN EXCLUSIVE",
            _ => "BEGIN DEFERRED",
        };
        conn.execute_batch(begin)?;
        Ok(UncheckedTransaction { conn, done: false })
    }

    /// Consumes and commits the transaction.
    pub fn commit(mut self) -> SqlResult<()> {
        self.done = true;
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    /// Consumes and rolls back the transaction.
    pub fn rollback(mut self) -> SqlResult<()> {
        self.done = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Deref for UncheckedTransaction<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
    }
}

impl Drop for UncheckedTransaction<'_> {
    fn drop(&mut self) {
        if self.done || self.conn.is_autocommit() {
            return;
        }
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            log::warn!("Error rolling back dropped transaction: {}", e);
        }
    }
}

impl ConnExt for UncheckedTransaction<'_> {
    #[inline]
    fn conn(&self) -> &Connection {
        self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        c.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT NOT NULL);")
            .unwrap();
        c
    }

    #[test]
    fn test_query_helpers() {
        let c = conn();
        c.execute_cached("INSERT INTO t (v) VALUES (:v)", rusqlite::named_params! { ":v": "a" })
            .unwrap();
        c.execute_cached("INSERT INTO t (v) VALUES (:v)", rusqlite::named_params! { ":v": "b" })
            .unwrap();

        let n: i64 = c.query_one("SELECT COUNT(*) FROM t").unwrap();
        assert_eq!(n, 2);

        let v: Option<String> = c
            .try_query_one("SELECT v FROM t WHERE id = ?", [1i64])
            .unwrap();
        assert_eq!(v.as_deref(), Some("a"));
        let v: Option<String> = c
            .try_query_one("SELECT v FROM t WHERE id = ?", [99i64])
            .unwrap();
        assert!(v.is_none());

        let all: Vec<String> = c
            .query_rows_and_then("SELECT v FROM t ORDER BY id", [], |row| {
                row.get::<_, String>(0)
            })
            .unwrap();
        assert_eq!(all, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_unchecked_transaction_rolls_back_on_drop() {
        let c = conn();
        {
            let tx = c.unchecked_transaction().unwrap();
            tx.execute_cached("INSERT INTO t (v) VALUES ('x')", []).unwrap();
            // dropped without commit
        }
        let n: i64 = c.query_one("SELECT COUNT(*) FROM t").unwrap();
        assert_eq!(n, 0);

        let tx = c.unchecked_transaction_imm().unwrap();
        tx.execute_cached("INSERT INTO t (v) VALUES ('y')", []).unwrap();
        tx.commit().unwrap();
        let n: i64 = c.query_one("SELECT COUNT(*) FROM t").unwrap();
        assert_eq!(n, 1);
    }
}
