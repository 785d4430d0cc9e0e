//! Table-scoped transactions and change triggers.
//!
//! A transaction declares up front which tables it touches. Each table has
//! its own mutex, so transactions over disjoint tables run in parallel while
//! overlapping ones serialize. Locks are always taken in [`Table`] order.
//!
//! Transactions are synchronous closures: nothing may await while holding a
//! table lock. Changes are published to triggers once the locks are released.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::error::DbError;
use crate::model::{Leadership, Minion};
use crate::table::{AnyRow, Row, RowId, Table};

type TableData = BTreeMap<RowId, AnyRow>;

/// Capacity of the change channel; slow triggers see `Lagged` and fire.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

struct Inner {
    tables: [Mutex<TableData>; Table::ALL.len()],
    next_id: AtomicU64,
    changes: broadcast::Sender<Table>,
}

/// In-memory transactional database.
///
/// Cloning is cheap; clones share the same tables.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    /// Create an empty database.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                tables: Default::default(),
                next_id: AtomicU64::new(1),
                changes,
            }),
        }
    }

    /// Start a transaction over `tables`.
    pub fn txn(&self, tables: &[Table]) -> Txn<'_> {
        let mut tables = tables.to_vec();
        tables.sort();
        tables.dedup();
        Txn { db: self, tables }
    }

    /// Select rows of one type in a single-table transaction.
    pub fn select<R, F>(&self, predicate: F) -> Vec<R>
    where
        R: Row,
        F: Fn(&R) -> bool,
    {
        let data = lock(&self.inner.tables[R::TABLE.index()]);
        data.values()
            .filter_map(R::from_any)
            .filter(|row| predicate(row))
            .cloned()
            .collect()
    }

    /// The minion row describing this machine.
    pub fn minion_self(&self) -> Result<Minion, DbError> {
        self.select::<Minion, _>(|m| m.is_self)
            .into_iter()
            .next()
            .ok_or(DbError::NoSelf)
    }

    /// Subscribe to changes on `tables`.
    pub fn trigger(&self, tables: &[Table]) -> Trigger {
        Trigger {
            tables: tables.iter().copied().collect(),
            rx: self.inner.changes.subscribe(),
        }
    }
}

fn lock(table: &Mutex<TableData>) -> MutexGuard<'_, TableData> {
    // Writers never leave a table half-updated, so a poisoned lock still
    // guards consistent data.
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A pending transaction over a declared set of tables.
pub struct Txn<'db> {
    db: &'db Database,
    tables: Vec<Table>,
}

impl<'db> Txn<'db> {
    /// Lock the declared tables and run `f` against them.
    ///
    /// If `f` returns an error, every write it made is rolled back.
    pub fn run<T, E, F>(self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut View<'_>) -> Result<T, E>,
    {
        let inner = &self.db.inner;
        let mut guards = BTreeMap::new();
        for table in &self.tables {
            guards.insert(*table, lock(&inner.tables[table.index()]));
        }

        let mut view = View {
            guards,
            undo: BTreeMap::new(),
            dirty: BTreeSet::new(),
            next_id: &inner.next_id,
        };

        let result = f(&mut view);

        let dirty = if result.is_err() {
            view.rollback();
            BTreeSet::new()
        } else {
            std::mem::take(&mut view.dirty)
        };
        drop(view);

        for table in dirty {
            // No receivers is fine.
            let _ = inner.changes.send(table);
        }

        result
    }
}

/// Read/write access to the tables locked by a transaction.
pub struct View<'a> {
    guards: BTreeMap<Table, MutexGuard<'a, TableData>>,
    undo: BTreeMap<Table, TableData>,
    dirty: BTreeSet<Table>,
    next_id: &'a AtomicU64,
}

impl View<'_> {
    fn table(&self, table: Table) -> Result<&TableData, DbError> {
        self.guards
            .get(&table)
            .map(|guard| &**guard)
            .ok_or(DbError::TableNotLocked { table })
    }

    fn table_mut(&mut self, table: Table) -> Result<&mut TableData, DbError> {
        let guard = self
            .guards
            .get_mut(&table)
            .ok_or(DbError::TableNotLocked { table })?;
        if let Entry::Vacant(entry) = self.undo.entry(table) {
            entry.insert((**guard).clone());
        }
        Ok(&mut **guard)
    }

    fn rollback(&mut self) {
        for (table, data) in std::mem::take(&mut self.undo) {
            if let Some(guard) = self.guards.get_mut(&table) {
                **guard = data;
            }
            debug!(%table, "Rolled back transaction writes");
        }
        self.dirty.clear();
    }

    /// Select rows matching `predicate`, in row id order.
    pub fn select<R, F>(&self, predicate: F) -> Result<Vec<R>, DbError>
    where
        R: Row,
        F: Fn(&R) -> bool,
    {
        let data = self.table(R::TABLE)?;
        Ok(data
            .values()
            .filter_map(R::from_any)
            .filter(|row| predicate(row))
            .cloned()
            .collect())
    }

    /// Select every row of one type.
    pub fn select_all<R: Row>(&self) -> Result<Vec<R>, DbError> {
        self.select(|_: &R| true)
    }

    /// Fetch one row by id.
    pub fn get<R: Row>(&self, id: RowId) -> Result<R, DbError> {
        self.table(R::TABLE)?
            .get(&id)
            .and_then(R::from_any)
            .cloned()
            .ok_or(DbError::RowNotFound {
                table: R::TABLE,
                id,
            })
    }

    /// Insert a default row with a fresh id and return it.
    pub fn insert<R: Row>(&mut self) -> Result<R, DbError> {
        let mut row = R::default();
        row.set_id(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.commit(row.clone())?;
        Ok(row)
    }

    /// Upsert `row` by id. A row with id 0 gets a fresh id.
    ///
    /// Writing a row identical to the stored one is not a change and does not
    /// fire triggers.
    pub fn commit<R: Row>(&mut self, mut row: R) -> Result<RowId, DbError> {
        if row.id() == 0 {
            row.set_id(self.next_id.fetch_add(1, Ordering::SeqCst));
        }
        let id = row.id();

        let unchanged = self
            .table(R::TABLE)?
            .get(&id)
            .and_then(R::from_any)
            .is_some_and(|existing| *existing == row);
        if unchanged {
            return Ok(id);
        }

        self.table_mut(R::TABLE)?.insert(id, row.into_any());
        self.dirty.insert(R::TABLE);
        Ok(id)
    }

    /// Delete `row`. Deleting a missing row is a no-op.
    pub fn remove<R: Row>(&mut self, row: &R) -> Result<(), DbError> {
        if !self.table(R::TABLE)?.contains_key(&row.id()) {
            return Ok(());
        }
        self.table_mut(R::TABLE)?.remove(&row.id());
        self.dirty.insert(R::TABLE);
        Ok(())
    }

    /// The minion row describing this machine.
    pub fn minion_self(&self) -> Result<Minion, DbError> {
        self.select::<Minion, _>(|m| m.is_self)?
            .into_iter()
            .next()
            .ok_or(DbError::NoSelf)
    }

    /// Returns true if this process currently holds cluster leadership.
    pub fn is_leader(&self) -> Result<bool, DbError> {
        Ok(self
            .select::<Leadership, _>(|l| l.leader)?
            .into_iter()
            .next()
            .is_some())
    }
}

/// Fires when any of a set of tables changes.
pub struct Trigger {
    tables: BTreeSet<Table>,
    rx: broadcast::Receiver<Table>,
}

impl Trigger {
    /// Wait until one of the watched tables changes.
    ///
    /// Falling behind counts as a change: callers re-read state anyway.
    pub async fn changed(&mut self) {
        loop {
            match self.rx.recv().await {
                Ok(table) if self.tables.contains(&table) => return,
                Ok(_) => continue,
                Err(RecvError::Lagged(_)) => return,
                Err(RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::model::{Container, Image};

    #[test]
    fn test_insert_and_select() {
        let db = Database::new();
        db.txn(&[Table::Container])
            .run(|view| {
                let mut dbc = view.insert::<Container>()?;
                dbc.hostname = "web".into();
                view.commit(dbc)?;
                Ok::<_, DbError>(())
            })
            .unwrap();

        let rows = db.select::<Container, _>(|c| c.hostname == "web");
        assert_eq!(rows.len(), 1);
        assert!(rows[0].id > 0);
    }

    #[test]
    fn test_undeclared_table_is_an_error() {
        let db = Database::new();
        let err = db
            .txn(&[Table::Container])
            .run(|view| view.select_all::<Minion>())
            .unwrap_err();

        assert_eq!(err, DbError::TableNotLocked { table: Table::Minion });
    }

    #[test]
    fn test_error_rolls_back_writes() {
        let db = Database::new();
        let result: Result<(), DbError> = db.txn(&[Table::Image]).run(|view| {
            view.insert::<Image>()?;
            Err(DbError::NoSelf)
        });

        assert!(result.is_err());
        assert!(db.select::<Image, _>(|_| true).is_empty());
    }

    #[test]
    fn test_remove() {
        let db = Database::new();
        let image = db
            .txn(&[Table::Image])
            .run(|view| view.insert::<Image>())
            .unwrap();

        db.txn(&[Table::Image])
            .run(|view| view.remove(&image))
            .unwrap();

        assert!(db.select::<Image, _>(|_| true).is_empty());
    }

    #[test]
    fn test_get_missing_row() {
        let db = Database::new();
        let err = db
            .txn(&[Table::Minion])
            .run(|view| view.get::<Minion>(42))
            .unwrap_err();

        assert_eq!(
            err,
            DbError::RowNotFound {
                table: Table::Minion,
                id: 42
            }
        );
    }

    #[test]
    fn test_minion_self_and_leadership() {
        let db = Database::new();
        assert_eq!(db.minion_self(), Err(DbError::NoSelf));

        db.txn(&[Table::Minion, Table::Leadership])
            .run(|view| {
                let mut minion = view.insert::<Minion>()?;
                minion.is_self = true;
                minion.private_ip = "10.0.0.5".into();
                view.commit(minion)?;

                assert!(!view.is_leader()?);
                let mut leadership = view.insert::<Leadership>()?;
                leadership.leader = true;
                view.commit(leadership)?;
                assert!(view.is_leader()?);
                Ok::<_, DbError>(())
            })
            .unwrap();

        assert_eq!(db.minion_self().unwrap().private_ip, "10.0.0.5");
    }

    #[test]
    fn test_disjoint_transactions_run_in_parallel() {
        let db = Database::new();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [Table::Container, Table::Minion]
            .into_iter()
            .map(|table| {
                let db = db.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    db.txn(&[table]).run(|_| {
                        // Both transactions must be inside at the same time.
                        barrier.wait();
                        Ok::<_, DbError>(())
                    })
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }
    }

    #[test]
    fn test_overlapping_transactions_serialize() {
        let db = Database::new();
        let row = db
            .txn(&[Table::Container])
            .run(|view| view.insert::<Container>())
            .unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let db = db.clone();
                // Mix table sets and declaration orders.
                let tables = if i % 2 == 0 {
                    vec![Table::Container, Table::Minion]
                } else {
                    vec![Table::Image, Table::Container]
                };
                thread::spawn(move || {
                    for _ in 0..50 {
                        db.txn(&tables)
                            .run(|view| {
                                let mut dbc = view.get::<Container>(row.id)?;
                                let count: u32 = dbc.status.parse().unwrap_or(0);
                                dbc.status = (count + 1).to_string();
                                view.commit(dbc)
                            })
                            .unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let dbc = db.select::<Container, _>(|_| true).remove(0);
        assert_eq!(dbc.status, "200");
    }

    #[tokio::test]
    async fn test_trigger_fires_on_change() {
        let db = Database::new();
        let mut trigger = db.trigger(&[Table::Container]);

        db.txn(&[Table::Container])
            .run(|view| view.insert::<Container>())
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), trigger.changed())
            .await
            .expect("trigger should fire");
    }

    #[tokio::test]
    async fn test_trigger_ignores_other_tables_and_no_op_commits() {
        let db = Database::new();
        let image = db
            .txn(&[Table::Image])
            .run(|view| view.insert::<Image>())
            .unwrap();

        let mut trigger = db.trigger(&[Table::Container, Table::Image]);

        // Unwatched table.
        db.txn(&[Table::Minion])
            .run(|view| view.insert::<Minion>())
            .unwrap();
        // Identical commit.
        db.txn(&[Table::Image])
            .run(|view| view.commit(image.clone()))
            .unwrap();

        let fired = tokio::time::timeout(Duration::from_millis(50), trigger.changed()).await;
        assert!(fired.is_err());
    }
}
