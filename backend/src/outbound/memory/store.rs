//! Process-local tables and their transaction scope.
//!
//! Transactions work on a private copy of the tables. Committing a top-level
//! transaction replaces the committed tables with that copy; committing a
//! nested one folds it into the enclosing copy, like releasing a savepoint.
//! Top-level transactions and writes made outside any transaction are
//! serialised through one writer lock, so a commit never discards a
//! concurrent write.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;
use uuid::Uuid;

use crate::domain::ports::{Transaction, TransactionContext, TransactionError, TransactionScope};
use crate::domain::{RefreshSession, Todo, User};

/// Rows held by a [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub users: BTreeMap<i64, User>,
    pub refresh_sessions: HashMap<Uuid, RefreshSession>,
    pub todos: BTreeMap<i64, Todo>,
    pub last_user_id: i64,
    pub last_todo_id: i64,
}

impl Tables {
    pub fn next_user_id(&mut self) -> i64 {
        self.last_user_id += 1;
        self.last_user_id
    }

    pub fn next_todo_id(&mut self) -> i64 {
        self.last_todo_id += 1;
        self.last_todo_id
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory backing store shared by the memory repositories.
#[derive(Debug, Default)]
pub struct MemoryStore {
    committed: Mutex<Tables>,
    writer: Arc<AsyncMutex<()>>,
}

/// Tables private to one live transaction; installed as the ambient
/// transaction context.
#[derive(Debug)]
struct WorkingCopy {
    store: Arc<MemoryStore>,
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn ambient(self: &Arc<Self>) -> Option<Arc<WorkingCopy>> {
        TransactionContext::ambient::<WorkingCopy>()
            .filter(|copy| Arc::ptr_eq(&copy.store, self))
    }

    /// Run `f` against the tables visible to the caller: the ambient working
    /// copy when inside a transaction, the committed tables otherwise.
    pub(crate) fn read<R>(self: &Arc<Self>, f: impl FnOnce(&Tables) -> R) -> R {
        match self.ambient() {
            Some(copy) => f(&lock(&copy.tables)),
            None => f(&lock(&self.committed)),
        }
    }

    /// Like [`MemoryStore::read`] but for mutations. Outside a transaction
    /// the write waits for the writer lock and is committed immediately.
    pub(crate) async fn write<R>(self: &Arc<Self>, f: impl FnOnce(&mut Tables) -> R) -> R {
        if let Some(copy) = self.ambient() {
            return f(&mut lock(&copy.tables));
        }
        let _writer = self.writer.lock().await;
        f(&mut lock(&self.committed))
    }
}

/// Opens transactions over a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryTransactionScope {
    store: Arc<MemoryStore>,
}

impl MemoryTransactionScope {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

enum Target {
    Root(OwnedMutexGuard<()>),
    Savepoint(Arc<WorkingCopy>),
}

struct MemoryTransaction {
    store: Arc<MemoryStore>,
    working: Arc<WorkingCopy>,
    target: Target,
}

#[async_trait]
impl TransactionScope for MemoryTransactionScope {
    async fn begin(&self) -> Result<Box<dyn Transaction>, TransactionError> {
        let (snapshot, target) = match self.store.ambient() {
            Some(parent) => {
                let snapshot = lock(&parent.tables).clone();
                (snapshot, Target::Savepoint(parent))
            }
            None => {
                let guard = Arc::clone(&self.store.writer).lock_owned().await;
                (lock(&self.store.committed).clone(), Target::Root(guard))
            }
        };
        trace!(
            nested = matches!(target, Target::Savepoint(_)),
            "memory transaction started"
        );
        Ok(Box::new(MemoryTransaction {
            store: Arc::clone(&self.store),
            working: Arc::new(WorkingCopy {
                store: Arc::clone(&self.store),
                tables: Mutex::new(snapshot),
            }),
            target,
        }))
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn context(&self) -> TransactionContext {
        TransactionContext::new(Arc::clone(&self.working))
    }

    async fn commit(self: Box<Self>) -> Result<(), TransactionError> {
        let Self {
            store,
            working,
            target,
        } = *self;
        let tables = std::mem::take(&mut *lock(&working.tables));
        match target {
            Target::Root(_writer) => *lock(&store.committed) = tables,
            Target::Savepoint(parent) => *lock(&parent.tables) = tables,
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), TransactionError> {
        trace!("memory transaction rolled back");
        Ok(())
    }
}
