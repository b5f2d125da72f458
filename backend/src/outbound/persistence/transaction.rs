//! PostgreSQL transactions shared through the ambient transaction context.
//!
//! Beginning a transaction checks out one connection and issues `BEGIN`.
//! That connection becomes the ambient context, so every Diesel repository
//! built on the same [`DbPool`] runs its statements on it until the
//! transaction settles. Nested transactions reuse the connection and map to
//! savepoints through Diesel's transaction manager.
//!
//! A transaction dropped without settling returns its connection to the pool
//! with a transaction still open; the pool manager treats such connections as
//! broken and discards them, which rolls the work back.

use std::sync::Arc;

use async_trait::async_trait;
use diesel_async::{AnsiTransactionManager, AsyncPgConnection, TransactionManager};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use super::pool::{DbPool, OwnedConnection};
use crate::domain::ports::{Transaction, TransactionContext, TransactionError, TransactionScope};

/// Connection bound to an open transaction.
pub struct TransactionConnection {
    pool_id: Uuid,
    connection: Arc<Mutex<OwnedConnection>>,
}

impl TransactionConnection {
    pub(crate) fn pool_id(&self) -> Uuid {
        self.pool_id
    }

    pub(crate) async fn lock(&self) -> OwnedMutexGuard<OwnedConnection> {
        Arc::clone(&self.connection).lock_owned().await
    }
}

impl std::fmt::Debug for TransactionConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionConnection")
            .field("pool_id", &self.pool_id)
            .finish_non_exhaustive()
    }
}

/// Opens transactions on connections from a [`DbPool`].
#[derive(Debug, Clone)]
pub struct DieselTransactionScope {
    pool: DbPool,
}

impl DieselTransactionScope {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

struct DieselTransaction {
    slot: Arc<TransactionConnection>,
    nested: bool,
}

fn connection(guard: &mut OwnedMutexGuard<OwnedConnection>) -> &mut AsyncPgConnection {
    &mut **guard
}

#[async_trait]
impl TransactionScope for DieselTransactionScope {
    async fn begin(&self) -> Result<Box<dyn Transaction>, TransactionError> {
        let (slot, nested) = match self.pool.ambient() {
            Some(slot) => (slot, true),
            None => {
                let conn = self
                    .pool
                    .checkout()
                    .await
                    .map_err(|err| TransactionError::begin(err.message()))?;
                let slot = Arc::new(TransactionConnection {
                    pool_id: self.pool.id(),
                    connection: Arc::new(Mutex::new(conn)),
                });
                (slot, false)
            }
        };

        let mut guard = slot.lock().await;
        AnsiTransactionManager::begin_transaction(connection(&mut guard))
            .await
            .map_err(|err| TransactionError::begin(err.to_string()))?;
        drop(guard);
        debug!(nested, "database transaction started");

        Ok(Box::new(DieselTransaction { slot, nested }))
    }
}

#[async_trait]
impl Transaction for DieselTransaction {
    fn context(&self) -> TransactionContext {
        TransactionContext::new(Arc::clone(&self.slot))
    }

    async fn commit(self: Box<Self>) -> Result<(), TransactionError> {
        let mut guard = self.slot.lock().await;
        AnsiTransactionManager::commit_transaction(connection(&mut guard))
            .await
            .map_err(|err| TransactionError::commit(err.to_string()))?;
        debug!(nested = self.nested, "database transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), TransactionError> {
        let mut guard = self.slot.lock().await;
        AnsiTransactionManager::rollback_transaction(connection(&mut guard))
            .await
            .map_err(|err| TransactionError::rollback(err.to_string()))?;
        debug!(nested = self.nested, "database transaction rolled back");
        Ok(())
    }
}
