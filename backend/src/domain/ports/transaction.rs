//! Port for all-or-nothing mutation boundaries.
//!
//! A [`TransactionScope`] opens a [`Transaction`]; while the transaction is
//! live its [`TransactionContext`] is installed as a task-local so that every
//! repository call made by the enclosed future joins the same unit of work
//! without the context being threaded through service signatures. Adapters
//! decide what the context holds (a pooled Diesel connection, an in-memory
//! working copy) and downcast it back when they need it.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task_local;

use super::define_port_error;

define_port_error! {
    /// Failures raised while opening or settling a transaction.
    pub enum TransactionError {
        /// A transaction could not be started.
        Begin { message: String } => "failed to begin transaction: {message}",
        /// Changes could not be committed.
        Commit { message: String } => "failed to commit transaction: {message}",
        /// Changes could not be discarded.
        Rollback { message: String } => "failed to roll back transaction: {message}",
    }
}

task_local! {
    static AMBIENT: TransactionContext;
}

/// Adapter-defined state shared by everything running inside a transaction.
#[derive(Clone)]
pub struct TransactionContext(Arc<dyn Any + Send + Sync>);

impl TransactionContext {
    pub fn new<T>(state: Arc<T>) -> Self
    where
        T: Any + Send + Sync,
    {
        Self(state)
    }

    /// The context installed for the running task, if any.
    pub fn current() -> Option<Self> {
        AMBIENT.try_with(Clone::clone).ok()
    }

    /// Shortcut for `current()` followed by [`TransactionContext::downcast`].
    ///
    /// # Examples
    /// ```
    /// use std::sync::Arc;
    /// use scaffold::domain::ports::TransactionContext;
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let context = TransactionContext::new(Arc::new(7_u32));
    /// let seen = context.scope(async { TransactionContext::ambient::<u32>() }).await;
    /// assert_eq!(seen.as_deref(), Some(&7));
    /// assert!(TransactionContext::ambient::<u32>().is_none());
    /// # });
    /// ```
    pub fn ambient<T>() -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        Self::current().and_then(|context| context.downcast::<T>())
    }

    /// Recover the adapter state when it has type `T`.
    pub fn downcast<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        Arc::clone(&self.0).downcast::<T>().ok()
    }

    /// Run `fut` with this context installed.
    pub async fn scope<Fut>(self, fut: Fut) -> Fut::Output
    where
        Fut: Future,
    {
        AMBIENT.scope(self, fut).await
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext").finish_non_exhaustive()
    }
}

/// A live transaction. Dropping it without settling discards the changes.
#[async_trait]
pub trait Transaction: Send {
    /// Context to install while the transactional work runs.
    fn context(&self) -> TransactionContext;

    async fn commit(self: Box<Self>) -> Result<(), TransactionError>;

    async fn rollback(self: Box<Self>) -> Result<(), TransactionError>;
}

/// Factory for transactions.
///
/// Beginning a transaction while another one is ambient nests inside it
/// (savepoint semantics): the inner unit settles independently but only
/// becomes durable when the outer one commits.
#[async_trait]
pub trait TransactionScope: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, TransactionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[derive(Debug, PartialEq)]
    struct Marker(&'static str);

    #[tokio::test]
    async fn context_is_visible_inside_scope_only() {
        let context = TransactionContext::new(Arc::new(Marker("outer")));
        let inside = context
            .scope(async { TransactionContext::ambient::<Marker>() })
            .await;

        assert_eq!(inside.as_deref(), Some(&Marker("outer")));
        assert!(TransactionContext::current().is_none());
    }

    #[tokio::test]
    async fn nested_scopes_shadow_the_outer_context() {
        let outer = TransactionContext::new(Arc::new(Marker("outer")));
        let inner = TransactionContext::new(Arc::new(Marker("inner")));

        let (during, after) = outer
            .scope(async move {
                let during = inner
                    .scope(async { TransactionContext::ambient::<Marker>() })
                    .await;
                (during, TransactionContext::ambient::<Marker>())
            })
            .await;

        assert_eq!(during.as_deref(), Some(&Marker("inner")));
        assert_eq!(after.as_deref(), Some(&Marker("outer")));
    }

    #[rstest]
    fn downcast_to_the_wrong_type_yields_none() {
        let context = TransactionContext::new(Arc::new(Marker("state")));
        assert!(context.downcast::<String>().is_none());
        assert!(context.downcast::<Marker>().is_some());
    }
}
