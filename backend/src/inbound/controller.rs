//! Controllers: units of request handling shared by every delivery mechanism.
//!
//! A controller is a plain struct holding its injected collaborators. It
//! lists its operations explicitly in [`Controller::operations`], handing each
//! raw body to an [`OperationWrapper`]. Construction of a [`ReadyController`]
//! performs that wrapping exactly once, so every operation reachable from a
//! ready controller:
//!
//! 1. runs the raw body with the caller's arguments,
//! 2. passes a successful result through unchanged,
//! 3. routes a failure through [`Controller::handle_error`] exactly once.
//!
//! [`ReadyController::transactional`] additionally runs each body inside a
//! transaction opened from a [`TransactionScope`] and a `controller
//! transaction` span. The layers compose as raw body, then transaction and
//! span, then error translation, so a failed call is rolled back before its
//! error is translated, and errors raised while beginning, committing or
//! rolling back are translated too.
//!
//! Only a [`ReadyController`] can be registered with a delivery registry.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use tracing::field::Empty;
use tracing::{Instrument, info_span, warn};

use crate::domain::ports::{TransactionError, TransactionScope};

/// Name of the span opened around each transactional operation.
pub const TRANSACTION_SPAN: &str = "controller transaction";

/// Errors raised when attaching operations to a delivery registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    /// The same name (task) or method and path (HTTP) was attached twice.
    #[error("`{name}` is already registered")]
    Duplicate { name: String },
    /// The name is reserved by the delivery mechanism.
    #[error("`{name}` is reserved")]
    Reserved { name: String },
}

/// A request-handling unit exposing operations to a delivery mechanism.
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use scaffold::inbound::controller::{
///     Controller, Operation, OperationWrapper, ReadyController, RegistrationError,
/// };
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("{0}")]
/// struct GreetError(String);
///
/// struct Greeter;
///
/// struct GreeterOperations {
///     greet: Operation<String, String, GreetError>,
/// }
///
/// impl Controller for Greeter {
///     type Error = GreetError;
///     type Registry = Vec<&'static str>;
///     type Operations = GreeterOperations;
///
///     fn operations(wrap: &OperationWrapper<Self>) -> GreeterOperations {
///         GreeterOperations {
///             greet: wrap.wrap("greet", |_: Arc<Self>, name: String| async move {
///                 Ok(format!("hello {name}"))
///             }),
///         }
///     }
///
///     fn register(
///         ready: &ReadyController<Self>,
///         registry: &mut Vec<&'static str>,
///     ) -> Result<(), RegistrationError> {
///         registry.push(ready.operations().greet.name());
///         Ok(())
///     }
/// }
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let greeter = ReadyController::new(Greeter);
/// let greeting = greeter.operations().greet.call("ana".into()).await.unwrap();
/// assert_eq!(greeting, "hello ana");
/// # });
/// ```
pub trait Controller: Send + Sync + Sized + 'static {
    /// Error type shared by the raw bodies and by translation.
    type Error: std::error::Error + Send + 'static;
    /// Delivery-specific registry, e.g. a route table or a task registry.
    type Registry: ?Sized;
    /// Typed table of wrapped operations, one field per operation.
    type Operations: Send + Sync + 'static;

    /// Enumerate the controller's operations, wrapping each raw body.
    fn operations(wrap: &OperationWrapper<Self>) -> Self::Operations;

    /// Attach the wrapped operations to `registry`.
    fn register(
        ready: &ReadyController<Self>,
        registry: &mut Self::Registry,
    ) -> Result<(), RegistrationError>;

    /// Replace an error raised by an operation. Overrides match the kinds
    /// they understand and return everything else unchanged.
    fn handle_error(&self, error: Self::Error) -> Self::Error {
        error
    }
}

type Handler<A, T, E> = dyn Fn(A) -> BoxFuture<'static, Result<T, E>> + Send + Sync;

/// A wrapped operation: same argument and result types as its raw body.
///
/// Handles are cheap to clone and can only be produced by an
/// [`OperationWrapper`], so an operation cannot be wrapped twice.
pub struct Operation<A, T, E> {
    name: &'static str,
    handler: Arc<Handler<A, T, E>>,
}

impl<A, T, E> Operation<A, T, E> {
    /// Operation name as declared by the controller.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Invoke the operation.
    pub fn call(&self, args: A) -> BoxFuture<'static, Result<T, E>> {
        (self.handler)(args)
    }
}

impl<A, T, E> Clone for Operation<A, T, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<A, T, E> fmt::Debug for Operation<A, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

struct TransactionLayer<E> {
    scope: Arc<dyn TransactionScope>,
    convert: fn(TransactionError) -> E,
}

impl<E> Clone for TransactionLayer<E> {
    fn clone(&self) -> Self {
        Self {
            scope: Arc::clone(&self.scope),
            convert: self.convert,
        }
    }
}

/// Wraps raw operation bodies for one controller instance.
///
/// Only [`ReadyController`] constructs wrappers; controllers receive one in
/// [`Controller::operations`].
pub struct OperationWrapper<C: Controller> {
    controller: Arc<C>,
    transaction: Option<TransactionLayer<C::Error>>,
}

impl<C: Controller> OperationWrapper<C> {
    /// Wrap `body` under `name`.
    ///
    /// The body receives the controller and the caller's arguments and is
    /// only polled once the enclosing layers are in place.
    pub fn wrap<A, T, F, Fut>(&self, name: &'static str, body: F) -> Operation<A, T, C::Error>
    where
        A: Send + 'static,
        T: Send + 'static,
        F: Fn(Arc<C>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, C::Error>> + Send + 'static,
    {
        let controller = Arc::clone(&self.controller);
        let transaction = self.transaction.clone();
        let controller_name = short_type_name::<C>();

        let handler = move |args: A| -> BoxFuture<'static, Result<T, C::Error>> {
            let controller = Arc::clone(&controller);
            let raw = body(Arc::clone(&controller), args);
            let transaction = transaction.clone();
            Box::pin(async move {
                let result = match transaction {
                    Some(layer) => traced_atomic(layer, controller_name, name, raw).await,
                    None => raw.await,
                };
                result.map_err(|error| controller.handle_error(error))
            })
        };

        Operation {
            name,
            handler: Arc::new(handler),
        }
    }
}

async fn traced_atomic<T, E, Fut>(
    layer: TransactionLayer<E>,
    controller: &'static str,
    method: &'static str,
    body: Fut,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>> + Send,
    T: Send,
    E: std::error::Error + Send,
{
    let span = info_span!(
        "controller transaction",
        controller,
        method,
        db.transaction.outcome = Empty,
        db.transaction.duration_ms = Empty
    );
    let recorder = span.clone();

    async move {
        let started = Instant::now();
        let (outcome, result) = settle(&layer, body).await;
        recorder.record("db.transaction.outcome", outcome);
        recorder.record(
            "db.transaction.duration_ms",
            started.elapsed().as_secs_f64() * 1_000.0,
        );
        result
    }
    .instrument(span)
    .await
}

async fn settle<T, E, Fut>(layer: &TransactionLayer<E>, body: Fut) -> (&'static str, Result<T, E>)
where
    Fut: Future<Output = Result<T, E>> + Send,
    E: std::error::Error,
{
    let transaction = match layer.scope.begin().await {
        Ok(transaction) => transaction,
        Err(error) => return ("begin_failed", Err((layer.convert)(error))),
    };

    match transaction.context().scope(body).await {
        Ok(value) => match transaction.commit().await {
            Ok(()) => ("commit", Ok(value)),
            Err(error) => ("commit_failed", Err((layer.convert)(error))),
        },
        Err(error) => match transaction.rollback().await {
            Ok(()) => ("rollback", Err(error)),
            Err(rollback) => {
                warn!(
                    error = %error,
                    rollback_error = %rollback,
                    "rollback failed after operation error"
                );
                ("rollback_failed", Err((layer.convert)(rollback)))
            }
        },
    }
}

fn short_type_name<C>() -> &'static str {
    let full = std::any::type_name::<C>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// A controller whose operations are wrapped and ready to register.
pub struct ReadyController<C: Controller> {
    controller: Arc<C>,
    operations: Arc<C::Operations>,
    transactional: bool,
}

impl<C: Controller> ReadyController<C> {
    /// Wrap `controller` with error translation only.
    pub fn new(controller: C) -> Self {
        Self::build(controller, None)
    }

    /// Wrap `controller` with a transaction and span under error
    /// translation.
    pub fn transactional(controller: C, scope: Arc<dyn TransactionScope>) -> Self
    where
        C::Error: From<TransactionError>,
    {
        Self::build(
            controller,
            Some(TransactionLayer {
                scope,
                convert: <C::Error as From<TransactionError>>::from,
            }),
        )
    }

    fn build(controller: C, transaction: Option<TransactionLayer<C::Error>>) -> Self {
        let transactional = transaction.is_some();
        let controller = Arc::new(controller);
        let wrapper = OperationWrapper {
            controller: Arc::clone(&controller),
            transaction,
        };
        let operations = Arc::new(C::operations(&wrapper));
        Self {
            controller,
            operations,
            transactional,
        }
    }

    /// The controller instance shared by every wrapped operation.
    pub fn controller(&self) -> &C {
        &self.controller
    }

    /// The wrapped operation table; the same handles on every call.
    pub fn operations(&self) -> &C::Operations {
        &self.operations
    }

    /// Whether operations run inside a transaction opened per call.
    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    /// Attach the controller's operations to `registry`.
    pub fn register(&self, registry: &mut C::Registry) -> Result<(), RegistrationError> {
        C::register(self, registry)?;
        tracing::debug!(
            controller = short_type_name::<C>(),
            transactional = self.transactional,
            "controller registered"
        );
        Ok(())
    }
}

impl<C: Controller> Clone for ReadyController<C> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            operations: Arc::clone(&self.operations),
            transactional: self.transactional,
        }
    }
}

impl<C: Controller> fmt::Debug for ReadyController<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyController")
            .field("controller", &short_type_name::<C>())
            .field("transactional", &self.transactional)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
