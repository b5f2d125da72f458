//! Behaviour of wrapped operations: pass-through, translation, transactions,
//! spans, and request validation driven by argument types.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use actix_web::{App, test as actix_test, web};
use async_trait::async_trait;
use rstest::{fixture, rstest};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use chrono::Utc;

use super::*;
use crate::domain::ports::{TodoRepository, Transaction, TransactionContext};
use crate::domain::{NewTodo, UserId};
use crate::outbound::memory::{MemoryStore, MemoryTodoRepository, MemoryTransactionScope};
use crate::inbound::http::{Route, RouteTable};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
enum GreetError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{status}: {message}")]
    Transport { status: u16, message: String },
    #[error("{0}")]
    Other(String),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

#[derive(Debug, Clone, Copy)]
enum Failure {
    NotFound,
    Other,
}

#[derive(Default)]
struct Greeter {
    failure: Option<Failure>,
    bodies: AtomicUsize,
    translations: AtomicUsize,
}

impl Greeter {
    fn failing(failure: Failure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::default()
        }
    }
}

struct GreeterOperations {
    greet: Operation<String, String, GreetError>,
}

impl Controller for Greeter {
    type Error = GreetError;
    type Registry = Vec<&'static str>;
    type Operations = GreeterOperations;

    fn operations(wrap: &OperationWrapper<Self>) -> GreeterOperations {
        GreeterOperations {
            greet: wrap.wrap("greet", |greeter: Arc<Self>, name: String| async move {
                greeter.bodies.fetch_add(1, Ordering::SeqCst);
                match greeter.failure {
                    None => Ok(format!("hello {name}")),
                    Some(Failure::NotFound) => Err(GreetError::NotFound(name)),
                    Some(Failure::Other) => Err(GreetError::Other(name)),
                }
            }),
        }
    }

    fn register(
        ready: &ReadyController<Self>,
        registry: &mut Vec<&'static str>,
    ) -> Result<(), RegistrationError> {
        let name = ready.operations().greet.name();
        if registry.contains(&name) {
            return Err(RegistrationError::Duplicate { name: name.into() });
        }
        registry.push(name);
        Ok(())
    }

    fn handle_error(&self, error: GreetError) -> GreetError {
        self.translations.fetch_add(1, Ordering::SeqCst);
        match error {
            GreetError::NotFound(message) => GreetError::Transport {
                status: 404,
                message,
            },
            other => other,
        }
    }
}

/// Relies on the default translation.
struct PlainGreeter;

struct PlainOperations {
    greet: Operation<String, String, GreetError>,
}

impl Controller for PlainGreeter {
    type Error = GreetError;
    type Registry = Vec<&'static str>;
    type Operations = PlainOperations;

    fn operations(wrap: &OperationWrapper<Self>) -> PlainOperations {
        PlainOperations {
            greet: wrap.wrap("greet", |_: Arc<Self>, name: String| async move {
                Err(GreetError::Other(format!("cannot greet {name}")))
            }),
        }
    }

    fn register(
        ready: &ReadyController<Self>,
        registry: &mut Vec<&'static str>,
    ) -> Result<(), RegistrationError> {
        registry.push(ready.operations().greet.name());
        Ok(())
    }
}

#[rstest]
#[tokio::test]
async fn greet_passes_results_through() {
    let greeter = ReadyController::new(Greeter::default());
    let greeting = greeter
        .operations()
        .greet
        .call("ana".into())
        .await
        .expect("greeting succeeds");

    assert_eq!(greeting, "hello ana");
    assert_eq!(greeter.controller().translations.load(Ordering::SeqCst), 0);
}

#[rstest]
#[tokio::test]
async fn not_found_is_translated_to_transport_error() {
    let greeter = ReadyController::new(Greeter::failing(Failure::NotFound));
    let err = greeter
        .operations()
        .greet
        .call("ana".into())
        .await
        .expect_err("greeting fails");

    assert_eq!(
        err,
        GreetError::Transport {
            status: 404,
            message: "ana".into()
        }
    );
    assert_eq!(greeter.controller().translations.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn unmatched_errors_are_returned_unchanged() {
    let greeter = ReadyController::new(Greeter::failing(Failure::Other));
    let err = greeter
        .operations()
        .greet
        .call("ana".into())
        .await
        .expect_err("greeting fails");
    assert_eq!(err, GreetError::Other("ana".into()));
}

#[rstest]
#[tokio::test]
async fn default_translation_reraises() {
    let greeter = ReadyController::new(PlainGreeter);
    let err = greeter
        .operations()
        .greet
        .call("ana".into())
        .await
        .expect_err("greeting fails");

    assert_eq!(err, GreetError::Other("cannot greet ana".into()));
    assert_eq!(err.to_string(), "cannot greet ana");
}

#[rstest]
#[tokio::test]
async fn wrapping_happens_once_per_controller() {
    let greeter = ReadyController::new(Greeter::failing(Failure::NotFound));
    let first = greeter.operations().greet.clone();
    let second = greeter.operations().greet.clone();
    let copy = greeter.clone();

    for operation in [&first, &second, &copy.operations().greet] {
        let _ = operation.call("ana".into()).await;
    }

    let controller = greeter.controller();
    assert_eq!(controller.bodies.load(Ordering::SeqCst), 3);
    assert_eq!(controller.translations.load(Ordering::SeqCst), 3);
}

#[rstest]
#[tokio::test]
async fn concurrent_calls_are_independent() {
    let greeter = ReadyController::new(Greeter::default());
    let calls = ["ana", "bo", "cy"].map(|name| greeter.operations().greet.call(name.into()));
    let results = futures_util::future::join_all(calls).await;

    let greetings: Vec<String> = results
        .into_iter()
        .map(|result| result.expect("greeting succeeds"))
        .collect();
    assert_eq!(greetings, ["hello ana", "hello bo", "hello cy"]);
}

#[rstest]
fn registration_only_accepts_ready_controllers() {
    let mut registry = Vec::new();
    let greeter = ReadyController::new(Greeter::default());
    greeter.register(&mut registry).expect("first registration");

    assert_eq!(registry, ["greet"]);
    assert!(matches!(
        greeter.register(&mut registry),
        Err(RegistrationError::Duplicate { .. })
    ));
    assert!(!greeter.is_transactional());
}

// Transactional behaviour ---------------------------------------------------

#[derive(Default)]
struct Journal {
    committed: Mutex<Vec<String>>,
    events: Mutex<Vec<String>>,
    spans_seen: Mutex<Vec<Option<&'static str>>>,
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
}

impl Journal {
    fn event(&self, event: impl Into<String>) {
        self.events.lock().expect("events lock").push(event.into());
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().expect("events lock").clone()
    }

    fn committed(&self) -> Vec<String> {
        self.committed.lock().expect("committed lock").clone()
    }
}

#[derive(Default)]
struct Staged(Mutex<Vec<String>>);

struct JournalScope(Arc<Journal>);

struct JournalTransaction {
    journal: Arc<Journal>,
    staged: Arc<Staged>,
}

#[async_trait]
impl TransactionScope for JournalScope {
    async fn begin(&self) -> Result<Box<dyn Transaction>, TransactionError> {
        if self.0.fail_begin.load(Ordering::SeqCst) {
            return Err(TransactionError::begin("pool exhausted"));
        }
        self.0.event("begin");
        Ok(Box::new(JournalTransaction {
            journal: Arc::clone(&self.0),
            staged: Arc::new(Staged::default()),
        }))
    }
}

#[async_trait]
impl Transaction for JournalTransaction {
    fn context(&self) -> TransactionContext {
        TransactionContext::new(Arc::clone(&self.staged))
    }

    async fn commit(self: Box<Self>) -> Result<(), TransactionError> {
        if self.journal.fail_commit.load(Ordering::SeqCst) {
            self.journal.event("commit failed");
            return Err(TransactionError::commit("serialization failure"));
        }
        let rows = std::mem::take(&mut *self.staged.0.lock().expect("staged lock"));
        self.journal
            .committed
            .lock()
            .expect("committed lock")
            .extend(rows);
        self.journal.event("commit");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), TransactionError> {
        self.journal.event("rollback");
        if self.journal.fail_rollback.load(Ordering::SeqCst) {
            return Err(TransactionError::rollback("connection lost"));
        }
        Ok(())
    }
}

struct TransactionalGreeter {
    journal: Arc<Journal>,
    fail: bool,
}

struct TransactionalOperations {
    greet: Operation<String, String, GreetError>,
}

impl Controller for TransactionalGreeter {
    type Error = GreetError;
    type Registry = Vec<&'static str>;
    type Operations = TransactionalOperations;

    fn operations(wrap: &OperationWrapper<Self>) -> TransactionalOperations {
        TransactionalOperations {
            greet: wrap.wrap("greet", |greeter: Arc<Self>, name: String| async move {
                let span = tracing::Span::current();
                greeter
                    .journal
                    .spans_seen
                    .lock()
                    .expect("spans lock")
                    .push(span.metadata().map(|meta| meta.name()));

                let staged = TransactionContext::ambient::<Staged>()
                    .ok_or_else(|| GreetError::Other("no ambient transaction".into()))?;
                staged
                    .0
                    .lock()
                    .expect("staged lock")
                    .push(format!("greeting:{name}"));

                if greeter.fail {
                    Err(GreetError::NotFound(name))
                } else {
                    Ok(format!("hello {name}"))
                }
            }),
        }
    }

    fn register(
        ready: &ReadyController<Self>,
        registry: &mut Vec<&'static str>,
    ) -> Result<(), RegistrationError> {
        registry.push(ready.operations().greet.name());
        Ok(())
    }

    fn handle_error(&self, error: GreetError) -> GreetError {
        self.journal.event(format!("translate {error}"));
        match error {
            GreetError::NotFound(message) => GreetError::Transport {
                status: 404,
                message,
            },
            other => other,
        }
    }
}

#[fixture]
fn journal() -> Arc<Journal> {
    Arc::new(Journal::default())
}

fn transactional(journal: &Arc<Journal>, fail: bool) -> ReadyController<TransactionalGreeter> {
    ReadyController::transactional(
        TransactionalGreeter {
            journal: Arc::clone(journal),
            fail,
        },
        Arc::new(JournalScope(Arc::clone(journal))),
    )
}

#[rstest]
#[tokio::test]
async fn successful_calls_commit(journal: Arc<Journal>) {
    let greeter = transactional(&journal, false);
    let greeting = greeter
        .operations()
        .greet
        .call("ana".into())
        .await
        .expect("greeting succeeds");

    assert_eq!(greeting, "hello ana");
    assert_eq!(journal.committed(), ["greeting:ana"]);
    assert_eq!(journal.events(), ["begin", "commit"]);
    assert!(greeter.is_transactional());
}

#[rstest]
#[tokio::test]
async fn failing_calls_roll_back_before_translation(journal: Arc<Journal>) {
    let greeter = transactional(&journal, true);
    let err = greeter
        .operations()
        .greet
        .call("ana".into())
        .await
        .expect_err("greeting fails");

    assert_eq!(
        err,
        GreetError::Transport {
            status: 404,
            message: "ana".into()
        }
    );
    assert!(journal.committed().is_empty(), "staged write must be discarded");
    assert_eq!(
        journal.events(),
        ["begin", "rollback", "translate ana not found"]
    );
}

/// Writes a todo through the memory adapters, then optionally fails.
struct TodoWriter {
    todos: Arc<dyn TodoRepository>,
    seen_own_write: AtomicBool,
}

struct TodoWriterOperations {
    create: Operation<(String, bool), i64, GreetError>,
}

impl Controller for TodoWriter {
    type Error = GreetError;
    type Registry = Vec<&'static str>;
    type Operations = TodoWriterOperations;

    fn operations(wrap: &OperationWrapper<Self>) -> TodoWriterOperations {
        TodoWriterOperations {
            create: wrap.wrap(
                "create",
                |writer: Arc<Self>, (title, fail): (String, bool)| async move {
                    let todo = writer
                        .todos
                        .insert(NewTodo {
                            owner: UserId::new(7),
                            title: title.clone(),
                            description: String::new(),
                            created_at: Utc::now(),
                        })
                        .await
                        .map_err(|err| GreetError::Other(err.to_string()))?;
                    let visible = writer
                        .todos
                        .find(todo.id)
                        .await
                        .map_err(|err| GreetError::Other(err.to_string()))?;
                    writer
                        .seen_own_write
                        .store(visible.is_some(), Ordering::SeqCst);
                    if fail {
                        return Err(GreetError::NotFound(title));
                    }
                    Ok(todo.id.get())
                },
            ),
        }
    }

    fn register(
        ready: &ReadyController<Self>,
        registry: &mut Vec<&'static str>,
    ) -> Result<(), RegistrationError> {
        registry.push(ready.operations().create.name());
        Ok(())
    }
}

fn todo_writer(store: &Arc<MemoryStore>) -> ReadyController<TodoWriter> {
    ReadyController::transactional(
        TodoWriter {
            todos: Arc::new(MemoryTodoRepository::new(Arc::clone(store))),
            seen_own_write: AtomicBool::new(false),
        },
        Arc::new(MemoryTransactionScope::new(Arc::clone(store))),
    )
}

#[rstest]
#[tokio::test]
async fn write_then_failure_leaves_no_row_in_the_store() {
    let store = MemoryStore::new();
    let writer = todo_writer(&store);
    let todos = MemoryTodoRepository::new(Arc::clone(&store));

    let err = writer
        .operations()
        .create
        .call(("groceries".into(), true))
        .await
        .expect_err("body fails after writing");

    assert_eq!(
        err,
        GreetError::NotFound("groceries".into()),
        "the raw error passes through the default translation"
    );
    assert!(
        writer.controller().seen_own_write.load(Ordering::SeqCst),
        "the body reads its own write inside the transaction"
    );
    let remaining = todos.list_for_owner(UserId::new(7)).await.expect("list");
    assert!(remaining.is_empty(), "rolled back write must not persist");
}

#[rstest]
#[tokio::test]
async fn write_then_success_persists_the_row() {
    let store = MemoryStore::new();
    let writer = todo_writer(&store);
    let todos = MemoryTodoRepository::new(Arc::clone(&store));

    let id = writer
        .operations()
        .create
        .call(("groceries".into(), false))
        .await
        .expect("body succeeds");

    let listed = todos.list_for_owner(UserId::new(7)).await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id.get(), id);
    assert_eq!(listed[0].title, "groceries");
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    Begin,
    Commit,
    Rollback,
}

#[rstest]
#[case::begin(Fault::Begin, false, "translate failed to begin transaction: pool exhausted")]
#[case::commit(
    Fault::Commit,
    false,
    "translate failed to commit transaction: serialization failure"
)]
#[case::rollback(
    Fault::Rollback,
    true,
    "translate failed to roll back transaction: connection lost"
)]
#[tokio::test]
async fn transaction_failures_are_translated(
    journal: Arc<Journal>,
    #[case] fault: Fault,
    #[case] fail: bool,
    #[case] expected_event: &str,
) {
    let flag = match fault {
        Fault::Begin => &journal.fail_begin,
        Fault::Commit => &journal.fail_commit,
        Fault::Rollback => &journal.fail_rollback,
    };
    flag.store(true, Ordering::SeqCst);
    let greeter = transactional(&journal, fail);
    let err = greeter
        .operations()
        .greet
        .call("ana".into())
        .await
        .expect_err("transaction failure surfaces");

    assert!(matches!(err, GreetError::Transaction(_)));
    assert_eq!(journal.events().last().map(String::as_str), Some(expected_event));
    assert!(journal.committed().is_empty());
}

#[rstest]
#[tokio::test]
async fn non_transactional_calls_have_no_ambient_context() {
    let observed = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&observed);
    struct ContextWatcher(Arc<Mutex<Option<bool>>>);
    struct WatcherOperations {
        watch: Operation<(), (), GreetError>,
    }
    impl Controller for ContextWatcher {
        type Error = GreetError;
        type Registry = ();
        type Operations = WatcherOperations;

        fn operations(wrap: &OperationWrapper<Self>) -> WatcherOperations {
            WatcherOperations {
                watch: wrap.wrap("watch", |watch: Arc<Self>, (): ()| async move {
                    *watch.0.lock().expect("watch lock") =
                        Some(TransactionContext::current().is_some());
                    Ok(())
                }),
            }
        }

        fn register(_: &ReadyController<Self>, _: &mut ()) -> Result<(), RegistrationError> {
            Ok(())
        }
    }

    let ready = ReadyController::new(ContextWatcher(seen));
    ready.operations().watch.call(()).await.expect("watch runs");
    assert_eq!(*observed.lock().expect("watch lock"), Some(false));
}

// Span capture ---------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct CapturedSpan {
    name: String,
    fields: HashMap<String, String>,
}

#[derive(Clone, Default)]
struct SpanCapture(Arc<Mutex<Vec<(u64, CapturedSpan)>>>);

impl SpanCapture {
    fn named(&self, name: &str) -> Vec<CapturedSpan> {
        self.0
            .lock()
            .expect("capture lock")
            .iter()
            .filter(|(_, span)| span.name == name)
            .map(|(_, span)| span.clone())
            .collect()
    }
}

struct FieldRecorder<'a>(&'a mut HashMap<String, String>);

impl Visit for FieldRecorder<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_owned(), value.to_owned());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_owned(), format!("{value:?}"));
    }
}

impl<S: Subscriber> Layer<S> for SpanCapture {
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, _ctx: Context<'_, S>) {
        let mut span = CapturedSpan {
            name: attrs.metadata().name().to_owned(),
            fields: HashMap::new(),
        };
        attrs.record(&mut FieldRecorder(&mut span.fields));
        self.0
            .lock()
            .expect("capture lock")
            .push((id.into_u64(), span));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, _ctx: Context<'_, S>) {
        let mut spans = self.0.lock().expect("capture lock");
        if let Some((_, span)) = spans
            .iter_mut()
            .rev()
            .find(|(span_id, _)| *span_id == id.into_u64())
        {
            values.record(&mut FieldRecorder(&mut span.fields));
        }
    }
}

#[rstest]
#[case::success(false, "commit")]
#[case::failure(true, "rollback")]
#[tokio::test]
async fn span_wraps_every_call(
    journal: Arc<Journal>,
    #[case] fail: bool,
    #[case] outcome: &str,
) {
    let capture = SpanCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let greeter = transactional(&journal, fail);
    let result = greeter.operations().greet.call("ana".into()).await;
    assert_eq!(result.is_err(), fail);

    let spans = capture.named(TRANSACTION_SPAN);
    assert_eq!(spans.len(), 1);
    let fields = &spans[0].fields;
    assert_eq!(fields.get("controller").map(String::as_str), Some("TransactionalGreeter"));
    assert_eq!(fields.get("method").map(String::as_str), Some("greet"));
    assert_eq!(
        fields.get("db.transaction.outcome").map(String::as_str),
        Some(outcome)
    );
    assert!(fields.contains_key("db.transaction.duration_ms"));

    let seen = journal.spans_seen.lock().expect("spans lock").clone();
    assert_eq!(seen, [Some(TRANSACTION_SPAN)]);
}

// Signature-driven validation -------------------------------------------------

#[derive(Debug, Deserialize)]
struct GreetBody {
    name: String,
    #[serde(default)]
    shout: bool,
}

#[derive(Default)]
struct EchoController {
    bodies: AtomicUsize,
}

struct EchoOperations {
    greet: Operation<web::Json<GreetBody>, web::Json<Value>, crate::domain::Error>,
}

impl Controller for EchoController {
    type Error = crate::domain::Error;
    type Registry = RouteTable;
    type Operations = EchoOperations;

    fn operations(wrap: &OperationWrapper<Self>) -> EchoOperations {
        EchoOperations {
            greet: wrap.wrap(
                "greet",
                |echo: Arc<Self>, body: web::Json<GreetBody>| async move {
                    echo.bodies.fetch_add(1, Ordering::SeqCst);
                    let GreetBody { name, shout } = body.into_inner();
                    let greeting = format!("hello {name}");
                    let greeting = if shout { greeting.to_uppercase() } else { greeting };
                    Ok(web::Json(json!({ "greeting": greeting })))
                },
            ),
        }
    }

    fn register(
        ready: &ReadyController<Self>,
        routes: &mut RouteTable,
    ) -> Result<(), RegistrationError> {
        routes.add_route(Route::post("/greet"), &ready.operations().greet)
    }
}

#[rstest]
#[actix_web::test]
async fn argument_types_drive_request_validation() {
    let echo = ReadyController::new(EchoController::default());
    let mut routes = RouteTable::new();
    echo.register(&mut routes).expect("routes registered");
    let routes = Arc::new(routes);

    let app = actix_test::init_service(App::new().configure(|cfg| routes.configure(cfg))).await;

    let ok = actix_test::TestRequest::post()
        .uri("/greet")
        .set_json(json!({ "name": "ana", "shout": true }))
        .to_request();
    let body: Value = actix_test::call_and_read_body_json(&app, ok).await;
    assert_eq!(body, json!({ "greeting": "HELLO ANA" }));

    let missing = actix_test::TestRequest::post()
        .uri("/greet")
        .set_json(json!({ "shout": true }))
        .to_request();
    let response = actix_test::call_service(&app, missing).await;
    assert_eq!(response.status(), actix_web::http::StatusCode::BAD_REQUEST);

    assert_eq!(echo.controller().bodies.load(Ordering::SeqCst), 1);
}
