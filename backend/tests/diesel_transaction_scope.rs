//! `DieselTransactionScope` against embedded PostgreSQL.
//!
//! Repositories built on the same pool join the ambient transaction, nested
//! transactions map to savepoints, and a transaction dropped without being
//! settled leaves nothing behind.

use std::sync::Arc;

use rstest::{fixture, rstest};
use scaffold::domain::ports::{
    TodoPersistenceError, TodoRepository, TransactionError, TransactionScope,
};
use scaffold::domain::{NewTodo, UserId};
use scaffold::inbound::controller::{
    Controller, Operation, OperationWrapper, ReadyController, RegistrationError,
};
use scaffold::outbound::persistence::{DieselTodoRepository, DieselTransactionScope};

mod support;

use support::embedded_postgres::{MigratedDatabase, at};
use support::handle_cluster_setup_failure;

struct Context {
    db: MigratedDatabase,
    scope: Arc<DieselTransactionScope>,
    todos: DieselTodoRepository,
    owner: UserId,
}

impl Context {
    fn titles(&self) -> Vec<String> {
        self.db
            .runtime
            .block_on(self.todos.list_for_owner(self.owner))
            .expect("list todos")
            .into_iter()
            .map(|todo| todo.title)
            .collect()
    }
}

#[fixture]
fn context() -> Option<Context> {
    match MigratedDatabase::provision() {
        Ok(db) => {
            let owner = db.seed_user("ana").id;
            Some(Context {
                scope: Arc::new(DieselTransactionScope::new(db.pool.clone())),
                todos: DieselTodoRepository::new(db.pool.clone()),
                owner,
                db,
            })
        }
        Err(reason) => handle_cluster_setup_failure(reason),
    }
}

fn todo(owner: UserId, title: &str) -> NewTodo {
    NewTodo {
        owner,
        title: title.to_owned(),
        description: String::new(),
        created_at: at(1_700_000_100),
    }
}

#[rstest]
fn committed_writes_are_visible_afterwards(context: Option<Context>) {
    let Some(ctx) = context else {
        eprintln!("SKIP-TEST-CLUSTER: committed_writes_are_visible_afterwards skipped");
        return;
    };

    ctx.db.runtime.block_on(async {
        let tx = ctx.scope.begin().await.expect("begin");
        tx.context()
            .scope(ctx.todos.insert(todo(ctx.owner, "milk")))
            .await
            .expect("insert");
        tx.commit().await.expect("commit");
    });

    assert_eq!(ctx.db.count_rows("todos"), 1);
    assert_eq!(ctx.titles(), vec!["milk".to_owned()]);
}

#[rstest]
fn rolled_back_writes_are_discarded(context: Option<Context>) {
    let Some(ctx) = context else {
        eprintln!("SKIP-TEST-CLUSTER: rolled_back_writes_are_discarded skipped");
        return;
    };

    ctx.db.runtime.block_on(async {
        let tx = ctx.scope.begin().await.expect("begin");
        tx.context()
            .scope(async {
                ctx.todos.insert(todo(ctx.owner, "milk")).await?;
                ctx.todos.insert(todo(ctx.owner, "eggs")).await
            })
            .await
            .expect("inserts");
        tx.rollback().await.expect("rollback");
    });

    assert_eq!(ctx.db.count_rows("todos"), 0);
}

#[rstest]
fn repositories_join_the_ambient_transaction(context: Option<Context>) {
    let Some(ctx) = context else {
        eprintln!("SKIP-TEST-CLUSTER: repositories_join_the_ambient_transaction skipped");
        return;
    };
    let owner = ctx.owner;

    let (inside, outside) = ctx.db.runtime.block_on(async {
        let tx = ctx.scope.begin().await.expect("begin");
        let seen = tx
            .context()
            .scope(async {
                ctx.todos
                    .insert(todo(owner, "milk"))
                    .await
                    .expect("insert");
                let inside = ctx.todos.list_for_owner(owner).await.expect("list inside");
                // Spawned tasks do not inherit the ambient transaction.
                let detached = ctx.todos.clone();
                let outside = tokio::spawn(async move { detached.list_for_owner(owner).await })
                    .await
                    .expect("spawned task joins")
                    .expect("list outside");
                (inside.len(), outside.len())
            })
            .await;
        tx.rollback().await.expect("rollback");
        seen
    });

    assert_eq!(inside, 1);
    assert_eq!(outside, 0);
    assert_eq!(ctx.db.count_rows("todos"), 0);
}

#[rstest]
fn nested_rollback_discards_only_the_savepoint(context: Option<Context>) {
    let Some(ctx) = context else {
        eprintln!("SKIP-TEST-CLUSTER: nested_rollback_discards_only_the_savepoint skipped");
        return;
    };
    let owner = ctx.owner;

    let during = ctx.db.runtime.block_on(async {
        let outer = ctx.scope.begin().await.expect("begin");
        let during = outer
            .context()
            .scope(async {
                ctx.todos
                    .insert(todo(owner, "outer"))
                    .await
                    .expect("outer insert");
                let inner = ctx.scope.begin().await.expect("savepoint");
                inner
                    .context()
                    .scope(ctx.todos.insert(todo(owner, "inner")))
                    .await
                    .expect("inner insert");
                inner.rollback().await.expect("rollback to savepoint");
                ctx.todos.list_for_owner(owner).await.expect("list")
            })
            .await;
        outer.commit().await.expect("commit");
        during
    });

    let during: Vec<String> = during.into_iter().map(|todo| todo.title).collect();
    assert_eq!(during, vec!["outer".to_owned()]);
    assert_eq!(ctx.titles(), vec!["outer".to_owned()]);
}

#[rstest]
fn outer_rollback_discards_a_released_savepoint(context: Option<Context>) {
    let Some(ctx) = context else {
        eprintln!("SKIP-TEST-CLUSTER: outer_rollback_discards_a_released_savepoint skipped");
        return;
    };
    let owner = ctx.owner;

    ctx.db.runtime.block_on(async {
        let outer = ctx.scope.begin().await.expect("begin");
        outer
            .context()
            .scope(async {
                let inner = ctx.scope.begin().await.expect("savepoint");
                inner
                    .context()
                    .scope(ctx.todos.insert(todo(owner, "inner")))
                    .await
                    .expect("inner insert");
                inner.commit().await.expect("release savepoint");
            })
            .await;
        outer.rollback().await.expect("rollback");
    });

    assert_eq!(ctx.db.count_rows("todos"), 0);
}

#[rstest]
fn dropped_transaction_is_not_committed(context: Option<Context>) {
    let Some(ctx) = context else {
        eprintln!("SKIP-TEST-CLUSTER: dropped_transaction_is_not_committed skipped");
        return;
    };

    ctx.db.runtime.block_on(async {
        let abandoned = ctx.scope.begin().await.expect("begin");
        abandoned
            .context()
            .scope(ctx.todos.insert(todo(ctx.owner, "abandoned")))
            .await
            .expect("insert");
        drop(abandoned);

        // A connection left mid-transaction must not be handed out again,
        // or this commit would only release a savepoint.
        let kept = ctx.scope.begin().await.expect("begin after drop");
        kept.context()
            .scope(ctx.todos.insert(todo(ctx.owner, "kept")))
            .await
            .expect("insert");
        kept.commit().await.expect("commit");
    });

    assert_eq!(ctx.titles(), vec!["kept".to_owned()]);
    assert_eq!(ctx.db.count_rows("todos"), 1);
}

#[derive(Debug, thiserror::Error)]
enum WriteError {
    #[error("refused after writing `{0}`")]
    Refused(String),
    #[error(transparent)]
    Persistence(#[from] TodoPersistenceError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

struct TodoWriter {
    todos: DieselTodoRepository,
    owner: UserId,
}

struct TodoWriterOperations {
    create: Operation<(String, bool), (), WriteError>,
}

impl Controller for TodoWriter {
    type Error = WriteError;
    type Registry = ();
    type Operations = TodoWriterOperations;

    fn operations(wrap: &OperationWrapper<Self>) -> TodoWriterOperations {
        TodoWriterOperations {
            create: wrap.wrap(
                "create",
                |writer: Arc<Self>, (title, fail): (String, bool)| async move {
                    writer.todos.insert(todo(writer.owner, &title)).await?;
                    if fail {
                        return Err(WriteError::Refused(title));
                    }
                    Ok(())
                },
            ),
        }
    }

    fn register(_: &ReadyController<Self>, _: &mut ()) -> Result<(), RegistrationError> {
        Ok(())
    }
}

#[rstest]
#[case::failure(true, 0)]
#[case::success(false, 1)]
fn transactional_controller_settles_on_postgres(
    context: Option<Context>,
    #[case] fail: bool,
    #[case] rows: i64,
) {
    let Some(ctx) = context else {
        eprintln!("SKIP-TEST-CLUSTER: transactional_controller_settles_on_postgres skipped");
        return;
    };
    let writer = ReadyController::transactional(
        TodoWriter {
            todos: ctx.todos.clone(),
            owner: ctx.owner,
        },
        Arc::clone(&ctx.scope) as Arc<dyn TransactionScope>,
    );

    let outcome = ctx
        .db
        .runtime
        .block_on(writer.operations().create.call(("milk".to_owned(), fail)));

    assert_eq!(outcome.is_err(), fail);
    if fail {
        assert!(matches!(outcome, Err(WriteError::Refused(_))));
    }
    assert_eq!(ctx.db.count_rows("todos"), rows);
}
