//! Repository ports implemented over [`MemoryStore`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::MemoryStore;
use crate::domain::ports::{
    RefreshSessionPersistenceError, RefreshSessionRepository, TodoPersistenceError,
    TodoRepository, UserPersistenceError, UserRepository,
};
use crate::domain::{NewTodo, NewUser, RefreshSession, Todo, TodoId, User, UserId};

#[derive(Debug, Clone)]
pub struct MemoryUserRepository {
    store: Arc<MemoryStore>,
}

impl MemoryUserRepository {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create(&self, user: NewUser) -> Result<User, UserPersistenceError> {
        self.store
            .write(|tables| {
                let clash = tables.users.values().any(|existing| {
                    existing.username == user.username
                        || existing.email.as_str().eq_ignore_ascii_case(user.email.as_str())
                });
                if clash {
                    return Err(UserPersistenceError::conflict(user.username.as_str()));
                }
                let id = UserId::new(tables.next_user_id());
                let created = user.into_user(id);
                tables.users.insert(id.get(), created.clone());
                Ok(created)
            })
            .await
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, UserPersistenceError> {
        Ok(self.store.read(|tables| tables.users.get(&id.get()).cloned()))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserPersistenceError> {
        Ok(self.store.read(|tables| {
            tables
                .users
                .values()
                .find(|user| user.username.as_str() == username)
                .cloned()
        }))
    }

    async fn find_by_username_or_email(
        &self,
        username: &str,
        email: &str,
    ) -> Result<Option<User>, UserPersistenceError> {
        Ok(self.store.read(|tables| {
            tables
                .users
                .values()
                .find(|user| {
                    user.username.as_str() == username
                        || user.email.as_str().eq_ignore_ascii_case(email)
                })
                .cloned()
        }))
    }
}

#[derive(Debug, Clone)]
pub struct MemoryRefreshSessionRepository {
    store: Arc<MemoryStore>,
}

impl MemoryRefreshSessionRepository {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RefreshSessionRepository for MemoryRefreshSessionRepository {
    async fn insert(&self, session: &RefreshSession) -> Result<(), RefreshSessionPersistenceError> {
        let session = session.clone();
        self.store
            .write(|tables| {
                tables.refresh_sessions.insert(session.id, session);
            })
            .await;
        Ok(())
    }

    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshSession>, RefreshSessionPersistenceError> {
        Ok(self.store.read(|tables| {
            tables
                .refresh_sessions
                .values()
                .find(|session| session.token_hash == token_hash)
                .cloned()
        }))
    }

    async fn revoke(
        &self,
        id: Uuid,
        revoked_at: DateTime<Utc>,
    ) -> Result<(), RefreshSessionPersistenceError> {
        self.store
            .write(|tables| {
                if let Some(session) = tables.refresh_sessions.get_mut(&id) {
                    session.revoked_at.get_or_insert(revoked_at);
                }
            })
            .await;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MemoryTodoRepository {
    store: Arc<MemoryStore>,
}

impl MemoryTodoRepository {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TodoRepository for MemoryTodoRepository {
    async fn list_for_owner(&self, owner: UserId) -> Result<Vec<Todo>, TodoPersistenceError> {
        Ok(self.store.read(|tables| {
            tables
                .todos
                .values()
                .filter(|todo| todo.owner == owner)
                .cloned()
                .collect()
        }))
    }

    async fn insert(&self, todo: NewTodo) -> Result<Todo, TodoPersistenceError> {
        let created = self
            .store
            .write(|tables| {
                let id = TodoId::new(tables.next_todo_id());
                let created = todo.into_todo(id);
                tables.todos.insert(id.get(), created.clone());
                created
            })
            .await;
        Ok(created)
    }

    async fn find(&self, id: TodoId) -> Result<Option<Todo>, TodoPersistenceError> {
        Ok(self.store.read(|tables| tables.todos.get(&id.get()).cloned()))
    }

    async fn update(&self, todo: &Todo) -> Result<(), TodoPersistenceError> {
        let todo = todo.clone();
        self.store
            .write(|tables| {
                if let Some(stored) = tables.todos.get_mut(&todo.id.get()) {
                    *stored = todo;
                }
            })
            .await;
        Ok(())
    }

    async fn delete(&self, id: TodoId) -> Result<bool, TodoPersistenceError> {
        Ok(self
            .store
            .write(|tables| tables.todos.remove(&id.get()).is_some())
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EmailAddress, Username};
    use chrono::TimeZone;
    use rstest::{fixture, rstest};

    #[fixture]
    fn store() -> Arc<MemoryStore> {
        MemoryStore::new()
    }

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: Username::new(username).expect("valid username"),
            email: EmailAddress::new(email).expect("valid email"),
            first_name: String::new(),
            last_name: String::new(),
            password_hash: "pbkdf2_sha256$1$salt$hash".into(),
            is_staff: false,
            is_superuser: false,
            date_joined: Utc.timestamp_opt(0, 0).single().expect("epoch"),
        }
    }

    #[rstest]
    #[tokio::test]
    async fn users_get_sequential_ids_and_unique_identities(store: Arc<MemoryStore>) {
        let users = MemoryUserRepository::new(store);
        let ana = users.create(new_user("ana", "ana@example.com")).await.expect("ana");
        let bo = users.create(new_user("bo", "bo@example.com")).await.expect("bo");
        assert_eq!((ana.id.get(), bo.id.get()), (1, 2));
        assert!(ana.is_active);

        let clash = users
            .create(new_user("cy", "ANA@example.com"))
            .await
            .expect_err("email clash");
        assert!(matches!(clash, UserPersistenceError::Conflict { .. }));

        let found = users
            .find_by_username_or_email("nobody", "bo@EXAMPLE.com")
            .await
            .expect("lookup");
        assert_eq!(found.map(|user| user.id), Some(bo.id));
    }

    #[rstest]
    #[tokio::test]
    async fn todos_are_listed_per_owner(store: Arc<MemoryStore>) {
        let todos = MemoryTodoRepository::new(store);
        let now = Utc::now();
        for (owner, title) in [(1, "mine"), (2, "theirs"), (1, "also mine")] {
            todos
                .insert(NewTodo {
                    owner: UserId::new(owner),
                    title: title.into(),
                    description: String::new(),
                    created_at: now,
                })
                .await
                .expect("insert");
        }

        let mine = todos.list_for_owner(UserId::new(1)).await.expect("list");
        let titles: Vec<_> = mine.iter().map(|todo| todo.title.as_str()).collect();
        assert_eq!(titles, ["mine", "also mine"]);

        assert!(todos.delete(TodoId::new(2)).await.expect("delete"));
        assert!(!todos.delete(TodoId::new(2)).await.expect("delete again"));
    }

    #[rstest]
    #[tokio::test]
    async fn revocation_keeps_the_first_timestamp(store: Arc<MemoryStore>) {
        let sessions = MemoryRefreshSessionRepository::new(store);
        let first = Utc.timestamp_opt(100, 0).single().expect("timestamp");
        let later = Utc.timestamp_opt(200, 0).single().expect("timestamp");
        let session = RefreshSession {
            id: Uuid::new_v4(),
            user_id: UserId::new(1),
            token_hash: "abc".into(),
            user_agent: "test".into(),
            ip_address: None,
            created_at: first,
            expires_at: later,
            revoked_at: None,
        };
        sessions.insert(&session).await.expect("insert");

        sessions.revoke(session.id, first).await.expect("revoke");
        sessions.revoke(session.id, later).await.expect("revoke again");

        let stored = sessions
            .find_by_token_hash("abc")
            .await
            .expect("lookup")
            .expect("session exists");
        assert_eq!(stored.revoked_at, Some(first));
    }
}
