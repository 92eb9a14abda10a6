use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tokio::sync::mpsc;

use murmur_shared::protocol::ServerEvent;
use murmur_shared::types::{ConversationId, UserId};
use murmur_store::Database;

use crate::connection::ClientContext;
use crate::coordinator::{Coordinator, SharedStore};
use crate::dispatch::Dispatcher;
use crate::hub::{ConnectionHandle, Registry};

/// A database in a temporary directory wired to a fresh registry.
pub struct Fixture {
    _dir: TempDir,
    pub store: SharedStore,
    pub registry: Arc<Registry>,
    pub coordinator: Coordinator,
    pub dispatcher: Arc<Dispatcher>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("chat.db")).unwrap();
        let store = Arc::new(Mutex::new(db));
        let registry = Arc::new(Registry::new());
        let coordinator = Coordinator::new(store.clone(), registry.clone());
        let dispatcher = Arc::new(Dispatcher::new(coordinator.clone()));
        Self {
            _dir: dir,
            store,
            registry,
            coordinator,
            dispatcher,
        }
    }

    pub fn users<const N: usize>(&self, names: [&str; N]) -> [UserId; N] {
        let db = self.store.lock().unwrap();
        names.map(|name| db.create_user(name).unwrap().id)
    }

    pub fn group(&self, name: &str, creator: UserId, members: &[UserId]) -> ConversationId {
        let mut db = self.store.lock().unwrap();
        db.create_group_conversation(name, creator, members).unwrap().0.id
    }

    /// Register a connection for `user` and return its context and queue.
    pub async fn connect(&self, user: UserId) -> (ClientContext, mpsc::Receiver<ServerEvent>) {
        let (handle, rx) = ConnectionHandle::new(user, 16);
        let ctx = ClientContext::new(&handle, self.registry.clone());
        self.registry.add(handle).await;
        (ctx, rx)
    }
}
