//! The chat service: one explicitly constructed owner of the store,
//! connection, listener registry and dispatcher.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::info;

use lendchat_net::{ConnectionManager, Connector, CredentialProvider, ListenerRegistry};
use lendchat_shared::ConnectionStatus;
use lendchat_store::{Database, KeyValueStore, MessageStore};

use crate::bridge::spawn_bridge;
use crate::config::ClientConfig;
use crate::dispatcher::{Dispatcher, PersistInbound};
use crate::error::Result;

pub struct ChatService {
    config: ClientConfig,
    store: MessageStore,
    listeners: Arc<ListenerRegistry>,
    connection: ConnectionManager,
    dispatcher: Arc<Dispatcher>,
    bridge: Mutex<Option<JoinHandle<()>>>,
}

impl ChatService {
    /// Wire every component and start the notification bridge.
    ///
    /// Must be called from within a tokio runtime.  Does not connect; call
    /// [`connect`](Self::connect) once the user is signed in.
    pub fn start(
        config: ClientConfig,
        kv: Arc<dyn KeyValueStore>,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let listeners = Arc::new(ListenerRegistry::new());
        let store = MessageStore::new(kv);

        let (connection, notif_rx) = ConnectionManager::new(
            config.connection_config(),
            connector,
            credentials,
            Arc::clone(&listeners),
        );

        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            connection.clone(),
            Arc::clone(&listeners),
        ));
        dispatcher.register_hook(Arc::new(PersistInbound::new(store.clone())));

        let bridge = spawn_bridge(Arc::clone(&dispatcher), notif_rx);

        info!(endpoint = %config.ws_url, client_id = %config.client_id, "Chat service started");

        Self {
            config,
            store,
            listeners,
            connection,
            dispatcher,
            bridge: Mutex::new(Some(bridge)),
        }
    }

    /// Open the SQLite store named by the configuration, or the default
    /// database in the platform data directory.
    pub fn open_store(config: &ClientConfig) -> Result<Arc<dyn KeyValueStore>> {
        let db = match &config.db_path {
            Some(path) => Database::open_at(path)?,
            None => Database::new()?,
        };
        Ok(Arc::new(db))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub async fn connect(&self) {
        self.connection.connect().await;
    }

    /// Disconnect and stop the bridge.  The service is inert afterwards.
    pub async fn shutdown(&self) {
        self.connection.disconnect().await;

        let bridge = self
            .bridge
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(bridge) = bridge {
            bridge.abort();
        }
        info!("Chat service stopped");
    }
}
