//! The mail store
//!
//! [`ImapStore`] owns the connection pool and hands out [`Folder`]
//! handles. Connecting authenticates one pool connection eagerly so
//! bad credentials fail synchronously; its capability map becomes the
//! store's canonical capabilities.

use crate::config::ImapConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::folder::{Folder, FolderInner};
use crate::pool::Pool;
use crate::protocol::response::{
    Capabilities, Namespace, NamespaceData, QuotaData, ResponseStatus, UntaggedResponse,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info, warn};

/// Store-level notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The server sent an `[ALERT]` the user is supposed to see.
    Alert(String),
    /// An unsolicited NO/BAD notice outside any command.
    Notice(String),
    /// The server said BYE on a store connection.
    Disconnected,
}

type StoreListener = Box<dyn Fn(&StoreEvent) + Send + Sync>;

pub(crate) struct StoreInner {
    config: Arc<ImapConfig>,
    pool: Pool,
    capabilities: Mutex<Capabilities>,
    store_connection: Mutex<Option<Connection>>,
    folders: Mutex<Vec<Weak<FolderInner>>>,
    listeners: Mutex<Vec<StoreListener>>,
    closed: AtomicBool,
}

impl StoreInner {
    pub(crate) fn config(&self) -> &ImapConfig {
        &self.config
    }

    pub(crate) fn acquire_folder_connection(&self) -> Result<Connection> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::StoreClosed);
        }
        self.pool.acquire()
    }

    pub(crate) fn release_connection(&self, connection: Connection) {
        self.pool.release(connection);
    }

    /// Run one command cycle on a store connection: the dedicated one
    /// when configured, otherwise any pooled connection. Pending
    /// untagged responses are flushed through the store handler before
    /// the connection goes back.
    pub(crate) fn with_store_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::StoreClosed);
        }
        if self.config.separate_store_connection {
            let mut slot = self
                .store_connection
                .lock()
                .map_err(|_| Error::StoreClosed)?;
            let mut connection = match slot.take() {
                Some(connection) if !connection.is_closed() => connection,
                Some(dead) => {
                    self.pool.release(dead);
                    self.pool.acquire()?
                }
                None => self.pool.acquire()?,
            };
            let result = f(&mut connection);
            self.flush_unsolicited(&mut connection);
            if connection.is_closed() {
                self.pool.release(connection);
            } else {
                *slot = Some(connection);
            }
            result
        } else {
            let mut connection = self.pool.acquire()?;
            let result = f(&mut connection);
            self.flush_unsolicited(&mut connection);
            self.pool.release(connection);
            result
        }
    }

    fn flush_unsolicited(&self, connection: &mut Connection) {
        for untagged in connection.take_pending() {
            self.handle_unsolicited(&untagged);
        }
    }

    /// The store's share of the untagged handler chain.
    pub(crate) fn handle_unsolicited(&self, untagged: &UntaggedResponse) {
        match untagged {
            UntaggedResponse::Condition(condition) => {
                if condition.has_code("ALERT") {
                    warn!("server alert: {}", condition.message);
                    self.emit(&StoreEvent::Alert(condition.message.clone()));
                } else {
                    match condition.status {
                        ResponseStatus::Bye => {
                            debug!("store connection closed by server: {}", condition.message);
                            self.emit(&StoreEvent::Disconnected);
                        }
                        ResponseStatus::No | ResponseStatus::Bad => {
                            warn!("server notice: {}", condition.message);
                            self.emit(&StoreEvent::Notice(condition.message.clone()));
                        }
                        _ => debug!("server says: {}", condition.message),
                    }
                }
            }
            other => debug!("ignoring unsolicited response {other:?}"),
        }
    }

    fn emit(&self, event: &StoreEvent) {
        let Ok(listeners) = self.listeners.lock() else {
            return;
        };
        for listener in listeners.iter() {
            listener(event);
        }
    }

    /// A folder handle, registered so `close` can find it.
    pub(crate) fn folder_handle(self: &Arc<Self>, full_name: &str) -> Folder {
        let folder = Folder::new(Arc::clone(self), full_name.to_string());
        if let Ok(mut folders) = self.folders.lock() {
            folders.retain(|weak| weak.strong_count() > 0);
            folders.push(Arc::downgrade(folder.inner()));
        }
        folder
    }
}

/// A connected IMAP mail store.
pub struct ImapStore {
    inner: Arc<StoreInner>,
}

impl ImapStore {
    /// Connect and authenticate.
    ///
    /// One pool connection is opened eagerly, so authentication
    /// failures surface here rather than on first folder use. With
    /// `separate_store_connection` it stays reserved for store
    /// commands; otherwise it returns to the pool.
    pub fn connect(config: ImapConfig) -> Result<Self> {
        let config = Arc::new(config);
        let inner = Arc::new(StoreInner {
            pool: Pool::new(Arc::clone(&config)),
            config,
            capabilities: Mutex::new(Capabilities::default()),
            store_connection: Mutex::new(None),
            folders: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let connection = inner.pool.acquire()?;
        if let Ok(mut capabilities) = inner.capabilities.lock() {
            *capabilities = connection.capabilities().clone();
        }
        if inner.config.separate_store_connection {
            if let Ok(mut slot) = inner.store_connection.lock() {
                *slot = Some(connection);
            }
        } else {
            inner.pool.release(connection);
        }
        info!("store connected to {}", inner.config.host);
        Ok(Self { inner })
    }

    /// Whether the store has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Whether the server advertised a capability at connect time.
    #[must_use]
    pub fn has_capability(&self, name: &str) -> bool {
        self.inner
            .capabilities
            .lock()
            .map(|capabilities| capabilities.has(name))
            .unwrap_or(false)
    }

    pub fn add_listener(&self, listener: impl Fn(&StoreEvent) + Send + Sync + 'static) {
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.push(Box::new(listener));
        }
    }

    /// The root of the folder hierarchy.
    #[must_use]
    pub fn default_folder(&self) -> Folder {
        self.inner.folder_handle("")
    }

    /// A folder handle by full name. No server round trip happens
    /// until the folder is used.
    #[must_use]
    pub fn folder(&self, full_name: &str) -> Folder {
        self.inner.folder_handle(full_name)
    }

    /// The personal namespaces, defaulting to the root namespace when
    /// the server has no NAMESPACE capability.
    pub fn personal_namespaces(&self) -> Result<Vec<Folder>> {
        let data = self.namespace_data()?;
        let list = if data.personal.is_empty() {
            vec![Namespace {
                prefix: String::new(),
                separator: None,
            }]
        } else {
            data.personal
        };
        Ok(self.namespace_folders(list))
    }

    /// Namespaces for other users' mailboxes.
    pub fn user_namespaces(&self) -> Result<Vec<Folder>> {
        let data = self.namespace_data()?;
        Ok(self.namespace_folders(data.other_users))
    }

    /// Shared namespaces.
    pub fn shared_namespaces(&self) -> Result<Vec<Folder>> {
        let data = self.namespace_data()?;
        Ok(self.namespace_folders(data.shared))
    }

    fn namespace_data(&self) -> Result<NamespaceData> {
        self.inner
            .with_store_connection(Connection::namespace)
    }

    fn namespace_folders(&self, namespaces: Vec<Namespace>) -> Vec<Folder> {
        namespaces
            .into_iter()
            .map(|namespace| {
                let mut prefix = namespace.prefix;
                if let Some(separator) = namespace.separator
                    && prefix.ends_with(separator)
                {
                    prefix.pop();
                }
                self.inner.folder_handle(&prefix)
            })
            .collect()
    }

    /// GETQUOTAROOT for a mailbox: the quota roots and their current
    /// resource usage.
    pub fn quota(&self, mailbox: &str) -> Result<Vec<QuotaData>> {
        self.inner
            .with_store_connection(|connection| connection.quota_root(mailbox))
            .map(|(_, quotas)| quotas)
    }

    /// SETQUOTA on a quota root.
    pub fn set_quota(&self, root: &str, limits: &[(String, u64)]) -> Result<Vec<QuotaData>> {
        self.inner
            .with_store_connection(|connection| connection.set_quota(root, limits))
    }

    /// Close all open folders, the dedicated store connection, and
    /// the pool.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let folders = self
            .inner
            .folders
            .lock()
            .map(|mut folders| std::mem::take(&mut *folders))
            .unwrap_or_default();
        for weak in folders {
            if let Some(inner) = weak.upgrade() {
                let folder = Folder::from_inner(inner);
                if folder.is_open()
                    && let Err(error) = folder.close(false)
                {
                    debug!("error closing {}: {error}", folder.full_name());
                }
            }
        }
        if let Ok(mut slot) = self.inner.store_connection.lock()
            && let Some(mut connection) = slot.take()
        {
            connection.logout();
            self.inner.pool.release(connection);
        }
        self.inner.pool.shutdown();
        info!("store closed");
        Ok(())
    }
}

impl Drop for ImapStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for ImapStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapStore")
            .field("host", &self.inner.config.host)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
