//! Non-blocking pool of directory connections.
//!
//! Checkout never waits: an empty queue means a fresh connection is opened,
//! and a full queue on checkin means the connection is closed.  The queue
//! bound therefore limits idle connections, not concurrent ones.

use std::collections::VecDeque;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::metrics::MetricsRegistry;

/// Maximum number of idle connections kept for reuse.
pub const POOL_CAPACITY: usize = 5;

// ---------------------------------------------------------------------------
// Connection traits
// ---------------------------------------------------------------------------

/// Opens new directory connections.
#[async_trait::async_trait]
pub trait DirectoryConnector: Send + Sync + 'static {
    type Connection: DirectoryConnection;

    async fn connect(&self) -> Result<Self::Connection>;
}

/// A live directory session.  Never shared between concurrent callers.
#[async_trait::async_trait]
pub trait DirectoryConnection: Send + 'static {
    /// `Ok(false)` for a rejected bind, `Err` for a transport or protocol fault.
    async fn authenticate(&mut self, username: &str, password: &str) -> Result<bool>;

    async fn groups_of_user(&mut self, username: &str) -> Result<Vec<String>>;

    async fn close(self);
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
trait Operation<T: DirectoryConnection>: Sync {
    type Output: Send;

    const NAME: &'static str;

    async fn run(&self, conn: &mut T) -> Result<Self::Output>;
}

struct Authenticate<'a> {
    username: &'a str,
    password: &'a str,
}

#[async_trait::async_trait]
impl<'a, T: DirectoryConnection> Operation<T> for Authenticate<'a> {
    type Output = bool;

    const NAME: &'static str = "authenticate";

    async fn run(&self, conn: &mut T) -> Result<bool> {
        conn.authenticate(self.username, self.password).await
    }
}

struct GroupsOfUser<'a> {
    username: &'a str,
}

#[async_trait::async_trait]
impl<'a, T: DirectoryConnection> Operation<T> for GroupsOfUser<'a> {
    type Output = Vec<String>;

    const NAME: &'static str = "groups_of_user";

    async fn run(&self, conn: &mut T) -> Result<Vec<String>> {
        conn.groups_of_user(self.username).await
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

pub struct ConnectionPool<C: DirectoryConnector> {
    connector: C,
    idle: Mutex<VecDeque<C::Connection>>,
    metrics: MetricsRegistry,
}

impl<C: DirectoryConnector> ConnectionPool<C> {
    pub fn new(connector: C, metrics: MetricsRegistry) -> Self {
        Self {
            connector,
            idle: Mutex::new(VecDeque::with_capacity(POOL_CAPACITY)),
            metrics,
        }
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Result<bool> {
        self.with_retry(&Authenticate { username, password }).await
    }

    pub async fn groups_of_user(&self, username: &str) -> Result<Vec<String>> {
        self.with_retry(&GroupsOfUser { username }).await
    }

    /// Close every idle connection.  Connections checked out at this point
    /// are not tracked.
    pub async fn close_all(&self) {
        let drained: Vec<C::Connection> = self.idle.lock().drain(..).collect();
        let count = drained.len();
        for conn in drained {
            conn.close().await;
        }
        debug!(count, "directory pool drained");
    }

    /// Run `op`; on error discard the connection and retry once on a new one.
    async fn with_retry<O: Operation<C::Connection>>(&self, op: &O) -> Result<O::Output> {
        let mut conn = self.checkout().await?;
        match op.run(&mut conn).await {
            Ok(out) => {
                self.checkin(conn).await;
                return Ok(out);
            }
            Err(e) => {
                warn!(op = O::NAME, error = %e, "directory operation failed, reconnecting");
                self.discard(conn).await;
            }
        }

        let mut conn = self
            .connect()
            .await
            .context("failed to reconnect to directory")?;
        let result = op.run(&mut conn).await;
        self.checkin(conn).await;
        result
    }

    async fn checkout(&self) -> Result<C::Connection> {
        let idle = self.idle.lock().pop_front();
        match idle {
            Some(conn) => {
                self.metrics.metrics.ldap_connections_reused.inc();
                Ok(conn)
            }
            None => self.connect().await,
        }
    }

    async fn connect(&self) -> Result<C::Connection> {
        let conn = self.connector.connect().await?;
        self.metrics.metrics.ldap_connections_created.inc();
        Ok(conn)
    }

    async fn checkin(&self, conn: C::Connection) {
        let overflow = {
            let mut idle = self.idle.lock();
            if idle.len() < POOL_CAPACITY {
                idle.push_back(conn);
                None
            } else {
                Some(conn)
            }
        };
        if let Some(conn) = overflow {
            self.discard(conn).await;
        }
    }

    async fn discard(&self, conn: C::Connection) {
        self.metrics.metrics.ldap_connections_discarded.inc();
        conn.close().await;
    }
}
