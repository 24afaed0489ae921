//! A bounded pool of pre-opened backend sessions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use super::{Error, GraphDb, GraphTx, TxMode};

/// One backend session. Sessions are cheap for the bundled backend, but
/// the pool treats them as scarce the way an out-of-process backend
/// would require.
pub struct GraphConn {
    db: GraphDb,
}

impl GraphConn {
    pub async fn open_tx(&self, timeout_ms: u64, mode: TxMode) -> Result<GraphTx, Error> {
        self.db.open_tx(timeout_ms, mode).await
    }

    pub fn db(&self) -> &GraphDb {
        &self.db
    }
}

struct PoolInner {
    sessions: Mutex<VecDeque<GraphConn>>,
    available: Semaphore,
}

/// A thread-safe, bounded queue of [`GraphConn`]s. `get_conn` waits when
/// all sessions are checked out; dropping the returned guard (or calling
/// [`put_conn`](BackendPool::put_conn)) makes the session available
/// again.
#[derive(Clone)]
pub struct BackendPool {
    inner: Arc<PoolInner>,
}

impl BackendPool {
    pub fn new(db: GraphDb, size: usize) -> Self {
        let sessions = (0..size).map(|_| GraphConn { db: db.clone() }).collect();
        BackendPool {
            inner: Arc::new(PoolInner {
                sessions: Mutex::new(sessions),
                available: Semaphore::new(size),
            }),
        }
    }

    /// Check a session out, waiting for one if none is available.
    pub async fn get_conn(&self) -> Result<PooledConn, Error> {
        let permit = self
            .inner
            .available
            .acquire()
            .await
            .map_err(|_| Error::Backend("backend pool is closed".to_string()))?;
        permit.forget();

        let conn = self
            .inner
            .sessions
            .lock()
            .expect("pool lock poisoned")
            .pop_front()
            .expect("pool permit held without an available session");
        Ok(PooledConn {
            conn: Some(conn),
            pool: self.inner.clone(),
        })
    }

    /// Return a detached session to the pool.
    pub fn put_conn(&self, conn: GraphConn) {
        self.inner
            .sessions
            .lock()
            .expect("pool lock poisoned")
            .push_back(conn);
        self.inner.available.add_permits(1);
    }

    /// How many sessions are currently available.
    pub fn nr_avail_conn(&self) -> usize {
        self.inner.available.available_permits()
    }

    /// Close the pool: drain the idle sessions and refuse further
    /// `get_conn` calls.
    pub fn close(&self) {
        self.inner.available.close();
        self.inner
            .sessions
            .lock()
            .expect("pool lock poisoned")
            .clear();
    }
}

/// A checked-out session; single-threaded use by its holder.
pub struct PooledConn {
    conn: Option<GraphConn>,
    pool: Arc<PoolInner>,
}

impl PooledConn {
    /// Take the session out of pool management entirely. The caller must
    /// hand it back with [`BackendPool::put_conn`].
    pub fn detach(mut self) -> GraphConn {
        self.conn.take().expect("session already detached")
    }
}

impl std::ops::Deref for PooledConn {
    type Target = GraphConn;

    fn deref(&self) -> &GraphConn {
        self.conn.as_ref().expect("session already detached")
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool
                .sessions
                .lock()
                .expect("pool lock poisoned")
                .push_back(conn);
            self.pool.available.add_permits(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions_cycle_through_the_pool() {
        let pool = BackendPool::new(GraphDb::in_memory(), 2);
        assert_eq!(pool.nr_avail_conn(), 2);

        let first = pool.get_conn().await.unwrap();
        let _second = pool.get_conn().await.unwrap();
        assert_eq!(pool.nr_avail_conn(), 0);

        drop(first);
        assert_eq!(pool.nr_avail_conn(), 1);
    }

    #[tokio::test]
    async fn get_conn_waits_for_a_returned_session() {
        let pool = BackendPool::new(GraphDb::in_memory(), 1);
        let held = pool.get_conn().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get_conn().await.map(|_| ()) })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn detached_sessions_return_explicitly() {
        let pool = BackendPool::new(GraphDb::in_memory(), 1);
        let conn = pool.get_conn().await.unwrap().detach();
        assert_eq!(pool.nr_avail_conn(), 0);
        pool.put_conn(conn);
        assert_eq!(pool.nr_avail_conn(), 1);
    }

    #[tokio::test]
    async fn closed_pools_refuse_checkout() {
        let pool = BackendPool::new(GraphDb::in_memory(), 1);
        pool.close();
        assert!(pool.get_conn().await.is_err());
    }
}
