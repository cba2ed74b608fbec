//! Bounded pool of collaborator sessions.
//!
//! Stages that call remote collaborators check out a [`SessionLease`] for
//! the duration of the call. The lease returns its session on drop, so a
//! stage that finishes, fails, times out, or is dropped mid-flight by a
//! cancelled stream always gives its slot back.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::trace;

/// Errors raised by [`SessionPool`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The pool was closed.
    #[error("session pool is closed")]
    Closed,
    /// Every session is checked out.
    #[error("no session available")]
    Exhausted,
}

/// A reusable collaborator session.
#[derive(Debug)]
pub struct Session {
    id: u64,
    created_at: Instant,
    uses: u64,
}

impl Session {
    /// Pool-unique identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Times the session has been checked out, including the current lease.
    #[must_use]
    pub const fn uses(&self) -> u64 {
        self.uses
    }

    /// When the session was opened.
    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }
}

#[derive(Debug)]
struct PoolInner {
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Session>>,
    next_id: AtomicU64,
    in_use: AtomicUsize,
    capacity: usize,
}

/// Concurrency-safe session pool. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl SessionPool {
    /// Creates a pool allowing `capacity` concurrent leases.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                permits: Arc::new(Semaphore::new(capacity)),
                idle: Mutex::new(Vec::with_capacity(capacity)),
                next_id: AtomicU64::new(1),
                in_use: AtomicUsize::new(0),
                capacity,
            }),
        }
    }

    /// Waits for a free session.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] once the pool is closed.
    pub async fn acquire(&self) -> Result<SessionLease, PoolError> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        Ok(self.lease(permit))
    }

    /// Takes a free session without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Exhausted`] when every session is out.
    pub fn try_acquire(&self) -> Result<SessionLease, PoolError> {
        let permit = Arc::clone(&self.inner.permits)
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::Closed => PoolError::Closed,
                TryAcquireError::NoPermits => PoolError::Exhausted,
            })?;
        Ok(self.lease(permit))
    }

    fn lease(&self, permit: OwnedSemaphorePermit) -> SessionLease {
        let mut session = self.inner.idle.lock().pop().unwrap_or_else(|| Session {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            created_at: Instant::now(),
            uses: 0,
        });
        session.uses += 1;
        self.inner.in_use.fetch_add(1, Ordering::SeqCst);
        trace!(session_id = session.id, "Session checked out");

        SessionLease {
            session: Some(session),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        }
    }

    /// Rejects all future and pending acquisitions.
    pub fn close(&self) {
        self.inner.permits.close();
    }

    /// Maximum concurrent leases.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Leases currently held.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::SeqCst)
    }

    /// Sessions opened and waiting for reuse.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.inner.idle.lock().len()
    }
}

/// Exclusive use of one session; returned to the pool on drop.
#[derive(Debug)]
pub struct SessionLease {
    session: Option<Session>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl SessionLease {
    /// The leased session.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Id of the leased session, 0 if already returned.
    #[must_use]
    pub fn session_id(&self) -> u64 {
        self.session.as_ref().map_or(0, Session::id)
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            trace!(session_id = session.id, "Session returned");
            self.pool.idle.lock().push(session);
        }
        self.pool.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let pool = SessionPool::new(2);
        let lease = pool.acquire().await.unwrap();

        assert_eq!(pool.in_use(), 1);
        assert_eq!(lease.session().map(Session::uses), Some(1));

        drop(lease);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.idle(), 1);
    }

    #[tokio::test]
    async fn test_sessions_are_reused() {
        let pool = SessionPool::new(1);
        let first = pool.acquire().await.unwrap().session_id();
        let lease = pool.acquire().await.unwrap();

        assert_eq!(lease.session_id(), first);
        assert_eq!(lease.session().map(Session::uses), Some(2));
    }

    #[tokio::test]
    async fn test_try_acquire_exhausted() {
        let pool = SessionPool::new(1);
        let _held = pool.try_acquire().unwrap();
        assert_eq!(pool.try_acquire().unwrap_err(), PoolError::Exhausted);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let pool = SessionPool::new(1);
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|l| l.session_id()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(held);
        let id = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(id, 1);
    }

    #[tokio::test]
    async fn test_lease_released_when_future_dropped() {
        let pool = SessionPool::new(1);
        let p = pool.clone();
        let task = tokio::spawn(async move {
            let _lease = p.acquire().await.unwrap();
            std::future::pending::<()>().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.in_use(), 1);

        task.abort();
        let _ = task.await;
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn test_closed_pool() {
        let pool = SessionPool::new(1);
        pool.close();
        assert_eq!(pool.acquire().await.unwrap_err(), PoolError::Closed);
    }
}
