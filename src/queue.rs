//! Job Queue + session KV (spec component 3): a durable FIFO of scan jobs
//! with blocking dequeue, plus the session/key-value store. Grounded on the
//! `CacheStore` trait and its `redis_store` submodule in the crate this
//! registry is adapted from — the registry's jobs/sessions are a different
//! shape than package-cache entries, but the Redis usage (GET/SETEX/DEL,
//! list ops) follows the same idiom.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, RwLock};
use uuid::Uuid;

use crate::catalog::Session;
use crate::error::Result;

/// A hand-rolled cancellation signal (spec §5's "cancellable context").
/// Cloning shares the same underlying signal; calling `cancel` wakes every
/// clone currently parked in `cancelled()`.
#[derive(Clone)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Cancellation {
    pub fn new() -> Self {
        Cancellation {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub manifest_id: Uuid,
    pub repository: String,
    pub reference: String,
}

/// A durable FIFO of scan jobs. Jobs are delivered at-least-once.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: ScanJob) -> Result<()>;

    /// Blocks until a job arrives or `cancel` fires, in which case `Ok(None)`
    /// is returned.
    async fn dequeue(&self, cancel: &Cancellation) -> Result<Option<ScanJob>>;
}

/// The session/key-value store hosted by the same adapter as the job queue
/// (spec §4.3: "the queue adapter also hosts the session KV").
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(&self, session: Session, ttl: Duration) -> Result<()>;
    async fn get(&self, session_id: &str) -> Result<Option<Session>>;
    async fn delete(&self, session_id: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<Session>>;
}

pub const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// In-process queue, backing the engine when no durable queue is
/// configured. Per spec §4.3, the engine must keep functioning with
/// scanning effectively disabled if durable backing is unavailable; this
/// implementation is a drop-in substitute that satisfies the same trait,
/// so "unavailable" in practice means "nobody is ever dequeuing it".
#[derive(Default)]
pub struct InMemoryJobQueue {
    jobs: Mutex<VecDeque<ScanJob>>,
    notify: Notify,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: ScanJob) -> Result<()> {
        self.jobs.lock().await.push_back(job);
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, cancel: &Cancellation) -> Result<Option<ScanJob>> {
        loop {
            if let Some(job) = self.jobs.lock().await.pop_front() {
                return Ok(Some(job));
            }
            if cancel.is_cancelled() {
                return Ok(None);
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = cancel.cancelled() => return Ok(None),
            }
        }
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, (Session, Instant)>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put(&self, session: Session, ttl: Duration) -> Result<()> {
        let expires = Instant::now() + ttl;
        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), (session, expires));
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(s, _)| s.clone()))
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Session>> {
        let now = Instant::now();
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|(_, expires)| *expires > now)
            .map(|(s, _)| s.clone())
            .collect())
    }
}

#[cfg(feature = "redis")]
pub mod redis_backed {
    use super::*;
    use redis::AsyncCommands;

    pub struct RedisJobQueue {
        client: redis::Client,
        list_key: String,
    }

    impl RedisJobQueue {
        pub fn new(addr: &str) -> Result<Self> {
            let client = redis::Client::open(addr)
                .map_err(|e| crate::error::RegistryError::Transient(format!("redis client: {e}")))?;
            Ok(RedisJobQueue {
                client,
                list_key: "registry:scan-jobs".to_string(),
            })
        }
    }

    #[async_trait]
    impl JobQueue for RedisJobQueue {
        async fn enqueue(&self, job: ScanJob) -> Result<()> {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let payload = serde_json::to_string(&job)?;
            let _: () = conn.lpush(&self.list_key, payload).await?;
            Ok(())
        }

        async fn dequeue(&self, cancel: &Cancellation) -> Result<Option<ScanJob>> {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            loop {
                if cancel.is_cancelled() {
                    return Ok(None);
                }
                let result: Option<(String, String)> = tokio::select! {
                    r = conn.brpop(&self.list_key, 5.0) => r?,
                    _ = cancel.cancelled() => return Ok(None),
                };
                if let Some((_, payload)) = result {
                    let job: ScanJob = serde_json::from_str(&payload)?;
                    return Ok(Some(job));
                }
            }
        }
    }

    pub struct RedisSessionStore {
        client: redis::Client,
        prefix: String,
    }

    impl RedisSessionStore {
        pub fn new(addr: &str) -> Result<Self> {
            let client = redis::Client::open(addr)
                .map_err(|e| crate::error::RegistryError::Transient(format!("redis client: {e}")))?;
            Ok(RedisSessionStore {
                client,
                prefix: "registry:session:".to_string(),
            })
        }

        fn key(&self, id: &str) -> String {
            format!("{}{}", self.prefix, id)
        }
    }

    #[async_trait]
    impl SessionStore for RedisSessionStore {
        async fn put(&self, session: Session, ttl: Duration) -> Result<()> {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let payload = serde_json::to_string(&session)?;
            let _: () = conn
                .set_ex(self.key(&session.session_id), payload, ttl.as_secs())
                .await?;
            Ok(())
        }

        async fn get(&self, session_id: &str) -> Result<Option<Session>> {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let payload: Option<String> = conn.get(self.key(session_id)).await?;
            Ok(match payload {
                Some(p) => Some(serde_json::from_str(&p)?),
                None => None,
            })
        }

        async fn delete(&self, session_id: &str) -> Result<()> {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let _: () = conn.del(self.key(session_id)).await?;
            Ok(())
        }

        async fn list(&self) -> Result<Vec<Session>> {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let keys: Vec<String> = conn.keys(format!("{}*", self.prefix)).await?;
            let mut out = Vec::with_capacity(keys.len());
            for key in keys {
                let payload: Option<String> = conn.get(&key).await?;
                if let Some(p) = payload {
                    out.push(serde_json::from_str(&p)?);
                }
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Role;

    #[tokio::test]
    async fn enqueue_then_dequeue_fifo() {
        let queue = InMemoryJobQueue::new();
        let j1 = ScanJob { manifest_id: Uuid::new_v4(), repository: "a/b".into(), reference: "v1".into() };
        let j2 = ScanJob { manifest_id: Uuid::new_v4(), repository: "a/b".into(), reference: "v2".into() };
        queue.enqueue(j1.clone()).await.unwrap();
        queue.enqueue(j2.clone()).await.unwrap();
        let cancel = Cancellation::new();
        let got1 = queue.dequeue(&cancel).await.unwrap().unwrap();
        let got2 = queue.dequeue(&cancel).await.unwrap().unwrap();
        assert_eq!(got1.reference, "v1");
        assert_eq!(got2.reference, "v2");
    }

    #[tokio::test]
    async fn dequeue_returns_none_on_cancel() {
        let queue = InMemoryJobQueue::new();
        let cancel = Cancellation::new();
        cancel.cancel();
        let got = queue.dequeue(&cancel).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn dequeue_unblocks_when_job_arrives() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let cancel = Cancellation::new();
        let q2 = queue.clone();
        let handle = tokio::spawn(async move { q2.dequeue(&Cancellation::new()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue
            .enqueue(ScanJob { manifest_id: Uuid::new_v4(), repository: "a/b".into(), reference: "v1".into() })
            .await
            .unwrap();
        let got = handle.await.unwrap().unwrap();
        assert!(got.is_some());
        let _ = cancel;
    }

    #[tokio::test]
    async fn session_roundtrip_and_expiry() {
        let store = InMemorySessionStore::new();
        let session = Session {
            session_id: "s1".into(),
            user_id: Uuid::new_v4(),
            username: "alice".into(),
            role: Role::User,
            login_at: chrono::Utc::now(),
        };
        store.put(session.clone(), Duration::from_millis(30)).await.unwrap();
        assert!(store.get("s1").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get("s1").await.unwrap().is_none());
    }
}
