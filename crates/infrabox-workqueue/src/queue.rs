use crate::rate_limiter::ExponentialBackoff;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

struct State<K> {
    /// Keys ready to be handed out, in arrival order
    queue: VecDeque<K>,
    /// Keys needing a sync; a superset of `queue`
    dirty: HashSet<K>,
    /// Keys currently held by a worker
    processing: HashSet<K>,
    shutting_down: bool,
}

struct Inner<K> {
    name: String,
    state: Mutex<State<K>>,
    notify: Notify,
    limiter: ExponentialBackoff<K>,
}

/// Deduplicating work queue of object keys
///
/// A key is held by at most one worker at a time. Adding a key that is
/// already pending is a no-op; adding a key that is being processed marks it
/// dirty and it is handed out again once the current worker calls `done`.
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Hash + Eq + Clone + std::fmt::Display + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_rate_limiter(name, ExponentialBackoff::default())
    }

    pub fn with_rate_limiter(name: impl Into<String>, limiter: ExponentialBackoff<K>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                limiter,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Mark `key` as needing a sync
    pub fn add(&self, key: K) {
        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return;
        }
        if !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);

        self.inner.notify.notify_one();
    }

    /// Wait for the next key; returns None once the queue is shut down and drained
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release `key` after processing; re-queues it if it was added meanwhile
    pub fn done(&self, key: &K) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Add `key` once `delay` has elapsed
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        if self.is_shutting_down() {
            return;
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Add `key` after its per-key backoff delay
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.inner.limiter.when(&key);
        debug!(
            "{}: requeueing '{}' in {:?} (attempt {})",
            self.inner.name,
            key,
            delay,
            self.inner.limiter.num_requeues(&key)
        );
        self.add_after(key, delay);
    }

    /// Reset the backoff history of `key`
    pub fn forget(&self, key: &K) {
        self.inner.limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.inner.limiter.num_requeues(key)
    }

    /// Stop accepting keys and wake all waiting workers
    pub fn shutdown(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> WorkQueue<String> {
        WorkQueue::new("test")
    }

    #[tokio::test]
    async fn test_add_deduplicates_pending_keys() {
        let q = queue();
        q.add("default/a".to_string());
        q.add("default/a".to_string());
        q.add("default/b".to_string());

        assert_eq!(q.len(), 2);
        assert_eq!(q.get().await.as_deref(), Some("default/a"));
        assert_eq!(q.get().await.as_deref(), Some("default/b"));
    }

    #[tokio::test]
    async fn test_key_added_while_processing_is_held_back() {
        let q = queue();
        q.add("default/a".to_string());
        let key = q.get().await.unwrap();

        q.add("default/a".to_string());
        assert!(q.is_empty());

        q.done(&key);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await.as_deref(), Some("default/a"));
    }

    #[tokio::test]
    async fn test_done_without_readd_does_not_requeue() {
        let q = queue();
        q.add("default/a".to_string());
        let key = q.get().await.unwrap();
        q.done(&key);

        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_get_waits_for_add() {
        let q = queue();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };

        tokio::task::yield_now().await;
        q.add("default/late".to_string());

        assert_eq!(waiter.await.unwrap().as_deref(), Some("default/late"));
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let q = queue();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let q = q.clone();
                tokio::spawn(async move { q.get().await })
            })
            .collect();

        tokio::task::yield_now().await;
        q.shutdown();

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_keys_and_rejects_new_ones() {
        let q = queue();
        q.add("default/a".to_string());
        q.shutdown();
        q.add("default/b".to_string());

        assert_eq!(q.get().await.as_deref(), Some("default/a"));
        assert_eq!(q.get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_delays_key() {
        let q = queue();
        q.add_after("default/a".to_string(), Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(q.is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(q.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_requeue_backs_off() {
        let q = queue();
        let key = "default/a".to_string();

        q.add_rate_limited(key.clone());
        q.add_rate_limited(key.clone());
        assert_eq!(q.num_requeues(&key), 2);

        q.forget(&key);
        assert_eq!(q.num_requeues(&key), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(q.len(), 1);
    }
}
