//! Keyed throttle state: fixed-window counters and cooldown deadlines.
//!
//! All state is keyed by fingerprint (plus scope for windows). The
//! in-memory store keeps one mutex per key so concurrent requests from
//! different callers never contend on a shared counter. It is local to the
//! process; running several gateway instances behind a load balancer needs
//! a shared store implementing [`ThrottleStore`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond wall clock.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Milliseconds since the Unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self(AtomicU64::new(start_ms))
    }

    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.0.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of one increment-and-compare on a fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    pub allowed: bool,
    /// Requests counted in the current window (never above the limit)
    pub count: u32,
    /// Time until the window resets; 0 when allowed
    pub retry_after_ms: u64,
}

/// Storage for rate-limit windows and cooldowns.
///
/// `increment_and_check` must be atomic per key: two concurrent calls for
/// the same key never both observe the last free slot.
#[async_trait]
pub trait ThrottleStore: Send + Sync {
    async fn increment_and_check(
        &self,
        key: &str,
        limit: u32,
        window_ms: u64,
        now_ms: u64,
    ) -> WindowDecision;

    /// Active cooldown deadline for `key`, if `now_ms` is before it.
    async fn cooldown_until(&self, key: &str, now_ms: u64) -> Option<u64>;

    /// Set a cooldown. An active cooldown is only ever extended.
    async fn extend_cooldown(&self, key: &str, until_ms: u64, now_ms: u64);
}

#[derive(Debug)]
struct Window {
    count: u32,
    start_ms: u64,
    window_ms: u64,
}

impl Window {
    fn expired(&self, now_ms: u64) -> bool {
        now_ms >= self.start_ms.saturating_add(self.window_ms)
    }
}

/// Process-local [`ThrottleStore`] with per-key locking.
#[derive(Debug)]
pub struct InMemoryThrottleStore {
    windows: RwLock<HashMap<String, Arc<Mutex<Window>>>>,
    cooldowns: RwLock<HashMap<String, Arc<Mutex<u64>>>>,
    max_keys: usize,
}

impl Default for InMemoryThrottleStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl InMemoryThrottleStore {
    /// `max_keys` is a soft bound: past it, expired entries are evicted on insert.
    pub fn new(max_keys: usize) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            cooldowns: RwLock::new(HashMap::new()),
            max_keys,
        }
    }

    /// Number of tracked rate-limit windows.
    pub fn window_count(&self) -> usize {
        self.windows.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of tracked cooldowns (active or not yet evicted).
    pub fn cooldown_count(&self) -> usize {
        self.cooldowns.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn window_entry(&self, key: &str, window_ms: u64, now_ms: u64) -> Arc<Mutex<Window>> {
        if let Some(entry) = self
            .windows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
        {
            return entry.clone();
        }

        let mut map = self.windows.write().unwrap_or_else(|e| e.into_inner());
        if map.len() >= self.max_keys && !map.contains_key(key) {
            let before = map.len();
            // An entry another request has already cloned stays, or that
            // request would count into a window nobody else sees
            map.retain(|_, w| {
                Arc::strong_count(w) > 1
                    || !w.lock().unwrap_or_else(|e| e.into_inner()).expired(now_ms)
            });
            tracing::debug!(evicted = before - map.len(), "Evicted expired rate-limit windows");
        }
        map.entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Window {
                    count: 0,
                    start_ms: now_ms,
                    window_ms,
                }))
            })
            .clone()
    }

    fn cooldown_entry(&self, key: &str, now_ms: u64) -> Arc<Mutex<u64>> {
        if let Some(entry) = self
            .cooldowns
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
        {
            return entry.clone();
        }

        let mut map = self.cooldowns.write().unwrap_or_else(|e| e.into_inner());
        if map.len() >= self.max_keys && !map.contains_key(key) {
            map.retain(|_, until| {
                Arc::strong_count(until) > 1
                    || now_ms < *until.lock().unwrap_or_else(|e| e.into_inner())
            });
        }
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(0)))
            .clone()
    }
}

#[async_trait]
impl ThrottleStore for InMemoryThrottleStore {
    async fn increment_and_check(
        &self,
        key: &str,
        limit: u32,
        window_ms: u64,
        now_ms: u64,
    ) -> WindowDecision {
        let entry = self.window_entry(key, window_ms, now_ms);
        let mut window = entry.lock().unwrap_or_else(|e| e.into_inner());

        // Lazy reset: an expired window restarts at the current request
        if window.expired(now_ms) || window.window_ms != window_ms {
            window.count = 0;
            window.start_ms = now_ms;
            window.window_ms = window_ms;
        }

        if window.count < limit {
            window.count += 1;
            WindowDecision {
                allowed: true,
                count: window.count,
                retry_after_ms: 0,
            }
        } else {
            let reset_at = window.start_ms.saturating_add(window.window_ms);
            WindowDecision {
                allowed: false,
                count: window.count,
                retry_after_ms: reset_at.saturating_sub(now_ms).max(1),
            }
        }
    }

    async fn cooldown_until(&self, key: &str, now_ms: u64) -> Option<u64> {
        let entry = self
            .cooldowns
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()?;
        let until = *entry.lock().unwrap_or_else(|e| e.into_inner());
        (now_ms < until).then_some(until)
    }

    async fn extend_cooldown(&self, key: &str, until_ms: u64, now_ms: u64) {
        let entry = self.cooldown_entry(key, now_ms);
        let mut until = entry.lock().unwrap_or_else(|e| e.into_inner());
        if until_ms > *until {
            *until = until_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn window_admits_up_to_limit() {
        let store = InMemoryThrottleStore::default();
        for n in 1..=3 {
            let d = store.increment_and_check("fp:guidance", 3, 1_000, 100).await;
            assert!(d.allowed);
            assert_eq!(d.count, n);
        }
        let d = store.increment_and_check("fp:guidance", 3, 1_000, 400).await;
        assert!(!d.allowed);
        assert_eq!(d.count, 3);
        assert_eq!(d.retry_after_ms, 700);
    }

    #[tokio::test]
    async fn expired_window_resets_lazily() {
        let store = InMemoryThrottleStore::default();
        store.increment_and_check("k", 1, 1_000, 0).await;
        assert!(!store.increment_and_check("k", 1, 1_000, 999).await.allowed);

        let d = store.increment_and_check("k", 1, 1_000, 1_000).await;
        assert!(d.allowed);
        assert_eq!(d.count, 1);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let store = InMemoryThrottleStore::default();
        assert!(store.increment_and_check("a", 1, 1_000, 0).await.allowed);
        assert!(store.increment_and_check("b", 1, 1_000, 0).await.allowed);
        assert!(!store.increment_and_check("a", 1, 1_000, 0).await.allowed);
    }

    #[tokio::test]
    async fn cooldown_active_only_before_deadline() {
        let store = InMemoryThrottleStore::default();
        assert_eq!(store.cooldown_until("fp", 0).await, None);

        store.extend_cooldown("fp", 5_000, 0).await;
        assert_eq!(store.cooldown_until("fp", 4_999).await, Some(5_000));
        assert_eq!(store.cooldown_until("fp", 5_000).await, None);
    }

    #[tokio::test]
    async fn cooldown_never_shortens() {
        let store = InMemoryThrottleStore::default();
        store.extend_cooldown("fp", 10_000, 0).await;
        store.extend_cooldown("fp", 2_000, 0).await;
        assert_eq!(store.cooldown_until("fp", 0).await, Some(10_000));

        store.extend_cooldown("fp", 20_000, 0).await;
        assert_eq!(store.cooldown_until("fp", 0).await, Some(20_000));
    }

    #[tokio::test]
    async fn capacity_bound_evicts_only_expired_windows() {
        let store = InMemoryThrottleStore::new(2);
        store.increment_and_check("old", 5, 100, 0).await;
        store.increment_and_check("live", 5, 10_000, 0).await;
        assert_eq!(store.window_count(), 2);

        store.increment_and_check("new", 5, 100, 500).await;
        assert_eq!(store.window_count(), 2);

        // "live" kept its count, so it was not evicted
        let d = store.increment_and_check("live", 5, 10_000, 600).await;
        assert_eq!(d.count, 2);
    }

    #[tokio::test]
    async fn eviction_skips_windows_still_in_use() {
        let store = InMemoryThrottleStore::new(1);
        store.increment_and_check("busy", 5, 100, 0).await;
        // A request has looked the entry up but not yet counted into it
        let held = store.window_entry("busy", 100, 0);

        store.increment_and_check("other", 5, 100, 500).await;
        assert_eq!(store.window_count(), 2);
        assert!(Arc::ptr_eq(&held, &store.window_entry("busy", 100, 500)));

        drop(held);
        store.increment_and_check("third", 5, 100, 1_000).await;
        assert_eq!(store.window_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_increments_never_exceed_limit() {
        let store = Arc::new(InMemoryThrottleStore::default());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment_and_check("hot", 10, 60_000, 1).await.allowed
            }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    #[test]
    fn manual_clock_moves_on_request() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(250);
        assert_eq!(clock.now_ms(), 1_250);
        clock.set(5);
        assert_eq!(clock.now_ms(), 5);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
