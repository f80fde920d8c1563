//! Cancellation token system for fetches
//!
//! Provides cancellation tokens that let a superseded or cleared fetch stop
//! early. Tokens can be polled with `is_cancelled()` before committing a
//! result, or awaited with `cancelled()` to abandon a request in flight.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::Notify;

struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancellation token for cooperative fetch cancellation
///
/// Multiple tokens can share the same underlying cancellation state via
/// `clone()`. Once cancelled a token stays cancelled.
///
/// # Example
///
/// ```
/// use frame_annotator_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Clone)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    /// Create a new cancellation token
    ///
    /// The token starts in a non-cancelled state.
    pub fn new() -> Self {
        Self {
            state: Arc::new(TokenState {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Cancel this token
    ///
    /// All clones observe the cancellation and every pending `cancelled()`
    /// future resolves. Idempotent.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.state.notify.notify_waiters();
    }

    /// Check if this token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Wait until the token is cancelled
    pub async fn cancelled(&self) {
        loop {
            // Register interest before checking so a concurrent cancel()
            // cannot slip between the check and the await.
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Whether `other` is a clone of this token
    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Registry of live cancellation tokens
///
/// Associates keys (fetch ids, frame indices) with tokens so that in-flight
/// work can be cancelled individually or all at once.
///
/// # Example
///
/// ```
/// use frame_annotator_scheduler::CancellationRegistry;
///
/// let registry: CancellationRegistry<u32> = CancellationRegistry::new();
/// let token = registry.register(12);
///
/// registry.cancel(&12);
/// assert!(token.is_cancelled());
/// ```
pub struct CancellationRegistry<K> {
    tokens: Mutex<HashMap<K, CancellationToken>>,
}

impl<K: Eq + Hash + Copy> CancellationRegistry<K> {
    /// Create a new empty cancellation registry
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Register a key and return its new token
    ///
    /// A token previously registered under the same key is cancelled and
    /// replaced.
    pub fn register(&self, key: K) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.tokens.lock().insert(key, token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Register a key only if nothing is registered under it yet
    pub fn try_register(&self, key: K) -> Option<CancellationToken> {
        let mut tokens = self.tokens.lock();
        if tokens.contains_key(&key) {
            return None;
        }
        let token = CancellationToken::new();
        tokens.insert(key, token.clone());
        Some(token)
    }

    /// Cancel the token registered under `key`
    ///
    /// Returns `true` if the key was found.
    pub fn cancel(&self, key: &K) -> bool {
        match self.tokens.lock().get(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every registered token and empty the registry
    ///
    /// Returns the number of tokens cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut tokens = self.tokens.lock();
        let count = tokens.len();
        for (_, token) in tokens.drain() {
            token.cancel();
        }
        count
    }

    /// Cancel and remove every token whose key matches `predicate`
    ///
    /// Returns the number of tokens cancelled.
    pub fn cancel_where(&self, predicate: impl Fn(&K) -> bool) -> usize {
        let mut tokens = self.tokens.lock();
        let before = tokens.len();
        tokens.retain(|key, token| {
            if predicate(key) {
                token.cancel();
                false
            } else {
                true
            }
        });
        before - tokens.len()
    }

    /// Remove `key` if it is still bound to `token`
    ///
    /// Completed work calls this so it never unregisters a newer token that
    /// took its place.
    pub fn unregister(&self, key: &K, token: &CancellationToken) -> bool {
        let mut tokens = self.tokens.lock();
        match tokens.get(key) {
            Some(current) if current.same_as(token) => {
                tokens.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.tokens.lock().contains_key(key)
    }

    /// Get the number of registered tokens
    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

impl<K: Eq + Hash + Copy> Default for CancellationRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}
