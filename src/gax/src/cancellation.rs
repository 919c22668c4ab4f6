// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Cooperative cancellation for retry and polling loops.
//!
//! A [CancellationToken] is shared between an application thread (or task)
//! and the loops in this crate. The loops consult the token before every
//! network attempt and while waiting between attempts. Once canceled, a token
//! stays canceled.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Signals retry and polling loops to stop.
///
/// Tokens are cheaply cloneable. All clones observe the same cancellation
/// flag.
///
/// # Example
/// ```
/// # use cloudpoll_gax::cancellation::CancellationToken;
/// let token = CancellationToken::new();
/// let watcher = token.clone();
/// token.cancel();
/// assert!(watcher.is_cancelled());
/// ```
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    condvar: Condvar,
    notify: tokio::sync::Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token, waking all current and future waiters.
    pub fn cancel(&self) {
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .expect("cancellation lock is poisoned");
        *cancelled = true;
        // Wake both the blocking and the async waiters.
        self.inner.condvar.notify_all();
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        *self
            .inner
            .cancelled
            .lock()
            .expect("cancellation lock is poisoned")
    }

    /// Waits until the token is cancelled.
    ///
    /// Returns immediately if the token is already cancelled.
    pub async fn cancelled(&self) {
        // Register interest before re-checking the flag. A `cancel()` racing
        // with this function either flips the flag before the check below, or
        // wakes the already-enabled notification.
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Waits until the token is cancelled or the timeout expires.
    ///
    /// Returns `true` if the token was cancelled. This is the blocking
    /// equivalent of racing [cancelled()][Self::cancelled] against a sleep.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let cancelled = self
            .inner
            .cancelled
            .lock()
            .expect("cancellation lock is poisoned");
        let (cancelled, _) = self
            .inner
            .condvar
            .wait_timeout_while(cancelled, timeout, |cancelled| !*cancelled)
            .expect("cancellation lock is poisoned");
        *cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        // Cancelling twice is harmless.
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_when_set() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancelled().await;
    }

    #[tokio::test]
    async fn cancelled_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        // Yield so the task gets a chance to start waiting.
        tokio::task::yield_now().await;
        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_loses_race_against_pending_sleep() {
        let token = CancellationToken::new();
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(1)) => {},
            _ = token.cancelled() => panic!("token is not cancelled"),
        }
    }

    #[test]
    fn wait_timeout_expires() {
        let token = CancellationToken::new();
        assert!(!token.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn wait_timeout_observes_cancel() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            canceller.cancel();
        });
        assert!(token.wait_timeout(Duration::from_secs(60)));
        handle.join().unwrap();
    }
}
