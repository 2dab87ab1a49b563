// src/ingest/rate_limit.rs
// Per-host politeness delay plus a per-run request budget. The budget keeps a
// misbehaving config from blocking a run indefinitely: requests over budget
// are skipped with a recorded warning, never queued.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::FetchError;

pub struct HostRateLimiter {
    min_delay: Duration,
    budget: u32,
    inner: Mutex<Inner>,
}

struct Inner {
    used: u32,
    // host -> earliest moment the next request to it may start
    next_allowed: HashMap<String, Instant>,
}

impl HostRateLimiter {
    pub fn new(min_delay: Duration, budget: u32) -> Self {
        Self {
            min_delay,
            budget,
            inner: Mutex::new(Inner {
                used: 0,
                next_allowed: HashMap::new(),
            }),
        }
    }

    /// Start a fresh run: the budget resets, the per-host clocks do not.
    pub fn reset_budget(&self) {
        self.inner.lock().expect("rate limiter poisoned").used = 0;
    }

    /// Wait until a request to `url`'s host is polite, or fail fast when the
    /// run budget is spent. The host slot is claimed under the lock so
    /// concurrent callers serialize correctly, then the wait happens outside it.
    pub async fn acquire(&self, url: &str) -> Result<(), FetchError> {
        let host = host_of(url);
        let deadline = {
            let mut g = self.inner.lock().expect("rate limiter poisoned");
            if g.used >= self.budget {
                return Err(FetchError::BudgetExhausted);
            }
            g.used += 1;

            let now = Instant::now();
            let start = match g.next_allowed.get(&host) {
                Some(&t) if t > now => t,
                _ => now,
            };
            g.next_allowed.insert(host, start + self.min_delay);
            start
        };
        tokio::time::sleep_until(deadline).await;
        Ok(())
    }
}

fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| url.to_string())
}
