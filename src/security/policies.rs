//! Built-in policies

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::security::{CallContext, Decision, Denial, DenialReason, SecurityPolicy};

/// Requires a credential from a fixed set.
///
/// Only SHA-256 digests of the accepted keys are kept in memory.
#[derive(Debug)]
pub struct ApiKeyPolicy {
    digests: HashSet<[u8; 32]>,
}

impl ApiKeyPolicy {
    /// Accept any of `keys`.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            digests: keys.into_iter().map(|k| digest(k.as_ref())).collect(),
        }
    }
}

fn digest(key: &str) -> [u8; 32] {
    Sha256::digest(key.as_bytes()).into()
}

impl SecurityPolicy for ApiKeyPolicy {
    fn name(&self) -> &str {
        "api-key"
    }

    fn evaluate(&self, ctx: &CallContext) -> Decision {
        match ctx.credential.as_deref() {
            Some(key) if self.digests.contains(&digest(key)) => Decision::Allow,
            Some(_) => Decision::Deny(Denial::new(
                self.name(),
                DenialReason::Unauthenticated,
                "credential not recognized",
            )),
            None => Decision::Deny(Denial::new(
                self.name(),
                DenialReason::Unauthenticated,
                "credential required",
            )),
        }
    }
}

/// Sliding window of admitted-call instants for one caller.
#[derive(Debug, Default)]
struct CallWindow {
    calls: Vec<Instant>,
}

impl CallWindow {
    fn evict(&mut self, now: Instant, window: Duration) {
        self.calls.retain(|&t| now.saturating_duration_since(t) < window);
    }
}

/// Idle callers are dropped once every this many evaluations.
pub const PRUNE_EVERY: usize = 64;

fn prune_callers(callers: &mut HashMap<String, CallWindow>, now: Instant, window: Duration) {
    callers.retain(|_, w| {
        w.evict(now, window);
        !w.calls.is_empty()
    });
}

/// Admits at most `count` calls per caller in any `window` span.
#[derive(Debug)]
pub struct RateLimitPolicy {
    count: usize,
    window: Duration,
    callers: Mutex<HashMap<String, CallWindow>>,
    evaluations: AtomicUsize,
}

impl RateLimitPolicy {
    /// `count` calls per `window`, tracked per [`CallContext::caller`].
    pub fn new(count: usize, window: Duration) -> Self {
        Self {
            count,
            window,
            callers: Mutex::new(HashMap::new()),
            evaluations: AtomicUsize::new(0),
        }
    }

    /// Drop callers with no calls left in the window.
    ///
    /// [`evaluate`](SecurityPolicy::evaluate) also does this every
    /// [`PRUNE_EVERY`] calls.
    pub fn prune(&self, now: Instant) {
        if let Ok(mut callers) = self.callers.lock() {
            prune_callers(&mut callers, now, self.window);
        }
    }

    /// Number of callers currently tracked.
    pub fn tracked_callers(&self) -> usize {
        self.callers.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl SecurityPolicy for RateLimitPolicy {
    fn name(&self) -> &str {
        "rate-limit"
    }

    fn evaluate(&self, ctx: &CallContext) -> Decision {
        let mut callers = self
            .callers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let seen = self.evaluations.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % PRUNE_EVERY == 0 {
            prune_callers(&mut callers, ctx.at, self.window);
        }
        let window = callers.entry(ctx.caller.clone()).or_default();
        window.evict(ctx.at, self.window);

        if window.calls.len() >= self.count {
            let oldest = window.calls.first().copied().unwrap_or(ctx.at);
            let retry_after = self
                .window
                .saturating_sub(ctx.at.saturating_duration_since(oldest));
            return Decision::Deny(Denial::new(
                self.name(),
                DenialReason::RateLimited {
                    retry_after_ms: retry_after.as_millis() as u64,
                },
                format!(
                    "rate limit of {} calls per {} ms exceeded",
                    self.count,
                    self.window.as_millis()
                ),
            ));
        }

        window.calls.push(ctx.at);
        Decision::Allow
    }
}

/// Every member must allow; the first denial is returned.
#[derive(Debug)]
pub struct CompositePolicy {
    policies: Vec<Arc<dyn SecurityPolicy>>,
}

impl CompositePolicy {
    /// Evaluate `policies` in order.
    pub fn new(policies: Vec<Arc<dyn SecurityPolicy>>) -> Self {
        Self { policies }
    }
}

impl SecurityPolicy for CompositePolicy {
    fn name(&self) -> &str {
        "composite"
    }

    fn evaluate(&self, ctx: &CallContext) -> Decision {
        for policy in &self.policies {
            if let deny @ Decision::Deny(_) = policy.evaluate(ctx) {
                return deny;
            }
        }
        Decision::Allow
    }
}
