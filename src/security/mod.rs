//! Call authorization
//!
//! A [`SecurityPolicy`] looks at a [`CallContext`] and returns a
//! [`Decision`]. Denials are ordinary values carrying a [`Denial`]; nothing
//! in this module returns an error while evaluating. The
//! [`SecurityPolicyEngine`] applies one policy (usually a
//! [`CompositePolicy`]) to every method that is not exempt.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::error::{Result, ToolwireError};
use crate::mcp::types::{METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_PING};

pub mod policies;

pub use policies::{ApiKeyPolicy, CompositePolicy, RateLimitPolicy};

/// Methods that bypass policy evaluation unless configured otherwise.
pub const DEFAULT_EXEMPT_METHODS: &[&str] = &[METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_PING];

/// What a policy knows about one incoming call.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Stable key identifying the caller; rate limits are kept per key.
    pub caller: String,
    /// Credential the caller presented, if any.
    pub credential: Option<String>,
    /// JSON-RPC method.
    pub method: String,
    /// Tool name for `tools/call`.
    pub tool: Option<String>,
    /// When the call arrived.
    pub at: Instant,
}

impl CallContext {
    /// Context for `method` from `caller`, stamped now.
    pub fn new(caller: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
            credential: None,
            method: method.into(),
            tool: None,
            at: Instant::now(),
        }
    }

    /// Attach the presented credential.
    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential;
        self
    }

    /// Attach the tool name.
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }
}

/// Why a call was denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenialReason {
    /// No credential, or one that is not accepted.
    Unauthenticated,
    /// The caller exceeded its call budget.
    RateLimited {
        /// Milliseconds until the oldest counted call leaves the window.
        #[serde(rename = "retryAfterMs")]
        retry_after_ms: u64,
    },
}

/// A structured denial, sent as the `data` of a `-32001` error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    /// Name of the policy that denied.
    pub policy: String,
    /// Machine-readable reason.
    #[serde(flatten)]
    pub reason: DenialReason,
    /// Human-readable explanation.
    pub message: String,
}

impl Denial {
    /// Build a denial.
    pub fn new(
        policy: impl Into<String>,
        reason: DenialReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            policy: policy.into(),
            reason,
            message: message.into(),
        }
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.policy)
    }
}

/// Outcome of evaluating a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The call may proceed.
    Allow,
    /// The call must not reach a handler.
    Deny(Denial),
}

impl Decision {
    /// `true` for [`Decision::Allow`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// An authorization rule.
pub trait SecurityPolicy: Send + Sync + fmt::Debug {
    /// Name reported in denials and metrics.
    fn name(&self) -> &str;

    /// Decide on one call. Must not panic and has no error path.
    fn evaluate(&self, ctx: &CallContext) -> Decision;
}

/// Policy description as written in config files.
///
/// # Examples
///
/// ```
/// use toolwire::security::PolicyConfig;
///
/// let cfg: PolicyConfig = serde_yaml::from_str(r#"
/// type: composite
/// policies:
///   - { type: api-key, keys: ["k1"] }
///   - { type: rate-limit, count: 3, window_ms: 1000 }
/// "#).unwrap();
/// let policy = cfg.build().unwrap();
/// assert_eq!(policy.name(), "composite");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PolicyConfig {
    /// Require one of `keys`.
    ApiKey {
        /// Accepted credentials.
        keys: Vec<String>,
    },
    /// At most `count` calls per caller in any `window_ms` span.
    RateLimit {
        /// Calls admitted per window.
        count: usize,
        /// Window length in milliseconds.
        window_ms: u64,
    },
    /// Every sub-policy must allow.
    Composite {
        /// Evaluated in order; the first denial wins.
        policies: Vec<PolicyConfig>,
    },
}

impl PolicyConfig {
    /// Instantiate the described policy.
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::Config`] for an empty key list, a zero count
    /// or window, or an empty composite.
    pub fn build(&self) -> Result<Arc<dyn SecurityPolicy>> {
        Ok(match self {
            PolicyConfig::ApiKey { keys } => {
                if keys.is_empty() || keys.iter().any(String::is_empty) {
                    return Err(ToolwireError::Config(
                        "api-key policy needs at least one non-empty key".into(),
                    ));
                }
                Arc::new(ApiKeyPolicy::new(keys))
            }
            PolicyConfig::RateLimit { count, window_ms } => {
                if *count == 0 || *window_ms == 0 {
                    return Err(ToolwireError::Config(
                        "rate-limit policy needs count > 0 and window_ms > 0".into(),
                    ));
                }
                Arc::new(RateLimitPolicy::new(
                    *count,
                    std::time::Duration::from_millis(*window_ms),
                ))
            }
            PolicyConfig::Composite { policies } => {
                if policies.is_empty() {
                    return Err(ToolwireError::Config(
                        "composite policy needs at least one member".into(),
                    ));
                }
                let built = policies
                    .iter()
                    .map(PolicyConfig::build)
                    .collect::<Result<Vec<_>>>()?;
                Arc::new(CompositePolicy::new(built))
            }
        })
    }
}

/// Applies a policy to every non-exempt method.
#[derive(Debug, Clone)]
pub struct SecurityPolicyEngine {
    policy: Option<Arc<dyn SecurityPolicy>>,
    exempt: HashSet<String>,
}

impl Default for SecurityPolicyEngine {
    fn default() -> Self {
        Self::allow_all()
    }
}

impl SecurityPolicyEngine {
    /// Engine enforcing `policy` with the default exempt methods.
    pub fn new(policy: Arc<dyn SecurityPolicy>) -> Self {
        Self {
            policy: Some(policy),
            exempt: DEFAULT_EXEMPT_METHODS.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Engine that allows everything.
    pub fn allow_all() -> Self {
        Self {
            policy: None,
            exempt: DEFAULT_EXEMPT_METHODS.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Replace the exempt method list.
    pub fn with_exempt_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exempt = methods.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `method` skips evaluation.
    pub fn is_exempt(&self, method: &str) -> bool {
        self.exempt.contains(method)
    }

    /// Decide on `ctx`.
    pub fn evaluate(&self, ctx: &CallContext) -> Decision {
        let Some(policy) = &self.policy else {
            return Decision::Allow;
        };
        if self.is_exempt(&ctx.method) {
            return Decision::Allow;
        }
        let decision = policy.evaluate(ctx);
        if let Decision::Deny(denial) = &decision {
            tracing::warn!(
                caller = %ctx.caller,
                method = %ctx.method,
                tool = ctx.tool.as_deref().unwrap_or(""),
                policy = %denial.policy,
                "call denied: {}",
                denial.message
            );
            crate::metrics::record_denial(denial);
        }
        decision
    }
}

/// Short, stable, non-reversible identifier for a credential.
///
/// Used as the caller key when a transport does not name the caller.
///
/// # Examples
///
/// ```
/// use toolwire::security::credential_fingerprint;
///
/// let a = credential_fingerprint("secret");
/// assert_eq!(a.len(), 16);
/// assert_eq!(a, credential_fingerprint("secret"));
/// assert_ne!(a, credential_fingerprint("other"));
/// ```
pub fn credential_fingerprint(credential: &str) -> String {
    Sha256::digest(credential.as_bytes())
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> SecurityPolicyEngine {
        let cfg = PolicyConfig::Composite {
            policies: vec![
                PolicyConfig::ApiKey {
                    keys: vec!["good".into()],
                },
                PolicyConfig::RateLimit {
                    count: 1,
                    window_ms: 60_000,
                },
            ],
        };
        SecurityPolicyEngine::new(cfg.build().unwrap())
    }

    #[test]
    fn test_denial_wire_shape() {
        let d = Denial::new(
            "rate-limit",
            DenialReason::RateLimited { retry_after_ms: 250 },
            "slow down",
        );
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["policy"], "rate-limit");
        assert_eq!(v["reason"], "rate_limited");
        assert_eq!(v["retryAfterMs"], 250);
        assert_eq!(serde_json::from_value::<Denial>(v).unwrap(), d);

        let u = serde_json::to_value(Denial::new("api-key", DenialReason::Unauthenticated, "no"))
            .unwrap();
        assert_eq!(u["reason"], "unauthenticated");
    }

    #[tokio::test]
    async fn test_exempt_methods_skip_policy() {
        let e = engine();
        for method in ["initialize", "notifications/initialized", "ping"] {
            assert!(e.evaluate(&CallContext::new("c", method)).is_allowed(), "{method}");
        }
        assert!(!e.evaluate(&CallContext::new("c", "tools/list")).is_allowed());
    }

    #[tokio::test]
    async fn test_custom_exempt_list_replaces_default() {
        let e = engine().with_exempt_methods(["tools/list"]);
        assert!(e.evaluate(&CallContext::new("c", "tools/list")).is_allowed());
        assert!(!e.evaluate(&CallContext::new("c", "ping")).is_allowed());
    }

    #[tokio::test]
    async fn test_allow_all_engine() {
        let e = SecurityPolicyEngine::allow_all();
        assert!(e
            .evaluate(&CallContext::new("c", "tools/call").with_tool("x"))
            .is_allowed());
    }

    #[tokio::test]
    async fn test_composite_surfaces_first_denial() {
        let e = engine();
        let unauth = e.evaluate(&CallContext::new("c", "tools/call"));
        match unauth {
            Decision::Deny(d) => assert_eq!(d.reason, DenialReason::Unauthenticated),
            Decision::Allow => panic!("expected denial"),
        }

        let ok = CallContext::new("c", "tools/call").with_credential(Some("good".into()));
        assert!(e.evaluate(&ok).is_allowed());
        match e.evaluate(&ok) {
            Decision::Deny(d) => assert!(matches!(d.reason, DenialReason::RateLimited { .. })),
            Decision::Allow => panic!("expected rate limit"),
        }
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        for cfg in [
            PolicyConfig::ApiKey { keys: vec![] },
            PolicyConfig::RateLimit {
                count: 0,
                window_ms: 1000,
            },
            PolicyConfig::RateLimit {
                count: 1,
                window_ms: 0,
            },
            PolicyConfig::Composite { policies: vec![] },
        ] {
            assert!(matches!(cfg.build(), Err(ToolwireError::Config(_))), "{cfg:?}");
        }
    }

    #[test]
    fn test_policy_config_yaml_kebab_case() {
        let cfg: PolicyConfig =
            serde_yaml::from_str("type: rate-limit\ncount: 3\nwindow_ms: 1000\n").unwrap();
        assert_eq!(
            cfg,
            PolicyConfig::RateLimit {
                count: 3,
                window_ms: 1000
            }
        );
    }
}
