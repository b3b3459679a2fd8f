//! Security and policy enforcement: domain allow-listing with permission
//! prompts, multi-window rate limiting, sensitive-data redaction, and the
//! script policy filter.

pub mod allowlist;
pub mod error;
pub mod eval_policy;
pub mod manager;
pub mod permissions;
pub mod rate_limit;
pub mod redaction;

pub use allowlist::normalize_host;
pub use error::{SecurityError, SecurityResult};
pub use eval_policy::EvalPolicy;
pub use manager::{SecurityConfig, SecurityManager};
pub use permissions::{PermissionBroker, PermissionBrokerConfig};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use redaction::{Redactor, REDACTED};
