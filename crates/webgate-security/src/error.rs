use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("domain '{domain}' is not in the allowed domains list")]
    DomainDenied { domain: String },

    #[error("permission request for '{domain}' timed out")]
    PermissionTimeout { domain: String },

    #[error("rate limit exceeded: {scope} limit of {limit} requests reached")]
    RateLimited { scope: &'static str, limit: u32 },

    #[error("script rejected by policy: matched denied pattern '{pattern}'")]
    ScriptDenied { pattern: String },
}

pub type SecurityResult<T> = Result<T, SecurityError>;
