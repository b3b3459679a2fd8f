//! Hostname normalisation and allow-list matching.

use std::collections::HashSet;

const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1", "0.0.0.0"];

/// Normalise a domain or URL down to its bare lowercased hostname.
///
/// Accepts either a full URL (`https://Example.com:8443/path`) or a bare
/// host (`Example.com`); scheme, port, path and credentials are stripped.
pub fn normalize_host(input: &str) -> String {
    let trimmed = input.trim().to_lowercase();
    if trimmed.contains("://") {
        if let Ok(parsed) = url::Url::parse(&trimmed) {
            if let Some(host) = parsed.host_str() {
                return host.to_string();
            }
        }
    }
    // Bare host, possibly with a port or trailing path.
    let no_path = trimmed.split('/').next().unwrap_or(&trimmed);
    // IPv6 literals keep their colons.
    if no_path.matches(':').count() == 1 {
        no_path.split(':').next().unwrap_or(no_path).to_string()
    } else {
        no_path.to_string()
    }
}

/// True when `host` is a localhost/loopback variant.
pub fn is_loopback(host: &str) -> bool {
    LOOPBACK_HOSTS.contains(&host) || host.ends_with(".localhost")
}

/// Allow-list check against an already-normalised set of hostnames.
pub fn is_allowed(host: &str, allow_list: &HashSet<String>, auto_approve_localhost: bool) -> bool {
    if auto_approve_localhost && is_loopback(host) {
        return true;
    }
    allow_list.contains(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_urls_and_bare_hosts() {
        assert_eq!(normalize_host("https://Example.com:8443/path"), "example.com");
        assert_eq!(normalize_host("Example.COM"), "example.com");
        assert_eq!(normalize_host("example.com:3000"), "example.com");
        assert_eq!(normalize_host("example.com/path"), "example.com");
        assert_eq!(normalize_host("http://sub.example.com"), "sub.example.com");
    }

    #[test]
    fn loopback_detection() {
        assert!(is_loopback("localhost"));
        assert!(is_loopback("127.0.0.1"));
        assert!(is_loopback("::1"));
        assert!(is_loopback("app.localhost"));
        assert!(!is_loopback("example.com"));
    }

    #[test]
    fn allowlist_matching() {
        let mut set = HashSet::new();
        set.insert("example.com".to_string());

        assert!(is_allowed("example.com", &set, false));
        assert!(!is_allowed("google.com", &set, false));
        assert!(is_allowed("localhost", &set, true));
        assert!(!is_allowed("localhost", &set, false));
    }
}
