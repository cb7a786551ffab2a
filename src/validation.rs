//! Validation hooks (C13) and URL normalization (C9 step 2).
//!
//! The two hooks are pure predicates substituted by an embedder for scheme blacklist /
//! SSRF logic; this module ships a conservative default so a complete crate never ships
//! hooks that do nothing, per the scope note in `SPEC_FULL.md` §1.

use async_trait::async_trait;

use crate::config::UrlValidationConfig;
use crate::error::{CoreError, CoreResult};

/// A pure predicate invoked by the creation pipeline (validate-raw, validate-normalized)
/// and the resolution pipeline (redirect-time). Returns normally or fails with
/// [`CoreError::InvalidUrl`].
#[async_trait]
pub trait ValidationHook: Send + Sync {
    /// Validates `url`, failing with [`CoreError::InvalidUrl`] if it is rejected.
    async fn validate(&self, url: &str) -> CoreResult<()>;
}

/// Rejects null/blank input, oversized input, forbidden schemes, and protocol-relative
/// URLs. This is C9 step 1 ("validate-raw").
pub struct RawUrlValidator {
    config: UrlValidationConfig,
}

impl RawUrlValidator {
    /// Builds a validator from the shared URL validation config.
    pub fn new(config: UrlValidationConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ValidationHook for RawUrlValidator {
    async fn validate(&self, url: &str) -> CoreResult<()> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidUrl("url must not be blank".into()));
        }
        if trimmed.len() > self.config.max_length {
            return Err(CoreError::InvalidUrl(format!(
                "url exceeds max length of {}",
                self.config.max_length
            )));
        }
        if trimmed.starts_with("//") {
            return Err(CoreError::InvalidUrl(
                "protocol-relative urls are not accepted".into(),
            ));
        }
        let lower = trimmed.to_ascii_lowercase();
        for scheme in &self.config.forbidden_schemes {
            if lower.starts_with(&format!("{scheme}:")) {
                return Err(CoreError::InvalidUrl(format!(
                    "scheme '{scheme}' is not accepted"
                )));
            }
        }
        Ok(())
    }
}

/// Rejects hosts pointing at private, loopback, or link-local ranges. This is C9 step 3
/// ("validate-normalized") and C10's redirect-time hook.
///
/// Checks are literal (hostname/IP-literal matching); an embedder needing
/// DNS-resolution-based SSRF protection substitutes its own [`ValidationHook`], per
/// §4.13.
pub struct PrivateHostValidator;

#[async_trait]
impl ValidationHook for PrivateHostValidator {
    async fn validate(&self, url: &str) -> CoreResult<()> {
        let host = extract_host(url)
            .ok_or_else(|| CoreError::InvalidUrl("url has no extractable host".into()))?;

        if is_private_host(&host) {
            return Err(CoreError::InvalidUrl(format!(
                "host '{host}' resolves to a private or loopback address"
            )));
        }
        Ok(())
    }
}

fn extract_host(url: &str) -> Option<String> {
    let without_scheme = url.splitn(2, "://").nth(1)?;
    let authority = without_scheme.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit('@').next()?;
    let host = if host_port.starts_with('[') {
        host_port.split(']').next()?.trim_start_matches('[')
    } else {
        host_port.split(':').next()?
    };
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

fn is_private_host(host: &str) -> bool {
    if host == "localhost" {
        return true;
    }
    if let Ok(addr) = host.parse::<std::net::IpAddr>() {
        return match addr {
            std::net::IpAddr::V4(v4) => {
                v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
            }
            std::net::IpAddr::V6(v6) => {
                v6.is_loopback() || v6.is_unspecified() || is_unique_local_v6(&v6)
            }
        };
    }
    false
}

fn is_unique_local_v6(addr: &std::net::Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xfe00) == 0xfc00
}

/// Normalizes a raw URL per C9 step 2: prepends `https://` when no scheme is present,
/// requires `http`/`https` otherwise, and rejects empty hosts or path traversal-looking
/// segments.
pub fn normalize(raw: &str, config: &UrlValidationConfig) -> CoreResult<String> {
    let trimmed = raw.trim();

    let normalized = if !trimmed.contains("://") {
        format!("https://{trimmed}")
    } else if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        return Err(CoreError::InvalidUrl(
            "url must use the http or https scheme".into(),
        ));
    };

    let host = extract_host(&normalized)
        .ok_or_else(|| CoreError::InvalidUrl("url has no host".into()))?;
    if host.is_empty() {
        return Err(CoreError::InvalidUrl("url host must not be empty".into()));
    }

    let rest = normalized.splitn(2, "://").nth(1).unwrap_or("");
    let path_and_rest = rest.splitn(2, |c| c == '/').nth(1).unwrap_or("");
    if path_and_rest.contains("..") {
        return Err(CoreError::InvalidUrl(
            "url path must not contain '..'".into(),
        ));
    }
    // Checked against the whole host+path, not just `path_and_rest`: a `splitn(2, '/')`
    // only consumes the first slash, so an embedded `//` immediately after the host
    // (e.g. `example.com//evil.com/x`) would otherwise survive into `path_and_rest` as a
    // single leading slash and slip past this check.
    if rest.contains("//") {
        return Err(CoreError::InvalidUrl(
            "url must not contain '//' in the host or path".into(),
        ));
    }
    if normalized.len() > config.max_length {
        return Err(CoreError::InvalidUrl(format!(
            "normalized url exceeds max length of {}",
            config.max_length
        )));
    }

    Ok(normalized)
}
