//! Rule translation between user-entered URLs and canonical patterns
//!
//! A canonical pattern is a regex the host engine evaluates against
//! top-level navigations:
//!
//! ```text
//! ^https?://([^/?#]*\.)?<escaped host/path>([/?#:].*)?$    domain scope
//! ^https?://<escaped host/path>/?$                         exact
//! ```
//!
//! Domain scope covers the host, its subdomains and everything beneath
//! them. The host is anchored on both sides so `example.com` does not
//! catch `example.com.evil.net` or `notexample.com`.
//!
//! [`strip_pattern`] undoes [`url_to_pattern`] so the pages can show the
//! address the user typed.

use crate::config::Settings;
use crate::error::InvalidUrl;

pub const PATTERN_PREFIX: &str = "^https?://";
pub const DOMAIN_PREFIX: &str = "^https?://([^/?#]*\\.)?";
pub const DOMAIN_SUFFIX: &str = "([/?#:].*)?$";
pub const EXACT_SUFFIX: &str = "/?$";

// Suffixes written by earlier releases, still recognised when stripping.
const LEGACY_SUFFIXES: &[&str] = &["/?.*", ".*", "$"];

// =============================================================================
// Validation
// =============================================================================

/// Reject input the translator must never turn into a rule.
pub fn validate_url(url: &str, settings: &Settings) -> Result<(), InvalidUrl> {
    let url = url.trim();
    if url.is_empty() {
        return Err(InvalidUrl::Empty);
    }

    let lower = url.to_ascii_lowercase();
    if let Some(prefix) = settings
        .forbidden_prefixes
        .iter()
        .find(|prefix| lower.starts_with(prefix.to_ascii_lowercase().as_str()))
    {
        return Err(InvalidUrl::Forbidden(prefix.clone()));
    }

    let len = url.chars().count();
    if len < settings.min_url_length {
        return Err(InvalidUrl::TooShort { min: settings.min_url_length });
    }
    if len > settings.max_url_length {
        return Err(InvalidUrl::TooLong { max: settings.max_url_length });
    }

    Ok(())
}

// =============================================================================
// Scheme Handling
// =============================================================================

/// Split `scheme://rest`. Returns None when the input has no scheme.
#[inline]
fn split_scheme(url: &str) -> Option<(&str, &str)> {
    let sep = url.find("://")?;
    let scheme = &url[..sep];
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic()
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
    {
        return None;
    }
    Some((scheme, &url[sep + 3..]))
}

/// Normalise a user-entered URL to the `host/path` form stored in patterns.
///
/// Strips an `http`/`https` scheme, lowercases the host and drops trailing
/// slashes. Other schemes are rejected.
pub fn normalize_url(url: &str) -> Result<String, InvalidUrl> {
    let url = url.trim();
    let rest = match split_scheme(url) {
        Some((scheme, rest)) => {
            if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
                return Err(InvalidUrl::UnsupportedScheme(scheme.to_ascii_lowercase()));
            }
            rest
        }
        None => url,
    };

    let host_end = rest
        .find(|c| c == '/' || c == '?' || c == '#')
        .unwrap_or(rest.len());
    let mut normalized = rest[..host_end].to_ascii_lowercase();
    normalized.push_str(&rest[host_end..]);

    let normalized = normalized.trim_end_matches('/');
    if normalized.is_empty() {
        return Err(InvalidUrl::Empty);
    }

    Ok(normalized.to_string())
}

// =============================================================================
// Translation
// =============================================================================

/// Translate a user-entered URL into its canonical pattern.
pub fn url_to_pattern(url: &str, block_domain: bool, settings: &Settings) -> Result<String, InvalidUrl> {
    validate_url(url, settings)?;
    let normalized = normalize_url(url)?;
    Ok(pattern_for_host(&normalized, block_domain))
}

/// Build the pattern for an already-normalised `host/path`.
pub fn pattern_for_host(host: &str, block_domain: bool) -> String {
    if block_domain {
        format!("{}{}{}", DOMAIN_PREFIX, regex::escape(host), DOMAIN_SUFFIX)
    } else {
        format!("{}{}{}", PATTERN_PREFIX, regex::escape(host), EXACT_SUFFIX)
    }
}

/// Recover the `host/path` a pattern was built from.
pub fn strip_pattern(pattern: &str) -> String {
    let body = pattern
        .strip_prefix(DOMAIN_PREFIX)
        .or_else(|| pattern.strip_prefix(PATTERN_PREFIX))
        .unwrap_or(pattern);
    let body = [DOMAIN_SUFFIX, EXACT_SUFFIX]
        .iter()
        .chain(LEGACY_SUFFIXES)
        .find_map(|suffix| body.strip_suffix(suffix))
        .unwrap_or(body);
    unescape(body)
}

/// Domain-scope patterns carry the subdomain prefix, or end in a wildcard
/// when written by an earlier release.
#[inline]
pub fn is_domain_pattern(pattern: &str) -> bool {
    pattern.starts_with(DOMAIN_PREFIX) || (pattern.ends_with(".*") && !pattern.ends_with("\\.*"))
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Cut a URL to at most `max_chars` characters.
pub fn truncate_url(url: &str, max_chars: usize) -> &str {
    match url.char_indices().nth(max_chars) {
        Some((idx, _)) => &url[..idx],
        None => url,
    }
}
