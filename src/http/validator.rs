//! Validator tokens (`ETag`) and `If-None-Match` matching.

use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};

/// How a view's validator token is derived.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorScheme {
    /// Hash of the serialized body: identical data, identical token.
    #[default]
    ContentHash,
    /// Hash of the key, the TTL bucket of the current time and the build tag.
    TimeBucket,
}

impl std::str::FromStr for ValidatorScheme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "content_hash" => Ok(Self::ContentHash),
            "time_bucket" => Ok(Self::TimeBucket),
            other => Err(format!(
                "unknown validator `{other}` (expected content_hash or time_bucket)"
            )),
        }
    }
}

pub fn content_etag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("\"{}\"", hex::encode(digest))
}

/// Token for `key` that only changes when `floor(now / ttl)` does or when the
/// build tag changes.
pub fn time_bucket_etag(key: &str, ttl: Duration, unix_secs: u64, build_tag: &str) -> String {
    let bucket = unix_secs / ttl.as_secs().max(1);
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(b"\0");
    hasher.update(bucket.to_be_bytes());
    hasher.update(b"\0");
    hasher.update(build_tag.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("\"{}\"", &digest[..32])
}

/// Whether an `If-None-Match` header value matches `etag`.
///
/// Comparison is weak: `W/` prefixes are ignored on both sides.
pub fn if_none_match(header: &str, etag: &str) -> bool {
    let wanted = strip_weak(etag.trim());
    header
        .split(',')
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .any(|candidate| candidate == "*" || strip_weak(candidate) == wanted)
}

fn strip_weak(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_etag_is_stable_and_quoted() {
        let first = content_etag(br#"{"total":3}"#);
        assert_eq!(first, content_etag(br#"{"total":3}"#));
        assert_ne!(first, content_etag(br#"{"total":4}"#));
        assert!(first.starts_with('"') && first.ends_with('"'));
        assert_eq!(first.len(), 66);
    }

    #[test]
    fn time_bucket_changes_only_across_buckets() {
        let ttl = Duration::from_secs(300);
        let a = time_bucket_etag("summary", ttl, 600, "1.0.0");
        assert_eq!(a, time_bucket_etag("summary", ttl, 899, "1.0.0"));
        assert_ne!(a, time_bucket_etag("summary", ttl, 900, "1.0.0"));
        assert_ne!(a, time_bucket_etag("summary", ttl, 600, "1.0.1"));
        assert_ne!(a, time_bucket_etag("history", ttl, 600, "1.0.0"));
    }

    #[test]
    fn if_none_match_handles_lists_wildcards_and_weak_tags() {
        let etag = "\"abc\"";
        assert!(if_none_match("\"abc\"", etag));
        assert!(if_none_match("\"zzz\", W/\"abc\"", etag));
        assert!(if_none_match("*", etag));
        assert!(!if_none_match("\"abd\"", etag));
        assert!(!if_none_match("", etag));
    }

    #[test]
    fn scheme_parses_from_config_strings() {
        assert_eq!("time_bucket".parse::<ValidatorScheme>(), Ok(ValidatorScheme::TimeBucket));
        assert_eq!("content_hash".parse::<ValidatorScheme>(), Ok(ValidatorScheme::ContentHash));
        assert!("md5".parse::<ValidatorScheme>().is_err());
    }
}
