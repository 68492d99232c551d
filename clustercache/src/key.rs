//! Physical key construction and reversal
//!
//! A physical key is `<prefix>:<version>:<logical key>`. The prefix may be
//! empty, in which case keys look like `:1:user:42`.

use crate::error::{CacheError, Result};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Key layout strategy
///
/// `reverse_key(make_key(prefix, version, key))` must return `key` for any
/// prefix that does not contain the layout's delimiter.
pub trait KeyFunction: Send + Sync + fmt::Debug {
    fn make_key(&self, prefix: &str, version: u64, key: &str) -> String;

    fn reverse_key(&self, physical: &str) -> String;
}

/// `prefix:version:key`
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultKeyFunction;

impl KeyFunction for DefaultKeyFunction {
    fn make_key(&self, prefix: &str, version: u64, key: &str) -> String {
        format!("{prefix}:{version}:{key}")
    }

    fn reverse_key(&self, physical: &str) -> String {
        // The logical key may itself contain ':'
        match physical.splitn(3, ':').nth(2) {
            Some(key) => key.to_string(),
            None => physical.to_string(),
        }
    }
}

/// A fully qualified key, as sent to the store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    physical: String,
    original: String,
    version: u64,
}

impl CacheKey {
    /// The physical key string
    pub fn as_str(&self) -> &str {
        &self.physical
    }

    /// The logical key this was built from
    pub fn original_key(&self) -> &str {
        &self.original
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn into_string(self) -> String {
        self.physical
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.physical)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.physical
    }
}

/// A key as passed to client operations: logical, or already built
#[derive(Debug, Clone, Copy)]
pub enum KeyRef<'a> {
    Logical(&'a str),
    Built(&'a CacheKey),
}

impl<'a> From<&'a str> for KeyRef<'a> {
    fn from(key: &'a str) -> Self {
        Self::Logical(key)
    }
}

impl<'a> From<&'a String> for KeyRef<'a> {
    fn from(key: &'a String) -> Self {
        Self::Logical(key.as_str())
    }
}

impl<'a> From<&'a CacheKey> for KeyRef<'a> {
    fn from(key: &'a CacheKey) -> Self {
        Self::Built(key)
    }
}

impl KeyRef<'_> {
    /// The logical key, whichever form this is
    pub fn logical(&self) -> &str {
        match self {
            Self::Logical(key) => key,
            Self::Built(key) => key.original_key(),
        }
    }
}

/// Shared default version
///
/// Cloned handles observe the same value. Bumping it moves every key built
/// without an explicit version to a fresh key space.
#[derive(Debug, Clone)]
pub struct DefaultVersion(Arc<AtomicU64>);

impl DefaultVersion {
    pub fn new(version: u64) -> Self {
        Self(Arc::new(AtomicU64::new(version)))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Versions start at 1; zero is rejected
    pub fn set(&self, version: u64) -> Result<()> {
        if version == 0 {
            return Err(CacheError::ImproperlyConfigured(
                "default version must be at least 1".to_string(),
            ));
        }
        self.0.store(version, Ordering::Release);
        Ok(())
    }

    /// Increment by one and return the new version
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for DefaultVersion {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Builds physical keys from logical keys and reverses them
#[derive(Debug, Clone)]
pub struct KeyCodec {
    prefix: String,
    default_version: DefaultVersion,
    function: Arc<dyn KeyFunction>,
}

impl KeyCodec {
    pub fn new(
        prefix: impl Into<String>,
        default_version: DefaultVersion,
        function: Arc<dyn KeyFunction>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            default_version,
            function,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn default_version(&self) -> &DefaultVersion {
        &self.default_version
    }

    /// Explicit version, or the default version as of now
    pub fn resolve_version(&self, version: Option<u64>) -> u64 {
        version.unwrap_or_else(|| self.default_version.get())
    }

    /// Build the physical key; already-built keys pass through untouched
    pub fn build<'a>(&self, key: impl Into<KeyRef<'a>>, version: Option<u64>) -> CacheKey {
        match key.into() {
            KeyRef::Built(key) => key.clone(),
            KeyRef::Logical(key) => self.build_at(key, self.resolve_version(version)),
        }
    }

    /// Build the physical key for a logical key at an exact version
    pub fn build_at(&self, key: &str, version: u64) -> CacheKey {
        CacheKey {
            physical: self.function.make_key(&self.prefix, version, key),
            original: key.to_string(),
            version,
        }
    }

    /// Scope a glob pattern to the prefix and version
    ///
    /// Glob metacharacters in the prefix are escaped so they match only
    /// themselves; the caller's pattern is used as is.
    pub fn pattern(&self, pattern: &str, version: Option<u64>) -> String {
        self.function.make_key(
            &escape_glob(&self.prefix),
            self.resolve_version(version),
            pattern,
        )
    }

    /// Recover the logical key from a physical key
    pub fn reverse(&self, physical: &str) -> String {
        self.function.reverse_key(physical)
    }
}

fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::glob_match;

    fn codec(prefix: &str) -> KeyCodec {
        KeyCodec::new(prefix, DefaultVersion::new(1), Arc::new(DefaultKeyFunction))
    }

    #[test]
    fn test_build_layout() {
        let keys = codec("app");
        assert_eq!(keys.build("user:1", None).as_str(), "app:1:user:1");
        assert_eq!(keys.build("user:1", Some(7)).as_str(), "app:7:user:1");
    }

    #[test]
    fn test_empty_prefix() {
        let keys = codec("");
        let key = keys.build("session", None);
        assert_eq!(key.as_str(), ":1:session");
        assert_eq!(keys.reverse(key.as_str()), "session");
    }

    #[test]
    fn test_built_key_passthrough() {
        let keys = codec("app");
        let built = keys.build("user:1", Some(3));
        let again = keys.build(&built, Some(9));

        assert_eq!(again, built);
        assert_eq!(again.as_str(), "app:3:user:1");
    }

    #[test]
    fn test_reverse_keeps_colons_in_logical_key() {
        let keys = codec("app");
        let key = keys.build("a:b:c", Some(2));
        assert_eq!(keys.reverse(key.as_str()), "a:b:c");
    }

    #[test]
    fn test_reverse_of_foreign_key() {
        let keys = codec("app");
        assert_eq!(keys.reverse("plainkey"), "plainkey");
    }

    #[test]
    fn test_default_version_resolved_at_call_time() {
        let keys = codec("app");
        assert_eq!(keys.build("k", None).version(), 1);

        keys.default_version().set(5).unwrap();
        assert_eq!(keys.build("k", None).as_str(), "app:5:k");

        assert_eq!(keys.default_version().bump(), 6);
        assert_eq!(keys.build("k", None).version(), 6);
    }

    #[test]
    fn test_pattern_scoping() {
        let keys = codec("app");
        assert_eq!(keys.pattern("user:*", None), "app:1:user:*");
        assert_eq!(keys.pattern("*", Some(4)), "app:4:*");
    }

    #[test]
    fn test_default_version_rejects_zero() {
        let keys = codec("app");
        keys.default_version().set(3).unwrap();

        let err = keys.default_version().set(0).unwrap_err();
        assert!(matches!(err, CacheError::ImproperlyConfigured(_)));
        assert_eq!(keys.default_version().get(), 3);
    }

    #[test]
    fn test_pattern_escapes_prefix() {
        let keys = codec("a*[x]?\\");
        assert_eq!(keys.pattern("user:*", None), "a\\*\\[x\\]\\?\\\\:1:user:*");

        // the prefix only matches itself
        let own = keys.build("user:1", None);
        let pattern = keys.pattern("user:*", None);
        assert!(glob_match(pattern.as_bytes(), own.as_str().as_bytes()));
        assert!(!glob_match(pattern.as_bytes(), b"abc:1:user:1"));
        assert!(!glob_match(pattern.as_bytes(), b"ax]?\\:1:user:1"));
    }

    #[test]
    fn test_cache_key_accessors() {
        let keys = codec("app");
        let key = keys.build_at("profile", 12);

        assert_eq!(key.original_key(), "profile");
        assert_eq!(key.version(), 12);
        assert_eq!(key.to_string(), "app:12:profile");
        assert_eq!(KeyRef::from(&key).logical(), "profile");
    }
}
