//! Bucket key handling.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// A key that identifies one logical client, e.g. an application id.
///
/// The key is opaque: no format validation is applied, equal strings share
/// state and distinct strings never do. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey(Arc<str>);

impl BucketKey {
    /// Create a new bucket key.
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BucketKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for BucketKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

impl Borrow<str> for BucketKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_bucket_key_equality() {
        let key1 = BucketKey::new("app-1");
        let key2 = BucketKey::from("app-1".to_string());

        assert_eq!(key1, key2);
        assert_ne!(key1, BucketKey::new("app-2"));
    }

    #[test]
    fn test_bucket_key_no_normalization() {
        // Keys are opaque; case and whitespace are significant
        assert_ne!(BucketKey::new("App"), BucketKey::new("app"));
        assert_ne!(BucketKey::new("app "), BucketKey::new("app"));
    }

    #[test]
    fn test_bucket_key_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(BucketKey::new("app-1"), 1);

        assert_eq!(map.get("app-1"), Some(&1));
        assert_eq!(BucketKey::new("app-1").to_string(), "app-1");
    }
}
