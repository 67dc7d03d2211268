//! Cache key construction and glob matching

use crate::error::{ResilienceError, Result};
use regex::Regex;
use serde::Serialize;

/// Build a cache key from a prefix and serializable arguments
///
/// Arguments are serialized through `serde_json::Value`, whose maps are sorted, so equal
/// arguments always produce the same key regardless of map iteration order.
pub fn create_cache_key<A>(prefix: &str, args: &A) -> Result<String>
where
    A: Serialize + ?Sized,
{
    let value = serde_json::to_value(args)?;
    Ok(format!("{}:{}", prefix, value))
}

/// Compiled glob pattern
///
/// `*` matches any run of characters (including none) and `?` exactly one. Every other
/// character, regex metacharacters included, matches itself.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let mut source = String::with_capacity(pattern.len() + 8);
        source.push('^');
        let mut literal = String::new();
        for ch in pattern.chars() {
            match ch {
                '*' | '?' => {
                    source.push_str(&regex::escape(&literal));
                    literal.clear();
                    source.push_str(if ch == '*' { ".*" } else { "." });
                }
                _ => literal.push(ch),
            }
        }
        source.push_str(&regex::escape(&literal));
        source.push('$');

        let regex = Regex::new(&source).map_err(|e| {
            ResilienceError::validation(format!("invalid glob pattern '{}': {}", pattern, e))
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}
