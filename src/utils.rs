//! Shared utilities for the cache library.

use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;

use crate::error::CacheError;

/// Get the current time in milliseconds since UNIX epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// Simple pseudo-random number generator (0.0 to 1.0).
/// This avoids adding a dependency on rand crate.
pub fn rand_simple() -> f64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let state = RandomState::new();
    let mut hasher = state.build_hasher();
    hasher.write_u64(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64,
    );
    (hasher.finish() as f64) / (u64::MAX as f64)
}

/// Translate a glob-style cache pattern into an anchored regex.
///
/// Only `*` is a wildcard (matching any run of characters, `.*`); every
/// other character matches literally. A pattern without `*` matches one
/// exact key.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, CacheError> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            c if "\\.+?()[]{}|^$".contains(c) => {
                re.push('\\');
                re.push(c);
            }
            c => re.push(c),
        }
    }
    re.push('$');
    Regex::new(&re)
        .map_err(|e| CacheError::Config(format!("invalid cache pattern '{}': {}", pattern, e)))
}
