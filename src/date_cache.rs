//! C2 — per-worker RFC 1123 date string, recomputed at most once a second.
//!
//! Grounded on `crow::Server::run`'s `get_cached_date_str_pool_` closure in
//! `examples/original_source/crow/include/crow/http_server.h`: each worker
//! keeps its own `(Instant, String)` pair and only reformats `SystemTime::now()`
//! once a wall-clock second has passed since the last format.

use std::time::Instant;

/// Not `Send`/`Sync` on purpose — one lives on each worker and is never
/// shared across threads, exactly like the worker-local timer queue.
pub struct DateCache {
    last_refresh: Instant,
    cached: String,
}

impl DateCache {
    pub fn new() -> Self {
        Self {
            last_refresh: Instant::now() - std::time::Duration::from_secs(2),
            cached: String::new(),
        }
    }

    /// Returns the cached HTTP-date, refreshing it first if more than a
    /// second has elapsed since the last refresh.
    pub fn get(&mut self) -> &str {
        if self.last_refresh.elapsed().as_secs() >= 1 || self.cached.is_empty() {
            self.cached = chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
            self.last_refresh = Instant::now();
        }
        &self.cached
    }
}

impl Default for DateCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_as_rfc1123() {
        let mut cache = DateCache::new();
        let date = cache.get();
        assert_eq!(date.len(), "Sun, 06 Nov 1994 08:49:37 GMT".len());
        assert!(date.ends_with("GMT"));
    }

    #[test]
    fn caches_within_a_second() {
        let mut cache = DateCache::new();
        let first = cache.get().to_string();
        let second = cache.get().to_string();
        assert_eq!(first, second);
    }
}
