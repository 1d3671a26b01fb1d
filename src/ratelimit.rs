//! Fixed-window rate limiting keyed by client IP and endpoint class.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

/// Endpoint classes with independent budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitClass {
    /// Search and RAG answer requests.
    Query,
    /// Indexing triggers.
    Indexing,
    /// Everything else.
    General,
}

impl LimitClass {
    /// Requests allowed per window.
    fn limit(self) -> u32 {
        match self {
            Self::Query => 100,
            Self::Indexing => 10,
            Self::General => 200,
        }
    }
}

struct Window {
    started_at: Instant,
    count: u32,
}

pub struct RateLimiter {
    window: Duration,
    windows: Mutex<HashMap<(String, LimitClass), Window>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_window(WINDOW)
    }

    fn with_window(window: Duration) -> Self {
        Self {
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or reject one request. On rejection returns the number of
    /// seconds until the window resets, always in `(0, 60]`.
    pub fn admit(&self, client_ip: &str, class: LimitClass) -> Result<(), u64> {
        let now = Instant::now();
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let window = windows
            .entry((client_ip.to_string(), class))
            .or_insert(Window {
                started_at: now,
                count: 0,
            });

        if now.duration_since(window.started_at) >= self.window {
            window.started_at = now;
            window.count = 0;
        }

        if window.count >= class.limit() {
            let elapsed = now.duration_since(window.started_at);
            let remaining = self.window.saturating_sub(elapsed).as_secs_f64().ceil() as u64;
            return Err(remaining.clamp(1, 60));
        }

        window.count += 1;
        Ok(())
    }
}
