//! Time sources
//!
//! Every timestamp the core stamps (decision times, execution start and
//! completion, manifest signing, replay verification time) is read from a
//! [`Clock`]. Production code uses [`SystemClock`]; tests inject a
//! [`MockClock`] so traces are reproducible.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │        Clock (trait)         │
//! ├──────────────┬───────────────┤
//! │ SystemClock  │ MockClock     │
//! │ (Utc::now)   │ (testing)     │
//! └──────────────┴───────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::{Duration, TimeZone, Utc};
//! use lexaudit_core::timing::{Clock, MockClock};
//!
//! let clock = Arc::new(MockClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()));
//! let t0 = clock.now();
//! clock.advance(Duration::seconds(1));
//! assert_eq!(clock.now() - t0, Duration::seconds(1));
//! ```

pub mod backends;

use chrono::{DateTime, Utc};

pub use backends::{MockClock, SystemClock};

/// Source of wall-clock time
///
/// Implementations must be cheap to call and safe to share across threads.
pub trait Clock: Send + Sync {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;

    /// Backend name (for logging/debugging)
    fn name(&self) -> &'static str {
        "clock"
    }
}

impl std::fmt::Debug for dyn Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock").field("backend", &self.name()).finish()
    }
}
