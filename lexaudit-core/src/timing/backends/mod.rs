//! Clock backend implementations
//!
//! - `SystemClock`: reads the host clock
//! - `MockClock`: for testing, set and advanced explicitly

mod mock;
mod system;

pub use mock::MockClock;
pub use system::SystemClock;
