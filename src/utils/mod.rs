//! Shared utilities: decimal pricing helpers, trading calendar and clock.

pub mod calendar;
pub mod clock;
pub mod decimal;

pub use calendar::{nearest_strike, TradingCalendar};
pub use clock::{next_aligned_delay, Clock, ManualClock, SystemClock};
