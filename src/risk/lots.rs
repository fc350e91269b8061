//! Daily lot sizing.
//!
//! A strategy's lot table has one entry per situation:
//!
//! | index | applies on |
//! |---|---|
//! | 0 | weekly expiry day |
//! | 1..=5 | Monday .. Friday |
//! | 6..=9 | 4, 3, 2, 1 trading days before the weekly expiry |
//!
//! The resolved entry is scaled by the account multiplier and de-rated when
//! several index expiries fall on the same day.

use chrono::{Datelike, NaiveDate, Weekday};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::config::LOT_TABLE_LEN;
use crate::utils::TradingCalendar;

/// Indices whose weekly expiries are checked for coincidence.
pub const EXPIRY_INDICES: [&str; 3] = ["NIFTY", "BANKNIFTY", "FINNIFTY"];

const EXPIRY_DAY: usize = 0;
const FOUR_DAYS_BEFORE: usize = 6;

/// Resolves lots for a date from a lot table.
#[derive(Debug, Clone)]
pub struct LotSizer {
    table: Vec<u32>,
    multiplier: Decimal,
}

impl LotSizer {
    pub fn new(table: Vec<u32>, multiplier: Decimal) -> Self {
        Self { table, multiplier }
    }

    fn entry(&self, index: usize) -> u32 {
        self.table.get(index).copied().unwrap_or(0)
    }

    /// Raw table entry for `date` before scaling.
    pub fn base_lots(&self, calendar: &TradingCalendar, underlying: &str, date: NaiveDate) -> u32 {
        if self.table.len() != LOT_TABLE_LEN || matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return 0;
        }
        if calendar.is_weekly_expiry_day(underlying, date) {
            return self.entry(EXPIRY_DAY);
        }

        let days_before = calendar.trading_days_before_weekly_expiry(underlying, date);
        if (1..=4).contains(&days_before) {
            // 4 days before sits at index 6, 1 day before at index 9
            let lots = self.entry(FOUR_DAYS_BEFORE + 4 - days_before as usize);
            if lots > 0 {
                return lots;
            }
        }

        self.entry(date.weekday().number_from_monday() as usize)
    }

    /// Lots to trade on `date`: base × multiplier × de-rating, floored.
    pub fn lots_for(&self, calendar: &TradingCalendar, underlying: &str, date: NaiveDate) -> u32 {
        let base = self.base_lots(calendar, underlying, date);
        let factor = derating_factor(calendar, date);
        let lots = (Decimal::from(base) * self.multiplier * factor)
            .floor()
            .to_u32()
            .unwrap_or(0);

        debug!(underlying, %date, base, %factor, lots, "Resolved lots");
        lots
    }
}

/// 0.5 when two index weekly expiries coincide on `date`, 0.33 when all three do.
pub fn derating_factor(calendar: &TradingCalendar, date: NaiveDate) -> Decimal {
    let expiring = EXPIRY_INDICES
        .iter()
        .filter(|index| calendar.is_weekly_expiry_day(index, date))
        .count();

    match expiring {
        0 | 1 => Decimal::ONE,
        2 => dec!(0.5),
        _ => dec!(0.33),
    }
}
