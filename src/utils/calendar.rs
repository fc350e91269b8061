//! Exchange trading calendar.
//!
//! Answers the date/time questions the engine asks of the market:
//! - Holidays and market hours (exchange local time, UTC+05:30 by default)
//! - Weekly and monthly expiry dates per underlying
//! - Trading days left before a weekly expiry
//! - Option and futures trading symbols for a strike/expiry

use crate::config::{MarketConfig, UnderlyingConfig};
use crate::exchange::OptionType;
use anyhow::{Context, Result};
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Utc, Weekday,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct TradingCalendar {
    offset: FixedOffset,
    market_open: NaiveTime,
    market_close: NaiveTime,
    holidays: HashSet<NaiveDate>,
    underlyings: HashMap<String, UnderlyingConfig>,
}

impl TradingCalendar {
    pub fn new(config: &MarketConfig) -> Result<Self> {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60)
            .context("utc_offset_minutes out of range")?;

        Ok(Self {
            offset,
            market_open: config.open,
            market_close: config.close,
            holidays: config.holidays.iter().copied().collect(),
            underlyings: config.underlyings.clone(),
        })
    }

    /// Exchange-local wall time for an instant.
    pub fn local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.offset).naive_local()
    }

    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        self.local(instant).date()
    }

    /// Instant of an exchange-local date and time.
    pub fn at(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        match self.offset.from_local_datetime(&date.and_time(time)).single() {
            Some(local) => local.with_timezone(&Utc),
            None => Utc.from_utc_datetime(&date.and_time(time)),
        }
    }

    /// Instant of `time` on the exchange-local day containing `now`.
    pub fn today_at(&self, now: DateTime<Utc>, time: NaiveTime) -> DateTime<Utc> {
        self.at(self.local_date(now), time)
    }

    pub fn market_open_at(&self, date: NaiveDate) -> DateTime<Utc> {
        self.at(date, self.market_open)
    }

    pub fn market_close_at(&self, date: NaiveDate) -> DateTime<Utc> {
        self.at(date, self.market_close)
    }

    /// Weekends and configured exchange holidays.
    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        matches!(date.weekday(), Weekday::Sat | Weekday::Sun) || self.holidays.contains(&date)
    }

    pub fn is_market_open(&self, now: DateTime<Utc>) -> bool {
        let local = self.local(now);
        !self.is_holiday(local.date())
            && local.time() >= self.market_open
            && local.time() <= self.market_close
    }

    /// True after the close on a trading day, or all day on a holiday.
    ///
    /// Not true before the open on a trading day.
    pub fn is_market_closed_for_day(&self, now: DateTime<Utc>) -> bool {
        let local = self.local(now);
        self.is_holiday(local.date()) || local.time() > self.market_close
    }

    fn underlying(&self, underlying: &str) -> UnderlyingConfig {
        self.underlyings
            .get(underlying)
            .cloned()
            .unwrap_or_default()
    }

    /// Strike interval used when walking the option chain of an underlying.
    pub fn strike_step(&self, underlying: &str) -> u32 {
        self.underlying(underlying).strike_step
    }

    /// Cash index feed symbol of an underlying, e.g. `NIFTY BANK` for BANKNIFTY.
    pub fn index_symbol(&self, underlying: &str) -> String {
        let symbol = self.underlying(underlying).index_symbol;
        if symbol.is_empty() {
            underlying.to_string()
        } else {
            symbol
        }
    }

    /// Feed symbols of every configured index.
    pub fn index_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .underlyings
            .values()
            .map(|u| u.index_symbol.clone())
            .filter(|s| !s.is_empty())
            .collect();
        symbols.sort();
        symbols
    }

    /// Last `weekday` of the month containing `date`, moved earlier over holidays.
    pub fn monthly_expiry(&self, weekday: Weekday, date: NaiveDate) -> NaiveDate {
        let (year, month) = (date.year(), date.month());
        let first_of_next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        };
        let mut expiry = first_of_next
            .and_then(|d| d.pred_opt())
            .unwrap_or(date);

        while expiry.weekday() != weekday {
            expiry -= Duration::days(1);
        }
        self.walk_back_over_holidays(expiry)
    }

    fn walk_back_over_holidays(&self, mut date: NaiveDate) -> NaiveDate {
        // bounded: at most a couple of weeks of consecutive closures
        for _ in 0..14 {
            if !self.is_holiday(date) {
                break;
            }
            date -= Duration::days(1);
        }
        date
    }

    /// Weekly expiry of `underlying` for the week containing `date`.
    ///
    /// When the weekly expiry lands on the monthly expiry weekday's monthly date of
    /// the same week (BANKNIFTY: weekly Wednesday, monthly Thursday), the monthly
    /// expiry is used instead.
    pub fn weekly_expiry(&self, underlying: &str, date: NaiveDate) -> NaiveDate {
        let rule = self.underlying(underlying);

        let monthly = self.monthly_expiry(rule.monthly_expiry, date);
        if monthly == date {
            return date;
        }

        let mut from = date;
        let mut expiry = date;
        for _ in 0..4 {
            let days_ahead = (7 + rule.weekly_expiry.num_days_from_monday()
                - from.weekday().num_days_from_monday())
                % 7;
            let raw = from + Duration::days(i64::from(days_ahead));
            expiry = self.walk_back_over_holidays(raw);
            if expiry >= date {
                break;
            }
            from = raw + Duration::days(1);
        }

        if rule.weekly_expiry != rule.monthly_expiry
            && expiry == self.monthly_expiry(rule.weekly_expiry, expiry)
        {
            return self.monthly_expiry(rule.monthly_expiry, expiry);
        }
        expiry
    }

    pub fn is_weekly_expiry_day(&self, underlying: &str, date: NaiveDate) -> bool {
        self.weekly_expiry(underlying, date) == date
    }

    /// Trading days from `date` (inclusive) up to the weekly expiry (exclusive).
    pub fn trading_days_before_weekly_expiry(&self, underlying: &str, date: NaiveDate) -> u32 {
        let expiry = self.weekly_expiry(underlying, date);
        let mut count = 0;
        let mut day = date;
        while day < expiry {
            if !self.is_holiday(day) {
                count += 1;
            }
            day += Duration::days(1);
        }
        count
    }

    /// Weekly option symbol, e.g. `BANKNIFTY24O0944500CE`, or the monthly form
    /// `BANKNIFTY24OCT44500CE` when the weekly expiry is the monthly one.
    pub fn weekly_option_symbol(
        &self,
        underlying: &str,
        strike: u32,
        option_type: OptionType,
        date: NaiveDate,
    ) -> String {
        let rule = self.underlying(underlying);
        let expiry = self.weekly_expiry(underlying, date);
        let year = expiry.format("%y");

        if expiry == self.monthly_expiry(rule.monthly_expiry, expiry) {
            let month = expiry.format("%b").to_string().to_uppercase();
            return format!("{underlying}{year}{month}{strike}{option_type}");
        }

        let month = match expiry.month() {
            10 => "O".to_string(),
            11 => "N".to_string(),
            12 => "D".to_string(),
            m => m.to_string(),
        };
        format!(
            "{underlying}{year}{month}{:02}{strike}{option_type}",
            expiry.day()
        )
    }

    /// Current-month futures symbol, rolling to next month once this month's
    /// expiry has closed.
    pub fn futures_symbol(&self, underlying: &str, now: DateTime<Utc>) -> String {
        let rule = self.underlying(underlying);
        let today = self.local_date(now);
        let mut expiry = self.monthly_expiry(rule.monthly_expiry, today);
        if now > self.market_close_at(expiry) {
            expiry = self.monthly_expiry(rule.monthly_expiry, today + Duration::days(20));
        }
        let month = expiry.format("%b").to_string().to_uppercase();
        format!("{underlying}{}{month}FUT", expiry.format("%y"))
    }
}

/// Nearest multiple of `multiple` to `price`; halves round up.
pub fn nearest_strike(price: Decimal, multiple: u32) -> u32 {
    let price = price.trunc().to_u32().unwrap_or(0);
    let multiple = multiple.max(1);
    let remainder = price % multiple;
    if remainder < multiple / 2 {
        price - remainder
    } else {
        price + (multiple - remainder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn calendar() -> TradingCalendar {
        let mut config = MarketConfig::default();
        // Gandhi Jayanti
        config.holidays = vec![NaiveDate::from_ymd_opt(2024, 10, 2).unwrap()];
        TradingCalendar::new(&config).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_holidays_and_hours() {
        let cal = calendar();
        assert!(cal.is_holiday(date(2024, 10, 5))); // Saturday
        assert!(cal.is_holiday(date(2024, 10, 2)));
        assert!(!cal.is_holiday(date(2024, 10, 3)));

        let open = cal.at(date(2024, 10, 3), NaiveTime::from_hms_opt(9, 15, 0).unwrap());
        assert_eq!(open, Utc.with_ymd_and_hms(2024, 10, 3, 3, 45, 0).unwrap());
        assert!(cal.is_market_open(open));
        assert!(!cal.is_market_open(open - Duration::minutes(1)));
        assert!(!cal.is_market_closed_for_day(open - Duration::minutes(1)));
        assert!(cal.is_market_closed_for_day(cal.market_close_at(date(2024, 10, 3)) + Duration::seconds(1)));
    }

    #[test]
    fn test_monthly_expiry() {
        let cal = calendar();
        assert_eq!(cal.monthly_expiry(Weekday::Thu, date(2024, 10, 7)), date(2024, 10, 31));
        assert_eq!(cal.monthly_expiry(Weekday::Wed, date(2024, 10, 7)), date(2024, 10, 30));
    }

    #[test]
    fn test_weekly_expiry_moves_back_over_holiday() {
        let cal = calendar();
        // BANKNIFTY weekly Wednesday 2 Oct is a holiday -> Tuesday 1 Oct
        assert_eq!(cal.weekly_expiry("BANKNIFTY", date(2024, 9, 30)), date(2024, 10, 1));
        assert_eq!(cal.weekly_expiry("NIFTY", date(2024, 10, 7)), date(2024, 10, 10));
        assert!(cal.is_weekly_expiry_day("FINNIFTY", date(2024, 10, 8)));
    }

    #[test]
    fn test_weekly_expiry_switches_to_monthly() {
        let cal = calendar();
        // last Wednesday of October is also the monthly week -> Thursday monthly
        assert_eq!(cal.weekly_expiry("BANKNIFTY", date(2024, 10, 28)), date(2024, 10, 31));
    }

    #[test]
    fn test_trading_days_before_expiry() {
        let cal = calendar();
        assert_eq!(cal.trading_days_before_weekly_expiry("NIFTY", date(2024, 10, 7)), 3);
        assert_eq!(cal.trading_days_before_weekly_expiry("NIFTY", date(2024, 10, 10)), 0);
    }

    #[test]
    fn test_option_symbols() {
        let cal = calendar();
        assert_eq!(
            cal.weekly_option_symbol("NIFTY", 25000, OptionType::Call, date(2024, 10, 7)),
            "NIFTY24O1025000CE"
        );
        assert_eq!(
            cal.weekly_option_symbol("NIFTY", 24000, OptionType::Put, date(2024, 10, 28)),
            "NIFTY24OCT24000PE"
        );
        assert_eq!(
            cal.weekly_option_symbol("FINNIFTY", 23500, OptionType::Put, date(2024, 6, 3)),
            "FINNIFTY2460423500PE"
        );
    }

    #[test]
    fn test_futures_symbol_rolls_after_expiry() {
        let cal = calendar();
        let before = cal.at(date(2024, 10, 31), NaiveTime::from_hms_opt(10, 0, 0).unwrap());
        assert_eq!(cal.futures_symbol("NIFTY", before), "NIFTY24OCTFUT");
        let after = cal.at(date(2024, 10, 31), NaiveTime::from_hms_opt(16, 0, 0).unwrap());
        assert_eq!(cal.futures_symbol("NIFTY", after), "NIFTY24NOVFUT");
    }

    #[test]
    fn test_nearest_strike() {
        assert_eq!(nearest_strike(dec!(44521.3), 100), 44500);
        assert_eq!(nearest_strike(dec!(44550), 100), 44600);
        assert_eq!(nearest_strike(dec!(24987), 50), 25000);
    }
}
