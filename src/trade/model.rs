//! Trade value type and its lifecycle state machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::exchange::{Direction, OptionType, Order, ProductType};
use crate::utils::decimal::{round_off, safe_div};

/// Lifecycle state. Moves strictly forward; terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeState {
    Created,
    Active,
    Completed,
    Cancelled,
    Disabled,
}

impl TradeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TradeState::Completed | TradeState::Cancelled | TradeState::Disabled
        )
    }
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeState::Created => "CREATED",
            TradeState::Active => "ACTIVE",
            TradeState::Completed => "COMPLETED",
            TradeState::Cancelled => "CANCELLED",
            TradeState::Disabled => "DISABLED",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    SlHit,
    TrailSlHit,
    TargetHit,
    SquareOff,
    SlCancelled,
    TargetCancelled,
    StrategySlHit,
    StrategyTrailSlHit,
}

impl ExitReason {
    /// Leg-level exits after which a strategy may keep trading the day.
    pub fn is_routine(self) -> bool {
        matches!(
            self,
            ExitReason::SlHit | ExitReason::TargetHit | ExitReason::TrailSlHit
        )
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::SlHit => "SL_HIT",
            ExitReason::TrailSlHit => "TRAIL_SL_HIT",
            ExitReason::TargetHit => "TARGET_HIT",
            ExitReason::SquareOff => "SQUARE_OFF",
            ExitReason::SlCancelled => "SL_CANCELLED",
            ExitReason::TargetCancelled => "TARGET_CANCELLED",
            ExitReason::StrategySlHit => "STRATEGY_SL_HIT",
            ExitReason::StrategyTrailSlHit => "STRATEGY_TRAIL_SL_HIT",
        };
        write!(f, "{s}")
    }
}

/// Why a trade was disabled before it could trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisableReason {
    InvalidQuantity,
    NoNewTradesCutOffTimeReached,
    MaxTradesPerDayReached,
    PlacementFailed,
    /// Strategy-specific veto
    Veto(String),
}

impl fmt::Display for DisableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisableReason::InvalidQuantity => write!(f, "InvalidQuantity"),
            DisableReason::NoNewTradesCutOffTimeReached => write!(f, "NoNewTradesCutOffTimeReached"),
            DisableReason::MaxTradesPerDayReached => write!(f, "MaxTradesPerDayReached"),
            DisableReason::PlacementFailed => write!(f, "PlacementFailed"),
            DisableReason::Veto(reason) => write!(f, "{reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentKind {
    Option(OptionType),
    Future,
    Equity,
}

impl InstrumentKind {
    pub fn is_derivative(self) -> bool {
        !matches!(self, InstrumentKind::Equity)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TradeError {
    #[error("trade {trade_id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        trade_id: String,
        from: TradeState,
        to: TradeState,
    },

    #[error("trade {trade_id}: filled qty {filled} exceeds qty {qty}")]
    Overfill {
        trade_id: String,
        filled: u32,
        qty: u32,
    },
}

/// A position taken by a strategy together with its entry, stop-loss and target legs.
///
/// Lifecycle fields are private: state only changes through [`Trade::transition`]
/// and its wrappers, quantities through [`Trade::record_entry_fills`], and the stop
/// through [`Trade::set_initial_stop_loss`] / [`Trade::tighten_stop_loss`].
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub trade_id: String,
    pub symbol: String,
    pub exchange: String,
    pub strategy: String,
    pub direction: Direction,
    pub product_type: ProductType,
    pub instrument: InstrumentKind,
    pub underlying: Option<String>,
    /// Enter with a LIMIT order instead of a stop-limit
    pub place_market_order: bool,
    pub square_off_at: Option<DateTime<Utc>>,
    pub requested_entry: Decimal,
    /// Weighted average entry fill
    pub entry: Decimal,
    qty: u32,
    filled_qty: u32,
    initial_stop_loss: Decimal,
    stop_loss: Decimal,
    pub stop_loss_pct: Decimal,
    pub target: Decimal,
    /// Last traded price
    pub cmp: Decimal,
    state: TradeState,
    /// Strategy start time; part of the duplicate key
    pub strategy_timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    pub exit: Decimal,
    exit_reason: Option<ExitReason>,
    /// Pending square-off; re-driven every cycle until the trade completes
    pub exit_requested: Option<ExitReason>,
    pub disable_reason: Option<DisableReason>,
    pub entry_orders: Vec<Order>,
    pub sl_orders: Vec<Order>,
    pub target_orders: Vec<Order>,
}

impl Trade {
    pub fn new(
        strategy: &str,
        symbol: impl Into<String>,
        direction: Direction,
        qty: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            trade_id: format!("{strategy}:{}", Uuid::new_v4()),
            symbol: symbol.into(),
            exchange: "NFO".to_string(),
            strategy: strategy.to_string(),
            direction,
            product_type: ProductType::Mis,
            instrument: InstrumentKind::Future,
            underlying: None,
            place_market_order: false,
            square_off_at: None,
            requested_entry: Decimal::ZERO,
            entry: Decimal::ZERO,
            qty,
            filled_qty: 0,
            initial_stop_loss: Decimal::ZERO,
            stop_loss: Decimal::ZERO,
            stop_loss_pct: Decimal::ZERO,
            target: Decimal::ZERO,
            cmp: Decimal::ZERO,
            state: TradeState::Created,
            strategy_timestamp: None,
            created_at: now,
            started_at: None,
            ended_at: None,
            pnl: Decimal::ZERO,
            pnl_pct: Decimal::ZERO,
            exit: Decimal::ZERO,
            exit_reason: None,
            exit_requested: None,
            disable_reason: None,
            entry_orders: Vec::new(),
            sl_orders: Vec::new(),
            target_orders: Vec::new(),
        }
    }

    pub fn qty(&self) -> u32 {
        self.qty
    }

    pub fn filled_qty(&self) -> u32 {
        self.filled_qty
    }

    pub fn state(&self) -> TradeState {
        self.state
    }

    pub fn stop_loss(&self) -> Decimal {
        self.stop_loss
    }

    pub fn initial_stop_loss(&self) -> Decimal {
        self.initial_stop_loss
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.exit_reason
    }

    pub fn is_active(&self) -> bool {
        self.state == TradeState::Active
    }

    /// Whether the stop has moved off its initial value.
    pub fn is_trailed(&self) -> bool {
        self.stop_loss != self.initial_stop_loss
    }

    /// Move to `to`, enforcing the lifecycle rules.
    pub fn transition(&mut self, to: TradeState, now: DateTime<Utc>) -> Result<(), TradeError> {
        use TradeState::*;

        let allowed = match (self.state, to) {
            (Created, Active | Disabled | Cancelled) => true,
            (Active, Disabled | Cancelled) => self.filled_qty == 0,
            (Active, Completed) => self.filled_qty > 0,
            _ => false,
        };
        if !allowed {
            return Err(TradeError::InvalidTransition {
                trade_id: self.trade_id.clone(),
                from: self.state,
                to,
            });
        }

        self.state = to;
        match to {
            Active => self.started_at = Some(now),
            _ => self.ended_at = Some(now),
        }
        Ok(())
    }

    pub fn disable(&mut self, reason: DisableReason, now: DateTime<Utc>) -> Result<(), TradeError> {
        self.transition(TradeState::Disabled, now)?;
        self.disable_reason = Some(reason);
        Ok(())
    }

    /// Finish an active trade at `exit`. A pending exit request wins over `reason`.
    pub fn complete(
        &mut self,
        exit: Decimal,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<(), TradeError> {
        self.transition(TradeState::Completed, now)?;
        self.exit = exit;
        self.exit_reason = Some(self.exit_requested.unwrap_or(reason));
        self.update_pnl();
        Ok(())
    }

    /// Record aggregate entry fills recomputed from the entry leg.
    pub fn record_entry_fills(&mut self, filled: u32, entry: Decimal) -> Result<(), TradeError> {
        if filled > self.qty {
            return Err(TradeError::Overfill {
                trade_id: self.trade_id.clone(),
                filled,
                qty: self.qty,
            });
        }
        self.filled_qty = filled;
        self.entry = entry;
        Ok(())
    }

    /// Seed the first non-zero stop. Ignored once a stop exists.
    pub fn set_initial_stop_loss(&mut self, stop_loss: Decimal) -> bool {
        if self.stop_loss != Decimal::ZERO || stop_loss <= Decimal::ZERO {
            return false;
        }
        self.stop_loss = stop_loss;
        self.initial_stop_loss = stop_loss;
        true
    }

    /// Whether `candidate` would move the stop in the trade's favour.
    pub fn tightens(&self, candidate: Decimal) -> bool {
        if candidate <= Decimal::ZERO || self.stop_loss == Decimal::ZERO {
            return false;
        }
        match self.direction {
            Direction::Long => candidate > self.stop_loss,
            Direction::Short => candidate < self.stop_loss,
        }
    }

    /// Move the stop to `candidate` if it tightens; returns whether it moved.
    pub fn tighten_stop_loss(&mut self, candidate: Decimal) -> bool {
        if !self.tightens(candidate) {
            return false;
        }
        self.stop_loss = candidate;
        true
    }

    /// Recompute pnl from `cmp` (active) or `exit` (finished).
    pub fn update_pnl(&mut self) {
        let price = match self.state {
            TradeState::Active if self.cmp > Decimal::ZERO => self.cmp,
            TradeState::Completed if self.exit > Decimal::ZERO => self.exit,
            _ => return,
        };

        let filled = Decimal::from(self.filled_qty);
        let per_unit = match self.direction {
            Direction::Long => price - self.entry,
            Direction::Short => self.entry - price,
        };
        self.pnl = round_off(filled * per_unit);
        self.pnl_pct = round_off(safe_div(self.pnl * Decimal::ONE_HUNDRED, self.entry * filled));
    }

    /// Natural-key equality used to drop duplicate hand-offs.
    pub fn is_duplicate_of(&self, other: &Trade) -> bool {
        if self.trade_id == other.trade_id {
            return true;
        }
        self.symbol == other.symbol
            && self.strategy == other.strategy
            && self.direction == other.direction
            && self.product_type == other.product_type
            && self.requested_entry == other.requested_entry
            && self.qty == other.qty
            && self.strategy_timestamp == other.strategy_timestamp
            && self.stop_loss_pct == other.stop_loss_pct
            && self.stop_loss == other.stop_loss
            && self.target == other.target
    }

    pub fn order_ids(&self) -> impl Iterator<Item = &str> {
        self.entry_orders
            .iter()
            .chain(&self.sl_orders)
            .chain(&self.target_orders)
            .map(|o| o.order_id.as_str())
    }

    pub fn has_live_entry_orders(&self) -> bool {
        self.entry_orders.iter().any(|o| o.status.is_live())
    }

    /// Rebuild from persisted parts; invariants are checked by the caller.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore_lifecycle(
        &mut self,
        qty: u32,
        filled_qty: u32,
        state: TradeState,
        stop_loss: Decimal,
        initial_stop_loss: Decimal,
        exit_reason: Option<ExitReason>,
    ) {
        self.qty = qty;
        self.filled_qty = filled_qty;
        self.state = state;
        self.stop_loss = stop_loss;
        self.initial_stop_loss = initial_stop_loss;
        self.exit_reason = exit_reason;
    }
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ID={}, state={}, symbol={}, strategy={}, direction={}, qty={}, filled={}, \
             reqEntry={}, stopLoss={}, target={}, entry={}, exit={}, pnl={}",
            self.trade_id,
            self.state,
            self.symbol,
            self.strategy,
            self.direction,
            self.qty,
            self.filled_qty,
            self.requested_entry,
            self.stop_loss,
            self.target,
            self.entry,
            self.exit,
            self.pnl
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade(direction: Direction) -> Trade {
        let mut trade = Trade::new("ps", "NIFTY24O1025000CE", direction, 50, Utc::now());
        trade.requested_entry = dec!(100);
        trade
    }

    #[test]
    fn test_trade_id_prefixed_with_strategy() {
        let t = trade(Direction::Long);
        assert!(t.trade_id.starts_with("ps:"));
        assert_eq!(t.state(), TradeState::Created);
    }

    #[test]
    fn test_forward_only_transitions() {
        let now = Utc::now();
        let mut t = trade(Direction::Long);
        t.transition(TradeState::Active, now).unwrap();
        assert!(t.started_at.is_some());

        // completion needs a fill
        assert!(t.transition(TradeState::Completed, now).is_err());
        t.record_entry_fills(50, dec!(100)).unwrap();
        // no pre-activation exits once filled
        assert!(t.transition(TradeState::Cancelled, now).is_err());
        assert!(t.transition(TradeState::Disabled, now).is_err());

        t.complete(dec!(110), ExitReason::TargetHit, now).unwrap();
        assert_eq!(t.state(), TradeState::Completed);
        for to in [
            TradeState::Active,
            TradeState::Created,
            TradeState::Cancelled,
            TradeState::Completed,
        ] {
            assert!(t.transition(to, now).is_err());
        }
    }

    #[test]
    fn test_disable_only_before_fill() {
        let now = Utc::now();
        let mut t = trade(Direction::Short);
        t.disable(DisableReason::InvalidQuantity, now).unwrap();
        assert_eq!(t.state(), TradeState::Disabled);
        assert_eq!(t.disable_reason, Some(DisableReason::InvalidQuantity));
        assert!(t.transition(TradeState::Active, now).is_err());
    }

    #[test]
    fn test_overfill_rejected() {
        let mut t = trade(Direction::Long);
        let err = t.record_entry_fills(51, dec!(100)).unwrap_err();
        assert!(matches!(err, TradeError::Overfill { filled: 51, qty: 50, .. }));
        assert_eq!(t.filled_qty(), 0);
    }

    #[test]
    fn test_stop_loss_seeded_once_then_only_tightened() {
        let mut long = trade(Direction::Long);
        assert!(long.set_initial_stop_loss(dec!(80)));
        assert!(!long.set_initial_stop_loss(dec!(90)));
        assert_eq!(long.initial_stop_loss(), dec!(80));

        assert!(!long.tighten_stop_loss(dec!(75)));
        assert!(long.tighten_stop_loss(dec!(85)));
        assert_eq!(long.stop_loss(), dec!(85));
        assert!(long.is_trailed());

        let mut short = trade(Direction::Short);
        short.set_initial_stop_loss(dec!(140));
        assert!(!short.tighten_stop_loss(dec!(150)));
        assert!(short.tighten_stop_loss(dec!(120)));
        assert_eq!(short.stop_loss(), dec!(120));
    }

    #[test]
    fn test_pnl_long_and_short() {
        let now = Utc::now();
        let mut long = trade(Direction::Long);
        long.transition(TradeState::Active, now).unwrap();
        long.record_entry_fills(50, dec!(100)).unwrap();
        long.cmp = dec!(103.3);
        long.update_pnl();
        assert_eq!(long.pnl, dec!(165));
        assert_eq!(long.pnl_pct, dec!(3.3));

        let mut short = trade(Direction::Short);
        short.transition(TradeState::Active, now).unwrap();
        short.record_entry_fills(25, dec!(20)).unwrap();
        short.complete(dec!(28), ExitReason::SlHit, now).unwrap();
        assert_eq!(short.pnl, dec!(-200));
        assert_eq!(short.pnl_pct, dec!(-40));
    }

    #[test]
    fn test_requested_exit_reason_wins() {
        let now = Utc::now();
        let mut t = trade(Direction::Long);
        t.transition(TradeState::Active, now).unwrap();
        t.record_entry_fills(50, dec!(100)).unwrap();
        t.exit_requested = Some(ExitReason::StrategySlHit);
        t.complete(dec!(90), ExitReason::TargetHit, now).unwrap();
        assert_eq!(t.exit_reason(), Some(ExitReason::StrategySlHit));
    }

    #[test]
    fn test_duplicate_detection() {
        let a = trade(Direction::Long);
        let mut b = trade(Direction::Long);
        assert_ne!(a.trade_id, b.trade_id);
        assert!(a.is_duplicate_of(&b));

        b.target = dec!(150);
        assert!(!a.is_duplicate_of(&b));

        let same_id = a.clone();
        assert!(a.is_duplicate_of(&same_id));
    }
}
