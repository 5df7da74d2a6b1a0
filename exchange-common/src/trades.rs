//! Ledger records produced by matching: trade records, buyer order history,
//! match assignments, and per-project circuit-breaker state.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::orders::{HistoryStatus, Order, OrderId, TransactionId, TransactionType};

/// Status stamped on every trade record.
pub const TRADE_STATUS_CLOSED: &str = "Closed";

/// Immutable record of a single matched quantity slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: i64,
    pub seller_price: Decimal,
    pub buyer_price: Decimal,
    pub seller_qty: i64,
    pub buyer_qty: i64,
    pub matched_qty: i64,
    pub seller_time: NaiveTime,
    pub buyer_time: NaiveTime,
    pub seller_date: NaiveDate,
    pub buyer_date: NaiveDate,
    pub incoming_time: DateTime<Utc>,
    pub outgoing_time: DateTime<Utc>,
    pub time_taken: String,
    pub status: String,
    pub transaction_type: TransactionType,
    pub buyer_order_id: OrderId,
    pub seller_order_id: OrderId,
    pub buyer_user_id: i64,
    pub seller_user_id: i64,
    pub buyer_transaction_id: TransactionId,
    pub seller_transaction_id: TransactionId,
    pub project_id: i64,
    pub is_multi_match: bool,
    pub created_at: DateTime<Utc>,
}

impl TradeRecord {
    /// Mid price of this trade, used by the circuit breaker.
    pub fn mid_price(&self) -> Decimal {
        (self.buyer_price + self.seller_price) / Decimal::TWO
    }
}

/// One (buyer order, seller slice) pair of a potentially multi-seller fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchAssignment {
    pub id: i64,
    pub buyer_order_id: OrderId,
    pub seller_order_id: OrderId,
    pub seller_user_id: i64,
    pub seller_transaction_id: TransactionId,
    pub seller_total_qty: i64,
    pub assigned_qty: i64,
    pub seller_price: Decimal,
    pub matched_order_id: i64,
    pub assigned_at: DateTime<Utc>,
}

/// Per-buyer aggregate fill state, created on submission and updated on
/// every slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyerHistory {
    pub id: i64,
    pub buyer_order_id: OrderId,
    pub buyer_user_id: i64,
    pub buyer_transaction_id: TransactionId,
    pub original_price: Decimal,
    pub original_qty: i64,
    pub trade_date: NaiveDate,
    pub trade_time: NaiveTime,
    pub project_id: i64,
    pub total_matched_qty: i64,
    pub remaining_qty: i64,
    pub match_count: i64,
    pub seller_count: i64,
    pub status: HistoryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BuyerHistory {
    /// Fresh Pending row for a just-admitted buyer order.
    pub fn pending_for(order: &Order) -> Self {
        Self {
            id: 0,
            buyer_order_id: order.id,
            buyer_user_id: order.user_id,
            buyer_transaction_id: order.transaction_id.clone(),
            original_price: order.price,
            original_qty: order.quantity,
            trade_date: order.trade_date,
            trade_time: order.trade_time,
            project_id: order.project_id,
            total_matched_qty: 0,
            remaining_qty: order.quantity,
            match_count: 0,
            seller_count: 0,
            status: HistoryStatus::Pending,
            created_at: order.created_at,
            updated_at: order.created_at,
        }
    }

    /// Apply one fill slice: accumulate the matched quantity, bump the slice
    /// counters and derive the status from the remaining quantity.
    pub fn apply_fill(&mut self, matched_qty: i64, now: DateTime<Utc>) {
        self.status = if self.remaining_qty - matched_qty <= 0 {
            HistoryStatus::Completed
        } else {
            HistoryStatus::PartiallyMatched
        };
        self.total_matched_qty += matched_qty;
        self.remaining_qty -= matched_qty;
        self.match_count += 1;
        self.seller_count += 1;
        self.updated_at = now;
    }
}

/// Intraday halt state for a single project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerState {
    pub project_id: i64,
    pub threshold_percentage: Decimal,
    pub is_halted: bool,
    pub halted_at: Option<DateTime<Utc>>,
    pub day_open_price: Decimal,
    pub current_price: Decimal,
    pub price_drop_percentage: Decimal,
    pub last_checked: DateTime<Utc>,
}

impl BreakerState {
    /// New breaker row with the given threshold and everything else cleared.
    pub fn with_threshold(project_id: i64, threshold_percentage: Decimal) -> Self {
        Self {
            project_id,
            threshold_percentage,
            is_halted: false,
            halted_at: None,
            day_open_price: Decimal::ZERO,
            current_price: Decimal::ZERO,
            price_drop_percentage: Decimal::ZERO,
            last_checked: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{MatchType, Side};
    use rust_decimal_macros::dec;

    fn buyer_order(qty: i64) -> Order {
        Order {
            id: OrderId(1),
            transaction_id: TransactionId::from_sequence(10_000_000),
            user_id: 3,
            side: Side::Buy,
            price: dec!(100.00),
            quantity: qty,
            trade_date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            trade_time: NaiveTime::from_hms_opt(14, 30, 0).unwrap(),
            transaction_type: TransactionType::Standard,
            match_type: MatchType::Exact,
            market_lead_program: false,
            project_id: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_pending_history_mirrors_order() {
        let order = buyer_order(10);
        let history = BuyerHistory::pending_for(&order);

        assert_eq!(history.status, HistoryStatus::Pending);
        assert_eq!(history.original_qty, 10);
        assert_eq!(history.remaining_qty, 10);
        assert_eq!(history.total_matched_qty, 0);
        assert_eq!(history.match_count, 0);
    }

    #[test]
    fn test_partial_fill_then_completion() {
        let order = buyer_order(10);
        let mut history = BuyerHistory::pending_for(&order);

        history.apply_fill(4, Utc::now());
        assert_eq!(history.status, HistoryStatus::PartiallyMatched);
        assert_eq!(history.total_matched_qty, 4);
        assert_eq!(history.remaining_qty, 6);
        assert_eq!(history.match_count, 1);
        assert_eq!(history.seller_count, 1);

        history.apply_fill(6, Utc::now());
        assert_eq!(history.status, HistoryStatus::Completed);
        assert_eq!(history.remaining_qty, 0);
        assert_eq!(history.match_count, 2);
        assert_eq!(history.seller_count, 2);
    }

    #[test]
    fn test_single_fill_completes() {
        let order = buyer_order(5);
        let mut history = BuyerHistory::pending_for(&order);

        history.apply_fill(5, Utc::now());
        assert_eq!(history.status, HistoryStatus::Completed);
        assert_eq!(history.total_matched_qty, 5);
    }

    #[test]
    fn test_breaker_state_defaults() {
        let state = BreakerState::with_threshold(4, dec!(10));
        assert!(!state.is_halted);
        assert!(state.halted_at.is_none());
        assert_eq!(state.day_open_price, Decimal::ZERO);
        assert_eq!(state.threshold_percentage, dec!(10));
    }
}
