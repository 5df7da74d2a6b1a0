//! Fill ledger: buyer order history and per-slice match assignments.
//!
//! Trade records are written inside the matching transaction; the history
//! update and assignment insert for each slice run after commit. Both are
//! idempotent at the store level (conflict-ignoring history creation,
//! additive updates keyed by buyer id), so they are retried on transient
//! store errors and logged-and-swallowed on definitive failure. The trade
//! record itself is never at risk.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use exchange_common::error::retry_with_backoff;
use exchange_common::orders::{HistoryStatus, Order, OrderId, TopEntry};
use exchange_common::trades::{BuyerHistory, MatchAssignment};

use crate::store::{ExchangeStore, StoreResult};

const LEDGER_RETRY_ATTEMPTS: u32 = 3;
const LEDGER_RETRY_DELAY: Duration = Duration::from_millis(50);

/// One seller slice of a buyer fill, pending its ledger rows.
#[derive(Debug, Clone)]
pub struct FillSlice {
    pub seller: TopEntry,
    pub matched_qty: i64,
}

/// Create the Pending history row for a freshly admitted buyer order.
/// Re-submission of the same order id is a no-op.
pub async fn record_pending_history(
    store: &Arc<dyn ExchangeStore>,
    order: &Order,
) -> StoreResult<()> {
    store.create_history(BuyerHistory::pending_for(order)).await
}

/// Post-commit ledger work for one matching pass: fold every slice into the
/// buyer's history row and insert its assignment, pointing at the committed
/// trade record.
pub async fn apply_fill_ledger(
    store: &Arc<dyn ExchangeStore>,
    buyer_order_id: OrderId,
    slices: &[FillSlice],
    trade_ids: &[i64],
) {
    for (slice, trade_id) in slices.iter().zip(trade_ids) {
        let result = retry_with_backoff(
            || {
                let store = Arc::clone(store);
                async move {
                    store
                        .apply_history_fill(buyer_order_id, slice.matched_qty)
                        .await
                }
            },
            LEDGER_RETRY_ATTEMPTS,
            LEDGER_RETRY_DELAY,
        )
        .await;
        if let Err(err) = result {
            warn!(
                "Failed to update history for buyer order {}: {}",
                buyer_order_id, err
            );
        }

        let assignment = MatchAssignment {
            id: 0,
            buyer_order_id,
            seller_order_id: slice.seller.order_id,
            seller_user_id: slice.seller.user_id,
            seller_transaction_id: slice.seller.transaction_id.clone(),
            seller_total_qty: slice.seller.quantity,
            assigned_qty: slice.matched_qty,
            seller_price: slice.seller.price,
            matched_order_id: *trade_id,
            assigned_at: Utc::now(),
        };
        let result = retry_with_backoff(
            || {
                let store = Arc::clone(store);
                let assignment = assignment.clone();
                async move { store.insert_assignment(assignment).await }
            },
            LEDGER_RETRY_ATTEMPTS,
            LEDGER_RETRY_DELAY,
        )
        .await;
        if let Err(err) = result {
            warn!(
                "Failed to record assignment for buyer order {}: {}",
                buyer_order_id, err
            );
        }
    }
}

/// Flag a cancelled buyer order's history row.
pub async fn mark_cancelled(
    store: &Arc<dyn ExchangeStore>,
    buyer_order_id: OrderId,
) -> StoreResult<()> {
    store
        .set_history_status(buyer_order_id, HistoryStatus::Cancelled)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{NaiveDate, NaiveTime};
    use exchange_common::orders::{
        MatchType, OrderDraft, Side, TransactionType,
    };
    use rust_decimal_macros::dec;

    fn draft(side: Side, quantity: i64) -> OrderDraft {
        OrderDraft {
            side,
            user_id: 1,
            price: dec!(100.00),
            quantity,
            trade_date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            trade_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            transaction_type: TransactionType::Standard,
            match_type: MatchType::Exact,
            market_lead_program: false,
            project_id: 1,
        }
    }

    #[tokio::test]
    async fn test_fill_ledger_records_history_and_assignments() {
        let store: Arc<dyn ExchangeStore> = Arc::new(MemoryStore::new());

        let buyer = store.create_order(draft(Side::Buy, 10)).await.unwrap();
        let seller = store.create_order(draft(Side::Sell, 4)).await.unwrap();
        record_pending_history(&store, &buyer).await.unwrap();

        let slices = [FillSlice {
            seller: TopEntry::from_order(&seller),
            matched_qty: 4,
        }];
        apply_fill_ledger(&store, buyer.id, &slices, &[77]).await;

        let history = store.history(buyer.id).await.unwrap().unwrap();
        assert_eq!(history.total_matched_qty, 4);
        assert_eq!(history.remaining_qty, 6);
        assert_eq!(history.status, HistoryStatus::PartiallyMatched);

        let assignments = store.assignments(buyer.id).await.unwrap();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].seller_order_id, seller.id);
        assert_eq!(assignments[0].assigned_qty, 4);
        assert_eq!(assignments[0].seller_total_qty, 4);
        assert_eq!(assignments[0].seller_price, dec!(100.00));
        assert_eq!(assignments[0].matched_order_id, 77);
    }

    #[tokio::test]
    async fn test_mark_cancelled_flags_the_history() {
        let store: Arc<dyn ExchangeStore> = Arc::new(MemoryStore::new());
        let buyer = store.create_order(draft(Side::Buy, 10)).await.unwrap();
        record_pending_history(&store, &buyer).await.unwrap();

        mark_cancelled(&store, buyer.id).await.unwrap();

        let history = store.history(buyer.id).await.unwrap().unwrap();
        assert_eq!(history.status, HistoryStatus::Cancelled);
    }
}
