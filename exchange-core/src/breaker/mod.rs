//! Per-project circuit breaker.
//!
//! Watches the intraday price drop of every project with a configured
//! threshold and halts the project when the drop from the day's open reaches
//! it. The halt flags are cached in memory behind a readers-writers lock so
//! the matching hot path never touches the store; the cache is refreshed at
//! the start of every matching batch.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::store::{ExchangeStore, StoreResult, TradePoint};

/// Circuit-breaker evaluator and halt cache.
#[derive(Clone)]
pub struct CircuitBreaker {
    store: Arc<dyn ExchangeStore>,
    halted: Arc<RwLock<HashMap<i64, bool>>>,
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn ExchangeStore>) -> Self {
        Self {
            store,
            halted: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Fast in-memory halt lookup. Never performs I/O; projects without a
    /// breaker row read as not halted.
    pub fn is_halted(&self, project_id: i64) -> bool {
        self.halted
            .read()
            .get(&project_id)
            .copied()
            .unwrap_or(false)
    }

    fn cache_set(&self, project_id: i64, halted: bool) {
        self.halted.write().insert(project_id, halted);
    }

    /// Re-evaluate every armed breaker against today's trades.
    ///
    /// For each project not already halted: the latest trade's mid price
    /// becomes the current price, the earliest trade's mid initializes the
    /// day open once, and the drop percentage decides the halt.
    pub async fn refresh(&self) -> StoreResult<()> {
        let today = Utc::now().date_naive();

        for state in self.store.armed_breakers().await? {
            let project_id = state.project_id;

            if state.is_halted {
                self.cache_set(project_id, true);
                continue;
            }

            let Some(current) = self
                .store
                .day_mid_price(project_id, today, TradePoint::Latest)
                .await?
            else {
                self.cache_set(project_id, false);
                continue;
            };
            if current.is_zero() {
                continue;
            }

            let mut day_open = state.day_open_price;
            if day_open.is_zero() {
                let Some(first) = self
                    .store
                    .day_mid_price(project_id, today, TradePoint::Earliest)
                    .await?
                else {
                    continue;
                };
                if first.is_zero() {
                    continue;
                }
                day_open = first;
                self.store.set_day_open_price(project_id, day_open).await?;
            }

            let drop_pct = (day_open - current) / day_open * Decimal::ONE_HUNDRED;
            self.store
                .record_breaker_prices(project_id, current, drop_pct)
                .await?;

            if drop_pct >= state.threshold_percentage {
                if self.store.halt_project(project_id).await? {
                    self.cache_set(project_id, true);
                    warn!(
                        "Circuit breaker triggered: project {} halted ({:.2}% drop from {} to {})",
                        project_id, drop_pct, day_open, current
                    );
                }
            } else {
                self.cache_set(project_id, false);
            }
        }

        Ok(())
    }

    /// Manually clear a single project's halt state (admin resume).
    pub async fn reset(&self, project_id: i64) -> StoreResult<()> {
        self.store.reset_breaker(project_id).await?;
        self.cache_set(project_id, false);
        info!("Circuit breaker reset for project {}, trading resumed", project_id);
        Ok(())
    }

    /// Clear every breaker whose last check predates today. Returns how many
    /// projects were reset.
    pub async fn daily_reset(&self) -> StoreResult<usize> {
        let today = Utc::now().date_naive();
        let reset = self.store.reset_stale_breakers(today).await?;

        if !reset.is_empty() {
            let mut cache = self.halted.write();
            for project_id in &reset {
                cache.insert(*project_id, false);
            }
            info!("Daily circuit breaker reset completed for {} projects", reset.len());
        } else {
            debug!("Daily circuit breaker reset: nothing to do");
        }
        Ok(reset.len())
    }

    /// Drop every cached flag (used after a full data purge).
    pub fn clear_cache(&self) {
        self.halted.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BookWrite, MemoryStore};
    use chrono::{NaiveDate, NaiveTime};
    use exchange_common::orders::{OrderId, TransactionId, TransactionType};
    use exchange_common::trades::{TradeRecord, TRADE_STATUS_CLOSED};
    use rust_decimal_macros::dec;

    async fn seed_trade(store: &MemoryStore, project_id: i64, buyer_price: Decimal) {
        let record = TradeRecord {
            id: 0,
            seller_price: buyer_price,
            buyer_price,
            seller_qty: 5,
            buyer_qty: 5,
            matched_qty: 5,
            seller_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            buyer_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            seller_date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            buyer_date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            incoming_time: Utc::now(),
            outgoing_time: Utc::now(),
            time_taken: "0.100 ms".to_string(),
            status: TRADE_STATUS_CLOSED.to_string(),
            transaction_type: TransactionType::Standard,
            buyer_order_id: OrderId(1),
            seller_order_id: OrderId(2),
            buyer_user_id: 1,
            seller_user_id: 2,
            buyer_transaction_id: TransactionId::from_sequence(10_000_000),
            seller_transaction_id: TransactionId::from_sequence(10_000_001),
            project_id,
            is_multi_match: false,
            created_at: Utc::now(),
        };
        store.apply(vec![BookWrite::InsertTrade(record)]).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_project_reads_not_halted() {
        let store = Arc::new(MemoryStore::new());
        let breaker = CircuitBreaker::new(store);
        assert!(!breaker.is_halted(42));
    }

    #[tokio::test]
    async fn test_refresh_without_trades_does_not_halt() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_breaker_threshold(1, dec!(10)).await.unwrap();

        let breaker = CircuitBreaker::new(store.clone());
        breaker.refresh().await.unwrap();

        assert!(!breaker.is_halted(1));
        let state = &store.breaker_states().await.unwrap()[0];
        assert_eq!(state.day_open_price, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_first_refresh_sets_the_day_open() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_breaker_threshold(1, dec!(10)).await.unwrap();
        seed_trade(&store, 1, dec!(100)).await;

        let breaker = CircuitBreaker::new(store.clone());
        breaker.refresh().await.unwrap();

        let state = &store.breaker_states().await.unwrap()[0];
        assert_eq!(state.day_open_price, dec!(100));
        assert_eq!(state.current_price, dec!(100));
        assert_eq!(state.price_drop_percentage, Decimal::ZERO);
        assert!(!breaker.is_halted(1));
    }

    #[tokio::test]
    async fn test_threshold_breach_halts_the_project() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_breaker_threshold(1, dec!(10)).await.unwrap();
        seed_trade(&store, 1, dec!(100)).await;

        let breaker = CircuitBreaker::new(store.clone());
        breaker.refresh().await.unwrap();

        // Price drops 11% from the open
        seed_trade(&store, 1, dec!(89)).await;
        breaker.refresh().await.unwrap();

        assert!(breaker.is_halted(1));
        let state = &store.breaker_states().await.unwrap()[0];
        assert!(state.is_halted);
        assert!(state.halted_at.is_some());
        assert_eq!(state.price_drop_percentage, dec!(11));
    }

    #[tokio::test]
    async fn test_drop_below_threshold_stays_open() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_breaker_threshold(1, dec!(10)).await.unwrap();
        seed_trade(&store, 1, dec!(100)).await;

        let breaker = CircuitBreaker::new(store.clone());
        breaker.refresh().await.unwrap();

        seed_trade(&store, 1, dec!(95)).await;
        breaker.refresh().await.unwrap();

        assert!(!breaker.is_halted(1));
        let state = &store.breaker_states().await.unwrap()[0];
        assert_eq!(state.price_drop_percentage, dec!(5));
    }

    #[tokio::test]
    async fn test_manual_reset_resumes_trading() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_breaker_threshold(1, dec!(10)).await.unwrap();
        seed_trade(&store, 1, dec!(100)).await;

        let breaker = CircuitBreaker::new(store.clone());
        breaker.refresh().await.unwrap();
        seed_trade(&store, 1, dec!(80)).await;
        breaker.refresh().await.unwrap();
        assert!(breaker.is_halted(1));

        breaker.reset(1).await.unwrap();
        assert!(!breaker.is_halted(1));
        let state = &store.breaker_states().await.unwrap()[0];
        assert!(!state.is_halted);
        assert_eq!(state.day_open_price, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_projects_are_evaluated_independently() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_breaker_threshold(1, dec!(10)).await.unwrap();
        store.upsert_breaker_threshold(2, dec!(10)).await.unwrap();
        seed_trade(&store, 1, dec!(100)).await;
        seed_trade(&store, 2, dec!(100)).await;

        let breaker = CircuitBreaker::new(store.clone());
        breaker.refresh().await.unwrap();

        seed_trade(&store, 1, dec!(85)).await;
        breaker.refresh().await.unwrap();

        assert!(breaker.is_halted(1));
        assert!(!breaker.is_halted(2));
    }
}
