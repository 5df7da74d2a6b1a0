//! Service facade over the matching platform.
//!
//! Wires the store, book, breaker, matcher and engine switch together and
//! exposes the operation surface the outer transport layers call into.
//! Admissions, cancellations and matching sessions are serialized through a
//! process-wide async mutex so no two sessions interleave book updates.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use exchange_common::error::{DatabaseError, EntityError, ValidationError};
use exchange_common::orders::{Order, OrderId, OrderRequest, Side, TransactionType};
use exchange_common::trades::{BreakerState, BuyerHistory, MatchAssignment, TradeRecord};

use crate::book::{Tier, TwoTierBook};
use crate::breaker::CircuitBreaker;
use crate::engine::EngineSwitch;
use crate::ledger;
use crate::matching::{MatchOutcome, Matcher};
use crate::store::{ExchangeStore, StoreError};

/// Errors surfaced by the service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed or missing input (maps to 400)
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// Referenced entity does not exist (maps to 404)
    #[error(transparent)]
    NotFound(EntityError),

    /// Store failure (maps to 500)
    #[error(transparent)]
    Store(DatabaseError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Entity(entity) => ServiceError::NotFound(entity),
            StoreError::Database(db) => ServiceError::Store(db),
        }
    }
}

impl ServiceError {
    /// HTTP status the transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Invalid(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::Store(_) => 500,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// The matching platform behind one handle.
pub struct ExchangeService {
    store: Arc<dyn ExchangeStore>,
    book: TwoTierBook,
    breaker: CircuitBreaker,
    matcher: Matcher,
    switch: EngineSwitch,
    match_lock: Arc<Mutex<()>>,
}

impl ExchangeService {
    pub fn new(store: Arc<dyn ExchangeStore>, matching_enabled: bool) -> Arc<Self> {
        let book = TwoTierBook::new(Arc::clone(&store));
        let breaker = CircuitBreaker::new(Arc::clone(&store));
        let matcher = Matcher::new(Arc::clone(&store), book.clone(), breaker.clone());

        Arc::new(Self {
            store,
            book,
            breaker,
            matcher,
            switch: EngineSwitch::new(matching_enabled),
            match_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Boot sequence: refill the top tiers when both are empty, then run one
    /// matching pass over whatever is already in the book.
    pub async fn startup(&self) -> ServiceResult<()> {
        let buyers = self.store.top_count(Side::Buy).await?;
        let sellers = self.store.top_count(Side::Sell).await?;

        if buyers == 0 && sellers == 0 {
            let _guard = self.match_lock.lock().await;
            self.book.full_sync(Side::Buy).await?;
            self.book.full_sync(Side::Sell).await?;
        }

        if let Err(err) = self.trigger_matching().await {
            warn!("Initial matching pass failed: {}", err);
        }
        Ok(())
    }

    // ---- order lifecycle ------------------------------------------------

    /// Validate and admit a submission, record the buyer's Pending history
    /// row, and kick the matching engine.
    pub async fn submit_order(&self, request: OrderRequest) -> ServiceResult<Order> {
        let draft = request.validate()?;

        let admission = {
            let _guard = self.match_lock.lock().await;
            self.book.admit(draft).await?
        };

        if admission.order.side == Side::Buy {
            if let Err(err) = ledger::record_pending_history(&self.store, &admission.order).await {
                warn!("Could not record buyer order history: {}", err);
            }
        }

        if let Err(err) = self.trigger_matching().await {
            warn!("Matching after admission failed: {}", err);
        }

        Ok(admission.order)
    }

    /// Cancel an order by side and id. Buyers get their history row flagged;
    /// a top-tier cancellation rebuilds that side afterwards.
    pub async fn cancel_order(&self, side: Side, id: OrderId) -> ServiceResult<()> {
        let _guard = self.match_lock.lock().await;

        let tier = self.book.cancel(side, id).await?;

        if side == Side::Buy {
            if let Err(err) = ledger::mark_cancelled(&self.store, id).await {
                warn!("Failed to update history for cancelled order {}: {}", id, err);
            }
        }

        if tier == Tier::Top {
            self.book.full_sync(side).await?;
        }

        info!("Order #{} ({}) cancelled", id, side.role());
        Ok(())
    }

    // ---- matching engine ------------------------------------------------

    /// Run one matching session when the engine is enabled and both top
    /// sides hold orders. Returns `None` when nothing ran.
    pub async fn trigger_matching(&self) -> ServiceResult<Option<MatchOutcome>> {
        if !self.switch.is_enabled() {
            info!("Matching engine is disabled, skipping");
            return Ok(None);
        }

        let _guard = self.match_lock.lock().await;

        let buyers = self.store.top_count(Side::Buy).await?;
        let sellers = self.store.top_count(Side::Sell).await?;
        if buyers < 1 || sellers < 1 {
            debug!(
                "Waiting for orders on both sides (buyers: {}, sellers: {})",
                buyers, sellers
            );
            return Ok(None);
        }

        let outcome = self.matcher.run_session().await?;
        Ok(Some(outcome))
    }

    pub fn engine_status(&self) -> bool {
        self.switch.is_enabled()
    }

    /// Flip the engine switch. Enabling fires one asynchronous match attempt
    /// over the current book.
    pub async fn set_engine_enabled(&self, enabled: bool) -> bool {
        let was_enabled = self.switch.set_enabled(enabled);
        info!(
            "Matching engine {}",
            if enabled { "started" } else { "stopped" }
        );

        if enabled && !was_enabled {
            let store = Arc::clone(&self.store);
            let matcher = self.matcher.clone();
            let lock = Arc::clone(&self.match_lock);
            tokio::spawn(async move {
                let _guard = lock.lock().await;

                let counts = (
                    store.top_count(Side::Buy).await,
                    store.top_count(Side::Sell).await,
                );
                let (buyers, sellers) = match counts {
                    (Ok(buyers), Ok(sellers)) => (buyers, sellers),
                    (Err(err), _) | (_, Err(err)) => {
                        warn!("Auto-matching skipped: {}", err);
                        return;
                    }
                };
                if buyers < 1 || sellers < 1 {
                    return;
                }

                match matcher.run_session().await {
                    Ok(outcome) => {
                        info!("Auto-matching completed in {:.3}ms", outcome.elapsed_ms)
                    }
                    Err(err) => warn!("Auto-matching failed: {}", err),
                }
            });
        }

        enabled
    }

    // ---- circuit breaker ------------------------------------------------

    pub async fn set_breaker_threshold(
        &self,
        project_id: i64,
        threshold: Decimal,
    ) -> ServiceResult<()> {
        if threshold < Decimal::ZERO || threshold > Decimal::ONE_HUNDRED {
            return Err(ValidationError::out_of_range(
                "threshold_percentage",
                threshold,
                0,
                100,
            )
            .into());
        }

        self.store
            .upsert_breaker_threshold(project_id, threshold)
            .await?;
        info!(
            "Circuit breaker threshold set to {}% for project {}",
            threshold, project_id
        );
        Ok(())
    }

    pub async fn reset_breaker(&self, project_id: i64) -> ServiceResult<()> {
        self.breaker.reset(project_id).await?;
        Ok(())
    }

    pub async fn breaker_statuses(&self) -> ServiceResult<Vec<BreakerState>> {
        Ok(self.store.breaker_states().await?)
    }

    /// Periodic maintenance: roll stale breakers over to the new day and
    /// re-evaluate the armed ones.
    pub async fn run_breaker_maintenance(&self) -> ServiceResult<()> {
        self.breaker.daily_reset().await?;
        self.breaker.refresh().await?;
        Ok(())
    }

    // ---- queries --------------------------------------------------------

    pub async fn orders(
        &self,
        side: Side,
        transaction_type: Option<TransactionType>,
    ) -> ServiceResult<Vec<Order>> {
        Ok(self.store.orders(side, transaction_type).await?)
    }

    pub async fn top_orders(
        &self,
        side: Side,
        transaction_type: TransactionType,
    ) -> ServiceResult<Vec<Order>> {
        Ok(self.store.top_orders(side, transaction_type).await?)
    }

    /// All six (side x kind) top buckets, keyed `top_<role>_<kind>`.
    pub async fn all_top_orders(&self) -> ServiceResult<HashMap<String, Vec<Order>>> {
        let kinds = [
            TransactionType::Standard,
            TransactionType::Bilateral,
            TransactionType::Any,
        ];

        let mut buckets = HashMap::new();
        for side in [Side::Buy, Side::Sell] {
            for kind in kinds {
                let orders = self.store.top_orders(side, kind).await?;
                buckets.insert(format!("top_{}_{}", side.role(), kind.as_i16()), orders);
            }
        }
        Ok(buckets)
    }

    pub async fn matched_orders(&self) -> ServiceResult<Vec<TradeRecord>> {
        Ok(self.store.trades().await?)
    }

    pub async fn matched_orders_for_user(&self, user_id: i64) -> ServiceResult<Vec<TradeRecord>> {
        Ok(self.store.trades_for_user(user_id).await?)
    }

    pub async fn buyer_history(&self, buyer_order_id: OrderId) -> ServiceResult<BuyerHistory> {
        self.store
            .history(buyer_order_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(EntityError::not_found(
                    "BuyerHistory",
                    buyer_order_id.to_string(),
                ))
            })
    }

    pub async fn unmatched_buyer_orders(&self) -> ServiceResult<Vec<BuyerHistory>> {
        Ok(self.store.unmatched_histories().await?)
    }

    pub async fn match_assignments(
        &self,
        buyer_order_id: OrderId,
    ) -> ServiceResult<Vec<MatchAssignment>> {
        Ok(self.store.assignments(buyer_order_id).await?)
    }

    // ---- admin ----------------------------------------------------------

    /// Purge all trading data and restart the transaction sequence.
    pub async fn clear_all_data(&self) -> ServiceResult<()> {
        let _guard = self.match_lock.lock().await;
        self.store.clear_all().await?;
        self.breaker.clear_cache();
        info!("All trading data cleared");
        Ok(())
    }
}
