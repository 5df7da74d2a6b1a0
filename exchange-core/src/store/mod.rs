//! Store abstraction over the persisted book and ledger tables.
//!
//! The engine treats persistence as a transactional store: every read is a
//! plain async call, and every multi-row mutation goes through [`apply`],
//! which each implementation executes atomically. Two implementations exist:
//! [`PgStore`] (sqlx/Postgres, production) and [`MemoryStore`] (tests and
//! local runs).
//!
//! [`apply`]: ExchangeStore::apply

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use exchange_common::error::{
    DatabaseError, EntityError, ErrorCategory, ErrorClassification,
};
use exchange_common::orders::{
    HistoryStatus, Order, OrderDraft, OrderId, Side, TopEntry, TransactionType,
};
use exchange_common::trades::{BreakerState, BuyerHistory, MatchAssignment, TradeRecord};

/// Store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Entity(#[from] EntityError),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.into())
    }
}

impl ErrorClassification for StoreError {
    fn category(&self) -> ErrorCategory {
        match self {
            StoreError::Database(err) => err.category(),
            StoreError::Entity(err) => err.category(),
        }
    }

    fn suggested_retry_delay(&self) -> Option<std::time::Duration> {
        match self {
            StoreError::Database(err) => err.suggested_retry_delay(),
            StoreError::Entity(err) => err.suggested_retry_delay(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Which end of the day's trade sequence a price query refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradePoint {
    /// First trade of the day
    Earliest,
    /// Most recent trade of the day
    Latest,
}

/// One mutation of the book or ledger tables.
///
/// A `Vec<BookWrite>` passed to [`ExchangeStore::apply`] commits or rolls
/// back as a unit. Inserts into the main tier and removals are tolerant of
/// pre-existing/absent rows so that demotions and mirror updates stay
/// idempotent.
#[derive(Debug, Clone)]
pub enum BookWrite {
    InsertTop { side: Side, entry: TopEntry },
    RemoveTop { side: Side, order_id: OrderId },
    SetTopQuantity { side: Side, order_id: OrderId, quantity: i64 },
    InsertMain { side: Side, order: Order },
    RemoveMain { side: Side, order_id: OrderId },
    SetMainQuantity { side: Side, order_id: OrderId, quantity: i64 },
    InsertTrade(TradeRecord),
}

/// The persisted book, ledger and breaker tables.
#[async_trait]
pub trait ExchangeStore: Send + Sync {
    /// Insert a validated submission into the main tier, assigning its id,
    /// transaction id and creation timestamp.
    async fn create_order(&self, draft: OrderDraft) -> StoreResult<Order>;

    /// Execute a batch of writes atomically. Returns the assigned ids of the
    /// inserted trade records, in batch order.
    async fn apply(&self, writes: Vec<BookWrite>) -> StoreResult<Vec<i64>>;

    // ---- tier reads -----------------------------------------------------

    async fn top_count(&self, side: Side) -> StoreResult<i64>;

    /// Top-tier entries in priority order.
    async fn top_entries(&self, side: Side, limit: i64) -> StoreResult<Vec<TopEntry>>;

    /// Main-tier orders in priority order.
    async fn main_orders(&self, side: Side, limit: i64) -> StoreResult<Vec<Order>>;

    /// Priority-worst top entry, optionally restricted to non-MLP entries.
    async fn worst_top(&self, side: Side, exclude_mlp: bool) -> StoreResult<Option<TopEntry>>;

    async fn find_top(&self, side: Side, id: OrderId) -> StoreResult<Option<TopEntry>>;

    async fn find_main(&self, side: Side, id: OrderId) -> StoreResult<Option<Order>>;

    // ---- query surface --------------------------------------------------

    /// Main-tier orders for the query endpoints, optionally filtered by kind.
    async fn orders(
        &self,
        side: Side,
        transaction_type: Option<TransactionType>,
    ) -> StoreResult<Vec<Order>>;

    /// Top-tier orders of one kind, in priority order.
    async fn top_orders(
        &self,
        side: Side,
        transaction_type: TransactionType,
    ) -> StoreResult<Vec<Order>>;

    /// All trade records, newest first.
    async fn trades(&self) -> StoreResult<Vec<TradeRecord>>;

    /// Trade records involving the given user on either side, newest first.
    async fn trades_for_user(&self, user_id: i64) -> StoreResult<Vec<TradeRecord>>;

    /// Mid price of the earliest/latest trade of `day` for a project.
    async fn day_mid_price(
        &self,
        project_id: i64,
        day: NaiveDate,
        point: TradePoint,
    ) -> StoreResult<Option<Decimal>>;

    // ---- buyer history and assignments ----------------------------------

    /// Insert a history row; a duplicate buyer order id is a no-op.
    async fn create_history(&self, history: BuyerHistory) -> StoreResult<()>;

    /// Fold one fill slice into the history row (additive, keyed by buyer id).
    async fn apply_history_fill(&self, buyer_order_id: OrderId, matched_qty: i64)
        -> StoreResult<()>;

    async fn set_history_status(
        &self,
        buyer_order_id: OrderId,
        status: HistoryStatus,
    ) -> StoreResult<()>;

    async fn history(&self, buyer_order_id: OrderId) -> StoreResult<Option<BuyerHistory>>;

    /// Histories still open for fills (Pending / Partially Matched), most
    /// recently updated first.
    async fn unmatched_histories(&self) -> StoreResult<Vec<BuyerHistory>>;

    async fn insert_assignment(&self, assignment: MatchAssignment) -> StoreResult<()>;

    /// Assignments for one buyer order, oldest first.
    async fn assignments(&self, buyer_order_id: OrderId) -> StoreResult<Vec<MatchAssignment>>;

    // ---- circuit breaker ------------------------------------------------

    async fn breaker_states(&self) -> StoreResult<Vec<BreakerState>>;

    /// Breakers with a non-zero threshold (the ones worth evaluating).
    async fn armed_breakers(&self) -> StoreResult<Vec<BreakerState>>;

    async fn upsert_breaker_threshold(
        &self,
        project_id: i64,
        threshold: Decimal,
    ) -> StoreResult<()>;

    async fn set_day_open_price(&self, project_id: i64, price: Decimal) -> StoreResult<()>;

    async fn record_breaker_prices(
        &self,
        project_id: i64,
        current: Decimal,
        drop_pct: Decimal,
    ) -> StoreResult<()>;

    /// Halt a project that is not already halted. Returns whether the state
    /// transitioned.
    async fn halt_project(&self, project_id: i64) -> StoreResult<bool>;

    async fn reset_breaker(&self, project_id: i64) -> StoreResult<()>;

    /// Clear every breaker whose last check predates `today`. Returns the
    /// project ids that were reset.
    async fn reset_stale_breakers(&self, today: NaiveDate) -> StoreResult<Vec<i64>>;

    // ---- admin ----------------------------------------------------------

    /// Purge every trading table and restart the transaction id sequence.
    async fn clear_all(&self) -> StoreResult<()>;
}
