//! sqlx/Postgres implementation of the exchange store.
//!
//! Table names are fixed per side (`buyer`/`seller` for the main tier,
//! `top_buyer`/`top_seller` for the top tier), so queries are assembled with
//! `format!` over these constants and bind parameters for all values. Batches
//! run inside a single transaction.

use async_trait::async_trait;
use chrono::{Days, NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::info;

use exchange_common::orders::{
    HistoryStatus, MatchType, Order, OrderDraft, OrderId, Side, TopEntry, TransactionId,
    TransactionType, TRANSACTION_SEQUENCE_START,
};
use exchange_common::trades::{BreakerState, BuyerHistory, MatchAssignment, TradeRecord};

use super::{BookWrite, ExchangeStore, StoreResult, TradePoint};

/// Main- and top-tier table names for one side.
fn tables(side: Side) -> (&'static str, &'static str) {
    match side {
        Side::Buy => ("buyer", "top_buyer"),
        Side::Sell => ("seller", "top_seller"),
    }
}

/// ORDER BY clause realizing the priority key (best first).
fn priority_order(side: Side) -> &'static str {
    match side {
        Side::Buy => {
            "market_lead_program DESC, price DESC, quantity DESC, \
             trade_date ASC, trade_time ASC, created_at ASC"
        }
        Side::Sell => {
            "market_lead_program DESC, price ASC, quantity DESC, \
             trade_date ASC, trade_time ASC, created_at ASC"
        }
    }
}

/// ORDER BY clause with the priority key inverted (worst first).
fn worst_first_order(side: Side) -> &'static str {
    match side {
        Side::Buy => {
            "market_lead_program ASC, price ASC, quantity ASC, \
             trade_date DESC, trade_time DESC, created_at DESC"
        }
        Side::Sell => {
            "market_lead_program ASC, price DESC, quantity ASC, \
             trade_date DESC, trade_time DESC, created_at DESC"
        }
    }
}

const ORDER_COLUMNS: &str = "user_id, transaction_id, price, quantity, trade_date, trade_time, \
     transaction_type, match_type, market_lead_program, project_id, created_at";

const TRADE_COLUMNS: &str = "id, seller_price, buyer_price, seller_qty, buyer_qty, matched_qty, \
     seller_time, buyer_time, seller_date, buyer_date, incoming_time, outgoing_time, time_taken, \
     status, transaction_type, buyer_order_id, seller_order_id, buyer_user_id, seller_user_id, \
     buyer_transaction_id, seller_transaction_id, project_id, is_multi_match, created_at";

const HISTORY_COLUMNS: &str = "id, buyer_order_id, buyer_user_id, buyer_transaction_id, \
     original_price, original_qty, buyer_trade_date, buyer_trade_time, project_id, \
     total_matched_qty, remaining_qty, match_count, seller_count, status, created_at, updated_at";

fn decode_transaction_type(code: i32) -> Result<TransactionType, sqlx::Error> {
    TransactionType::from_i16(code as i16).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn decode_match_type(code: i32) -> Result<MatchType, sqlx::Error> {
    MatchType::from_i16(code as i16).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn order_from_row(row: &PgRow, side: Side, id_column: &str) -> Result<Order, sqlx::Error> {
    Ok(Order {
        id: OrderId(row.try_get(id_column)?),
        transaction_id: TransactionId(row.try_get("transaction_id")?),
        user_id: row.try_get("user_id")?,
        side,
        price: row.try_get("price")?,
        quantity: row.try_get("quantity")?,
        trade_date: row.try_get("trade_date")?,
        trade_time: row.try_get("trade_time")?,
        transaction_type: decode_transaction_type(row.try_get("transaction_type")?)?,
        match_type: decode_match_type(row.try_get("match_type")?)?,
        market_lead_program: row.try_get("market_lead_program")?,
        project_id: row.try_get("project_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<TopEntry, sqlx::Error> {
    Ok(TopEntry {
        order_id: OrderId(row.try_get("order_id")?),
        user_id: row.try_get("user_id")?,
        transaction_id: TransactionId(row.try_get("transaction_id")?),
        price: row.try_get("price")?,
        quantity: row.try_get("quantity")?,
        trade_date: row.try_get("trade_date")?,
        trade_time: row.try_get("trade_time")?,
        transaction_type: decode_transaction_type(row.try_get("transaction_type")?)?,
        match_type: decode_match_type(row.try_get("match_type")?)?,
        market_lead_program: row.try_get("market_lead_program")?,
        project_id: row.try_get("project_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn trade_from_row(row: &PgRow) -> Result<TradeRecord, sqlx::Error> {
    Ok(TradeRecord {
        id: row.try_get("id")?,
        seller_price: row.try_get("seller_price")?,
        buyer_price: row.try_get("buyer_price")?,
        seller_qty: row.try_get("seller_qty")?,
        buyer_qty: row.try_get("buyer_qty")?,
        matched_qty: row.try_get("matched_qty")?,
        seller_time: row.try_get("seller_time")?,
        buyer_time: row.try_get("buyer_time")?,
        seller_date: row.try_get("seller_date")?,
        buyer_date: row.try_get("buyer_date")?,
        incoming_time: row.try_get("incoming_time")?,
        outgoing_time: row.try_get("outgoing_time")?,
        time_taken: row.try_get("time_taken")?,
        status: row.try_get("status")?,
        transaction_type: decode_transaction_type(row.try_get("transaction_type")?)?,
        buyer_order_id: OrderId(row.try_get("buyer_order_id")?),
        seller_order_id: OrderId(row.try_get("seller_order_id")?),
        buyer_user_id: row.try_get("buyer_user_id")?,
        seller_user_id: row.try_get("seller_user_id")?,
        buyer_transaction_id: TransactionId(row.try_get("buyer_transaction_id")?),
        seller_transaction_id: TransactionId(row.try_get("seller_transaction_id")?),
        project_id: row.try_get("project_id")?,
        is_multi_match: row.try_get("is_multi_match")?,
        created_at: row.try_get("created_at")?,
    })
}

fn history_from_row(row: &PgRow) -> Result<BuyerHistory, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = HistoryStatus::parse(&status).ok_or_else(|| {
        sqlx::Error::Decode(format!("unknown history status: {status}").into())
    })?;

    Ok(BuyerHistory {
        id: row.try_get("id")?,
        buyer_order_id: OrderId(row.try_get("buyer_order_id")?),
        buyer_user_id: row.try_get("buyer_user_id")?,
        buyer_transaction_id: TransactionId(row.try_get("buyer_transaction_id")?),
        original_price: row.try_get("original_price")?,
        original_qty: row.try_get("original_qty")?,
        trade_date: row.try_get("buyer_trade_date")?,
        trade_time: row.try_get("buyer_trade_time")?,
        project_id: row.try_get("project_id")?,
        total_matched_qty: row.try_get("total_matched_qty")?,
        remaining_qty: row.try_get("remaining_qty")?,
        match_count: row.try_get("match_count")?,
        seller_count: row.try_get("seller_count")?,
        status,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn breaker_from_row(row: &PgRow) -> Result<BreakerState, sqlx::Error> {
    Ok(BreakerState {
        project_id: row.try_get("project_id")?,
        threshold_percentage: row.try_get("threshold_percentage")?,
        is_halted: row.try_get("is_halted")?,
        halted_at: row.try_get("halted_at")?,
        day_open_price: row.try_get("day_open_price")?,
        current_price: row.try_get("current_price")?,
        price_drop_percentage: row.try_get("price_drop_percentage")?,
        last_checked: row.try_get("last_checked")?,
    })
}

/// Postgres-backed implementation of [`ExchangeStore`].
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the database pool reference
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create all tables, the transaction id sequence and the index set.
    pub async fn init_schema(&self) -> StoreResult<()> {
        sqlx::query(&format!(
            "CREATE SEQUENCE IF NOT EXISTS transaction_seq START {TRANSACTION_SEQUENCE_START}"
        ))
        .execute(&self.pool)
        .await?;

        for table in ["buyer", "seller"] {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id BIGSERIAL PRIMARY KEY,
                    transaction_id VARCHAR(8) UNIQUE NOT NULL
                        DEFAULT LPAD(nextval('transaction_seq')::text, 8, '0'),
                    user_id BIGINT NOT NULL,
                    price NUMERIC(10, 2) NOT NULL,
                    quantity BIGINT NOT NULL,
                    trade_date DATE NOT NULL,
                    trade_time TIME NOT NULL,
                    transaction_type INTEGER NOT NULL CHECK (transaction_type IN (0, 1, 2)),
                    match_type INTEGER NOT NULL DEFAULT 0 CHECK (match_type IN (0, 1)),
                    market_lead_program BOOLEAN NOT NULL DEFAULT false,
                    project_id BIGINT NOT NULL DEFAULT 1,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )
                "#
            ))
            .execute(&self.pool)
            .await?;
        }

        for table in ["top_buyer", "top_seller"] {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id BIGSERIAL PRIMARY KEY,
                    order_id BIGINT NOT NULL UNIQUE,
                    user_id BIGINT NOT NULL,
                    transaction_id VARCHAR(8) NOT NULL,
                    price NUMERIC(10, 2) NOT NULL,
                    quantity BIGINT NOT NULL,
                    trade_date DATE NOT NULL,
                    trade_time TIME NOT NULL,
                    transaction_type INTEGER NOT NULL,
                    match_type INTEGER NOT NULL DEFAULT 0,
                    market_lead_program BOOLEAN NOT NULL DEFAULT false,
                    project_id BIGINT NOT NULL DEFAULT 1,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )
                "#
            ))
            .execute(&self.pool)
            .await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS matched_orders (
                id BIGSERIAL PRIMARY KEY,
                seller_price NUMERIC(10, 2) NOT NULL,
                buyer_price NUMERIC(10, 2) NOT NULL,
                seller_qty BIGINT NOT NULL,
                buyer_qty BIGINT NOT NULL,
                matched_qty BIGINT NOT NULL,
                seller_time TIME NOT NULL,
                buyer_time TIME NOT NULL,
                seller_date DATE NOT NULL,
                buyer_date DATE NOT NULL,
                incoming_time TIMESTAMPTZ NOT NULL,
                outgoing_time TIMESTAMPTZ NOT NULL,
                time_taken VARCHAR(50) NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'Closed',
                transaction_type INTEGER NOT NULL,
                buyer_order_id BIGINT NOT NULL,
                seller_order_id BIGINT NOT NULL,
                buyer_user_id BIGINT NOT NULL,
                seller_user_id BIGINT NOT NULL,
                buyer_transaction_id VARCHAR(8) NOT NULL,
                seller_transaction_id VARCHAR(8) NOT NULL,
                project_id BIGINT NOT NULL DEFAULT 1,
                is_multi_match BOOLEAN NOT NULL DEFAULT false,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS buyer_order_history (
                id BIGSERIAL PRIMARY KEY,
                buyer_order_id BIGINT NOT NULL UNIQUE,
                buyer_user_id BIGINT NOT NULL,
                buyer_transaction_id VARCHAR(8) NOT NULL,
                original_price NUMERIC(10, 2) NOT NULL,
                original_qty BIGINT NOT NULL,
                buyer_trade_date DATE NOT NULL,
                buyer_trade_time TIME NOT NULL,
                project_id BIGINT NOT NULL DEFAULT 1,
                total_matched_qty BIGINT NOT NULL DEFAULT 0,
                remaining_qty BIGINT NOT NULL,
                match_count BIGINT NOT NULL DEFAULT 0,
                seller_count BIGINT NOT NULL DEFAULT 0,
                status VARCHAR(20) NOT NULL DEFAULT 'Pending',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS match_assignments (
                id BIGSERIAL PRIMARY KEY,
                buyer_order_id BIGINT NOT NULL,
                seller_order_id BIGINT NOT NULL,
                seller_user_id BIGINT NOT NULL,
                seller_transaction_id VARCHAR(8) NOT NULL,
                seller_total_qty BIGINT NOT NULL,
                assigned_qty BIGINT NOT NULL,
                seller_price NUMERIC(10, 2) NOT NULL,
                matched_order_id BIGINT REFERENCES matched_orders(id) ON DELETE CASCADE,
                assigned_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS project_circuit_breakers (
                project_id BIGINT PRIMARY KEY,
                threshold_percentage NUMERIC(5, 2) NOT NULL DEFAULT 0,
                is_halted BOOLEAN NOT NULL DEFAULT false,
                halted_at TIMESTAMPTZ,
                day_open_price NUMERIC(10, 2) NOT NULL DEFAULT 0,
                current_price NUMERIC(10, 2) NOT NULL DEFAULT 0,
                price_drop_percentage NUMERIC(5, 2) NOT NULL DEFAULT 0,
                last_checked TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_buyer_price ON buyer (price DESC)",
            "CREATE INDEX IF NOT EXISTS idx_seller_price ON seller (price ASC)",
            "CREATE INDEX IF NOT EXISTS idx_top_buyer_price ON top_buyer (price DESC)",
            "CREATE INDEX IF NOT EXISTS idx_top_seller_price ON top_seller (price ASC)",
            "CREATE INDEX IF NOT EXISTS idx_top_buyer_mlp ON top_buyer (market_lead_program DESC, price DESC)",
            "CREATE INDEX IF NOT EXISTS idx_top_seller_mlp ON top_seller (market_lead_program DESC, price ASC)",
            "CREATE INDEX IF NOT EXISTS idx_top_buyer_qty ON top_buyer (quantity DESC)",
            "CREATE INDEX IF NOT EXISTS idx_top_seller_qty ON top_seller (quantity DESC)",
            "CREATE INDEX IF NOT EXISTS idx_top_buyer_date ON top_buyer (trade_date ASC)",
            "CREATE INDEX IF NOT EXISTS idx_top_seller_date ON top_seller (trade_date ASC)",
            "CREATE INDEX IF NOT EXISTS idx_top_buyer_time ON top_buyer (trade_time ASC)",
            "CREATE INDEX IF NOT EXISTS idx_top_seller_time ON top_seller (trade_time ASC)",
            "CREATE INDEX IF NOT EXISTS idx_top_buyer_order_id ON top_buyer (order_id)",
            "CREATE INDEX IF NOT EXISTS idx_top_seller_order_id ON top_seller (order_id)",
            "CREATE INDEX IF NOT EXISTS idx_matched_orders_created ON matched_orders (created_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_matched_orders_project ON matched_orders (project_id)",
        ];
        for index in indexes {
            sqlx::query(index).execute(&self.pool).await?;
        }

        info!("Exchange schema initialized");
        Ok(())
    }

    async fn execute_write(
        tx: &mut Transaction<'_, Postgres>,
        write: BookWrite,
        trade_ids: &mut Vec<i64>,
    ) -> Result<(), sqlx::Error> {
        match write {
            BookWrite::InsertTop { side, entry } => {
                let (_, top) = tables(side);
                sqlx::query(&format!(
                    r#"
                    INSERT INTO {top} (order_id, {ORDER_COLUMNS})
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                    ON CONFLICT (order_id) DO NOTHING
                    "#
                ))
                .bind(entry.order_id.as_i64())
                .bind(entry.user_id)
                .bind(entry.transaction_id.as_str())
                .bind(entry.price)
                .bind(entry.quantity)
                .bind(entry.trade_date)
                .bind(entry.trade_time)
                .bind(entry.transaction_type.as_i16() as i32)
                .bind(entry.match_type.as_i16() as i32)
                .bind(entry.market_lead_program)
                .bind(entry.project_id)
                .bind(entry.created_at)
                .execute(&mut **tx)
                .await?;
            }
            BookWrite::RemoveTop { side, order_id } => {
                let (_, top) = tables(side);
                sqlx::query(&format!("DELETE FROM {top} WHERE order_id = $1"))
                    .bind(order_id.as_i64())
                    .execute(&mut **tx)
                    .await?;
            }
            BookWrite::SetTopQuantity {
                side,
                order_id,
                quantity,
            } => {
                let (_, top) = tables(side);
                sqlx::query(&format!(
                    "UPDATE {top} SET quantity = $1 WHERE order_id = $2"
                ))
                .bind(quantity)
                .bind(order_id.as_i64())
                .execute(&mut **tx)
                .await?;
            }
            BookWrite::InsertMain { side, order } => {
                let (main, _) = tables(side);
                sqlx::query(&format!(
                    r#"
                    INSERT INTO {main} (id, {ORDER_COLUMNS})
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                    ON CONFLICT (id) DO NOTHING
                    "#
                ))
                .bind(order.id.as_i64())
                .bind(order.user_id)
                .bind(order.transaction_id.as_str())
                .bind(order.price)
                .bind(order.quantity)
                .bind(order.trade_date)
                .bind(order.trade_time)
                .bind(order.transaction_type.as_i16() as i32)
                .bind(order.match_type.as_i16() as i32)
                .bind(order.market_lead_program)
                .bind(order.project_id)
                .bind(order.created_at)
                .execute(&mut **tx)
                .await?;
            }
            BookWrite::RemoveMain { side, order_id } => {
                let (main, _) = tables(side);
                sqlx::query(&format!("DELETE FROM {main} WHERE id = $1"))
                    .bind(order_id.as_i64())
                    .execute(&mut **tx)
                    .await?;
            }
            BookWrite::SetMainQuantity {
                side,
                order_id,
                quantity,
            } => {
                let (main, _) = tables(side);
                sqlx::query(&format!("UPDATE {main} SET quantity = $1 WHERE id = $2"))
                    .bind(quantity)
                    .bind(order_id.as_i64())
                    .execute(&mut **tx)
                    .await?;
            }
            BookWrite::InsertTrade(record) => {
                let id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO matched_orders
                    (seller_price, buyer_price, seller_qty, buyer_qty, matched_qty,
                     seller_time, buyer_time, seller_date, buyer_date,
                     incoming_time, outgoing_time, time_taken, status, transaction_type,
                     buyer_order_id, seller_order_id, buyer_user_id, seller_user_id,
                     buyer_transaction_id, seller_transaction_id, project_id, is_multi_match)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                            $15, $16, $17, $18, $19, $20, $21, $22)
                    RETURNING id
                    "#,
                )
                .bind(record.seller_price)
                .bind(record.buyer_price)
                .bind(record.seller_qty)
                .bind(record.buyer_qty)
                .bind(record.matched_qty)
                .bind(record.seller_time)
                .bind(record.buyer_time)
                .bind(record.seller_date)
                .bind(record.buyer_date)
                .bind(record.incoming_time)
                .bind(record.outgoing_time)
                .bind(record.time_taken)
                .bind(record.status)
                .bind(record.transaction_type.as_i16() as i32)
                .bind(record.buyer_order_id.as_i64())
                .bind(record.seller_order_id.as_i64())
                .bind(record.buyer_user_id)
                .bind(record.seller_user_id)
                .bind(record.buyer_transaction_id.as_str())
                .bind(record.seller_transaction_id.as_str())
                .bind(record.project_id)
                .bind(record.is_multi_match)
                .fetch_one(&mut **tx)
                .await?;
                trade_ids.push(id);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeStore for PgStore {
    async fn create_order(&self, draft: OrderDraft) -> StoreResult<Order> {
        let (main, _) = tables(draft.side);
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO {main}
            (user_id, price, quantity, trade_date, trade_time, transaction_type,
             match_type, market_lead_program, project_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, transaction_id, created_at
            "#
        ))
        .bind(draft.user_id)
        .bind(draft.price)
        .bind(draft.quantity)
        .bind(draft.trade_date)
        .bind(draft.trade_time)
        .bind(draft.transaction_type.as_i16() as i32)
        .bind(draft.match_type.as_i16() as i32)
        .bind(draft.market_lead_program)
        .bind(draft.project_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Order {
            id: OrderId(row.try_get("id")?),
            transaction_id: TransactionId(row.try_get("transaction_id")?),
            user_id: draft.user_id,
            side: draft.side,
            price: draft.price,
            quantity: draft.quantity,
            trade_date: draft.trade_date,
            trade_time: draft.trade_time,
            transaction_type: draft.transaction_type,
            match_type: draft.match_type,
            market_lead_program: draft.market_lead_program,
            project_id: draft.project_id,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn apply(&self, writes: Vec<BookWrite>) -> StoreResult<Vec<i64>> {
        let mut tx = self.pool.begin().await?;
        let mut trade_ids = Vec::new();

        for write in writes {
            Self::execute_write(&mut tx, write, &mut trade_ids).await?;
        }

        tx.commit().await?;
        Ok(trade_ids)
    }

    async fn top_count(&self, side: Side) -> StoreResult<i64> {
        let (_, top) = tables(side);
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {top}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn top_entries(&self, side: Side, limit: i64) -> StoreResult<Vec<TopEntry>> {
        let (_, top) = tables(side);
        let rows = sqlx::query(&format!(
            "SELECT order_id, {ORDER_COLUMNS} FROM {top} ORDER BY {} LIMIT $1",
            priority_order(side)
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| entry_from_row(row).map_err(Into::into))
            .collect()
    }

    async fn main_orders(&self, side: Side, limit: i64) -> StoreResult<Vec<Order>> {
        let (main, _) = tables(side);
        let rows = sqlx::query(&format!(
            "SELECT id, {ORDER_COLUMNS} FROM {main} ORDER BY {} LIMIT $1",
            priority_order(side)
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| order_from_row(row, side, "id").map_err(Into::into))
            .collect()
    }

    async fn worst_top(&self, side: Side, exclude_mlp: bool) -> StoreResult<Option<TopEntry>> {
        let (_, top) = tables(side);
        let filter = if exclude_mlp {
            "WHERE market_lead_program = false"
        } else {
            ""
        };
        let row = sqlx::query(&format!(
            "SELECT order_id, {ORDER_COLUMNS} FROM {top} {filter} ORDER BY {} LIMIT 1",
            worst_first_order(side)
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(entry_from_row).transpose().map_err(Into::into)
    }

    async fn find_top(&self, side: Side, id: OrderId) -> StoreResult<Option<TopEntry>> {
        let (_, top) = tables(side);
        let row = sqlx::query(&format!(
            "SELECT order_id, {ORDER_COLUMNS} FROM {top} WHERE order_id = $1"
        ))
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(entry_from_row).transpose().map_err(Into::into)
    }

    async fn find_main(&self, side: Side, id: OrderId) -> StoreResult<Option<Order>> {
        let (main, _) = tables(side);
        let row = sqlx::query(&format!(
            "SELECT id, {ORDER_COLUMNS} FROM {main} WHERE id = $1"
        ))
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(|row| order_from_row(row, side, "id"))
            .transpose()
            .map_err(Into::into)
    }

    async fn orders(
        &self,
        side: Side,
        transaction_type: Option<TransactionType>,
    ) -> StoreResult<Vec<Order>> {
        let (main, _) = tables(side);
        let rows = match transaction_type {
            Some(tt) => {
                sqlx::query(&format!(
                    "SELECT id, {ORDER_COLUMNS} FROM {main} WHERE transaction_type = $1 \
                     ORDER BY {}",
                    priority_order(side)
                ))
                .bind(tt.as_i16() as i32)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT id, {ORDER_COLUMNS} FROM {main} ORDER BY {}",
                    priority_order(side)
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter()
            .map(|row| order_from_row(row, side, "id").map_err(Into::into))
            .collect()
    }

    async fn top_orders(
        &self,
        side: Side,
        transaction_type: TransactionType,
    ) -> StoreResult<Vec<Order>> {
        let (_, top) = tables(side);
        let rows = sqlx::query(&format!(
            "SELECT order_id, {ORDER_COLUMNS} FROM {top} WHERE transaction_type = $1 \
             ORDER BY {}",
            priority_order(side)
        ))
        .bind(transaction_type.as_i16() as i32)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| order_from_row(row, side, "order_id").map_err(Into::into))
            .collect()
    }

    async fn trades(&self) -> StoreResult<Vec<TradeRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRADE_COLUMNS} FROM matched_orders ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| trade_from_row(row).map_err(Into::into))
            .collect()
    }

    async fn trades_for_user(&self, user_id: i64) -> StoreResult<Vec<TradeRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRADE_COLUMNS} FROM matched_orders \
             WHERE buyer_user_id = $1 OR seller_user_id = $1 \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| trade_from_row(row).map_err(Into::into))
            .collect()
    }

    async fn day_mid_price(
        &self,
        project_id: i64,
        day: NaiveDate,
        point: TradePoint,
    ) -> StoreResult<Option<Decimal>> {
        let start = day.and_time(NaiveTime::MIN).and_utc();
        let end = (day + Days::new(1)).and_time(NaiveTime::MIN).and_utc();
        let direction = match point {
            TradePoint::Earliest => "ASC",
            TradePoint::Latest => "DESC",
        };

        let mid: Option<Decimal> = sqlx::query_scalar(&format!(
            "SELECT (buyer_price + seller_price) / 2 FROM matched_orders \
             WHERE project_id = $1 AND created_at >= $2 AND created_at < $3 \
             ORDER BY created_at {direction}, id {direction} LIMIT 1"
        ))
        .bind(project_id)
        .bind(start)
        .bind(end)
        .fetch_optional(&self.pool)
        .await?;

        Ok(mid)
    }

    async fn create_history(&self, history: BuyerHistory) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO buyer_order_history
            (buyer_order_id, buyer_user_id, buyer_transaction_id, original_price, original_qty,
             buyer_trade_date, buyer_trade_time, project_id, remaining_qty, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (buyer_order_id) DO NOTHING
            "#,
        )
        .bind(history.buyer_order_id.as_i64())
        .bind(history.buyer_user_id)
        .bind(history.buyer_transaction_id.as_str())
        .bind(history.original_price)
        .bind(history.original_qty)
        .bind(history.trade_date)
        .bind(history.trade_time)
        .bind(history.project_id)
        .bind(history.remaining_qty)
        .bind(history.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_history_fill(
        &self,
        buyer_order_id: OrderId,
        matched_qty: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE buyer_order_history
            SET total_matched_qty = total_matched_qty + $1,
                remaining_qty = remaining_qty - $1,
                match_count = match_count + 1,
                seller_count = seller_count + 1,
                updated_at = now(),
                status = CASE
                    WHEN remaining_qty - $1 <= 0 THEN 'Completed'
                    ELSE 'Partially Matched'
                END
            WHERE buyer_order_id = $2
            "#,
        )
        .bind(matched_qty)
        .bind(buyer_order_id.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_history_status(
        &self,
        buyer_order_id: OrderId,
        status: HistoryStatus,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE buyer_order_history SET status = $1, updated_at = now() \
             WHERE buyer_order_id = $2",
        )
        .bind(status.as_str())
        .bind(buyer_order_id.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn history(&self, buyer_order_id: OrderId) -> StoreResult<Option<BuyerHistory>> {
        let row = sqlx::query(&format!(
            "SELECT {HISTORY_COLUMNS} FROM buyer_order_history WHERE buyer_order_id = $1"
        ))
        .bind(buyer_order_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(history_from_row).transpose().map_err(Into::into)
    }

    async fn unmatched_histories(&self) -> StoreResult<Vec<BuyerHistory>> {
        let rows = sqlx::query(&format!(
            "SELECT {HISTORY_COLUMNS} FROM buyer_order_history \
             WHERE status IN ('Pending', 'Partially Matched') \
             ORDER BY updated_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| history_from_row(row).map_err(Into::into))
            .collect()
    }

    async fn insert_assignment(&self, assignment: MatchAssignment) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO match_assignments
            (buyer_order_id, seller_order_id, seller_user_id, seller_transaction_id,
             seller_total_qty, assigned_qty, seller_price, matched_order_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(assignment.buyer_order_id.as_i64())
        .bind(assignment.seller_order_id.as_i64())
        .bind(assignment.seller_user_id)
        .bind(assignment.seller_transaction_id.as_str())
        .bind(assignment.seller_total_qty)
        .bind(assignment.assigned_qty)
        .bind(assignment.seller_price)
        .bind(assignment.matched_order_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn assignments(&self, buyer_order_id: OrderId) -> StoreResult<Vec<MatchAssignment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, buyer_order_id, seller_order_id, seller_user_id, seller_transaction_id,
                   seller_total_qty, assigned_qty, seller_price, matched_order_id, assigned_at
            FROM match_assignments
            WHERE buyer_order_id = $1
            ORDER BY assigned_at ASC, id ASC
            "#,
        )
        .bind(buyer_order_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(MatchAssignment {
                    id: row.try_get("id")?,
                    buyer_order_id: OrderId(row.try_get("buyer_order_id")?),
                    seller_order_id: OrderId(row.try_get("seller_order_id")?),
                    seller_user_id: row.try_get("seller_user_id")?,
                    seller_transaction_id: TransactionId(row.try_get("seller_transaction_id")?),
                    seller_total_qty: row.try_get("seller_total_qty")?,
                    assigned_qty: row.try_get("assigned_qty")?,
                    seller_price: row.try_get("seller_price")?,
                    matched_order_id: row.try_get("matched_order_id")?,
                    assigned_at: row.try_get("assigned_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(Into::into)
    }

    async fn breaker_states(&self) -> StoreResult<Vec<BreakerState>> {
        let rows = sqlx::query(
            "SELECT project_id, threshold_percentage, is_halted, halted_at, day_open_price, \
             current_price, price_drop_percentage, last_checked \
             FROM project_circuit_breakers ORDER BY project_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| breaker_from_row(row).map_err(Into::into))
            .collect()
    }

    async fn armed_breakers(&self) -> StoreResult<Vec<BreakerState>> {
        let rows = sqlx::query(
            "SELECT project_id, threshold_percentage, is_halted, halted_at, day_open_price, \
             current_price, price_drop_percentage, last_checked \
             FROM project_circuit_breakers WHERE threshold_percentage > 0 ORDER BY project_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| breaker_from_row(row).map_err(Into::into))
            .collect()
    }

    async fn upsert_breaker_threshold(
        &self,
        project_id: i64,
        threshold: Decimal,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO project_circuit_breakers (project_id, threshold_percentage)
            VALUES ($1, $2)
            ON CONFLICT (project_id)
            DO UPDATE SET threshold_percentage = $2, last_checked = now()
            "#,
        )
        .bind(project_id)
        .bind(threshold)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_day_open_price(&self, project_id: i64, price: Decimal) -> StoreResult<()> {
        sqlx::query(
            "UPDATE project_circuit_breakers SET day_open_price = $1 WHERE project_id = $2",
        )
        .bind(price)
        .bind(project_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_breaker_prices(
        &self,
        project_id: i64,
        current: Decimal,
        drop_pct: Decimal,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE project_circuit_breakers \
             SET current_price = $1, price_drop_percentage = $2, last_checked = now() \
             WHERE project_id = $3",
        )
        .bind(current)
        .bind(drop_pct)
        .bind(project_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn halt_project(&self, project_id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE project_circuit_breakers SET is_halted = true, halted_at = now() \
             WHERE project_id = $1 AND is_halted = false",
        )
        .bind(project_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reset_breaker(&self, project_id: i64) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE project_circuit_breakers
            SET is_halted = false,
                halted_at = NULL,
                day_open_price = 0,
                current_price = 0,
                price_drop_percentage = 0,
                last_checked = now()
            WHERE project_id = $1
            "#,
        )
        .bind(project_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_stale_breakers(&self, today: NaiveDate) -> StoreResult<Vec<i64>> {
        let reset: Vec<i64> = sqlx::query_scalar(
            r#"
            UPDATE project_circuit_breakers
            SET is_halted = false,
                halted_at = NULL,
                day_open_price = 0,
                current_price = 0,
                price_drop_percentage = 0,
                last_checked = now()
            WHERE last_checked::date < $1
            RETURNING project_id
            "#,
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await?;
        Ok(reset)
    }

    async fn clear_all(&self) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        for table in [
            "match_assignments",
            "matched_orders",
            "buyer_order_history",
            "top_buyer",
            "top_seller",
            "buyer",
            "seller",
            "project_circuit_breakers",
        ] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(&format!(
            "ALTER SEQUENCE transaction_seq RESTART WITH {TRANSACTION_SEQUENCE_START}"
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
