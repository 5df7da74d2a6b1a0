//! In-memory store used by the test suites and local runs.
//!
//! All tables live behind one mutex, so every [`apply`] batch is trivially
//! atomic. Identifier sequences are plain counters under the same lock.
//!
//! [`apply`]: crate::store::ExchangeStore::apply

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use exchange_common::orders::{
    HistoryStatus, Order, OrderDraft, OrderId, Side, TopEntry, TransactionId, TransactionType,
    TRANSACTION_SEQUENCE_START,
};
use exchange_common::trades::{BreakerState, BuyerHistory, MatchAssignment, TradeRecord};

use crate::book::cmp_priority;

use super::{BookWrite, ExchangeStore, StoreResult, TradePoint};

#[derive(Default)]
struct SideTables {
    main: HashMap<i64, Order>,
    top: HashMap<i64, TopEntry>,
}

struct Inner {
    buy: SideTables,
    sell: SideTables,
    trades: Vec<TradeRecord>,
    assignments: Vec<MatchAssignment>,
    histories: HashMap<i64, BuyerHistory>,
    breakers: HashMap<i64, BreakerState>,
    next_order_id: i64,
    next_trade_id: i64,
    next_assignment_id: i64,
    next_history_id: i64,
    next_transaction_seq: i64,
}

impl Inner {
    fn new() -> Self {
        Self {
            buy: SideTables::default(),
            sell: SideTables::default(),
            trades: Vec::new(),
            assignments: Vec::new(),
            histories: HashMap::new(),
            breakers: HashMap::new(),
            next_order_id: 1,
            next_trade_id: 1,
            next_assignment_id: 1,
            next_history_id: 1,
            next_transaction_seq: TRANSACTION_SEQUENCE_START,
        }
    }

    fn side(&self, side: Side) -> &SideTables {
        match side {
            Side::Buy => &self.buy,
            Side::Sell => &self.sell,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut SideTables {
        match side {
            Side::Buy => &mut self.buy,
            Side::Sell => &mut self.sell,
        }
    }

    fn sorted_top(&self, side: Side) -> Vec<TopEntry> {
        let mut entries: Vec<TopEntry> = self.side(side).top.values().cloned().collect();
        entries.sort_by(|a, b| cmp_priority(side, a, b));
        entries
    }

    fn sorted_main(&self, side: Side) -> Vec<Order> {
        let mut orders: Vec<Order> = self.side(side).main.values().cloned().collect();
        orders.sort_by(|a, b| {
            cmp_priority(side, &TopEntry::from_order(a), &TopEntry::from_order(b))
        });
        orders
    }
}

/// Lock-protected in-memory implementation of [`ExchangeStore`].
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeStore for MemoryStore {
    async fn create_order(&self, draft: OrderDraft) -> StoreResult<Order> {
        let mut inner = self.inner.lock();

        let id = inner.next_order_id;
        inner.next_order_id += 1;
        let seq = inner.next_transaction_seq;
        inner.next_transaction_seq += 1;

        let order = Order {
            id: OrderId(id),
            transaction_id: TransactionId::from_sequence(seq),
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
            created_at: Utc::now(),
        };

        inner
            .side_mut(draft.side)
            .main
            .insert(id, order.clone());
        Ok(order)
    }

    async fn apply(&self, writes: Vec<BookWrite>) -> StoreResult<Vec<i64>> {
        let mut inner = self.inner.lock();
        let mut trade_ids = Vec::new();

        for write in writes {
            match write {
                BookWrite::InsertTop { side, entry } => {
                    inner
                        .side_mut(side)
                        .top
                        .entry(entry.order_id.as_i64())
                        .or_insert(entry);
                }
                BookWrite::RemoveTop { side, order_id } => {
                    inner.side_mut(side).top.remove(&order_id.as_i64());
                }
                BookWrite::SetTopQuantity {
                    side,
                    order_id,
                    quantity,
                } => {
                    if let Some(entry) = inner.side_mut(side).top.get_mut(&order_id.as_i64()) {
                        entry.quantity = quantity;
                    }
                }
                BookWrite::InsertMain { side, order } => {
                    inner
                        .side_mut(side)
                        .main
                        .entry(order.id.as_i64())
                        .or_insert(order);
                }
                BookWrite::RemoveMain { side, order_id } => {
                    inner.side_mut(side).main.remove(&order_id.as_i64());
                }
                BookWrite::SetMainQuantity {
                    side,
                    order_id,
                    quantity,
                } => {
                    if let Some(order) = inner.side_mut(side).main.get_mut(&order_id.as_i64()) {
                        order.quantity = quantity;
                    }
                }
                BookWrite::InsertTrade(mut record) => {
                    record.id = inner.next_trade_id;
                    inner.next_trade_id += 1;
                    record.created_at = Utc::now();
                    trade_ids.push(record.id);
                    inner.trades.push(record);
                }
            }
        }

        Ok(trade_ids)
    }

    async fn top_count(&self, side: Side) -> StoreResult<i64> {
        Ok(self.inner.lock().side(side).top.len() as i64)
    }

    async fn top_entries(&self, side: Side, limit: i64) -> StoreResult<Vec<TopEntry>> {
        let mut entries = self.inner.lock().sorted_top(side);
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }

    async fn main_orders(&self, side: Side, limit: i64) -> StoreResult<Vec<Order>> {
        let mut orders = self.inner.lock().sorted_main(side);
        orders.truncate(limit.max(0) as usize);
        Ok(orders)
    }

    async fn worst_top(&self, side: Side, exclude_mlp: bool) -> StoreResult<Option<TopEntry>> {
        let inner = self.inner.lock();
        let worst = inner
            .side(side)
            .top
            .values()
            .filter(|entry| !exclude_mlp || !entry.market_lead_program)
            .max_by(|a, b| cmp_priority(side, a, b))
            .cloned();
        Ok(worst)
    }

    async fn find_top(&self, side: Side, id: OrderId) -> StoreResult<Option<TopEntry>> {
        Ok(self.inner.lock().side(side).top.get(&id.as_i64()).cloned())
    }

    async fn find_main(&self, side: Side, id: OrderId) -> StoreResult<Option<Order>> {
        Ok(self.inner.lock().side(side).main.get(&id.as_i64()).cloned())
    }

    async fn orders(
        &self,
        side: Side,
        transaction_type: Option<TransactionType>,
    ) -> StoreResult<Vec<Order>> {
        let orders = self
            .inner
            .lock()
            .sorted_main(side)
            .into_iter()
            .filter(|order| transaction_type.map_or(true, |tt| order.transaction_type == tt))
            .collect();
        Ok(orders)
    }

    async fn top_orders(
        &self,
        side: Side,
        transaction_type: TransactionType,
    ) -> StoreResult<Vec<Order>> {
        let orders = self
            .inner
            .lock()
            .sorted_top(side)
            .into_iter()
            .filter(|entry| entry.transaction_type == transaction_type)
            .map(|entry| entry.into_order(side))
            .collect();
        Ok(orders)
    }

    async fn trades(&self) -> StoreResult<Vec<TradeRecord>> {
        let mut trades = self.inner.lock().trades.clone();
        trades.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(trades)
    }

    async fn trades_for_user(&self, user_id: i64) -> StoreResult<Vec<TradeRecord>> {
        let mut trades: Vec<TradeRecord> = self
            .inner
            .lock()
            .trades
            .iter()
            .filter(|t| t.buyer_user_id == user_id || t.seller_user_id == user_id)
            .cloned()
            .collect();
        trades.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(trades)
    }

    async fn day_mid_price(
        &self,
        project_id: i64,
        day: NaiveDate,
        point: TradePoint,
    ) -> StoreResult<Option<Decimal>> {
        let inner = self.inner.lock();
        let mut of_day: Vec<&TradeRecord> = inner
            .trades
            .iter()
            .filter(|t| t.project_id == project_id && t.created_at.date_naive() == day)
            .collect();
        of_day.sort_by_key(|t| (t.created_at, t.id));

        let record = match point {
            TradePoint::Earliest => of_day.first(),
            TradePoint::Latest => of_day.last(),
        };
        Ok(record.map(|t| t.mid_price()))
    }

    async fn create_history(&self, mut history: BuyerHistory) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let key = history.buyer_order_id.as_i64();
        if inner.histories.contains_key(&key) {
            return Ok(());
        }
        history.id = inner.next_history_id;
        inner.next_history_id += 1;
        inner.histories.insert(key, history);
        Ok(())
    }

    async fn apply_history_fill(
        &self,
        buyer_order_id: OrderId,
        matched_qty: i64,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(history) = inner.histories.get_mut(&buyer_order_id.as_i64()) {
            history.apply_fill(matched_qty, Utc::now());
        }
        Ok(())
    }

    async fn set_history_status(
        &self,
        buyer_order_id: OrderId,
        status: HistoryStatus,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(history) = inner.histories.get_mut(&buyer_order_id.as_i64()) {
            history.status = status;
            history.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn history(&self, buyer_order_id: OrderId) -> StoreResult<Option<BuyerHistory>> {
        Ok(self
            .inner
            .lock()
            .histories
            .get(&buyer_order_id.as_i64())
            .cloned())
    }

    async fn unmatched_histories(&self) -> StoreResult<Vec<BuyerHistory>> {
        let mut open: Vec<BuyerHistory> = self
            .inner
            .lock()
            .histories
            .values()
            .filter(|h| h.status.is_open())
            .cloned()
            .collect();
        open.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(open)
    }

    async fn insert_assignment(&self, mut assignment: MatchAssignment) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        assignment.id = inner.next_assignment_id;
        inner.next_assignment_id += 1;
        assignment.assigned_at = Utc::now();
        inner.assignments.push(assignment);
        Ok(())
    }

    async fn assignments(&self, buyer_order_id: OrderId) -> StoreResult<Vec<MatchAssignment>> {
        let mut rows: Vec<MatchAssignment> = self
            .inner
            .lock()
            .assignments
            .iter()
            .filter(|a| a.buyer_order_id == buyer_order_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.assigned_at, a.id));
        Ok(rows)
    }

    async fn breaker_states(&self) -> StoreResult<Vec<BreakerState>> {
        let mut states: Vec<BreakerState> = self.inner.lock().breakers.values().cloned().collect();
        states.sort_by_key(|s| s.project_id);
        Ok(states)
    }

    async fn armed_breakers(&self) -> StoreResult<Vec<BreakerState>> {
        let mut states: Vec<BreakerState> = self
            .inner
            .lock()
            .breakers
            .values()
            .filter(|s| s.threshold_percentage > Decimal::ZERO)
            .cloned()
            .collect();
        states.sort_by_key(|s| s.project_id);
        Ok(states)
    }

    async fn upsert_breaker_threshold(
        &self,
        project_id: i64,
        threshold: Decimal,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner
            .breakers
            .entry(project_id)
            .and_modify(|state| {
                state.threshold_percentage = threshold;
                state.last_checked = Utc::now();
            })
            .or_insert_with(|| BreakerState::with_threshold(project_id, threshold));
        Ok(())
    }

    async fn set_day_open_price(&self, project_id: i64, price: Decimal) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.breakers.get_mut(&project_id) {
            state.day_open_price = price;
        }
        Ok(())
    }

    async fn record_breaker_prices(
        &self,
        project_id: i64,
        current: Decimal,
        drop_pct: Decimal,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.breakers.get_mut(&project_id) {
            state.current_price = current;
            state.price_drop_percentage = drop_pct;
            state.last_checked = Utc::now();
        }
        Ok(())
    }

    async fn halt_project(&self, project_id: i64) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        match inner.breakers.get_mut(&project_id) {
            Some(state) if !state.is_halted => {
                state.is_halted = true;
                state.halted_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_breaker(&self, project_id: i64) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.breakers.get_mut(&project_id) {
            state.is_halted = false;
            state.halted_at = None;
            state.day_open_price = Decimal::ZERO;
            state.current_price = Decimal::ZERO;
            state.price_drop_percentage = Decimal::ZERO;
            state.last_checked = Utc::now();
        }
        Ok(())
    }

    async fn reset_stale_breakers(&self, today: NaiveDate) -> StoreResult<Vec<i64>> {
        let mut inner = self.inner.lock();
        let mut reset = Vec::new();
        for state in inner.breakers.values_mut() {
            if state.last_checked.date_naive() < today {
                state.is_halted = false;
                state.halted_at = None;
                state.day_open_price = Decimal::ZERO;
                state.current_price = Decimal::ZERO;
                state.price_drop_percentage = Decimal::ZERO;
                state.last_checked = Utc::now();
                reset.push(state.project_id);
            }
        }
        Ok(reset)
    }

    async fn clear_all(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        *inner = Inner::new();
        Ok(())
    }
}
