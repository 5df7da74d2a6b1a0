//! Continuous matching loop.
//!
//! A session is single-threaded and cooperative: it repeatedly pulls the
//! best buyers from the top tier, finds compatible sellers, fills the first
//! matchable buyer inside one atomic batch, then restarts from a fresh
//! top-of-book pull. Bounding the scan to the top tiers keeps every pass at
//! O(buyers x sellers) regardless of total book size.
//!
//! Callers serialize sessions (and admissions) through the service's match
//! lock; an interrupted session leaves only committed batches behind.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use exchange_common::orders::{MatchType, Side, TopEntry};
use exchange_common::trades::{TradeRecord, TRADE_STATUS_CLOSED};

use crate::book::TwoTierBook;
use crate::breaker::CircuitBreaker;
use crate::ledger::{self, FillSlice};
use crate::store::{BookWrite, ExchangeStore, StoreResult};

/// How many buyers one pass considers, best first.
pub const TOP_BUYER_SCAN: i64 = 20;
/// How many sellers are pulled for each considered buyer.
pub const TOP_SELLER_SCAN: i64 = 50;

/// Result of one matching session.
#[derive(Debug, Clone, Copy)]
pub struct MatchOutcome {
    /// Completed buyer fills (each may span multiple sellers)
    pub matches: usize,
    /// Wall-clock duration of the session in milliseconds
    pub elapsed_ms: f64,
}

/// The matching engine over a shared store and book.
#[derive(Clone)]
pub struct Matcher {
    store: Arc<dyn ExchangeStore>,
    book: TwoTierBook,
    breaker: CircuitBreaker,
}

impl Matcher {
    pub fn new(store: Arc<dyn ExchangeStore>, book: TwoTierBook, breaker: CircuitBreaker) -> Self {
        Self {
            store,
            book,
            breaker,
        }
    }

    /// Run one matching batch to exhaustion.
    ///
    /// The breaker cache is refreshed once up front. Each successful fill
    /// restarts the scan from a fresh top-of-book pull; the batch ends when a
    /// full pass yields no match or either top side runs dry, rebuilding the
    /// top tiers before stopping so the next batch starts from a full book.
    pub async fn run_session(&self) -> StoreResult<MatchOutcome> {
        let session_start = Instant::now();

        if let Err(err) = self.breaker.refresh().await {
            warn!("Circuit breaker refresh failed: {}", err);
        }

        let mut matches = 0;
        loop {
            let buyers = self.store.top_count(Side::Buy).await?;
            let sellers = self.store.top_count(Side::Sell).await?;
            if buyers < 1 || sellers < 1 {
                self.book.full_sync(Side::Buy).await?;
                self.book.full_sync(Side::Sell).await?;
                break;
            }

            if self.match_once(session_start).await? {
                matches += 1;
            } else {
                // Orders on both sides but nothing pairs: rebuild the top
                // tiers and stop instead of spinning.
                if matches == 0 {
                    self.book.full_sync(Side::Buy).await?;
                    self.book.full_sync(Side::Sell).await?;
                }
                break;
            }
        }

        let elapsed_ms = session_start.elapsed().as_secs_f64() * 1000.0;
        if matches > 0 {
            info!("Batch complete: {} matches in {:.3}ms", matches, elapsed_ms);
        }
        Ok(MatchOutcome {
            matches,
            elapsed_ms,
        })
    }

    /// One pass over the top buyers. Fills the first buyer with a non-empty
    /// compatible seller list and reports whether a fill happened.
    async fn match_once(&self, session_start: Instant) -> StoreResult<bool> {
        let buyers = self.store.top_entries(Side::Buy, TOP_BUYER_SCAN).await?;

        for buyer in buyers {
            if self.breaker.is_halted(buyer.project_id) {
                debug!(
                    "Project {} halted, skipping buyer order {}",
                    buyer.project_id, buyer.order_id
                );
                continue;
            }

            let sellers = self.store.top_entries(Side::Sell, TOP_SELLER_SCAN).await?;
            let compatible: Vec<TopEntry> = sellers
                .into_iter()
                .filter(|seller| is_compatible(&buyer, seller))
                .collect();

            if compatible.is_empty() {
                continue;
            }

            self.fill_buyer(&buyer, &compatible, session_start).await?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Fill one buyer from its compatible sellers, best seller first, inside
    /// a single atomic batch, then run the post-commit work.
    async fn fill_buyer(
        &self,
        buyer: &TopEntry,
        sellers: &[TopEntry],
        session_start: Instant,
    ) -> StoreResult<()> {
        let mut writes = Vec::new();
        let mut mirrors = Vec::new();
        let mut slices: Vec<FillSlice> = Vec::new();
        let mut remaining = buyer.quantity;
        let mut delete_buyer = false;

        for seller in sellers {
            if remaining <= 0 {
                break;
            }

            let matched_qty = remaining.min(seller.quantity);
            let delete_seller = seller.quantity == matched_qty;
            if matched_qty == remaining {
                delete_buyer = true;
            }
            let is_multi = !slices.is_empty();

            writes.push(BookWrite::InsertTrade(trade_record(
                buyer,
                seller,
                matched_qty,
                is_multi,
                session_start,
            )));

            if delete_seller {
                writes.push(BookWrite::RemoveTop {
                    side: Side::Sell,
                    order_id: seller.order_id,
                });
            } else {
                let seller_remaining = seller.quantity - matched_qty;
                writes.push(BookWrite::SetTopQuantity {
                    side: Side::Sell,
                    order_id: seller.order_id,
                    quantity: seller_remaining,
                });
                mirrors.push(BookWrite::SetMainQuantity {
                    side: Side::Sell,
                    order_id: seller.order_id,
                    quantity: seller_remaining,
                });
            }

            slices.push(FillSlice {
                seller: seller.clone(),
                matched_qty,
            });
            remaining -= matched_qty;
        }

        if delete_buyer {
            writes.push(BookWrite::RemoveTop {
                side: Side::Buy,
                order_id: buyer.order_id,
            });
        } else {
            writes.push(BookWrite::SetTopQuantity {
                side: Side::Buy,
                order_id: buyer.order_id,
                quantity: remaining,
            });
            mirrors.push(BookWrite::SetMainQuantity {
                side: Side::Buy,
                order_id: buyer.order_id,
                quantity: remaining,
            });
        }

        let trade_ids = self.store.apply(writes).await?;
        debug!(
            "Filled buyer order {} with {} slices",
            buyer.order_id,
            slices.len()
        );

        // Post-commit work: mirror decrements into the main tier, ledger
        // rows, and tier refills.
        if !mirrors.is_empty() {
            if let Err(err) = self.store.apply(mirrors).await {
                warn!("Main-tier mirror update failed: {}", err);
            }
        }
        ledger::apply_fill_ledger(&self.store, buyer.order_id, &slices, &trade_ids).await;

        if delete_buyer {
            self.book.smart_sync(Side::Buy).await?;
        }
        self.book.smart_sync(Side::Sell).await?;

        Ok(())
    }
}

/// Compatibility of one (buyer, seller) pair: same project, compatible
/// transaction kinds, and the buyer's price rule. Best mode requires the
/// seller to be strictly cheaper; equality only matches in exact mode.
fn is_compatible(buyer: &TopEntry, seller: &TopEntry) -> bool {
    if buyer.project_id != seller.project_id {
        return false;
    }
    if !buyer
        .transaction_type
        .is_compatible_with(seller.transaction_type)
    {
        return false;
    }
    match buyer.match_type {
        MatchType::Exact => buyer.price == seller.price,
        MatchType::Best => buyer.price > seller.price,
    }
}

/// Build the trade record for one slice. Identifiers and the creation
/// timestamp are assigned by the store on insert.
fn trade_record(
    buyer: &TopEntry,
    seller: &TopEntry,
    matched_qty: i64,
    is_multi: bool,
    session_start: Instant,
) -> TradeRecord {
    TradeRecord {
        id: 0,
        seller_price: seller.price,
        buyer_price: buyer.price,
        seller_qty: seller.quantity,
        buyer_qty: buyer.quantity,
        matched_qty,
        seller_time: seller.trade_time,
        buyer_time: buyer.trade_time,
        seller_date: seller.trade_date,
        buyer_date: buyer.trade_date,
        incoming_time: buyer.created_at.min(seller.created_at),
        outgoing_time: buyer.created_at.max(seller.created_at),
        time_taken: format!("{:.3} ms", session_start.elapsed().as_secs_f64() * 1000.0),
        status: TRADE_STATUS_CLOSED.to_string(),
        transaction_type: buyer
            .transaction_type
            .resolve_with(seller.transaction_type),
        buyer_order_id: buyer.order_id,
        seller_order_id: seller.order_id,
        buyer_user_id: buyer.user_id,
        seller_user_id: seller.user_id,
        buyer_transaction_id: buyer.transaction_id.clone(),
        seller_transaction_id: seller.transaction_id.clone(),
        project_id: buyer.project_id,
        is_multi_match: is_multi,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use exchange_common::orders::{OrderId, TransactionId, TransactionType};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn entry(price: Decimal, transaction_type: TransactionType, project_id: i64) -> TopEntry {
        TopEntry {
            order_id: OrderId(1),
            user_id: 1,
            transaction_id: TransactionId::from_sequence(10_000_000),
            price,
            quantity: 5,
            trade_date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            trade_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            transaction_type,
            match_type: MatchType::Exact,
            market_lead_program: false,
            project_id,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_exact_mode_requires_equal_prices() {
        let buyer = entry(dec!(100), TransactionType::Standard, 1);
        let seller = entry(dec!(100), TransactionType::Standard, 1);
        assert!(is_compatible(&buyer, &seller));

        let cheaper = entry(dec!(99), TransactionType::Standard, 1);
        assert!(!is_compatible(&buyer, &cheaper));
    }

    #[test]
    fn test_best_mode_is_strictly_greater() {
        let mut buyer = entry(dec!(100), TransactionType::Standard, 1);
        buyer.match_type = MatchType::Best;

        let cheaper = entry(dec!(99.99), TransactionType::Standard, 1);
        assert!(is_compatible(&buyer, &cheaper));

        // Equality does not match in best mode
        let equal = entry(dec!(100), TransactionType::Standard, 1);
        assert!(!is_compatible(&buyer, &equal));

        let pricier = entry(dec!(101), TransactionType::Standard, 1);
        assert!(!is_compatible(&buyer, &pricier));
    }

    #[test]
    fn test_wildcard_kind_matches_everything() {
        let buyer = entry(dec!(100), TransactionType::Any, 1);
        let seller = entry(dec!(100), TransactionType::Bilateral, 1);
        assert!(is_compatible(&buyer, &seller));

        let strict_buyer = entry(dec!(100), TransactionType::Standard, 1);
        let wildcard_seller = entry(dec!(100), TransactionType::Any, 1);
        assert!(is_compatible(&strict_buyer, &wildcard_seller));

        let mismatched = entry(dec!(100), TransactionType::Bilateral, 1);
        assert!(!is_compatible(&strict_buyer, &mismatched));
    }

    #[test]
    fn test_projects_never_cross() {
        let buyer = entry(dec!(100), TransactionType::Standard, 1);
        let seller = entry(dec!(100), TransactionType::Standard, 2);
        assert!(!is_compatible(&buyer, &seller));
    }

    #[test]
    fn test_trade_record_times_and_type() {
        let mut buyer = entry(dec!(100), TransactionType::Any, 1);
        buyer.match_type = MatchType::Best;
        let mut seller = entry(dec!(95), TransactionType::Bilateral, 1);
        seller.order_id = OrderId(2);
        seller.created_at = buyer.created_at + chrono::Duration::seconds(5);

        let record = trade_record(&buyer, &seller, 5, false, Instant::now());

        assert_eq!(record.incoming_time, buyer.created_at);
        assert_eq!(record.outgoing_time, seller.created_at);
        assert_eq!(record.transaction_type, TransactionType::Bilateral);
        assert_eq!(record.status, TRADE_STATUS_CLOSED);
        assert!(record.time_taken.ends_with("ms"));
        assert!(!record.is_multi_match);
    }
}
