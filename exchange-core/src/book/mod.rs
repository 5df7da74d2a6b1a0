//! Two-tier priority order book.
//!
//! Each side is split into a bounded *top* tier (up to [`TOP_CAPACITY`]
//! entries, the only tier the matching loop reads) and an unbounded *main*
//! tier. Admission keeps the top tier equal to the K best orders of the side
//! under the priority key, evicting the worst entry when a strictly better
//! order arrives. MLP orders bypass the price check entirely.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use exchange_common::error::EntityError;
use exchange_common::orders::{Order, OrderDraft, OrderId, Side, TopEntry};

use crate::store::{BookWrite, ExchangeStore, StoreError, StoreResult};

/// Maximum number of orders per side in the top tier.
pub const TOP_CAPACITY: usize = 10;

/// Total priority order over one side of the book. `Less` means higher
/// priority.
///
/// Buyers rank by `(not MLP, -price, -quantity, trade_date, trade_time)`,
/// sellers by `(not MLP, price, -quantity, trade_date, trade_time)`;
/// `created_at` breaks any remaining tie (older wins).
pub fn cmp_priority(side: Side, a: &TopEntry, b: &TopEntry) -> Ordering {
    let price_order = match side {
        Side::Buy => b.price.cmp(&a.price),
        Side::Sell => a.price.cmp(&b.price),
    };

    (!a.market_lead_program)
        .cmp(&!b.market_lead_program)
        .then(price_order)
        .then_with(|| b.quantity.cmp(&a.quantity))
        .then_with(|| a.trade_date.cmp(&b.trade_date))
        .then_with(|| a.trade_time.cmp(&b.trade_time))
        .then_with(|| a.created_at.cmp(&b.created_at))
}

/// Outcome of an admission.
#[derive(Debug, Clone)]
pub struct Admission {
    /// The created order with its store-assigned identifiers
    pub order: Order,
    /// Whether the order entered the top tier
    pub promoted: bool,
}

/// Which tier a cancelled order was removed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Top,
    Main,
}

/// The two-tier book over a shared store.
///
/// Callers serialize admissions, cancellations and syncs against matching
/// sessions; the book itself only issues atomic store batches.
#[derive(Clone)]
pub struct TwoTierBook {
    store: Arc<dyn ExchangeStore>,
}

impl TwoTierBook {
    pub fn new(store: Arc<dyn ExchangeStore>) -> Self {
        Self { store }
    }

    /// Admit a validated submission: create it in the main tier, then promote
    /// it into the top tier when it qualifies, evicting the worst entry.
    pub async fn admit(&self, draft: OrderDraft) -> StoreResult<Admission> {
        let order = self.store.create_order(draft).await?;
        let side = order.side;

        info!(
            "New {} order #{}{} (txn: {}, price: {}, qty: {}, project: {})",
            side.role(),
            order.id,
            if order.market_lead_program { " [MLP]" } else { "" },
            order.transaction_id,
            order.price,
            order.quantity,
            order.project_id,
        );

        let top_count = self.store.top_count(side).await? as usize;
        let incoming = TopEntry::from_order(&order);

        if top_count < TOP_CAPACITY {
            debug!(
                "Top {} tier has {}/{} entries, promoting order #{}",
                side.role(),
                top_count,
                TOP_CAPACITY,
                order.id
            );
            self.store
                .apply(vec![
                    BookWrite::RemoveMain {
                        side,
                        order_id: order.id,
                    },
                    BookWrite::InsertTop {
                        side,
                        entry: incoming,
                    },
                ])
                .await?;
            return Ok(Admission {
                order,
                promoted: true,
            });
        }

        // Full top tier: find the eviction candidate. MLP orders displace the
        // worst non-MLP entry (or the overall worst when every entry is MLP)
        // and always qualify; everyone else must strictly beat the worst.
        let worst = if order.market_lead_program {
            match self.store.worst_top(side, true).await? {
                Some(entry) => Some(entry),
                None => self.store.worst_top(side, false).await?,
            }
        } else {
            self.store.worst_top(side, false).await?
        };

        let Some(worst) = worst else {
            return Ok(Admission {
                order,
                promoted: false,
            });
        };

        let qualifies = order.market_lead_program
            || cmp_priority(side, &incoming, &worst) == Ordering::Less;

        if !qualifies {
            debug!(
                "Order #{} stays in the main {} tier (does not beat top entry #{})",
                order.id,
                side.role(),
                worst.order_id
            );
            return Ok(Admission {
                order,
                promoted: false,
            });
        }

        let evicted_id = worst.order_id;
        let demoted = worst.into_order(side);
        self.store
            .apply(vec![
                BookWrite::InsertMain {
                    side,
                    order: demoted,
                },
                BookWrite::RemoveTop {
                    side,
                    order_id: evicted_id,
                },
                BookWrite::RemoveMain {
                    side,
                    order_id: order.id,
                },
                BookWrite::InsertTop {
                    side,
                    entry: incoming,
                },
            ])
            .await?;

        info!(
            "Order #{} promoted to top {} tier, evicting #{}",
            order.id,
            side.role(),
            evicted_id
        );
        Ok(Admission {
            order,
            promoted: true,
        })
    }

    /// Top up the top tier from the main tier when it has fallen below
    /// capacity. Returns how many orders moved.
    pub async fn smart_sync(&self, side: Side) -> StoreResult<usize> {
        let count = self.store.top_count(side).await? as usize;
        if count >= TOP_CAPACITY {
            return Ok(0);
        }

        let needed = (TOP_CAPACITY - count) as i64;
        let candidates = self.store.main_orders(side, needed).await?;
        if candidates.is_empty() {
            return Ok(0);
        }

        let mut writes = Vec::with_capacity(candidates.len() * 2);
        for order in &candidates {
            writes.push(BookWrite::RemoveMain {
                side,
                order_id: order.id,
            });
            writes.push(BookWrite::InsertTop {
                side,
                entry: TopEntry::from_order(order),
            });
        }

        let moved = candidates.len();
        self.store.apply(writes).await?;
        debug!("Smart sync promoted {} {} orders", moved, side.role());
        Ok(moved)
    }

    /// Recompute the top tier from scratch: the K best orders of the whole
    /// side end up in top, everything else in main. A second consecutive run
    /// performs no writes.
    pub async fn full_sync(&self, side: Side) -> StoreResult<()> {
        let top = self.store.top_entries(side, i64::MAX).await?;
        let main = self.store.main_orders(side, i64::MAX).await?;

        let mut all: Vec<TopEntry> = top.clone();
        all.extend(main.iter().map(TopEntry::from_order));
        all.sort_by(|a, b| cmp_priority(side, a, b));

        let desired: HashSet<OrderId> = all
            .iter()
            .take(TOP_CAPACITY)
            .map(|entry| entry.order_id)
            .collect();

        let mut writes = Vec::new();
        for entry in top {
            if !desired.contains(&entry.order_id) {
                writes.push(BookWrite::RemoveTop {
                    side,
                    order_id: entry.order_id,
                });
                writes.push(BookWrite::InsertMain {
                    side,
                    order: entry.into_order(side),
                });
            }
        }
        for order in main {
            if desired.contains(&order.id) {
                writes.push(BookWrite::RemoveMain {
                    side,
                    order_id: order.id,
                });
                writes.push(BookWrite::InsertTop {
                    side,
                    entry: TopEntry::from_order(&order),
                });
            }
        }

        if !writes.is_empty() {
            debug!("Full sync rebuilt top {} tier", side.role());
            self.store.apply(writes).await?;
        }
        Ok(())
    }

    /// Remove an order from whichever tier holds it. Fails with a not-found
    /// error when neither tier has it, leaving the book untouched.
    pub async fn cancel(&self, side: Side, id: OrderId) -> StoreResult<Tier> {
        if self.store.find_top(side, id).await?.is_some() {
            self.store
                .apply(vec![BookWrite::RemoveTop {
                    side,
                    order_id: id,
                }])
                .await?;
            return Ok(Tier::Top);
        }

        if self.store.find_main(side, id).await?.is_some() {
            self.store
                .apply(vec![BookWrite::RemoveMain {
                    side,
                    order_id: id,
                }])
                .await?;
            return Ok(Tier::Main);
        }

        Err(StoreError::Entity(EntityError::not_found(
            "Order",
            id.to_string(),
        )))
    }
}
