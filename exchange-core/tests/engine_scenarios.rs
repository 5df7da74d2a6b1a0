//! End-to-end matching scenarios driven through the service facade over the
//! in-memory store.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use exchange_core::orders::{HistoryStatus, OrderId, OrderRequest, Side, TransactionType};
use exchange_core::service::ExchangeService;
use exchange_core::store::MemoryStore;
use exchange_core::trades::TradeRecord;

fn service() -> Arc<ExchangeService> {
    ExchangeService::new(Arc::new(MemoryStore::new()), true)
}

fn request(role: &str, price: Decimal, quantity: i64, project_id: i64) -> OrderRequest {
    OrderRequest {
        role: role.to_string(),
        user_id: if role == "buyer" { 1 } else { 2 },
        price,
        quantity,
        trade_date: "2024-06-03".to_string(),
        trade_time: "09:00:00".to_string(),
        transaction_type: 0,
        match_type: 0,
        market_lead_program: false,
        project_id: Some(project_id),
    }
}

fn by_id(mut trades: Vec<TradeRecord>) -> Vec<TradeRecord> {
    trades.sort_by_key(|t| t.id);
    trades
}

#[tokio::test]
async fn exact_match_with_equal_quantities_completes_both_sides() {
    let service = service();

    let seller = service
        .submit_order(request("seller", dec!(100.00), 5, 1))
        .await
        .unwrap();
    let buyer = service
        .submit_order(request("buyer", dec!(100.00), 5, 1))
        .await
        .unwrap();

    let trades = service.matched_orders().await.unwrap();
    assert_eq!(trades.len(), 1);
    let trade = &trades[0];
    assert_eq!(trade.matched_qty, 5);
    assert_eq!(trade.buyer_price, dec!(100.00));
    assert_eq!(trade.seller_price, dec!(100.00));
    assert_eq!(trade.buyer_order_id, buyer.id);
    assert_eq!(trade.seller_order_id, seller.id);
    assert_eq!(trade.status, "Closed");
    assert_eq!(trade.project_id, 1);
    assert!(!trade.is_multi_match);

    // Both orders consumed from the top tiers
    assert!(service
        .top_orders(Side::Buy, TransactionType::Standard)
        .await
        .unwrap()
        .is_empty());
    assert!(service
        .top_orders(Side::Sell, TransactionType::Standard)
        .await
        .unwrap()
        .is_empty());

    let history = service.buyer_history(buyer.id).await.unwrap();
    assert_eq!(history.status, HistoryStatus::Completed);
    assert_eq!(history.total_matched_qty, 5);
    assert_eq!(history.remaining_qty, 0);
    assert_eq!(history.match_count, 1);
    assert_eq!(history.seller_count, 1);
}

#[tokio::test]
async fn best_price_buyer_fills_across_multiple_sellers() {
    let service = service();

    let seller_one = service
        .submit_order(request("seller", dec!(100.00), 4, 1))
        .await
        .unwrap();
    let seller_two = service
        .submit_order(request("seller", dec!(105.00), 7, 1))
        .await
        .unwrap();

    let mut buyer_request = request("buyer", dec!(110.00), 10, 1);
    buyer_request.match_type = 1;
    let buyer = service.submit_order(buyer_request).await.unwrap();

    let trades = by_id(service.matched_orders().await.unwrap());
    assert_eq!(trades.len(), 2);

    // Cheapest seller fills first and is not part of a multi fill yet
    assert_eq!(trades[0].seller_order_id, seller_one.id);
    assert_eq!(trades[0].matched_qty, 4);
    assert!(!trades[0].is_multi_match);

    assert_eq!(trades[1].seller_order_id, seller_two.id);
    assert_eq!(trades[1].matched_qty, 6);
    assert!(trades[1].is_multi_match);

    // The second seller keeps its remainder in the top tier
    let asks = service
        .top_orders(Side::Sell, TransactionType::Standard)
        .await
        .unwrap();
    assert_eq!(asks.len(), 1);
    assert_eq!(asks[0].id, seller_two.id);
    assert_eq!(asks[0].quantity, 1);

    let history = service.buyer_history(buyer.id).await.unwrap();
    assert_eq!(history.status, HistoryStatus::Completed);
    assert_eq!(history.total_matched_qty, 10);
    assert_eq!(history.match_count, 2);
    assert_eq!(history.seller_count, 2);

    // Assignments mirror the trades
    let assignments = service.match_assignments(buyer.id).await.unwrap();
    assert_eq!(assignments.len(), 2);
    for assignment in &assignments {
        let trade = trades
            .iter()
            .find(|t| t.id == assignment.matched_order_id)
            .expect("assignment points at an existing trade record");
        assert_eq!(trade.buyer_order_id, assignment.buyer_order_id);
        assert_eq!(trade.seller_order_id, assignment.seller_order_id);
        assert_eq!(trade.seller_price, assignment.seller_price);
        assert_eq!(trade.matched_qty, assignment.assigned_qty);
    }
}

#[tokio::test]
async fn partially_filled_buyer_stays_in_the_book() {
    let service = service();

    service
        .submit_order(request("seller", dec!(100.00), 3, 1))
        .await
        .unwrap();
    service
        .submit_order(request("seller", dec!(100.00), 3, 1))
        .await
        .unwrap();
    let buyer = service
        .submit_order(request("buyer", dec!(100.00), 10, 1))
        .await
        .unwrap();

    let trades = service.matched_orders().await.unwrap();
    assert_eq!(trades.len(), 2);
    let total: i64 = trades.iter().map(|t| t.matched_qty).sum();
    assert_eq!(total, 6);

    // The buyer remains on top with the residual quantity
    let bids = service
        .top_orders(Side::Buy, TransactionType::Standard)
        .await
        .unwrap();
    assert_eq!(bids.len(), 1);
    assert_eq!(bids[0].id, buyer.id);
    assert_eq!(bids[0].quantity, 4);

    let history = service.buyer_history(buyer.id).await.unwrap();
    assert_eq!(history.status, HistoryStatus::PartiallyMatched);
    assert_eq!(history.total_matched_qty, 6);
    assert_eq!(history.remaining_qty, 4);

    // Unmatched listing still carries the buyer
    let open = service.unmatched_buyer_orders().await.unwrap();
    assert!(open.iter().any(|h| h.buyer_order_id == buyer.id));
}

#[tokio::test]
async fn orders_never_match_across_projects() {
    let service = service();

    service
        .submit_order(request("seller", dec!(100.00), 5, 2))
        .await
        .unwrap();
    service
        .submit_order(request("buyer", dec!(100.00), 5, 1))
        .await
        .unwrap();

    assert!(service.matched_orders().await.unwrap().is_empty());
}

#[tokio::test]
async fn exact_mode_rejects_unequal_prices() {
    let service = service();

    service
        .submit_order(request("seller", dec!(99.00), 5, 1))
        .await
        .unwrap();
    service
        .submit_order(request("buyer", dec!(100.00), 5, 1))
        .await
        .unwrap();

    assert!(service.matched_orders().await.unwrap().is_empty());
}

#[tokio::test]
async fn best_mode_rejects_equal_prices() {
    let service = service();

    service
        .submit_order(request("seller", dec!(100.00), 5, 1))
        .await
        .unwrap();
    let mut buyer = request("buyer", dec!(100.00), 5, 1);
    buyer.match_type = 1;
    service.submit_order(buyer).await.unwrap();

    assert!(service.matched_orders().await.unwrap().is_empty());
}

#[tokio::test]
async fn wildcard_kind_matches_and_records_the_concrete_kind() {
    let service = service();

    let mut seller = request("seller", dec!(100.00), 5, 1);
    seller.transaction_type = 1;
    service.submit_order(seller).await.unwrap();

    let mut buyer = request("buyer", dec!(100.00), 5, 1);
    buyer.transaction_type = 2;
    service.submit_order(buyer).await.unwrap();

    let trades = service.matched_orders().await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].transaction_type, TransactionType::Bilateral);
}

#[tokio::test]
async fn transaction_ids_stay_monotone_across_sides() {
    let service = service();

    let mut previous: Option<i64> = None;
    for role in ["buyer", "seller", "buyer", "seller"] {
        // Distinct projects keep the book from matching mid-test
        let project = if role == "buyer" { 11 } else { 12 };
        let order = service
            .submit_order(request(role, dec!(100.00), 5, project))
            .await
            .unwrap();

        assert_eq!(order.transaction_id.as_str().len(), 8);
        let value: i64 = order.transaction_id.as_str().parse().unwrap();
        if let Some(prev) = previous {
            assert!(value > prev, "transaction ids must be strictly monotone");
        }
        previous = Some(value);
    }
}

#[tokio::test]
async fn cancelled_buyer_leaves_the_book_and_flags_its_history() {
    let service = service();

    let buyer = service
        .submit_order(request("buyer", dec!(100.00), 5, 1))
        .await
        .unwrap();

    service.cancel_order(Side::Buy, buyer.id).await.unwrap();

    assert!(service
        .top_orders(Side::Buy, TransactionType::Standard)
        .await
        .unwrap()
        .is_empty());
    let history = service.buyer_history(buyer.id).await.unwrap();
    assert_eq!(history.status, HistoryStatus::Cancelled);

    // A second cancellation finds nothing
    let err = service.cancel_order(Side::Buy, buyer.id).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn circuit_breaker_halts_and_resumes_a_project() {
    let service = service();
    let project = 7;

    service
        .set_breaker_threshold(project, dec!(10))
        .await
        .unwrap();

    // First trade of the day at 100 establishes the day open
    service
        .submit_order(request("seller", dec!(100.00), 5, project))
        .await
        .unwrap();
    service
        .submit_order(request("buyer", dec!(100.00), 5, project))
        .await
        .unwrap();
    assert_eq!(service.matched_orders().await.unwrap().len(), 1);

    // An 11% drop trades through (the halt is only detected afterwards)
    service
        .submit_order(request("seller", dec!(89.00), 5, project))
        .await
        .unwrap();
    service
        .submit_order(request("buyer", dec!(89.00), 5, project))
        .await
        .unwrap();
    assert_eq!(service.matched_orders().await.unwrap().len(), 2);

    // The next evaluation halts the project
    service.run_breaker_maintenance().await.unwrap();
    let state = service
        .breaker_statuses()
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.project_id == project)
        .unwrap();
    assert!(state.is_halted);
    assert!(state.halted_at.is_some());
    assert_eq!(state.day_open_price, dec!(100));
    assert_eq!(state.current_price, dec!(89));
    assert_eq!(state.price_drop_percentage, dec!(11));

    // A matchable pair on the halted project produces no trade
    service
        .submit_order(request("seller", dec!(89.00), 5, project))
        .await
        .unwrap();
    service
        .submit_order(request("buyer", dec!(89.00), 5, project))
        .await
        .unwrap();
    assert_eq!(service.matched_orders().await.unwrap().len(), 2);

    // Manual reset plus a wider threshold lets trading resume
    service.reset_breaker(project).await.unwrap();
    service
        .set_breaker_threshold(project, dec!(50))
        .await
        .unwrap();
    service.trigger_matching().await.unwrap();
    assert_eq!(service.matched_orders().await.unwrap().len(), 3);
}

#[tokio::test]
async fn halted_project_does_not_block_other_projects() {
    let service = service();

    service.set_breaker_threshold(3, dec!(10)).await.unwrap();

    // Establish and crash project 3's price
    service
        .submit_order(request("seller", dec!(100.00), 5, 3))
        .await
        .unwrap();
    service
        .submit_order(request("buyer", dec!(100.00), 5, 3))
        .await
        .unwrap();
    service
        .submit_order(request("seller", dec!(80.00), 5, 3))
        .await
        .unwrap();
    service
        .submit_order(request("buyer", dec!(80.00), 5, 3))
        .await
        .unwrap();
    service.run_breaker_maintenance().await.unwrap();

    // Project 3 is halted; project 4 trades normally
    service
        .submit_order(request("seller", dec!(50.00), 5, 3))
        .await
        .unwrap();
    service
        .submit_order(request("buyer", dec!(50.00), 5, 3))
        .await
        .unwrap();
    service
        .submit_order(request("seller", dec!(60.00), 5, 4))
        .await
        .unwrap();
    service
        .submit_order(request("buyer", dec!(60.00), 5, 4))
        .await
        .unwrap();

    let trades = service.matched_orders().await.unwrap();
    assert_eq!(trades.len(), 3);
    assert!(trades.iter().any(|t| t.project_id == 4));
    assert!(!trades
        .iter()
        .any(|t| t.project_id == 3 && t.buyer_price == dec!(50.00)));
}

#[tokio::test]
async fn matched_quantity_never_exceeds_the_original_order() {
    let service = service();

    let buyer = service
        .submit_order(request("buyer", dec!(100.00), 8, 1))
        .await
        .unwrap();
    for quantity in [3, 3, 3] {
        service
            .submit_order(request("seller", dec!(100.00), quantity, 1))
            .await
            .unwrap();
    }

    let total: i64 = service
        .matched_orders()
        .await
        .unwrap()
        .iter()
        .map(|t| t.matched_qty)
        .sum();
    assert!(total <= 8);

    let history = service.buyer_history(buyer.id).await.unwrap();
    assert_eq!(history.total_matched_qty, total);
    assert_eq!(history.status, HistoryStatus::Completed);
}

#[tokio::test]
async fn clear_all_data_purges_the_platform() {
    let service = service();

    service
        .submit_order(request("seller", dec!(100.00), 5, 1))
        .await
        .unwrap();
    service
        .submit_order(request("buyer", dec!(100.00), 5, 1))
        .await
        .unwrap();
    service.set_breaker_threshold(1, dec!(10)).await.unwrap();

    service.clear_all_data().await.unwrap();

    assert!(service.matched_orders().await.unwrap().is_empty());
    assert!(service.breaker_statuses().await.unwrap().is_empty());
    assert!(service
        .orders(Side::Buy, None)
        .await
        .unwrap()
        .is_empty());

    // The transaction sequence restarted
    let order = service
        .submit_order(request("buyer", dec!(100.00), 5, 1))
        .await
        .unwrap();
    assert_eq!(order.transaction_id.as_str(), "10000000");

    let err = service.buyer_history(OrderId(999)).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}
