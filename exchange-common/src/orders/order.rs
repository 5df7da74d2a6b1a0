//! The order struct, its top-tier snapshot, and submission validation.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

use super::types::{MatchType, OrderId, Side, TransactionId, TransactionType};

/// An intent to buy or sell, as persisted in the main tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub transaction_id: TransactionId,
    pub user_id: i64,
    pub side: Side,
    pub price: Decimal,
    pub quantity: i64,
    pub trade_date: NaiveDate,
    pub trade_time: NaiveTime,
    pub transaction_type: TransactionType,
    pub match_type: MatchType,
    pub market_lead_program: bool,
    pub project_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Snapshot of an order occupying the bounded top tier.
///
/// References the original order through `order_id` and duplicates the
/// priority-relevant fields so the matching loop never touches the main tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopEntry {
    pub order_id: OrderId,
    pub user_id: i64,
    pub transaction_id: TransactionId,
    pub price: Decimal,
    pub quantity: i64,
    pub trade_date: NaiveDate,
    pub trade_time: NaiveTime,
    pub transaction_type: TransactionType,
    pub match_type: MatchType,
    pub market_lead_program: bool,
    pub project_id: i64,
    pub created_at: DateTime<Utc>,
}

impl TopEntry {
    /// Snapshot an order for top-tier admission.
    pub fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            user_id: order.user_id,
            transaction_id: order.transaction_id.clone(),
            price: order.price,
            quantity: order.quantity,
            trade_date: order.trade_date,
            trade_time: order.trade_time,
            transaction_type: order.transaction_type,
            match_type: order.match_type,
            market_lead_program: order.market_lead_program,
            project_id: order.project_id,
            created_at: order.created_at,
        }
    }

    /// Rebuild the order for demotion back into the main tier, preserving
    /// its original identifiers and timestamps.
    pub fn into_order(self, side: Side) -> Order {
        Order {
            id: self.order_id,
            transaction_id: self.transaction_id,
            user_id: self.user_id,
            side,
            price: self.price,
            quantity: self.quantity,
            trade_date: self.trade_date,
            trade_time: self.trade_time,
            transaction_type: self.transaction_type,
            match_type: self.match_type,
            market_lead_program: self.market_lead_program,
            project_id: self.project_id,
            created_at: self.created_at,
        }
    }
}

/// Raw order submission as received from the outside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub role: String,
    pub user_id: i64,
    pub price: Decimal,
    pub quantity: i64,
    pub trade_date: String,
    pub trade_time: String,
    #[serde(default)]
    pub transaction_type: i16,
    #[serde(default)]
    pub match_type: i16,
    #[serde(default)]
    pub market_lead_program: bool,
    pub project_id: Option<i64>,
}

/// A validated submission, ready for the store to assign identifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDraft {
    pub side: Side,
    pub user_id: i64,
    pub price: Decimal,
    pub quantity: i64,
    pub trade_date: NaiveDate,
    pub trade_time: NaiveTime,
    pub transaction_type: TransactionType,
    pub match_type: MatchType,
    pub market_lead_program: bool,
    pub project_id: i64,
}

impl OrderRequest {
    /// Validate the submission and normalize its time fields.
    pub fn validate(&self) -> Result<OrderDraft, ValidationError> {
        let side = Side::from_role(&self.role)
            .ok_or_else(|| ValidationError::invalid_format("role", "expected buyer or seller"))?;

        if self.user_id == 0 {
            return Err(ValidationError::required("user_id"));
        }
        if self.price <= Decimal::ZERO {
            return Err(ValidationError::required("price"));
        }
        if self.quantity <= 0 {
            return Err(ValidationError::required("quantity"));
        }

        let project_id = match self.project_id {
            Some(id) if id != 0 => id,
            _ => return Err(ValidationError::required("project_id")),
        };

        if self.trade_date.len() != 10 {
            return Err(ValidationError::invalid_format(
                "trade_date",
                "expected YYYY-MM-DD",
            ));
        }
        let trade_date = NaiveDate::parse_from_str(&self.trade_date, "%Y-%m-%d")
            .map_err(|e| ValidationError::invalid_format("trade_date", e.to_string()))?;

        let normalized = normalize_trade_time(&self.trade_time);
        let trade_time = NaiveTime::parse_from_str(&normalized, "%H:%M:%S")
            .map_err(|e| ValidationError::invalid_format("trade_time", e.to_string()))?;

        let transaction_type = TransactionType::from_i16(self.transaction_type)?;
        let match_type = MatchType::from_i16(self.match_type)?;

        Ok(OrderDraft {
            side,
            user_id: self.user_id,
            price: self.price,
            quantity: self.quantity,
            trade_date,
            trade_time,
            transaction_type,
            match_type,
            market_lead_program: self.market_lead_program,
            project_id,
        })
    }
}

/// Normalize a submitted trade time to `HH:MM:SS`.
///
/// Long forms are stripped of a leading ISO date (`...T`) and trailing
/// timezone markers (`Z`, `+offset`); bare `HH:MM` gets `:00` appended.
fn normalize_trade_time(raw: &str) -> String {
    let mut time = raw.to_string();
    if time.len() > 8 {
        if let Some(idx) = time.find('T') {
            time = time[idx + 1..].to_string();
        }
        time = time.split('Z').next().unwrap_or_default().to_string();
        time = time.split('+').next().unwrap_or_default().to_string();
    }
    if time.len() == 5 && time.as_bytes()[2] == b':' {
        time.push_str(":00");
    }
    time
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> OrderRequest {
        OrderRequest {
            role: "buyer".to_string(),
            user_id: 7,
            price: dec!(100.00),
            quantity: 5,
            trade_date: "2024-06-03".to_string(),
            trade_time: "14:30:00".to_string(),
            transaction_type: 0,
            match_type: 0,
            market_lead_program: false,
            project_id: Some(1),
        }
    }

    #[test]
    fn test_valid_request() {
        let draft = request().validate().unwrap();
        assert_eq!(draft.side, Side::Buy);
        assert_eq!(draft.quantity, 5);
        assert_eq!(draft.project_id, 1);
        assert_eq!(draft.trade_time, NaiveTime::from_hms_opt(14, 30, 0).unwrap());
    }

    #[test]
    fn test_invalid_role_rejected() {
        let mut req = request();
        req.role = "broker".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_missing_project_rejected() {
        let mut req = request();
        req.project_id = None;
        assert!(req.validate().is_err());

        req.project_id = Some(0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_invalid_codes_rejected() {
        let mut req = request();
        req.transaction_type = 3;
        assert!(req.validate().is_err());

        let mut req = request();
        req.match_type = 2;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_short_date_rejected() {
        let mut req = request();
        req.trade_date = "2024-6-3".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let mut req = request();
        req.quantity = 0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_time_normalization() {
        assert_eq!(normalize_trade_time("14:30"), "14:30:00");
        assert_eq!(normalize_trade_time("14:30:00"), "14:30:00");
        assert_eq!(normalize_trade_time("2024-06-03T14:30:00Z"), "14:30:00");
        assert_eq!(normalize_trade_time("14:30:00+02:00"), "14:30:00");
        assert_eq!(normalize_trade_time("2024-06-03T14:30Z"), "14:30:00");
    }

    #[test]
    fn test_timezone_suffix_accepted_through_validation() {
        let mut req = request();
        req.trade_time = "2024-06-03T09:15:00Z".to_string();
        let draft = req.validate().unwrap();
        assert_eq!(draft.trade_time, NaiveTime::from_hms_opt(9, 15, 0).unwrap());
    }

    #[test]
    fn test_top_entry_round_trip() {
        let draft = request().validate().unwrap();
        let order = Order {
            id: OrderId(170),
            transaction_id: TransactionId::from_sequence(10_000_001),
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

        let entry = TopEntry::from_order(&order);
        assert_eq!(entry.order_id, order.id);
        assert_eq!(entry.into_order(Side::Buy), order);
    }
}
