//! Core order types and enums for the matching platform.
//!
//! This module defines the fundamental types used throughout the engine:
//! - `Side` - Buy or Sell
//! - `TransactionType` - the three order kinds, with `Any` as the wildcard
//! - `MatchType` - exact-price vs. best-price buyer matching
//! - `HistoryStatus` - buyer order history lifecycle
//! - `OrderId` / `TransactionId` - stable identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// First value of the process-wide transaction id sequence.
pub const TRANSACTION_SEQUENCE_START: i64 = 10_000_000;

/// Order side indicating buy or sell direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    /// Buy order - a bid
    Buy,
    /// Sell order - an ask
    Sell,
}

impl Side {
    /// Returns the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Returns true if this is a buy order
    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }

    /// Parse the external role string ("buyer" / "seller")
    pub fn from_role(role: &str) -> Option<Self> {
        match role {
            "buyer" => Some(Side::Buy),
            "seller" => Some(Side::Sell),
            _ => None,
        }
    }

    /// External role name for this side
    pub fn role(&self) -> &'static str {
        match self {
            Side::Buy => "buyer",
            Side::Sell => "seller",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order kind. `Standard` (0) and `Bilateral` (1) only pair with themselves;
/// `Any` (2) is the wildcard and pairs with every kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Kind 0
    Standard,
    /// Kind 1
    Bilateral,
    /// Kind 2 - matches either of the other kinds
    Any,
}

impl TransactionType {
    /// Numeric code persisted in the store
    pub fn as_i16(&self) -> i16 {
        match self {
            TransactionType::Standard => 0,
            TransactionType::Bilateral => 1,
            TransactionType::Any => 2,
        }
    }

    /// Parse the numeric code
    pub fn from_i16(code: i16) -> Result<Self, ValidationError> {
        match code {
            0 => Ok(TransactionType::Standard),
            1 => Ok(TransactionType::Bilateral),
            2 => Ok(TransactionType::Any),
            other => Err(ValidationError::out_of_range(
                "transaction_type",
                other,
                0,
                2,
            )),
        }
    }

    /// Returns true for the wildcard kind
    pub fn is_wildcard(&self) -> bool {
        matches!(self, TransactionType::Any)
    }

    /// Two orders are type-compatible when either side is the wildcard or
    /// both kinds are equal.
    pub fn is_compatible_with(&self, other: TransactionType) -> bool {
        self.is_wildcard() || other.is_wildcard() || *self == other
    }

    /// The kind recorded on a trade: the non-wildcard side when exactly one
    /// side is the wildcard, the buyer's kind otherwise. `self` is the buyer.
    pub fn resolve_with(&self, seller: TransactionType) -> TransactionType {
        if self.is_wildcard() && !seller.is_wildcard() {
            seller
        } else {
            *self
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i16())
    }
}

/// Per-buyer matching mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    /// Require the seller price to equal the buyer price exactly
    #[default]
    Exact,
    /// Accept any seller strictly below the buyer price
    Best,
}

impl MatchType {
    /// Numeric code persisted in the store
    pub fn as_i16(&self) -> i16 {
        match self {
            MatchType::Exact => 0,
            MatchType::Best => 1,
        }
    }

    /// Parse the numeric code
    pub fn from_i16(code: i16) -> Result<Self, ValidationError> {
        match code {
            0 => Ok(MatchType::Exact),
            1 => Ok(MatchType::Best),
            other => Err(ValidationError::out_of_range("match_type", other, 0, 1)),
        }
    }
}

/// Buyer order history lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryStatus {
    /// No fill yet
    Pending,
    /// Some quantity filled, remainder open
    #[serde(rename = "Partially Matched")]
    PartiallyMatched,
    /// Fully filled (terminal)
    Completed,
    /// Cancelled before completion (terminal)
    Cancelled,
}

impl HistoryStatus {
    /// Store representation
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Pending => "Pending",
            HistoryStatus::PartiallyMatched => "Partially Matched",
            HistoryStatus::Completed => "Completed",
            HistoryStatus::Cancelled => "Cancelled",
        }
    }

    /// Parse the store representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(HistoryStatus::Pending),
            "Partially Matched" => Some(HistoryStatus::PartiallyMatched),
            "Completed" => Some(HistoryStatus::Completed),
            "Cancelled" => Some(HistoryStatus::Cancelled),
            _ => None,
        }
    }

    /// Returns true while the order can still receive fills
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            HistoryStatus::Pending | HistoryStatus::PartiallyMatched
        )
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stable order identifier assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub i64);

impl OrderId {
    /// Get the inner value
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OrderId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Monotone 8-digit zero-padded transaction id, unique across both sides.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub String);

impl TransactionId {
    /// Format a sequence value as an 8-digit zero-padded id
    pub fn from_sequence(seq: i64) -> Self {
        Self(format!("{:08}", seq))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TransactionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
