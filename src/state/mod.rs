//! Snapshot types the engine is constructed from.
//!
//! These mirror the data contract of the external account/market-data layer:
//! per-token bank parameters, spot market open-orders amounts and perp
//! market/position state, frozen at one point in time.

pub use bank::*;
pub use perp::*;
pub use serum3::*;

mod bank;
mod perp;
mod serum3;

use fixed::types::I80F48;
use serde::{Deserialize, Serialize};

pub type TokenIndex = u16;
pub type Serum3MarketIndex = u16;
pub type PerpMarketIndex = u16;

/// One account's full position data plus the market metadata needed to value
/// it.
///
/// Invariant: at most one `TokenEntry` per token index. Serum3 entries must
/// reference token indices that appear in `tokens`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub tokens: Vec<TokenEntry>,
    pub serum3: Vec<Serum3Entry>,
    pub perps: Vec<PerpEntry>,
}

/// A token position: the bank it lives in and the signed native balance
/// (positive deposit, negative borrow).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenEntry {
    pub bank: Bank,
    pub balance_native: I80F48,
}

/// An active spot-market open-orders slot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Serum3Entry {
    pub market: Serum3Market,
    pub open_orders: OpenOrdersSlim,
}

/// An active perp position.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PerpEntry {
    pub market: PerpMarket,
    pub position: PerpPosition,
}
