use fixed::types::I80F48;
use serde::{Deserialize, Serialize};

use super::PerpMarketIndex;
use crate::health::Prices;

/// Per-market risk parameters for a perpetual futures market.
///
/// The base weights apply to the (signed) base exposure. The overall asset
/// weights additionally haircut *positive* unsettled pnl: perp gains are less
/// reliable collateral than spot deposits until they are settled.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PerpMarket {
    pub perp_market_index: PerpMarketIndex,
    pub maint_base_asset_weight: I80F48,
    pub init_base_asset_weight: I80F48,
    pub maint_base_liab_weight: I80F48,
    pub init_base_liab_weight: I80F48,
    pub maint_overall_asset_weight: I80F48,
    pub init_overall_asset_weight: I80F48,
    pub base_lot_size: i64,
    pub quote_lot_size: i64,
    pub oracle_price: I80F48,
    pub stable_price: I80F48,
}

impl PerpMarket {
    pub fn prices(&self) -> Prices {
        Prices {
            oracle: self.oracle_price,
            stable: self.stable_price,
        }
    }
}

/// Order side for a perp market.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerpOrderSide {
    Bid,
    Ask,
}

/// One account's position in a perp market.
///
/// `quote_position_native` must already be net of unsettled funding; funding
/// accrual happens upstream of the engine. Taker lots are fills that have not
/// been processed yet and fold into the position at cache construction.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct PerpPosition {
    pub base_position_lots: i64,
    pub quote_position_native: I80F48,
    pub bids_base_lots: i64,
    pub asks_base_lots: i64,
    pub taker_base_lots: i64,
    pub taker_quote_lots: i64,
}

impl PerpPosition {
    pub fn has_open_orders(&self) -> bool {
        self.bids_base_lots != 0 || self.asks_base_lots != 0
    }
}
