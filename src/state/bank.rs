use fixed::types::I80F48;
use serde::{Deserialize, Serialize};

use super::TokenIndex;
use crate::health::Prices;

/// Per-token risk parameters and prices.
///
/// Weights are dimensionless multipliers: asset weights in [0, 1], liab
/// weights in [1, inf). `deposits` and `borrows` are the bank-wide totals in
/// native units; together with the weight-scale-start parameters they drive
/// the init weight scaling that discourages concentrated deposits/borrows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bank {
    pub token_index: TokenIndex,
    pub maint_asset_weight: I80F48,
    pub init_asset_weight: I80F48,
    pub maint_liab_weight: I80F48,
    pub init_liab_weight: I80F48,
    pub oracle_price: I80F48,
    pub stable_price: I80F48,
    pub deposits: I80F48,
    pub borrows: I80F48,
    /// Quote-value threshold beyond which deposits count with a scaled-down
    /// init asset weight. `f64::MAX` disables scaling.
    pub deposit_weight_scale_start_quote: f64,
    /// Quote-value threshold beyond which borrows count with a scaled-up
    /// init liab weight. `f64::MAX` disables scaling.
    pub borrow_weight_scale_start_quote: f64,
}

impl Bank {
    pub fn prices(&self) -> Prices {
        Prices {
            oracle: self.oracle_price,
            stable: self.stable_price,
        }
    }

    /// Init asset weight, scaled down when the bank-wide deposits exceed the
    /// scale start: weight * scale_start / deposits_quote.
    pub fn scaled_init_asset_weight(&self, price: I80F48) -> I80F48 {
        if self.deposit_weight_scale_start_quote == f64::MAX {
            return self.init_asset_weight;
        }
        let deposits_quote = (self.deposits * price).to_num::<f64>();
        if deposits_quote <= self.deposit_weight_scale_start_quote {
            return self.init_asset_weight;
        }
        self.init_asset_weight
            * I80F48::from_num(self.deposit_weight_scale_start_quote / deposits_quote)
    }

    /// Init liab weight, scaled up when the bank-wide borrows exceed the
    /// scale start: weight * borrows_quote / scale_start.
    pub fn scaled_init_liab_weight(&self, price: I80F48) -> I80F48 {
        if self.borrow_weight_scale_start_quote == f64::MAX {
            return self.init_liab_weight;
        }
        let borrows_quote = (self.borrows * price).to_num::<f64>();
        if borrows_quote <= self.borrow_weight_scale_start_quote {
            return self.init_liab_weight;
        }
        self.init_liab_weight
            * I80F48::from_num(borrows_quote / self.borrow_weight_scale_start_quote)
    }
}
