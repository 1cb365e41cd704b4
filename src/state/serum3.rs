use serde::{Deserialize, Serialize};

use super::{Serum3MarketIndex, TokenIndex};

/// Static description of a spot market: which tokens its two legs settle in.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Serum3Market {
    pub market_index: Serum3MarketIndex,
    pub base_token_index: TokenIndex,
    pub quote_token_index: TokenIndex,
}

/// Order side for a spot market.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Serum3Side {
    Bid,
    Ask,
}

/// The balance-relevant amounts of one open-orders account.
///
/// "Free" funds are settleable immediately and fold straight into the token
/// balances at cache construction. Reserved funds (total minus free) are
/// locked in open orders and could resolve into either base or quote.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct OpenOrdersSlim {
    pub native_base_total: u64,
    pub native_base_free: u64,
    pub native_quote_total: u64,
    pub native_quote_free: u64,
    /// Accrued referrer rebates; settle as free quote funds.
    pub native_rebates: u64,
}

impl OpenOrdersSlim {
    pub fn native_base_reserved(&self) -> u64 {
        self.native_base_total - self.native_base_free
    }

    pub fn native_quote_reserved(&self) -> u64 {
        self.native_quote_total - self.native_quote_free
    }
}
