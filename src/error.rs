use fixed::types::I80F48;
use thiserror::Error;

use crate::state::{PerpMarketIndex, Serum3MarketIndex, TokenIndex};

pub type Result<T> = std::result::Result<T, Error>;

/// Hard failures. All of these indicate that the cache was built
/// inconsistently with the account it claims to represent, or that a search
/// invariant was violated; no further computation can be trusted.
///
/// Expected financial outcomes (zero health, zero sizing, unbounded sizing)
/// are ordinary return values, never errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("token index {0} not found in health cache")]
    TokenPositionMissing(TokenIndex),

    #[error("serum3 market {0} not found in health cache")]
    Serum3MarketMissing(Serum3MarketIndex),

    #[error("perp market {0} not found in health cache")]
    PerpPositionMissing(PerpMarketIndex),

    #[error(
        "bracket values left {left_value} and right {right_value} do not contain the target value {target_value}"
    )]
    BracketTargetNotContained {
        left_value: I80F48,
        right_value: I80F48,
        target_value: I80F48,
    },

    #[error("could not find an amount with value below {target} within {iterations} doublings")]
    ScanExhausted { target: I80F48, iterations: usize },
}
