/*!
 * Risk and margin engine for a cross-margined trading account.
 *
 * The engine computes a single scalar *health* value (and a normalized
 * *health ratio*) for an account holding any mix of token deposits/borrows,
 * spot open-orders reservations and perpetual futures positions. It also
 * answers the inverse question: how large a swap, spot order or perp order
 * can be placed while keeping the health ratio above a target.
 *
 * All arithmetic is exact I80F48 fixed point. The engine never performs I/O
 * and never mutates the snapshot it was built from; hypothetical changes are
 * applied to clones.
 *
 * The key type is [`health::HealthCache`], typically built through
 * [`health::new_health_cache`] from an [`state::AccountSnapshot`].
 */

pub mod error;
pub mod health;
pub mod i80f48;
pub mod state;

pub use error::{Error, Result};
pub use health::{HealthCache, HealthType};
