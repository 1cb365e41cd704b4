//! Inverse health queries: the largest trade that keeps the account above a
//! target health ratio.
//!
//! All three sizing functions share one problem shape: health ratio as a
//! function of trade size is piecewise linear but neither convex nor
//! monotonic, because weight selection flips whenever a balance crosses zero.
//! Each function bounds the search interval analytically (breakpoints, a
//! zero-health estimate, or an interior peak) and then delegates to the
//! shared binary search kernel.

use fixed::types::I80F48;

use super::cache::{HealthCache, HealthType};
use super::search::{binary_approximation_search, find_maximum, scan_right_until_less_than};
use crate::error::Result;
use crate::state::{Bank, PerpMarket, PerpOrderSide, Serum3Market, Serum3Side};

impl HealthCache {
    /// How many source native tokens may be swapped for target tokens while
    /// keeping the init health ratio at or above `min_ratio`.
    ///
    /// `price` is the amount of target native tokens received per source
    /// native token. Returns `I80F48::MAX` when the swap improves health
    /// regardless of size.
    pub fn max_swap_source_for_health_ratio(
        &self,
        source_bank: &Bank,
        target_bank: &Bank,
        price: I80F48,
        min_ratio: I80F48,
    ) -> Result<I80F48> {
        // There is no safe trade size on an account that's already
        // liquidatable.
        if self.health_ratio(HealthType::Init) <= 0 {
            return Ok(I80F48::ZERO);
        }
        self.max_swap_source_for_health_fn(source_bank, target_bank, price, min_ratio, |cache| {
            cache.health_ratio(HealthType::Init)
        })
    }

    /// Like `max_swap_source_for_health_ratio`, but targeting a minimum init
    /// health instead of a ratio. Works from negative starting health: small
    /// swaps can raise health when they pay back borrows.
    pub fn max_swap_source_for_health(
        &self,
        source_bank: &Bank,
        target_bank: &Bank,
        price: I80F48,
        min_health: I80F48,
    ) -> Result<I80F48> {
        self.max_swap_source_for_health_fn(source_bank, target_bank, price, min_health, |cache| {
            cache.health(HealthType::Init)
        })
    }

    /// Shared implementation: find the largest swap size whose
    /// `target_fn(cache_after_swap)` value stays at or above `min_fn_value`.
    ///
    /// The function value is nonlinear in the swap amount: the slope changes
    /// when the source or target balance crosses zero, and serum3 reserved
    /// funds shift those crossings. For large amounts the slope is guaranteed
    /// negative unless the price is good enough to make health grow without
    /// bound (detected analytically, returns `I80F48::MAX`).
    pub fn max_swap_source_for_health_fn(
        &self,
        source_bank: &Bank,
        target_bank: &Bank,
        price: I80F48,
        min_fn_value: I80F48,
        target_fn: fn(&HealthCache) -> I80F48,
    ) -> Result<I80F48> {
        let health_type = HealthType::Init;

        // A non-positive price or a market that does not discriminate between
        // asset and liability weights makes the swap a no-op for sizing.
        if source_bank.oracle_price <= 0
            || target_bank.oracle_price <= 0
            || (source_bank.init_liab_weight - target_bank.init_asset_weight)
                .abs()
                .is_zero()
        {
            return Ok(I80F48::ZERO);
        }

        // Work on a copy that is guaranteed to have entries for both tokens.
        let mut cache = self.clone();
        let source_index = cache.get_or_create_token_info_index(source_bank);
        let target_index = cache.get_or_create_token_info_index(target_bank);

        let (token_max_reserved, _) = cache.compute_serum3_reservations(health_type);
        let source_reserved = token_max_reserved[source_index];
        let target_reserved = token_max_reserved[target_index];

        let source = &cache.token_infos[source_index];
        let target = &cache.token_infos[target_index];
        let source_balance = source.balance_native;
        let target_balance = target.balance_native;

        // If the price is sufficiently good, health will just increase from
        // swapping: once we've swapped enough, swapping x more reduces health
        // by x * source_liab_weight and increases it by
        // x * target_asset_weight * price. Scaling from bank-wide deposit
        // limits can only make the real slope worse than this bound on the
        // source side; the target side uses the unscaled weight.
        let final_health_slope = -source.init_scaled_liab_weight
            * source.prices.liab(health_type)
            + target.init_asset_weight * target.prices.asset(health_type) * price;
        if final_health_slope >= 0 {
            return Ok(I80F48::MAX);
        }

        let cache_after_swap = |amount: I80F48| {
            let mut adjusted = cache.clone();
            // Does not recompute scaled weights for the changed balances; the
            // slope estimate above stays an upper bound either way.
            adjusted.token_infos[source_index].balance_native -= amount;
            adjusted.token_infos[target_index].balance_native += amount * price;
            adjusted
        };
        let fn_value_after_swap = |amount: I80F48| target_fn(&cache_after_swap(amount));

        let min_step = I80F48::from_num(0.1);

        if source_reserved.is_zero() && target_reserved.is_zero() {
            // Without reservations the function is piecewise linear with
            // breakpoints exactly where the source or target balance crosses
            // zero. Evaluate those points and bracket the crossing between
            // them.
            let point0_amount = source_balance
                .min(-target_balance / price)
                .max(I80F48::ZERO);
            let point1_amount = source_balance
                .max(-target_balance / price)
                .max(I80F48::ZERO);

            let initial_value = fn_value_after_swap(I80F48::ZERO);
            let point0_value = fn_value_after_swap(point0_amount);
            let point1_cache = cache_after_swap(point1_amount);
            let point1_value = target_fn(&point1_cache);
            let point1_health = point1_cache.health(health_type);

            let amount = if initial_value <= min_fn_value
                && point0_value < min_fn_value
                && point1_value < min_fn_value
            {
                // The target cannot be reached anywhere: pick the point with
                // the best value, which must be one of the breakpoints.
                if point0_value > initial_value {
                    if point1_value > point0_value {
                        point1_amount
                    } else {
                        point0_amount
                    }
                } else if point1_value > initial_value {
                    point1_amount
                } else {
                    I80F48::ZERO
                }
            } else if point1_value >= min_fn_value {
                // The crossing is to the right of point1, where the function
                // is linear with the known final slope. Estimate the amount
                // that brings health to zero and bracket with it.
                //
                // Health at or below zero with an acceptable point1 value can
                // only happen when the liabilities vanish there (the ratio is
                // at its sentinel maximum while health rounds to zero): any
                // further swap only adds liabilities, so point1 is the
                // answer.
                if point1_health <= 0 {
                    return Ok(point1_amount);
                }
                let zero_health_amount = point1_amount - point1_health / final_health_slope;
                binary_approximation_search(
                    point1_amount,
                    point1_value,
                    zero_health_amount,
                    min_fn_value,
                    min_step,
                    fn_value_after_swap,
                )?
            } else if point0_value >= min_fn_value {
                // Must be between point0 and point1.
                binary_approximation_search(
                    point0_amount,
                    point0_value,
                    point1_amount,
                    min_fn_value,
                    min_step,
                    fn_value_after_swap,
                )?
            } else {
                // Must be between 0 and point0.
                binary_approximation_search(
                    I80F48::ZERO,
                    initial_value,
                    point0_amount,
                    min_fn_value,
                    min_step,
                    fn_value_after_swap,
                )?
            };
            return Ok(amount);
        }

        // Serum3 reservations shift the zero crossings of the source/target
        // balances, so the breakpoints above no longer bound the segments.
        // The function still has a unique maximum; locate it first, then
        // bracket the descending root to its right.
        let rightmost = (source_balance.abs() + source_reserved)
            .max((target_balance.abs() + target_reserved) / price);
        let (amount_for_max_value, max_value) =
            find_maximum(I80F48::ZERO, rightmost, min_step, fn_value_after_swap);

        if max_value <= min_fn_value {
            // We cannot reach the target value, just return the best amount.
            return Ok(amount_for_max_value);
        }

        let health_at_max_value = cache_after_swap(amount_for_max_value).health(health_type);
        if health_at_max_value <= 0 {
            return Ok(I80F48::ZERO);
        }
        // The estimate is not exact: swapping can increase the amount that
        // serum3 reserved contributions offset, moving the actual zero point
        // further right. Scan right from the estimate until the target value
        // is bracketed.
        let zero_health_estimate =
            amount_for_max_value - health_at_max_value / final_health_slope;
        let right_bound =
            scan_right_until_less_than(zero_health_estimate, min_fn_value, fn_value_after_swap)?;
        let amount = if right_bound == zero_health_estimate {
            binary_approximation_search(
                amount_for_max_value,
                max_value,
                right_bound,
                min_fn_value,
                min_step,
                fn_value_after_swap,
            )?
        } else {
            binary_approximation_search(
                zero_health_estimate,
                fn_value_after_swap(zero_health_estimate),
                right_bound,
                min_fn_value,
                min_step,
                fn_value_after_swap,
            )?
        };
        Ok(amount)
    }

    /// The largest spot order size (in quote-native value) that keeps the
    /// init health ratio at or above `min_ratio`.
    ///
    /// Placing an order moves funds from the token balance into the market's
    /// reserved open-orders funds: an ask reserves base tokens, a bid
    /// reserves quote tokens.
    pub fn max_serum3_order_for_health_ratio(
        &self,
        base_bank: &Bank,
        quote_bank: &Bank,
        market: &Serum3Market,
        side: Serum3Side,
        min_ratio: I80F48,
    ) -> Result<I80F48> {
        let health_type = HealthType::Init;

        let initial_ratio = self.health_ratio(health_type);
        if initial_ratio <= min_ratio {
            // Already at or below the target: no order size is safe.
            return Ok(I80F48::ZERO);
        }

        let initial_health = self.health(health_type);

        let mut cache = self.clone();
        let base_index = cache.get_or_create_token_info_index(base_bank);
        let quote_index = cache.get_or_create_token_info_index(quote_bank);
        let base = &cache.token_infos[base_index];
        let quote = &cache.token_infos[quote_index];
        let base_oracle = base.prices.oracle;
        let quote_oracle = quote.prices.oracle;

        // Estimate the amount that would bring health to zero: selling A for
        // B, health changes by -A_asset_weight while existing A deposits (or
        // B borrows) absorb the trade, and by -A_liab_weight + B_asset_weight
        // beyond that. With M = max(A deposits value, B borrows value):
        //   amount = M + (health + M * (B_liab - A_asset)) / (A_liab - B_asset)
        // An ask swaps base->quote, a bid swaps quote->base.
        let zero_amount = match side {
            Serum3Side::Ask => {
                let quote_borrows = if quote.balance_native.is_negative() {
                    quote.balance_native.abs() * quote.prices.liab(health_type)
                } else {
                    I80F48::ZERO
                };
                let max = (base.balance_native * base.prices.asset(health_type))
                    .max(quote_borrows);
                let denominator =
                    base.liab_weight(health_type) - quote.asset_weight(health_type);
                if denominator <= 0 {
                    // A market whose weights don't discriminate cannot bound
                    // the search.
                    return Ok(I80F48::ZERO);
                }
                max + (initial_health
                    + max * (quote.init_liab_weight - base.init_asset_weight))
                    / denominator
            }
            Serum3Side::Bid => {
                let base_borrows = if base.balance_native.is_negative() {
                    base.balance_native.abs() * base.prices.liab(health_type)
                } else {
                    I80F48::ZERO
                };
                let max = (quote.balance_native * quote.prices.asset(health_type))
                    .max(base_borrows);
                let denominator =
                    quote.liab_weight(health_type) - base.asset_weight(health_type);
                if denominator <= 0 {
                    return Ok(I80F48::ZERO);
                }
                max + (initial_health
                    + max * (base.init_liab_weight - quote.init_asset_weight))
                    / denominator
            }
        };
        if zero_amount <= 0 {
            return Ok(I80F48::ZERO);
        }

        let cache_after_placing_order = |amount: I80F48| {
            let mut adjusted = cache.clone();
            match side {
                Serum3Side::Ask => {
                    let base_amount = amount / base_oracle;
                    adjusted.token_infos[base_index].balance_native -= base_amount;
                    adjusted.adjust_serum3_reserved(
                        base_bank,
                        quote_bank,
                        market,
                        base_amount,
                        I80F48::ZERO,
                        I80F48::ZERO,
                        I80F48::ZERO,
                    );
                }
                Serum3Side::Bid => {
                    let quote_amount = amount / quote_oracle;
                    adjusted.token_infos[quote_index].balance_native -= quote_amount;
                    adjusted.adjust_serum3_reserved(
                        base_bank,
                        quote_bank,
                        market,
                        I80F48::ZERO,
                        I80F48::ZERO,
                        quote_amount,
                        I80F48::ZERO,
                    );
                }
            }
            adjusted
        };
        let ratio_after_placing_order =
            |amount: I80F48| cache_after_placing_order(amount).health_ratio(health_type);

        binary_approximation_search(
            I80F48::ZERO,
            initial_ratio,
            zero_amount,
            min_ratio,
            I80F48::ONE,
            ratio_after_placing_order,
        )
    }

    /// The largest perp order size in whole base lots that keeps the init
    /// health ratio at or above `min_ratio`. Returns `i64::MAX` when the
    /// trade improves health regardless of size.
    ///
    /// Search results are floored to whole lots, toward reduced risk.
    pub fn max_perp_for_health_ratio(
        &self,
        perp_market: &PerpMarket,
        price: I80F48,
        side: PerpOrderSide,
        min_ratio: I80F48,
    ) -> Result<i64> {
        let health_type = HealthType::Init;

        let initial_ratio = self.health_ratio(health_type);
        if initial_ratio <= 0 {
            return Ok(0);
        }

        let direction: i64 = match side {
            PerpOrderSide::Bid => 1,
            PerpOrderSide::Ask => -1,
        };

        let mut cache = self.clone();
        let perp_info_index = cache.get_or_create_perp_info_index(perp_market);
        let perp_info = &cache.perp_infos[perp_info_index];
        let prices = perp_info.prices.clone();
        let base_lot_size = I80F48::from(perp_info.base_lot_size);
        let initial_base_lots = perp_info.base_lots;

        // If the price is sufficiently good then health will just increase
        // from trading. The overall pnl asset weight can be ignored here: it
        // would only decrease a slope we require to be nonnegative.
        let final_health_slope = if direction == 1 {
            perp_info.init_base_asset_weight * prices.asset(health_type) - price
        } else {
            price - perp_info.init_base_liab_weight * prices.liab(health_type)
        };
        if final_health_slope >= 0 {
            return Ok(i64::MAX);
        }

        let cache_after_trade = |base_lots: i64| {
            let mut adjusted = cache.clone();
            adjusted.adjust_perp_info(perp_info_index, price, side, base_lots);
            adjusted
        };
        let ratio_after_trade =
            |base_lots: i64| cache_after_trade(base_lots).health_ratio(health_type);
        let ratio_after_trade_trunc =
            |base_lots: I80F48| ratio_after_trade(base_lots.floor().to_num::<i64>());

        // There are two cases:
        // 1. We are increasing abs(base_lots)
        // 2. We are bringing the base position to 0, and then going to case 1.
        let has_case2 = initial_base_lots > 0 && direction == -1
            || initial_base_lots < 0 && direction == 1;

        let (case1_start, case1_start_ratio) = if has_case2 {
            let case1_start = initial_base_lots.abs();
            (case1_start, ratio_after_trade(case1_start))
        } else {
            (0, initial_ratio)
        };
        let case1_start_i80f48 = I80F48::from(case1_start);

        let base_lots = if initial_ratio <= min_ratio && case1_start_ratio < min_ratio {
            // We cannot reach min_ratio, pick the best case.
            if case1_start_ratio >= initial_ratio {
                case1_start_i80f48
            } else {
                I80F48::ZERO
            }
        } else if case1_start_ratio >= min_ratio {
            // Must reach min_ratio to the right of case1_start. Figure out
            // the lots that bring health to zero from the starting health and
            // the health slope per traded lot.
            let start_cache = cache_after_trade(case1_start);
            let start_health = start_cache.health(health_type);
            if start_health <= 0 {
                return Ok(0);
            }

            // The perp market's contribution to the health above may be
            // capped by the overall asset weight. But we need to trade enough
            // to fully reduce any positive-pnl buffer, so use the uncapped
            // health for the estimate.
            let perp_info = &start_cache.perp_infos[perp_info_index];
            let start_health_uncapped = start_health
                - perp_info.health_contribution(health_type)
                + perp_info.unweighted_health_contribution(health_type);

            // Add 1 because health is computed for truncated lots and the
            // estimate must land at or beyond the zero-health point.
            let zero_health_amount = case1_start_i80f48
                - start_health_uncapped / final_health_slope / base_lot_size
                + I80F48::ONE;

            binary_approximation_search(
                case1_start_i80f48,
                case1_start_ratio,
                zero_health_amount,
                min_ratio,
                I80F48::ONE,
                ratio_after_trade_trunc,
            )?
        } else {
            // Between 0 and case1_start.
            binary_approximation_search(
                I80F48::ZERO,
                initial_ratio,
                case1_start_i80f48,
                min_ratio,
                I80F48::ONE,
                ratio_after_trade_trunc,
            )?
        };

        Ok(base_lots.floor().to_num::<i64>())
    }
}
