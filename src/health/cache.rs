/*!
 * This module deals with computing different types of health for an account.
 *
 * Health is a number in quote-native units and represents a risk-engine
 * assessment of the account's positions and open orders. The larger the
 * health the better. Negative health often means some action is necessary or
 * a limitation is placed on the user.
 *
 * The key struct in this module is HealthCache, typically constructed by the
 * new_health_cache() function. With it, the different health types can be
 * computed.
 *
 * The HealthCache holds the data it needs in TokenInfo, Serum3Info and
 * PerpInfo.
 */

use fixed::types::I80F48;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::state::{
    AccountSnapshot, Bank, OpenOrdersSlim, PerpMarket, PerpMarketIndex, PerpOrderSide,
    PerpPosition, Serum3Market, Serum3MarketIndex, TokenIndex,
};

/// Information about prices for a bank or perp market.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Prices {
    /// The current oracle price
    pub oracle: I80F48,

    /// A "stable" price, from a slow-moving price model
    pub stable: I80F48,
}

impl Prices {
    // intended for tests
    pub fn new_single_price(price: I80F48) -> Self {
        Self {
            oracle: price,
            stable: price,
        }
    }

    /// The liability price to use for the given health type
    #[inline(always)]
    pub fn liab(&self, health_type: HealthType) -> I80F48 {
        match health_type {
            HealthType::Maint | HealthType::LiquidationEnd => self.oracle,
            HealthType::Init => self.oracle.max(self.stable),
        }
    }

    /// The asset price to use for the given health type
    #[inline(always)]
    pub fn asset(&self, health_type: HealthType) -> I80F48 {
        match health_type {
            HealthType::Maint | HealthType::LiquidationEnd => self.oracle,
            HealthType::Init => self.oracle.min(self.stable),
        }
    }
}

/// There are three types of health:
/// - initial health ("Init"): users can only open new positions if it's >= 0
/// - maintenance health ("Maint"): users get liquidated if it's < 0
/// - liquidation end health: once liquidation started, it only stops once
///   this is >= 0
///
/// The ordering is
///   init health <= liquidation end health <= maint health
///
/// The different health types are realized by using different weights and
/// prices:
/// - init health: init weights with scaling, stable-price adjusted prices
/// - liq end health: init weights without scaling, oracle prices
/// - maint health: maint weights, oracle prices
#[derive(PartialEq, Eq, Copy, Clone, Debug, Serialize, Deserialize)]
pub enum HealthType {
    Init,
    Maint,
    LiquidationEnd,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenInfo {
    pub token_index: TokenIndex,
    pub maint_asset_weight: I80F48,
    pub init_asset_weight: I80F48,
    pub init_scaled_asset_weight: I80F48,
    pub maint_liab_weight: I80F48,
    pub init_liab_weight: I80F48,
    pub init_scaled_liab_weight: I80F48,
    pub prices: Prices,

    /// Spot balance in token-native units, including free serum3 open-orders
    /// funds. Positive for deposits, negative for borrows. Does not include
    /// serum3 reserved amounts.
    pub balance_native: I80F48,
}

impl TokenInfo {
    pub fn from_bank(bank: &Bank, balance_native: I80F48) -> Self {
        let prices = bank.prices();
        // Use the liab price for computing weight scaling, because it's
        // pessimistic and causes the most unfavorable scaling.
        let liab_price = prices.liab(HealthType::Init);
        Self {
            token_index: bank.token_index,
            maint_asset_weight: bank.maint_asset_weight,
            init_asset_weight: bank.init_asset_weight,
            init_scaled_asset_weight: bank.scaled_init_asset_weight(liab_price),
            maint_liab_weight: bank.maint_liab_weight,
            init_liab_weight: bank.init_liab_weight,
            init_scaled_liab_weight: bank.scaled_init_liab_weight(liab_price),
            prices,
            balance_native,
        }
    }

    #[inline(always)]
    pub fn asset_weight(&self, health_type: HealthType) -> I80F48 {
        match health_type {
            HealthType::Init => self.init_scaled_asset_weight,
            HealthType::LiquidationEnd => self.init_asset_weight,
            HealthType::Maint => self.maint_asset_weight,
        }
    }

    #[inline(always)]
    pub fn liab_weight(&self, health_type: HealthType) -> I80F48 {
        match health_type {
            HealthType::Init => self.init_scaled_liab_weight,
            HealthType::LiquidationEnd => self.init_liab_weight,
            HealthType::Maint => self.maint_liab_weight,
        }
    }

    #[inline(always)]
    pub fn health_contribution(&self, health_type: HealthType) -> I80F48 {
        let (weight, price) = if self.balance_native.is_negative() {
            (
                self.liab_weight(health_type),
                self.prices.liab(health_type),
            )
        } else {
            (
                self.asset_weight(health_type),
                self.prices.asset(health_type),
            )
        };
        self.balance_native * weight * price
    }
}

/// Reserved amounts of one serum3 market, converted both ways.
#[derive(Clone, Debug)]
pub struct Serum3Reserved {
    /// base tokens when reserved_quote gets converted to base and added to
    /// reserved_base
    pub all_reserved_as_base: I80F48,
    /// ditto the other way around
    pub all_reserved_as_quote: I80F48,
}

/// Information about reserved funds on serum3 open orders accounts.
///
/// Note that all "free" funds on open orders accounts are added directly to
/// the token infos. This is only about the reserved funds that might end up
/// as base OR quote tokens, depending on whether the open orders execute or
/// not.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Serum3Info {
    /// Reserved amounts as stored on the open orders, token-native.
    pub reserved_base: I80F48,
    pub reserved_quote: I80F48,

    // Index into the token infos list, _not_ a TokenIndex
    pub base_index: usize,
    pub quote_index: usize,

    pub market_index: Serum3MarketIndex,
}

impl Serum3Info {
    /// Build the entry from an open-orders snapshot, folding the freely
    /// settleable amounts (including referrer rebates, which settle as quote)
    /// into the base/quote token infos.
    pub fn from_open_orders(
        market: &Serum3Market,
        open_orders: &OpenOrdersSlim,
        base_index: usize,
        quote_index: usize,
        token_infos: &mut [TokenInfo],
    ) -> Self {
        let base_free = I80F48::from(open_orders.native_base_free);
        let quote_free =
            I80F48::from(open_orders.native_quote_free + open_orders.native_rebates);
        token_infos[base_index].balance_native += base_free;
        token_infos[quote_index].balance_native += quote_free;

        Self {
            reserved_base: I80F48::from(open_orders.native_base_reserved()),
            reserved_quote: I80F48::from(open_orders.native_quote_reserved()),
            base_index,
            quote_index,
            market_index: market.market_index,
        }
    }

    pub fn empty_from_market(
        market: &Serum3Market,
        base_index: usize,
        quote_index: usize,
    ) -> Self {
        Self {
            reserved_base: I80F48::ZERO,
            reserved_quote: I80F48::ZERO,
            base_index,
            quote_index,
            market_index: market.market_index,
        }
    }

    /// Compute the health contribution from active open orders.
    ///
    /// For open orders, health is about the worst-case outcome: all reserved
    /// base tokens could convert to quote tokens, or all reserved quote
    /// tokens to base tokens. Which would lead to the smaller health?
    ///
    /// There are interaction effects between multiple markets that share a
    /// token. Instead of the true worst case we compute something guaranteed
    /// to be less: the worst case for each market independently, assuming all
    /// other markets' open orders already resolved maximally unfavorably for
    /// the token. `token_max_reserved` holds those per-token totals, see
    /// `HealthCache::compute_serum3_reservations()`.
    #[inline(always)]
    pub fn health_contribution(
        &self,
        health_type: HealthType,
        token_infos: &[TokenInfo],
        token_max_reserved: &[I80F48],
        market_reserved: &Serum3Reserved,
    ) -> I80F48 {
        if market_reserved.all_reserved_as_base.is_zero()
            || market_reserved.all_reserved_as_quote.is_zero()
        {
            return I80F48::ZERO;
        }

        let base_info = &token_infos[self.base_index];
        let quote_info = &token_infos[self.quote_index];

        // How much would health increase if the reserved balance were applied
        // to the passed token info?
        let compute_health_effect =
            |token_info: &TokenInfo, max_reserved: I80F48, market_reserved: I80F48| {
                // This balance includes all possible reserved funds from
                // markets that relate to the token, including this market
                // itself: `market_reserved` is already included in
                // `max_reserved`.
                let max_balance = token_info.balance_native + max_reserved;

                // Assume `market_reserved` was added to `max_balance` last
                // (it underestimates health because that gives the smallest
                // effects): how much did health change because of it?
                let (asset_part, liab_part) = if max_balance >= market_reserved {
                    (market_reserved, I80F48::ZERO)
                } else if max_balance.is_negative() {
                    (I80F48::ZERO, market_reserved)
                } else {
                    (max_balance, market_reserved - max_balance)
                };

                let asset_weight = token_info.asset_weight(health_type);
                let liab_weight = token_info.liab_weight(health_type);
                let asset_price = token_info.prices.asset(health_type);
                let liab_price = token_info.prices.liab(health_type);
                asset_part * asset_weight * asset_price + liab_part * liab_weight * liab_price
            };

        let health_base = compute_health_effect(
            base_info,
            token_max_reserved[self.base_index],
            market_reserved.all_reserved_as_base,
        );
        let health_quote = compute_health_effect(
            quote_info,
            token_max_reserved[self.quote_index],
            market_reserved.all_reserved_as_quote,
        );
        health_base.min(health_quote)
    }
}

/// Stores information about perp market positions and their open orders.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PerpInfo {
    pub perp_market_index: PerpMarketIndex,
    pub maint_base_asset_weight: I80F48,
    pub init_base_asset_weight: I80F48,
    pub maint_base_liab_weight: I80F48,
    pub init_base_liab_weight: I80F48,
    pub maint_overall_asset_weight: I80F48,
    pub init_overall_asset_weight: I80F48,
    pub base_lot_size: i64,
    pub base_lots: i64,
    pub bids_base_lots: i64,
    pub asks_base_lots: i64,
    /// In quote-native units, no asset/liab weighting needed.
    pub quote: I80F48,
    pub prices: Prices,
    pub has_open_orders: bool,
}

impl PerpInfo {
    pub fn from_position(perp_market: &PerpMarket, perp_position: &PerpPosition) -> Self {
        let base_lots = perp_position.base_position_lots + perp_position.taker_base_lots;
        let taker_quote =
            I80F48::from(perp_position.taker_quote_lots * perp_market.quote_lot_size);
        let quote = perp_position.quote_position_native + taker_quote;

        Self {
            perp_market_index: perp_market.perp_market_index,
            maint_base_asset_weight: perp_market.maint_base_asset_weight,
            init_base_asset_weight: perp_market.init_base_asset_weight,
            maint_base_liab_weight: perp_market.maint_base_liab_weight,
            init_base_liab_weight: perp_market.init_base_liab_weight,
            maint_overall_asset_weight: perp_market.maint_overall_asset_weight,
            init_overall_asset_weight: perp_market.init_overall_asset_weight,
            base_lot_size: perp_market.base_lot_size,
            base_lots,
            bids_base_lots: perp_position.bids_base_lots,
            asks_base_lots: perp_position.asks_base_lots,
            quote,
            prices: perp_market.prices(),
            has_open_orders: perp_position.has_open_orders(),
        }
    }

    pub fn empty_from_market(perp_market: &PerpMarket) -> Self {
        Self::from_position(perp_market, &PerpPosition::default())
    }

    /// The perp position's contribution to account health.
    ///
    /// Positive contributions are scaled down by the overall asset weight:
    /// unsettled perp gains are less reliable collateral than spot deposits,
    /// so they get an extra haircut on top of the base weighting. Negative
    /// contributions pass through unweighted, which is already conservative.
    #[inline(always)]
    pub fn health_contribution(&self, health_type: HealthType) -> I80F48 {
        let contribution = self.unweighted_health_contribution(health_type);
        if contribution.is_positive() {
            let overall_weight = match health_type {
                HealthType::Init | HealthType::LiquidationEnd => self.init_overall_asset_weight,
                HealthType::Maint => self.maint_overall_asset_weight,
            };
            overall_weight * contribution
        } else {
            contribution
        }
    }

    /// Quote-native contribution before the overall asset weight.
    ///
    /// For open orders this computes the worst-case outcome by considering
    /// the scenario where all bids execute (at the liab price) and the one
    /// where all asks execute (at the asset price), taking whichever is
    /// worse.
    #[inline(always)]
    pub fn unweighted_health_contribution(&self, health_type: HealthType) -> I80F48 {
        let order_execution_case = |orders_base_lots: i64, order_price: I80F48| {
            let net_base_native =
                I80F48::from((self.base_lots + orders_base_lots) * self.base_lot_size);
            let weight = match (health_type, net_base_native.is_negative()) {
                (HealthType::Init, true) | (HealthType::LiquidationEnd, true) => {
                    self.init_base_liab_weight
                }
                (HealthType::Init, false) | (HealthType::LiquidationEnd, false) => {
                    self.init_base_asset_weight
                }
                (HealthType::Maint, true) => self.maint_base_liab_weight,
                (HealthType::Maint, false) => self.maint_base_asset_weight,
            };
            let base_price = if net_base_native.is_negative() {
                self.prices.liab(health_type)
            } else {
                self.prices.asset(health_type)
            };

            // Total value of the order-execution adjusted base position
            let base_health = net_base_native * weight * base_price;

            let orders_base_native = I80F48::from(orders_base_lots * self.base_lot_size);
            // The quote change from executing the bids/asks
            let order_quote = -orders_base_native * order_price;

            base_health + order_quote
        };

        // What is worse: executing all bids at the liab price, or executing
        // all asks at the asset price?
        let bids_case =
            order_execution_case(self.bids_base_lots, self.prices.liab(health_type));
        let asks_case =
            order_execution_case(-self.asks_base_lots, self.prices.asset(health_type));
        let worst_case = bids_case.min(asks_case);

        self.quote + worst_case
    }
}

/// Store information needed to compute account health.
///
/// This is called a cache because it extracts information from an account and
/// its bank/market/oracle data once and then allows computing different
/// health types from the extracted data.
///
/// The cache is a read-only snapshot: all what-if operations clone it, apply
/// a hypothetical change to the clone and evaluate that, so the original
/// always reflects the account state it was built from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthCache {
    pub token_infos: Vec<TokenInfo>,
    pub serum3_infos: Vec<Serum3Info>,
    pub perp_infos: Vec<PerpInfo>,
}

/// Generate a HealthCache from an account snapshot.
///
/// Errors if a serum3 entry references a token the account has no position
/// for.
pub fn new_health_cache(account: &AccountSnapshot) -> Result<HealthCache> {
    let mut token_infos = Vec::with_capacity(account.tokens.len());
    for entry in account.tokens.iter() {
        token_infos.push(TokenInfo::from_bank(&entry.bank, entry.balance_native));
    }

    let mut serum3_infos = Vec::with_capacity(account.serum3.len());
    for entry in account.serum3.iter() {
        let base_index = find_token_info_index(&token_infos, entry.market.base_token_index)?;
        let quote_index = find_token_info_index(&token_infos, entry.market.quote_token_index)?;
        serum3_infos.push(Serum3Info::from_open_orders(
            &entry.market,
            &entry.open_orders,
            base_index,
            quote_index,
            &mut token_infos,
        ));
    }

    let perp_infos = account
        .perps
        .iter()
        .map(|entry| PerpInfo::from_position(&entry.market, &entry.position))
        .collect();

    Ok(HealthCache {
        token_infos,
        serum3_infos,
        perp_infos,
    })
}

pub(crate) fn find_token_info_index(
    infos: &[TokenInfo],
    token_index: TokenIndex,
) -> Result<usize> {
    infos
        .iter()
        .position(|ti| ti.token_index == token_index)
        .ok_or(Error::TokenPositionMissing(token_index))
}

impl HealthCache {
    pub fn new(
        token_infos: Vec<TokenInfo>,
        serum3_infos: Vec<Serum3Info>,
        perp_infos: Vec<PerpInfo>,
    ) -> Self {
        Self {
            token_infos,
            serum3_infos,
            perp_infos,
        }
    }

    /// Phase 1 of the serum3 valuation: for each market convert the reserved
    /// amounts fully to base and fully to quote, and accumulate per-token
    /// totals of everything that could possibly arrive in that token.
    pub fn compute_serum3_reservations(
        &self,
        health_type: HealthType,
    ) -> (Vec<I80F48>, Vec<Serum3Reserved>) {
        let mut token_max_reserved = vec![I80F48::ZERO; self.token_infos.len()];
        let mut serum3_reserved = Vec::with_capacity(self.serum3_infos.len());

        for info in self.serum3_infos.iter() {
            let quote_info = &self.token_infos[info.quote_index];
            let base_info = &self.token_infos[info.base_index];

            let quote_asset = quote_info.prices.asset(health_type);
            let base_liab = base_info.prices.liab(health_type);
            // (reserved quote converted at the unfavorable price) + reserved base
            let all_reserved_as_base =
                info.reserved_base + info.reserved_quote * quote_asset / base_liab;

            let base_asset = base_info.prices.asset(health_type);
            let quote_liab = quote_info.prices.liab(health_type);
            let all_reserved_as_quote =
                info.reserved_quote + info.reserved_base * base_asset / quote_liab;

            token_max_reserved[info.base_index] += all_reserved_as_base;
            token_max_reserved[info.quote_index] += all_reserved_as_quote;

            serum3_reserved.push(Serum3Reserved {
                all_reserved_as_base,
                all_reserved_as_quote,
            });
        }

        (token_max_reserved, serum3_reserved)
    }

    fn health_sum(&self, health_type: HealthType, mut action: impl FnMut(I80F48)) {
        for token_info in self.token_infos.iter() {
            action(token_info.health_contribution(health_type));
        }

        let (token_max_reserved, serum3_reserved) =
            self.compute_serum3_reservations(health_type);
        for (serum3_info, reserved) in self.serum3_infos.iter().zip(serum3_reserved.iter()) {
            action(serum3_info.health_contribution(
                health_type,
                &self.token_infos,
                &token_max_reserved,
                reserved,
            ));
        }

        for perp_info in self.perp_infos.iter() {
            action(perp_info.health_contribution(health_type));
        }
    }

    pub fn health(&self, health_type: HealthType) -> I80F48 {
        let mut health = I80F48::ZERO;
        self.health_sum(health_type, |contrib| health += contrib);
        health
    }

    /// Sum of the positive health contributions.
    pub fn assets(&self, health_type: HealthType) -> I80F48 {
        let mut assets = I80F48::ZERO;
        self.health_sum(health_type, |contrib| {
            if contrib.is_positive() {
                assets += contrib;
            }
        });
        assets
    }

    /// Sum of the negative health contributions, as a positive magnitude.
    pub fn liabs(&self, health_type: HealthType) -> I80F48 {
        let mut liabs = I80F48::ZERO;
        self.health_sum(health_type, |contrib| {
            if contrib.is_negative() {
                liabs -= contrib;
            }
        });
        liabs
    }

    /// The health ratio is
    /// - 0 if health is 0 - meaning assets = liabs
    /// - 100 if there's 2x as many assets as liabs
    /// - 200 if there's 3x as many assets as liabs
    /// - MAX if liabs = 0
    pub fn health_ratio(&self, health_type: HealthType) -> I80F48 {
        let mut assets = I80F48::ZERO;
        let mut liabs = I80F48::ZERO;
        self.health_sum(health_type, |contrib| {
            if contrib.is_positive() {
                assets += contrib;
            } else {
                liabs -= contrib;
            }
        });

        if liabs > I80F48::from_num(0.001) {
            I80F48::from(100) * (assets - liabs) / liabs
        } else {
            I80F48::MAX
        }
    }

    /// Maint health, with perp contributions clamped to be nonnegative.
    ///
    /// Settling negative perp pnl into the spot realm is only allowed while
    /// this stays positive: the settlement must be backed by non-perp assets.
    pub fn perp_settle_health(&self) -> I80F48 {
        let health_type = HealthType::Maint;
        let mut health = I80F48::ZERO;
        for token_info in self.token_infos.iter() {
            health += token_info.health_contribution(health_type);
        }
        let (token_max_reserved, serum3_reserved) =
            self.compute_serum3_reservations(health_type);
        for (serum3_info, reserved) in self.serum3_infos.iter().zip(serum3_reserved.iter()) {
            health += serum3_info.health_contribution(
                health_type,
                &self.token_infos,
                &token_max_reserved,
                reserved,
            );
        }
        for perp_info in self.perp_infos.iter() {
            health += perp_info.health_contribution(health_type).max(I80F48::ZERO);
        }
        health
    }

    pub fn token_info(&self, token_index: TokenIndex) -> Result<&TokenInfo> {
        Ok(&self.token_infos[self.token_info_index(token_index)?])
    }

    pub fn token_info_index(&self, token_index: TokenIndex) -> Result<usize> {
        find_token_info_index(&self.token_infos, token_index)
    }

    pub(crate) fn get_or_create_token_info_index(&mut self, bank: &Bank) -> usize {
        match self.token_info_index(bank.token_index) {
            Ok(index) => index,
            Err(_) => {
                self.token_infos
                    .push(TokenInfo::from_bank(bank, I80F48::ZERO));
                self.token_infos.len() - 1
            }
        }
    }

    pub fn serum3_info_index(&self, market_index: Serum3MarketIndex) -> Result<usize> {
        self.serum3_infos
            .iter()
            .position(|si| si.market_index == market_index)
            .ok_or(Error::Serum3MarketMissing(market_index))
    }

    pub(crate) fn get_or_create_serum3_info_index(
        &mut self,
        base_bank: &Bank,
        quote_bank: &Bank,
        market: &Serum3Market,
    ) -> usize {
        let base_index = self.get_or_create_token_info_index(base_bank);
        let quote_index = self.get_or_create_token_info_index(quote_bank);
        match self.serum3_info_index(market.market_index) {
            Ok(index) => index,
            Err(_) => {
                self.serum3_infos.push(Serum3Info::empty_from_market(
                    market,
                    base_index,
                    quote_index,
                ));
                self.serum3_infos.len() - 1
            }
        }
    }

    pub fn perp_info(&self, perp_market_index: PerpMarketIndex) -> Result<&PerpInfo> {
        Ok(&self.perp_infos[self.perp_info_index(perp_market_index)?])
    }

    pub fn perp_info_index(&self, perp_market_index: PerpMarketIndex) -> Result<usize> {
        self.perp_infos
            .iter()
            .position(|pi| pi.perp_market_index == perp_market_index)
            .ok_or(Error::PerpPositionMissing(perp_market_index))
    }

    pub(crate) fn get_or_create_perp_info_index(&mut self, perp_market: &PerpMarket) -> usize {
        match self.perp_info_index(perp_market.perp_market_index) {
            Ok(index) => index,
            Err(_) => {
                self.perp_infos
                    .push(PerpInfo::empty_from_market(perp_market));
                self.perp_infos.len() - 1
            }
        }
    }

    /// Move funds between token balance and serum3 reservations, creating
    /// entries as needed. Free changes apply to the token balances, reserved
    /// changes to the market's open-orders reservation.
    pub(crate) fn adjust_serum3_reserved(
        &mut self,
        base_bank: &Bank,
        quote_bank: &Bank,
        market: &Serum3Market,
        reserved_base_change: I80F48,
        free_base_change: I80F48,
        reserved_quote_change: I80F48,
        free_quote_change: I80F48,
    ) {
        let base_index = self.get_or_create_token_info_index(base_bank);
        let quote_index = self.get_or_create_token_info_index(quote_bank);
        self.token_infos[base_index].balance_native += free_base_change;
        self.token_infos[quote_index].balance_native += free_quote_change;

        let serum3_index = self.get_or_create_serum3_info_index(base_bank, quote_bank, market);
        let serum3_info = &mut self.serum3_infos[serum3_index];
        serum3_info.reserved_base += reserved_base_change;
        serum3_info.reserved_quote += reserved_quote_change;
    }

    /// Apply a perp order fill of `base_lots` at `price` to the cached
    /// position.
    pub(crate) fn adjust_perp_info(
        &mut self,
        perp_info_index: usize,
        price: I80F48,
        side: PerpOrderSide,
        base_lots: i64,
    ) {
        let perp_info = &mut self.perp_infos[perp_info_index];
        let quote_change =
            I80F48::from(base_lots) * I80F48::from(perp_info.base_lot_size) * price;
        match side {
            PerpOrderSide::Bid => {
                perp_info.base_lots += base_lots;
                perp_info.quote -= quote_change;
            }
            PerpOrderSide::Ask => {
                perp_info.base_lots -= base_lots;
                perp_info.quote += quote_change;
            }
        }
    }

    /// Health ratio after applying hypothetical token balance changes
    /// (native amounts). The receiver is not modified.
    pub fn sim_health_ratio_with_token_position_changes(
        &self,
        changes: &[(&Bank, I80F48)],
        health_type: HealthType,
    ) -> I80F48 {
        let mut adjusted = self.clone();
        for &(bank, native_amount) in changes.iter() {
            let index = adjusted.get_or_create_token_info_index(bank);
            // Note: does not recompute the scaled init weights; the change is
            // assumed small relative to the bank-wide totals.
            adjusted.token_infos[index].balance_native += native_amount;
        }
        adjusted.health_ratio(health_type)
    }

    /// Health ratio after placing a spot bid of `bid_native_quote_amount`:
    /// the quote balance moves into the market's reserved funds. The receiver
    /// is not modified.
    pub fn sim_health_ratio_with_serum3_bid_changes(
        &self,
        base_bank: &Bank,
        quote_bank: &Bank,
        market: &Serum3Market,
        bid_native_quote_amount: I80F48,
        health_type: HealthType,
    ) -> I80F48 {
        let mut adjusted = self.clone();
        let quote_index = adjusted.get_or_create_token_info_index(quote_bank);
        adjusted.token_infos[quote_index].balance_native -= bid_native_quote_amount;
        adjusted.adjust_serum3_reserved(
            base_bank,
            quote_bank,
            market,
            I80F48::ZERO,
            I80F48::ZERO,
            bid_native_quote_amount,
            I80F48::ZERO,
        );
        adjusted.health_ratio(health_type)
    }

    /// Health ratio after placing a spot ask of `ask_native_base_amount`:
    /// the base balance moves into the market's reserved funds. The receiver
    /// is not modified.
    pub fn sim_health_ratio_with_serum3_ask_changes(
        &self,
        base_bank: &Bank,
        quote_bank: &Bank,
        market: &Serum3Market,
        ask_native_base_amount: I80F48,
        health_type: HealthType,
    ) -> I80F48 {
        let mut adjusted = self.clone();
        let base_index = adjusted.get_or_create_token_info_index(base_bank);
        adjusted.token_infos[base_index].balance_native -= ask_native_base_amount;
        adjusted.adjust_serum3_reserved(
            base_bank,
            quote_bank,
            market,
            ask_native_base_amount,
            I80F48::ZERO,
            I80F48::ZERO,
            I80F48::ZERO,
        );
        adjusted.health_ratio(health_type)
    }

    /// Health ratio after a hypothetical perp order fill. The receiver is not
    /// modified.
    pub fn sim_health_ratio_with_perp_order_changes(
        &self,
        perp_market: &PerpMarket,
        side: PerpOrderSide,
        base_lots: i64,
        price: I80F48,
        health_type: HealthType,
    ) -> I80F48 {
        let mut adjusted = self.clone();
        let perp_info_index = adjusted.get_or_create_perp_info_index(perp_market);
        adjusted.adjust_perp_info(perp_info_index, price, side, base_lots);
        adjusted.health_ratio(health_type)
    }

    /// Log the cache contents at debug level.
    pub fn log_health_cache(&self, context: &str) {
        tracing::debug!("health cache: {}", context);
        for token in self.token_infos.iter() {
            tracing::debug!(
                "  token index {}, balance {}, init contribution {}",
                token.token_index,
                token.balance_native,
                token.health_contribution(HealthType::Init),
            );
        }
        let (token_max_reserved, serum3_reserved) =
            self.compute_serum3_reservations(HealthType::Init);
        for (serum3_info, reserved) in self.serum3_infos.iter().zip(serum3_reserved.iter()) {
            tracing::debug!(
                "  serum3 market {}, reserved base {}, reserved quote {}, init contribution {}",
                serum3_info.market_index,
                serum3_info.reserved_base,
                serum3_info.reserved_quote,
                serum3_info.health_contribution(
                    HealthType::Init,
                    &self.token_infos,
                    &token_max_reserved,
                    reserved,
                ),
            );
        }
        for perp_info in self.perp_infos.iter() {
            tracing::debug!(
                "  perp market {}, base lots {}, quote {}, init contribution {}",
                perp_info.perp_market_index,
                perp_info.base_lots,
                perp_info.quote,
                perp_info.health_contribution(HealthType::Init),
            );
        }
        tracing::debug!(
            "  health(Init) {}, ratio {}",
            self.health(HealthType::Init),
            self.health_ratio(HealthType::Init),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::super::test::*;
    use super::*;
    use crate::state::{PerpEntry, Serum3Entry, TokenEntry};

    fn token_infos_basic(t1: f64, t2: f64, t3: f64) -> Vec<TokenInfo> {
        let bank1 = mock_bank(0, 0.1, 0.2, 1.0);
        let bank2 = mock_bank(4, 0.3, 0.5, 5.0);
        let bank3 = mock_bank(5, 0.3, 0.5, 10.0);
        vec![
            TokenInfo::from_bank(&bank1, I80F48::from_num(t1)),
            TokenInfo::from_bank(&bank2, I80F48::from_num(t2)),
            TokenInfo::from_bank(&bank3, I80F48::from_num(t3)),
        ]
    }

    fn serum3_info(
        market_index: Serum3MarketIndex,
        base_index: usize,
        reserved_base: f64,
        reserved_quote: f64,
    ) -> Serum3Info {
        Serum3Info {
            reserved_base: I80F48::from_num(reserved_base),
            reserved_quote: I80F48::from_num(reserved_quote),
            base_index,
            quote_index: 0,
            market_index,
        }
    }

    // perp market 9: base weights 0.9/0.8 asset, 1.1/1.2 liab, lot size 10,
    // price 5, overall weights 0.95 init / 0.98 maint
    fn perp_info(base_lots: i64, quote: f64, bids: i64, asks: i64) -> PerpInfo {
        let market = mock_perp_market(9, 0.1, 0.2, 10, 5.0);
        let position = PerpPosition {
            base_position_lots: base_lots,
            quote_position_native: I80F48::from_num(quote),
            bids_base_lots: bids,
            asks_base_lots: asks,
            taker_base_lots: 0,
            taker_quote_lots: 0,
        };
        PerpInfo::from_position(&market, &position)
    }

    #[test]
    fn test_health_fixtures() {
        struct Case {
            name: &'static str,
            tokens: (f64, f64, f64),
            // (reserved_quote, reserved_base) for markets base=token4 / base=token5
            oo_1_2: (f64, f64),
            oo_1_3: (f64, f64),
            perp: Option<(i64, f64, i64, i64)>,
            expected_init: f64,
        }
        let cases = [
            Case {
                // tokens: 0.8*100 - 1.5*50; oo (worst: all reserved as quote,
                // covered by the token1 balance): (20 + 15*5) * 0.8; perp
                // bids-scenario: quote -131-350, base (3+7) lots * 50 * 0.8
                name: "tokens, open orders and perp",
                tokens: (100.0, -10.0, 0.0),
                oo_1_2: (20.0, 15.0),
                oo_1_3: (0.0, 0.0),
                perp: Some((3, -131.0, 7, 11)),
                expected_init: 0.0,
            },
            Case {
                name: "borrows, open orders and perp",
                tokens: (-100.0, 10.0, 0.0),
                oo_1_2: (20.0, 15.0),
                oo_1_3: (0.0, 0.0),
                perp: Some((-10, -131.0, 7, 11)),
                expected_init: -888.5,
            },
            Case {
                // 0.95 * (100 - 1.2 * 50)
                name: "weighted positive perp pnl",
                tokens: (0.0, 0.0, 0.0),
                oo_1_2: (0.0, 0.0),
                oo_1_3: (0.0, 0.0),
                perp: Some((-1, 100.0, 0, 0)),
                expected_init: 38.0,
            },
            Case {
                // -100 + 0.8 * 50, no overall weighting on the negative result
                name: "negative perp pnl is not weighted",
                tokens: (0.0, 0.0, 0.0),
                oo_1_2: (0.0, 0.0),
                oo_1_3: (0.0, 0.0),
                perp: Some((1, -100.0, 0, 0)),
                expected_init: -60.0,
            },
            Case {
                // 0.95 * (100 + 0.8 * 500)
                name: "positive perp health",
                tokens: (0.0, 0.0, 0.0),
                oo_1_2: (0.0, 0.0),
                oo_1_3: (0.0, 0.0),
                perp: Some((10, 100.0, 0, 0)),
                expected_init: 475.0,
            },
            Case {
                // 0.95 * (-100 + 0.8 * 1500)
                name: "positive perp health, negative quote",
                tokens: (0.0, 0.0, 0.0),
                oo_1_2: (0.0, 0.0),
                oo_1_3: (0.0, 0.0),
                perp: Some((30, -100.0, 0, 0)),
                expected_init: 1045.0,
            },
            Case {
                // tokens -120 - 75 - 150; both markets' reserved funds pay
                // back token0 borrows: (1+5)*1.2 and (1+10)*1.2
                name: "reserved oo funds",
                tokens: (-100.0, -10.0, -10.0),
                oo_1_2: (1.0, 1.0),
                oo_1_3: (1.0, 1.0),
                perp: None,
                expected_init: -324.6,
            },
            Case {
                // reserved funds cross the zero balance level of token0:
                // 3*1.2 + 3*0.8 and 8*1.2 + 3*0.8
                name: "reserved oo funds cross zero balance",
                tokens: (-14.0, -10.0, -10.0),
                oo_1_2: (1.0, 1.0),
                oo_1_3: (1.0, 1.0),
                perp: None,
                expected_init: -223.8,
            },
            Case {
                // the worst case for the 1/3 market is all-reserved-as-base
                // (token5): 10*1.5 + 10*0.5
                name: "reserved oo funds in a non-quote currency",
                tokens: (-100.0, -100.0, -1.0),
                oo_1_2: (0.0, 0.0),
                oo_1_3: (10.0, 1.0),
                perp: None,
                expected_init: -865.0,
            },
            Case {
                // the 1/2 market's reservations flip the worst case of the
                // 1/3 market to the quote side: 80*1.2 + 20*0.8 and 20*0.8
                name: "one market flips the other's worst case",
                tokens: (-100.0, -100.0, -1.0),
                oo_1_2: (100.0, 0.0),
                oo_1_3: (10.0, 1.0),
                perp: None,
                expected_init: -757.0,
            },
        ];

        for case in cases.iter() {
            println!("checking case \"{}\"", case.name);
            let mut serum3_infos = vec![];
            if case.oo_1_2 != (0.0, 0.0) {
                serum3_infos.push(serum3_info(2, 1, case.oo_1_2.1, case.oo_1_2.0));
            }
            if case.oo_1_3 != (0.0, 0.0) {
                serum3_infos.push(serum3_info(3, 2, case.oo_1_3.1, case.oo_1_3.0));
            }
            let perp_infos = case
                .perp
                .iter()
                .map(|&(lots, quote, bids, asks)| perp_info(lots, quote, bids, asks))
                .collect();
            let cache = HealthCache::new(
                token_infos_basic(case.tokens.0, case.tokens.1, case.tokens.2),
                serum3_infos,
                perp_infos,
            );
            assert!(health_eq(cache.health(HealthType::Init), case.expected_init));
        }
    }

    #[test]
    fn test_health_with_scaled_weights() {
        let mut bank1 = mock_bank(0, 0.1, 0.2, 1.0);
        let mut bank2 = mock_bank(4, 0.3, 0.5, 5.0);
        let mut bank3 = mock_bank(5, 0.3, 0.5, 10.0);

        // deposit concentration scaling
        bank1.deposits = I80F48::from(100);
        bank1.deposit_weight_scale_start_quote = 1000.0;
        bank2.deposits = I80F48::from(1500);
        bank2.deposit_weight_scale_start_quote = 5000.0;
        bank3.deposits = I80F48::from(10000);
        bank3.deposit_weight_scale_start_quote = 10000.0;
        let cache = HealthCache::new(
            vec![
                TokenInfo::from_bank(&bank1, I80F48::from(100)),
                TokenInfo::from_bank(&bank2, I80F48::from(100)),
                TokenInfo::from_bank(&bank3, I80F48::from(100)),
            ],
            vec![],
            vec![],
        );
        assert!(health_eq(
            cache.health(HealthType::Init),
            0.8 * 100.0
                + 0.5 * 100.0 * 5.0 * (5000.0 / (1500.0 * 5.0))
                + 0.5 * 100.0 * 10.0 * (10000.0 / (10000.0 * 10.0)),
        ));
        // LiquidationEnd uses the unscaled init weights
        assert!(health_eq(
            cache.health(HealthType::LiquidationEnd),
            0.8 * 100.0 + 0.5 * 100.0 * 5.0 + 0.5 * 100.0 * 10.0,
        ));

        // borrow concentration scaling
        let mut bank1 = mock_bank(0, 0.1, 0.2, 1.0);
        let mut bank2 = mock_bank(4, 0.3, 0.5, 5.0);
        let mut bank3 = mock_bank(5, 0.3, 0.5, 10.0);
        bank1.borrows = I80F48::from(100);
        bank1.borrow_weight_scale_start_quote = 1000.0;
        bank2.borrows = I80F48::from(1500);
        bank2.borrow_weight_scale_start_quote = 5000.0;
        bank3.borrows = I80F48::from(10000);
        bank3.borrow_weight_scale_start_quote = 10000.0;
        let cache = HealthCache::new(
            vec![
                TokenInfo::from_bank(&bank1, I80F48::from(-100)),
                TokenInfo::from_bank(&bank2, I80F48::from(-100)),
                TokenInfo::from_bank(&bank3, I80F48::from(-100)),
            ],
            vec![],
            vec![],
        );
        assert!(health_eq(
            cache.health(HealthType::Init),
            -1.2 * 100.0
                - 1.5 * 100.0 * 5.0 * (1500.0 * 5.0 / 5000.0)
                - 1.5 * 100.0 * 10.0 * (10000.0 * 10.0 / 10000.0),
        ));
    }

    fn combined_account() -> AccountSnapshot {
        AccountSnapshot {
            tokens: vec![
                TokenEntry {
                    bank: mock_bank(0, 0.1, 0.2, 1.0),
                    balance_native: I80F48::from(100),
                },
                TokenEntry {
                    bank: mock_bank(4, 0.3, 0.5, 5.0),
                    balance_native: I80F48::from(-10),
                },
            ],
            serum3: vec![Serum3Entry {
                market: mock_serum3_market(2, 4, 0),
                open_orders: OpenOrdersSlim {
                    native_base_total: 18,
                    native_base_free: 3,
                    native_quote_total: 21,
                    native_quote_free: 1,
                    native_rebates: 2,
                },
            }],
            perps: vec![PerpEntry {
                market: mock_perp_market(9, 0.1, 0.2, 10, 5.0),
                position: PerpPosition {
                    base_position_lots: 3,
                    quote_position_native: I80F48::from(-310),
                    bids_base_lots: 7,
                    asks_base_lots: 11,
                    taker_base_lots: 1,
                    taker_quote_lots: 2,
                },
            }],
        }
    }

    // A full account: free open-orders funds and rebates fold into balances,
    // taker lots fold into the perp position.
    #[test]
    fn test_health_from_account_snapshot() {
        let cache = new_health_cache(&combined_account()).unwrap();

        // token0: 100 + 1 free + 2 rebates, token4: -10 + 3 free
        assert!(health_eq(
            cache.token_infos[0].balance_native,
            103.0
        ));
        assert!(health_eq(cache.token_infos[1].balance_native, -7.0));
        // perp folds in 1 taker base lot and 2*100 taker quote
        assert_eq!(cache.perp_infos[0].base_lots, 4);
        assert!(health_eq(cache.perp_infos[0].quote, -110.0));

        assert!(health_eq(cache.health(HealthType::Init), 85.9));
        assert!(health_eq(cache.health(HealthType::Maint), 167.0));
        assert!(health_eq(cache.assets(HealthType::Init), 158.4));
        assert!(health_eq(cache.liabs(HealthType::Init), 72.5));
        assert!(health_eq(
            cache.health_ratio(HealthType::Init),
            100.0 * (158.4 - 72.5) / 72.5,
        ));
    }

    #[test]
    fn test_construction_is_idempotent() {
        let account = combined_account();
        let cache1 = new_health_cache(&account).unwrap();
        let cache2 = new_health_cache(&account).unwrap();
        for health_type in [
            HealthType::Init,
            HealthType::Maint,
            HealthType::LiquidationEnd,
        ] {
            assert_eq!(cache1.health(health_type), cache2.health(health_type));
            assert_eq!(
                cache1.health_ratio(health_type),
                cache2.health_ratio(health_type)
            );
        }
    }

    #[test]
    fn test_construction_rejects_unknown_serum3_tokens() {
        let mut account = combined_account();
        account.serum3[0].market.base_token_index = 77;
        assert!(matches!(
            new_health_cache(&account),
            Err(Error::TokenPositionMissing(77))
        ));
    }

    #[test]
    fn test_health_ratio_sentinel() {
        let bank = mock_bank(0, 0.1, 0.2, 1.0);
        let mut cache = HealthCache::new(
            vec![TokenInfo::from_bank(&bank, I80F48::from(100))],
            vec![],
            vec![],
        );
        // no liabilities: unboundedly healthy
        assert_eq!(cache.health_ratio(HealthType::Init), I80F48::MAX);
        assert_eq!(cache.health_ratio(HealthType::Maint), I80F48::MAX);

        // any borrow makes the ratio finite
        let bank2 = mock_bank(1, 0.1, 0.2, 1.0);
        cache
            .token_infos
            .push(TokenInfo::from_bank(&bank2, I80F48::from(-10)));
        let ratio = cache.health_ratio(HealthType::Init);
        assert!(ratio < I80F48::MAX);
        assert!(health_eq(ratio, 100.0 * (80.0 - 12.0) / 12.0));
    }

    #[test]
    fn test_stable_price_regimes() {
        let mut bank = mock_bank(1, 0.1, 0.2, 1.0);
        bank.stable_price = I80F48::from_num(0.5);

        // deposits are valued at the lower of oracle/stable for Init
        let cache = HealthCache::new(
            vec![TokenInfo::from_bank(&bank, I80F48::from(100))],
            vec![],
            vec![],
        );
        assert!(health_eq(cache.health(HealthType::Init), 0.8 * 0.5 * 100.0));
        assert!(health_eq(cache.health(HealthType::Maint), 0.9 * 1.0 * 100.0));
        assert!(health_eq(
            cache.health(HealthType::LiquidationEnd),
            0.8 * 1.0 * 100.0
        ));

        // borrows at the higher of oracle/stable for Init
        let cache = HealthCache::new(
            vec![TokenInfo::from_bank(&bank, I80F48::from(-100))],
            vec![],
            vec![],
        );
        assert!(health_eq(cache.health(HealthType::Init), -1.2 * 1.0 * 100.0));
        assert!(health_eq(cache.health(HealthType::Maint), -1.1 * 1.0 * 100.0));
        assert!(health_eq(
            cache.health(HealthType::LiquidationEnd),
            -1.2 * 1.0 * 100.0
        ));
    }

    #[test]
    fn test_perp_settle_health_ignores_perp_losses() {
        let bank = mock_bank(0, 0.1, 0.2, 1.0);
        let cache = HealthCache::new(
            vec![TokenInfo::from_bank(&bank, I80F48::from(100))],
            vec![],
            vec![perp_info(1, -100.0, 0, 0)],
        );
        // maint: 0.9*100 + (-100 + 0.9*50) = 35
        assert!(health_eq(cache.health(HealthType::Maint), 35.0));
        // settle health clamps the perp loss to zero
        assert!(health_eq(cache.perp_settle_health(), 90.0));
    }

    #[test]
    fn test_simulations_leave_receiver_unchanged() {
        let cache = new_health_cache(&combined_account()).unwrap();
        let health_before = cache.health(HealthType::Init);

        let base_bank = mock_bank(4, 0.3, 0.5, 5.0);
        let quote_bank = mock_bank(0, 0.1, 0.2, 1.0);
        let market = mock_serum3_market(2, 4, 0);
        let perp_market = mock_perp_market(9, 0.1, 0.2, 10, 5.0);

        cache.sim_health_ratio_with_token_position_changes(
            &[(&quote_bank, I80F48::from(-50))],
            HealthType::Init,
        );
        cache.sim_health_ratio_with_serum3_bid_changes(
            &base_bank,
            &quote_bank,
            &market,
            I80F48::from(10),
            HealthType::Init,
        );
        cache.sim_health_ratio_with_serum3_ask_changes(
            &base_bank,
            &quote_bank,
            &market,
            I80F48::from(10),
            HealthType::Init,
        );
        cache.sim_health_ratio_with_perp_order_changes(
            &perp_market,
            PerpOrderSide::Bid,
            2,
            I80F48::from(5),
            HealthType::Init,
        );

        assert_eq!(cache.health(HealthType::Init), health_before);
    }

    #[test]
    fn test_sim_creates_missing_entries() {
        let bank = mock_bank(0, 0.1, 0.2, 1.0);
        let cache = HealthCache::new(
            vec![TokenInfo::from_bank(&bank, I80F48::from(100))],
            vec![],
            vec![],
        );

        // simulate a borrow in a token the account holds no position for
        let other_bank = mock_bank(7, 0.3, 0.5, 5.0);
        let ratio = cache.sim_health_ratio_with_token_position_changes(
            &[(&other_bank, I80F48::from(-10))],
            HealthType::Init,
        );
        assert!(health_eq(ratio, 100.0 * (80.0 - 75.0) / 75.0));

        // simulate a perp order in a market without a position
        let perp_market = mock_perp_market(3, 0.1, 0.2, 10, 5.0);
        let ratio = cache.sim_health_ratio_with_perp_order_changes(
            &perp_market,
            PerpOrderSide::Bid,
            1,
            I80F48::from(5),
            HealthType::Init,
        );
        assert!(ratio < I80F48::MAX);
    }

    #[test]
    fn test_serum3_bid_ask_round_trip() {
        let account = combined_account();
        let cache = new_health_cache(&account).unwrap();
        let ratio_before = cache.health_ratio(HealthType::Init);

        let base_bank = mock_bank(4, 0.3, 0.5, 5.0);
        let quote_bank = mock_bank(0, 0.1, 0.2, 1.0);
        let market = mock_serum3_market(2, 4, 0);

        // apply a bid-style reservation and its exact inverse
        let mut adjusted = cache.clone();
        let amount = I80F48::from(25);
        let quote_index = adjusted.get_or_create_token_info_index(&quote_bank);
        adjusted.token_infos[quote_index].balance_native -= amount;
        adjusted.adjust_serum3_reserved(
            &base_bank,
            &quote_bank,
            &market,
            I80F48::ZERO,
            I80F48::ZERO,
            amount,
            I80F48::ZERO,
        );
        assert_ne!(adjusted.health_ratio(HealthType::Init), ratio_before);

        adjusted.token_infos[quote_index].balance_native += amount;
        adjusted.adjust_serum3_reserved(
            &base_bank,
            &quote_bank,
            &market,
            I80F48::ZERO,
            I80F48::ZERO,
            -amount,
            I80F48::ZERO,
        );
        assert_eq!(adjusted.health_ratio(HealthType::Init), ratio_before);
    }

    #[test]
    fn test_missing_entry_lookups_error() {
        let cache = new_health_cache(&combined_account()).unwrap();
        assert!(matches!(
            cache.token_info(42),
            Err(Error::TokenPositionMissing(42))
        ));
        assert!(matches!(
            cache.serum3_info_index(42),
            Err(Error::Serum3MarketMissing(42))
        ));
        assert!(matches!(
            cache.perp_info(42),
            Err(Error::PerpPositionMissing(42))
        ));
    }

    #[test]
    fn test_cache_serialization_round_trip() {
        let cache = new_health_cache(&combined_account()).unwrap();
        let json = serde_json::to_string(&cache).unwrap();
        let decoded: HealthCache = serde_json::from_str(&json).unwrap();
        assert_eq!(
            decoded.health(HealthType::Init),
            cache.health(HealthType::Init)
        );
        assert_eq!(
            decoded.health_ratio(HealthType::Maint),
            cache.health_ratio(HealthType::Maint)
        );
    }
}
