//! Helpers around the engine's fixed-point number type.
//!
//! All engine arithmetic is exact [`I80F48`] (128-bit signed, 48 fractional
//! bits). Floating point only appears at the UI/display boundary through the
//! conversions below.

pub use fixed::types::I80F48;

/// Decimals of the health-reference ("quote") token.
pub const QUOTE_DECIMALS: u32 = 6;

fn decimals_multiplier(decimals: u32) -> I80F48 {
    I80F48::from_num(10u64.pow(decimals))
}

/// Convert a native amount to its UI representation.
///
/// Display-boundary only: the result is a float and must not flow back into
/// health computations.
pub fn to_ui_decimals(native: I80F48, decimals: u32) -> f64 {
    (native / decimals_multiplier(decimals)).to_num::<f64>()
}

/// Convert a native quote amount to its UI representation.
pub fn to_ui_decimals_for_quote(native: I80F48) -> f64 {
    to_ui_decimals(native, QUOTE_DECIMALS)
}

/// Convert a UI amount to native units.
///
/// Rounds to the nearest representable fixed-point value, which preserves the
/// sign of the input; it never truncates a small magnitude to the other side
/// of zero.
pub fn from_ui_decimals(ui: f64, decimals: u32) -> I80F48 {
    I80F48::from_num(ui) * decimals_multiplier(decimals)
}
