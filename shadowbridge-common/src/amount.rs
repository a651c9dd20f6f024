//! Fee and base-unit arithmetic.
//!
//! USD amounts arrive as floating point numbers. Everything derived from them
//! goes through their canonical decimal string and integer math so the result
//! does not depend on float rounding.

use ethers_core::{
    types::U256,
    utils::{format_units, parse_units},
};
use thiserror::Error;

use crate::message::canonical_amount;

pub const BPS_DIVISOR: u64 = 10_000;

/// Fixed-point precision used for fee computation.
const FEE_PRECISION: u32 = 18;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount must be a finite number")]
    NotFinite,

    #[error("amount must not be negative")]
    Negative,

    #[error("amount {amount} has more than {decimals} fractional digits")]
    TooPrecise { amount: String, decimals: u32 },

    #[error("amount conversion failed: {0}")]
    Conversion(String),
}

/// Scale `amount` to an integer with `decimals` fractional digits.
pub fn to_base_units(amount: f64, decimals: u32) -> Result<U256, AmountError> {
    if !amount.is_finite() {
        return Err(AmountError::NotFinite);
    }
    if amount < 0.0 {
        return Err(AmountError::Negative);
    }

    let canonical = canonical_amount(amount);
    let fractional = canonical
        .split_once('.')
        .map(|(_, frac)| frac.len())
        .unwrap_or(0);
    if fractional > decimals as usize {
        return Err(AmountError::TooPrecise {
            amount: canonical,
            decimals,
        });
    }

    parse_units(&canonical, decimals)
        .map(U256::from)
        .map_err(|e| AmountError::Conversion(e.to_string()))
}

/// `amount * fee_bps / 10_000`, computed on fixed-point integers.
pub fn fee_usd(amount: f64, fee_bps: u32) -> Result<f64, AmountError> {
    let scaled = to_base_units(amount, FEE_PRECISION)?;
    let fee = scaled * U256::from(fee_bps) / U256::from(BPS_DIVISOR);
    let formatted =
        format_units(fee, FEE_PRECISION).map_err(|e| AmountError::Conversion(e.to_string()))?;
    formatted
        .parse::<f64>()
        .map_err(|e| AmountError::Conversion(e.to_string()))
}
