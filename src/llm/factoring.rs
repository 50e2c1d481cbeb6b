//! Mixed-radix factoring of vocabulary ids
//!
//! An id is written as `num_factors` digits in base `base`, least significant
//! digit first: `id = sum(digit_i * base^i)`. The model predicts one small
//! softmax per digit instead of a softmax over the whole vocabulary.

use crate::error::{LexsubError, Result};

/// Smallest digit count `n >= 1` with `base^n >= vocab_size`
///
/// Integer arithmetic, so exact powers (e.g. 8 in base 2) are not off by one.
pub fn num_factors(vocab_size: usize, base: usize) -> Result<usize> {
    check_base(base)?;
    let mut factors = 1;
    let mut capacity = base;
    while capacity < vocab_size {
        capacity = capacity
            .checked_mul(base)
            .ok_or_else(|| LexsubError::config("factor capacity overflows usize"))?;
        factors += 1;
    }
    Ok(factors)
}

/// Number of ids representable with `num_factors` digits, saturating
pub fn capacity(base: usize, num_factors: usize) -> usize {
    (0..num_factors).fold(1usize, |acc, _| acc.saturating_mul(base))
}

/// Decompose `id` into its digits
pub fn factor_index(id: usize, base: usize, num_factors: usize) -> Result<Vec<usize>> {
    check_base(base)?;
    if id >= capacity(base, num_factors) {
        return Err(LexsubError::Capacity {
            id,
            base,
            num_factors,
        });
    }

    let mut digits = Vec::with_capacity(num_factors);
    let mut rest = id;
    for _ in 0..num_factors {
        digits.push(rest % base);
        rest /= base;
    }
    Ok(digits)
}

/// Recompose an id from its digits
pub fn unfactor_index(digits: &[usize], base: usize) -> usize {
    digits.iter().rev().fold(0, |acc, &d| acc * base + d)
}

fn check_base(base: usize) -> Result<()> {
    if base < 2 {
        return Err(LexsubError::config("factor base must be at least 2"));
    }
    Ok(())
}
