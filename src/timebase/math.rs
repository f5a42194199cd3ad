/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Pure arithmetic helpers: GCD and checked LCM, in 32- and 64-bit widths.
//!
//! Participant frequencies accumulate into a 64-bit least common multiple,
//! while per-participant counter thresholds (and their period LCM) stay in
//! 32 bits. Free functions rather than methods so they can be used and tested
//! independently of the schedule compiler.

use thiserror::Error;

/// The LCM result exceeded the width of the operands' type.
///
/// Operands are reported as `u64` regardless of the width that overflowed, so
/// one error type serves both families.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("LCM overflow computing lcm({a}, {b})")]
pub struct LcmOverflow {
    pub a: u64,
    pub b: u64,
}

/// Iterative Euclidean GCD (32-bit). Always returns `0` when both inputs are `0`.
///
/// The iterative form is preferred over the recursive one because it does not
/// risk a stack overflow for very large inputs.
pub fn gcd_u32(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Iterative Euclidean GCD (64-bit).
pub fn gcd_u64(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Checked LCM (32-bit): `Err(LcmOverflow)` if the result would overflow `u32`.
///
/// Uses the overflow-safe formulation `(a / gcd(a, b)) * b` — the division
/// happens first, making overflow far less likely — but the final
/// multiplication is still checked with `checked_mul`.
///
/// Returns `Ok(0)` when either input is `0`, matching standard LCM convention.
pub fn lcm_u32(a: u32, b: u32) -> Result<u32, LcmOverflow> {
    if a == 0 || b == 0 {
        return Ok(0);
    }

    let g = gcd_u32(a, b);
    // a / g is exact (g divides a by definition)
    (a / g).checked_mul(b).ok_or(LcmOverflow {
        a: u64::from(a),
        b: u64::from(b),
    })
}

/// Checked LCM (64-bit): `Err(LcmOverflow)` if the result would overflow `u64`.
pub fn lcm_u64(a: u64, b: u64) -> Result<u64, LcmOverflow> {
    if a == 0 || b == 0 {
        return Ok(0);
    }

    let g = gcd_u64(a, b);
    (a / g).checked_mul(b).ok_or(LcmOverflow { a, b })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── gcd ───────────────────────────────────────────────────────────────────

    #[test]
    fn gcd_basic_cases() {
        assert_eq!(gcd_u32(12, 8), 4);
        assert_eq!(gcd_u32(7, 3), 1);
        assert_eq!(gcd_u64(100, 25), 25);
    }

    #[test]
    fn gcd_with_zero() {
        assert_eq!(gcd_u32(0, 5), 5);
        assert_eq!(gcd_u32(5, 0), 5);
        assert_eq!(gcd_u64(0, 0), 0);
    }

    #[test]
    fn gcd_same_values() {
        assert_eq!(gcd_u64(42, 42), 42);
    }

    #[test]
    fn gcd_coprime() {
        assert_eq!(gcd_u32(17, 13), 1);
    }

    // ── lcm ───────────────────────────────────────────────────────────────────

    #[test]
    fn lcm_basic_cases() {
        assert_eq!(lcm_u32(4, 6).unwrap(), 12);
        assert_eq!(lcm_u32(3, 5).unwrap(), 15);
        assert_eq!(lcm_u64(12, 18).unwrap(), 36);
    }

    #[test]
    fn lcm_with_zero_returns_zero() {
        assert_eq!(lcm_u32(0, 5).unwrap(), 0);
        assert_eq!(lcm_u64(5, 0).unwrap(), 0);
    }

    #[test]
    fn lcm_same_value() {
        assert_eq!(lcm_u64(7, 7).unwrap(), 7);
    }

    #[test]
    fn lcm_u32_overflow_returns_error() {
        // 65537 and 65539 are coprime; their product exceeds u32::MAX
        let result = lcm_u32(65_537, 65_539);
        assert_eq!(
            result,
            Err(LcmOverflow {
                a: 65_537,
                b: 65_539
            })
        );
    }

    #[test]
    fn lcm_u64_overflow_returns_error() {
        // Two large coprime numbers whose LCM exceeds u64::MAX
        let a = u64::MAX / 2 + 1; // 9_223_372_036_854_775_808
        let b = u64::MAX / 2 + 3; // 9_223_372_036_854_775_810  (coprime to a)
        assert!(matches!(lcm_u64(a, b), Err(LcmOverflow { .. })));
    }

    // ── realistic device frequencies (hertz) ──────────────────────────────────

    #[test]
    fn lcm_typical_chip_frequencies_hz() {
        // A 50 MHz core, a 12 MHz bus and a 32768 Hz RTC crystal
        let core_and_bus = lcm_u64(50_000_000, 12_000_000).unwrap();
        assert_eq!(core_and_bus, 300_000_000);
        assert_eq!(lcm_u64(core_and_bus, 32_768).unwrap(), 38_400_000_000);
    }

    #[test]
    fn lcm_folds_left_over_a_frequency_set() {
        // LCM accumulated the way the schedule compiler does: pairwise, left to right
        let freqs = [3u64, 5, 15];
        let acc = freqs
            .iter()
            .try_fold(1u64, |acc, &f| lcm_u64(acc, f))
            .unwrap();
        assert_eq!(acc, 15);
    }
}
