//! Flat hourly billing.
//!
//! Policy: every started hour is billed in full (partial hours round up, in
//! the operator's favour) and every stay bills at least
//! [`MIN_BILLABLE_HOURS`], including a zero-length one. Rates are integers in
//! the currency's smallest unit, so `hours × rate` is already exact at that
//! unit and no further rounding happens.

use thiserror::Error;

use crate::model::{HOUR_MS, Money, Ms};

/// Floor applied to the billed duration.
pub const MIN_BILLABLE_HOURS: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BillingError {
    #[error("invalid billing input: {0}")]
    InvalidInput(&'static str),
}

/// Whole hours billed for a stay of `elapsed_ms`.
pub fn billable_hours(elapsed_ms: Ms) -> i64 {
    let started = if elapsed_ms <= 0 {
        0
    } else {
        // ceil without going through floats, and without overflowing near Ms::MAX
        elapsed_ms / HOUR_MS + i64::from(elapsed_ms % HOUR_MS != 0)
    };
    started.max(MIN_BILLABLE_HOURS)
}

pub fn compute_fee(entry: Ms, exit: Ms, hourly_rate: Money) -> Result<Money, BillingError> {
    if exit < entry {
        return Err(BillingError::InvalidInput("exit before entry"));
    }
    if hourly_rate <= 0 {
        return Err(BillingError::InvalidInput("hourly rate must be positive"));
    }
    let elapsed = exit
        .checked_sub(entry)
        .ok_or(BillingError::InvalidInput("fee overflows"))?;
    billable_hours(elapsed)
        .checked_mul(hourly_rate)
        .ok_or(BillingError::InvalidInput("fee overflows"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: Ms = 60_000;
    const T0: Ms = 1_700_000_000_000;

    #[test]
    fn ninety_minutes_bills_two_hours() {
        assert_eq!(compute_fee(T0, T0 + 90 * M, 5000), Ok(10_000));
    }

    #[test]
    fn zero_elapsed_bills_minimum() {
        assert_eq!(MIN_BILLABLE_HOURS, 1);
        assert_eq!(compute_fee(T0, T0, 5000), Ok(5000));
    }

    #[test]
    fn exact_hours_do_not_round_up() {
        assert_eq!(compute_fee(T0, T0 + HOUR_MS, 300), Ok(300));
        assert_eq!(compute_fee(T0, T0 + 3 * HOUR_MS, 300), Ok(900));
    }

    #[test]
    fn one_millisecond_past_the_hour_starts_the_next() {
        assert_eq!(billable_hours(HOUR_MS + 1), 2);
        assert_eq!(billable_hours(1), 1);
    }

    #[test]
    fn exit_before_entry_rejected() {
        assert_eq!(
            compute_fee(T0, T0 - 1, 5000),
            Err(BillingError::InvalidInput("exit before entry"))
        );
    }

    #[test]
    fn non_positive_rate_rejected() {
        assert!(compute_fee(T0, T0 + M, 0).is_err());
        assert!(compute_fee(T0, T0 + M, -100).is_err());
    }

    #[test]
    fn overflow_rejected() {
        let r = compute_fee(0, 1000 * HOUR_MS, Money::MAX / 10);
        assert_eq!(r, Err(BillingError::InvalidInput("fee overflows")));
    }

    #[test]
    fn extreme_timestamps_do_not_panic() {
        let hours = Ms::MAX / HOUR_MS + 1;
        assert_eq!(compute_fee(0, Ms::MAX, 1), Ok(hours));
        assert_eq!(billable_hours(Ms::MAX), hours);
        assert_eq!(
            compute_fee(Ms::MIN, Ms::MAX, 1),
            Err(BillingError::InvalidInput("fee overflows"))
        );
        assert_eq!(
            compute_fee(0, Ms::MAX, Money::MAX / 1000),
            Err(BillingError::InvalidInput("fee overflows"))
        );
    }
}
