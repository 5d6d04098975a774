//! Pure fixed-point helpers for rebase sizing.

use thiserror::Error;

use crate::fifo::IncentiveParams;
use crate::{GENESIS_EPOCH, UNIT};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MathError {
    #[error("rebase lag should be bigger than 0")]
    ZeroRebaseLag,
    #[error("target price cannot be 0")]
    ZeroTargetPrice,
    #[error("net multiplier is not positive")]
    MultiplierUnderflow,
    #[error("net multiplier overflow")]
    MultiplierOverflow,
}

/// Net supply multiplier for one rebase:
/// `UNIT + (exchange_price - target_price) * UNIT / (target_price * rebase_lag)`.
///
/// A lag-dampened proportional controller: the further price is from target,
/// the larger the adjustment, inversely damped by `rebase_lag`. Division
/// truncates toward zero.
pub fn net_multiplier(
    exchange_price: u64,
    target_price: u64,
    rebase_lag: u64,
) -> Result<u64, MathError> {
    if rebase_lag == 0 {
        return Err(MathError::ZeroRebaseLag);
    }
    if target_price == 0 {
        return Err(MathError::ZeroTargetPrice);
    }
    let unit = UNIT as i128;
    let deviation = exchange_price as i128 - target_price as i128;
    let correction = deviation * unit / (target_price as i128 * rebase_lag as i128);
    let multiplier = unit + correction;
    if multiplier <= 0 {
        return Err(MathError::MultiplierUnderflow);
    }
    u64::try_from(multiplier).map_err(|_| MathError::MultiplierOverflow)
}

/// Largest incentive any tranche can currently earn: the ramp evaluated at
/// `current_epoch - 1`, capped by the configured ceiling.
pub fn max_incentive_factor(current_epoch: u64, params: &IncentiveParams) -> u64 {
    params.incentive_for_age(current_epoch.saturating_sub(GENESIS_EPOCH))
}

/// Epoch below which every tranche earns the maximum incentive, floored at
/// the genesis epoch.
pub fn min_epoch(current_epoch: u64, params: &IncentiveParams) -> u64 {
    current_epoch
        .saturating_sub(params.max_history_len)
        .max(GENESIS_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lag_dampened_multiplier() {
        // price 11, target 7, lag 5: 4/7 deviation damped fivefold
        assert_eq!(net_multiplier(11 * UNIT, 7 * UNIT, 5), Ok(1_114_285_714));
    }

    #[test]
    fn on_target_price_is_identity() {
        assert_eq!(net_multiplier(7 * UNIT, 7 * UNIT, 5), Ok(UNIT));
    }

    #[test]
    fn negative_deviation_shrinks_supply() {
        let m = net_multiplier(9 * UNIT, 10 * UNIT, 10).unwrap();
        assert_eq!(m, UNIT - 10_000_000);
    }

    #[test]
    fn zero_lag_is_rejected() {
        assert_eq!(
            net_multiplier(UNIT, UNIT, 0),
            Err(MathError::ZeroRebaseLag)
        );
    }

    #[test]
    fn zero_target_is_rejected() {
        assert_eq!(
            net_multiplier(UNIT, 0, 5),
            Err(MathError::ZeroTargetPrice)
        );
    }

    #[test]
    fn collapsed_multiplier_is_rejected() {
        // lag 1 with a worthless exchange price drives the multiplier to zero
        assert_eq!(
            net_multiplier(0, UNIT, 1),
            Err(MathError::MultiplierUnderflow)
        );
    }

    #[test]
    fn min_epoch_floors_at_genesis() {
        let params = IncentiveParams::default();
        assert_eq!(min_epoch(1, &params), 1);
        assert_eq!(min_epoch(30, &params), 1);
        assert_eq!(min_epoch(100, &params), 40);
    }

    #[test]
    fn max_incentive_tracks_the_ramp_then_caps() {
        let params = IncentiveParams::default();
        assert_eq!(max_incentive_factor(1, &params), UNIT);
        assert_eq!(max_incentive_factor(11, &params), UNIT + 50_000_000);
        assert_eq!(max_incentive_factor(1_000, &params), params.max_incentive);
    }
}
