//! Ordered-by-epoch bucket store with FIFO depletion and age-weighted
//! value adjustment.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

use crate::UNIT;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: u64, available: u64 },
    #[error("amount overflow")]
    Overflow,
    #[error("incentive cannot be 0")]
    ZeroIncentive,
}

/// One tranche of value stamped with the epoch at which it entered the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub epoch: u64,
    pub amount: u64,
}

/// Age-weighting parameters for rebase adjustments.
///
/// The incentive for a tranche of age `a` epochs is
/// `UNIT + decrease_per_epoch * min(a, max_history_len)`, capped at
/// `max_incentive`. It is never below `UNIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncentiveParams {
    pub decrease_per_epoch: u64,
    pub max_incentive: u64,
    pub max_history_len: u64,
}

impl Default for IncentiveParams {
    fn default() -> Self {
        Self {
            decrease_per_epoch: 5_000_000,
            max_incentive: 1_250_000_000,
            max_history_len: 60,
        }
    }
}

impl IncentiveParams {
    /// Incentive scalar for a tranche of the given age, `UNIT`-scaled.
    pub fn incentive_for_age(&self, age: u64) -> u64 {
        let ramp = self
            .decrease_per_epoch
            .saturating_mul(age.min(self.max_history_len));
        UNIT.saturating_add(ramp).min(self.max_incentive).max(UNIT)
    }
}

/// Apply a rebase multiplier to a single value, weighted by the tranche
/// incentive. Gains are amplified by the incentive, losses are dampened by it:
///
/// * `m >= UNIT`: `value * (UNIT + (m - UNIT) * incentive / UNIT) / UNIT`
/// * `m <  UNIT`: `value * (UNIT - (UNIT - m) * UNIT / incentive) / UNIT`
///
/// All arithmetic is `UNIT`-scaled fixed point truncating toward zero. The
/// incentive is at least `UNIT` by construction of the age ramp; a zero
/// incentive is reported as a typed error rather than a panic.
pub fn adjust_value(value: u64, incentive: u64, net_multiplier: u64) -> Result<u64, LedgerError> {
    let unit = UNIT as u128;
    let incentive_wide = incentive as u128;
    let m = net_multiplier as u128;
    let factor = if m >= unit {
        let boosted = (m - unit)
            .checked_mul(incentive_wide)
            .ok_or(LedgerError::Overflow)?
            / unit;
        unit.checked_add(boosted).ok_or(LedgerError::Overflow)?
    } else {
        if incentive == 0 {
            return Err(LedgerError::ZeroIncentive);
        }
        let damped = (unit - m) * unit / incentive_wide;
        unit.saturating_sub(damped)
    };
    let adjusted = (value as u128)
        .checked_mul(factor)
        .ok_or(LedgerError::Overflow)?
        / unit;
    u64::try_from(adjusted).map_err(|_| LedgerError::Overflow)
}

/// Ordered sequence of buckets plus a cached total.
///
/// Buckets are strictly increasing by epoch and hold no zero amounts;
/// `total` equals the sum of all bucket amounts between any two calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FifoLedger {
    buckets: VecDeque<Bucket>,
    total: u64,
}

impl FifoLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached sum of all tranches. O(1).
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn buckets(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.iter()
    }

    /// Credit `amount` at `epoch`, coalescing with the newest bucket when the
    /// epochs match. Callers supply epochs monotonically.
    pub fn add(&mut self, epoch: u64, amount: u64) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        self.total = self.total.checked_add(amount).ok_or(LedgerError::Overflow)?;
        match self.buckets.back_mut() {
            Some(last) if last.epoch == epoch => last.amount += amount,
            _ => {
                debug_assert!(self.buckets.back().map_or(true, |b| b.epoch < epoch));
                self.buckets.push_back(Bucket { epoch, amount });
            }
        }
        Ok(())
    }

    /// Debit `amount` from the oldest tranches first, removing every bucket
    /// that is fully consumed.
    pub fn sub(&mut self, amount: u64) -> Result<(), LedgerError> {
        if amount > self.total {
            return Err(LedgerError::InsufficientFunds {
                requested: amount,
                available: self.total,
            });
        }
        let mut remaining = amount;
        while remaining > 0 {
            match self.buckets.pop_front() {
                Some(mut front) => {
                    if front.amount > remaining {
                        front.amount -= remaining;
                        remaining = 0;
                        self.buckets.push_front(front);
                    } else {
                        remaining -= front.amount;
                    }
                }
                None => break,
            }
        }
        self.total -= amount;
        Ok(())
    }

    /// Merge every bucket with `epoch <= horizon_epoch` into a single bucket
    /// stamped `horizon_epoch`. The total is preserved exactly; only
    /// per-epoch granularity older than the horizon is lost.
    pub fn flatten(&mut self, horizon_epoch: u64) {
        let mut merged: u64 = 0;
        while self
            .buckets
            .front()
            .map_or(false, |b| b.epoch <= horizon_epoch)
        {
            if let Some(bucket) = self.buckets.pop_front() {
                merged += bucket.amount;
            }
        }
        if merged > 0 {
            self.buckets.push_front(Bucket {
                epoch: horizon_epoch,
                amount: merged,
            });
        }
    }

    /// Scale every tranche by its age-derived incentive under the given net
    /// multiplier and return the accumulated signed change. Tranches older
    /// than `min_epoch` are treated as exactly `min_epoch` old, which pins
    /// them at the maximum incentive.
    ///
    /// This is the only rebase-driven mutation of the cached total. The
    /// ledger is untouched if any bucket adjustment fails.
    pub fn rebase_user_funds(
        &mut self,
        current_epoch: u64,
        min_epoch: u64,
        net_multiplier: u64,
        params: &IncentiveParams,
    ) -> Result<i128, LedgerError> {
        let mut total_change: i128 = 0;
        let mut new_total: u64 = 0;
        let mut adjusted = Vec::with_capacity(self.buckets.len());
        for bucket in &self.buckets {
            let age = current_epoch.saturating_sub(bucket.epoch.max(min_epoch));
            let incentive = params.incentive_for_age(age);
            let new_amount = adjust_value(bucket.amount, incentive, net_multiplier)?;
            total_change += new_amount as i128 - bucket.amount as i128;
            new_total = new_total
                .checked_add(new_amount)
                .ok_or(LedgerError::Overflow)?;
            adjusted.push(new_amount);
        }
        for (bucket, new_amount) in self.buckets.iter_mut().zip(adjusted) {
            bucket.amount = new_amount;
        }
        self.buckets.retain(|b| b.amount > 0);
        self.total = new_total;
        Ok(total_change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sub_across_epochs() {
        let mut ledger = FifoLedger::new();
        ledger.add(1, 100).unwrap();
        assert_eq!(ledger.total(), 100);
        ledger.add(2, 20).unwrap();
        ledger.sub(50).unwrap();
        ledger.add(2, 30).unwrap();
        ledger.sub(100).unwrap();
        assert_eq!(ledger.total(), 0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn oldest_tranche_is_spent_first() {
        let mut ledger = FifoLedger::new();
        ledger.add(3, 40).unwrap();
        ledger.add(7, 25).unwrap();
        ledger.sub(40).unwrap();
        let remaining: Vec<Bucket> = ledger.buckets().copied().collect();
        assert_eq!(
            remaining,
            vec![Bucket {
                epoch: 7,
                amount: 25
            }]
        );
    }

    #[test]
    fn partial_debit_keeps_bucket_epoch() {
        let mut ledger = FifoLedger::new();
        ledger.add(3, 40).unwrap();
        ledger.add(7, 25).unwrap();
        ledger.sub(10).unwrap();
        let remaining: Vec<Bucket> = ledger.buckets().copied().collect();
        assert_eq!(remaining[0], Bucket { epoch: 3, amount: 30 });
        assert_eq!(ledger.total(), 55);
    }

    #[test]
    fn sub_more_than_total_fails() {
        let mut ledger = FifoLedger::new();
        ledger.add(1, 10).unwrap();
        let err = ledger.sub(11).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                requested: 11,
                available: 10
            }
        );
        assert_eq!(ledger.total(), 10);
    }

    #[test]
    fn flatten_preserves_sum() {
        let mut ledger = FifoLedger::new();
        ledger.add(30, 50).unwrap();
        ledger.add(60, 75).unwrap();
        assert_eq!(ledger.total(), 125);
        // horizon below every bucket: nothing merges
        ledger.flatten(10);
        assert_eq!(ledger.total(), 125);
        ledger.add(60, 25).unwrap();
        ledger.flatten(31);
        ledger.sub(25).unwrap();
        assert_eq!(ledger.total(), 125);
        let remaining: Vec<Bucket> = ledger.buckets().copied().collect();
        assert_eq!(
            remaining,
            vec![
                Bucket {
                    epoch: 31,
                    amount: 25
                },
                Bucket {
                    epoch: 60,
                    amount: 100
                },
            ]
        );
    }

    #[test]
    fn same_epoch_adds_coalesce() {
        let mut ledger = FifoLedger::new();
        ledger.add(5, 10).unwrap();
        ledger.add(5, 15).unwrap();
        assert_eq!(ledger.buckets().count(), 1);
        assert_eq!(ledger.total(), 25);
    }

    #[test]
    fn adjust_value_amplifies_gain_at_base_incentive() {
        // 10% positive rebase at the base incentive applies the bare multiplier
        let value = 25_000_000 * UNIT;
        let adjusted = adjust_value(value, UNIT, 1_100_000_000).unwrap();
        assert_eq!(adjusted, 27_500_000 * UNIT);
    }

    #[test]
    fn adjust_value_gain_grows_with_incentive() {
        let value = 1_000 * UNIT;
        let base = adjust_value(value, UNIT, 1_100_000_000).unwrap();
        let boosted = adjust_value(value, 1_200_000_000, 1_100_000_000).unwrap();
        assert!(boosted > base);
        // 10% gain amplified by 1.2x incentive -> 12%
        assert_eq!(boosted, 1_120 * UNIT);
    }

    #[test]
    fn adjust_value_loss_shrinks_with_incentive() {
        let value = 1_000 * UNIT;
        let base = adjust_value(value, UNIT, 900_000_000).unwrap();
        let dampened = adjust_value(value, 1_250_000_000, 900_000_000).unwrap();
        assert_eq!(base, 900 * UNIT);
        assert!(dampened > base);
        // 10% loss dampened by 1.25x incentive -> 8%
        assert_eq!(dampened, 920 * UNIT);
    }

    #[test]
    fn adjust_value_is_monotone_in_incentive() {
        let value = 123_456_789_000;
        for multiplier in [800_000_000u64, 1_000_000_000, 1_300_000_000] {
            let mut previous = 0u64;
            for incentive in (UNIT..=2 * UNIT).step_by(100_000_000) {
                let adjusted = adjust_value(value, incentive, multiplier).unwrap();
                assert!(adjusted >= previous);
                previous = adjusted;
            }
        }
    }

    #[test]
    fn zero_incentive_is_rejected() {
        assert_eq!(
            adjust_value(100, 0, 900_000_000),
            Err(LedgerError::ZeroIncentive)
        );
    }

    #[test]
    fn incentive_ramp_is_capped() {
        let params = IncentiveParams::default();
        assert_eq!(params.incentive_for_age(0), UNIT);
        assert_eq!(params.incentive_for_age(1), UNIT + 5_000_000);
        assert_eq!(params.incentive_for_age(10), UNIT + 50_000_000);
        // 60 epochs of ramp would reach 1.3x but the cap holds at 1.25x
        assert_eq!(params.incentive_for_age(60), 1_250_000_000);
        assert_eq!(params.incentive_for_age(1_000), 1_250_000_000);
    }

    #[test]
    fn rebase_user_funds_accumulates_change() {
        let mut ledger = FifoLedger::new();
        ledger.add(1, 100 * UNIT).unwrap();
        let params = IncentiveParams::default();
        let change = ledger
            .rebase_user_funds(1, 1, 1_100_000_000, &params)
            .unwrap();
        assert_eq!(change, (10 * UNIT) as i128);
        assert_eq!(ledger.total(), 110 * UNIT);
    }

    #[test]
    fn rebase_user_funds_weights_tranches_by_age() {
        let mut ledger = FifoLedger::new();
        ledger.add(1, 100 * UNIT).unwrap();
        ledger.add(11, 100 * UNIT).unwrap();
        let params = IncentiveParams::default();
        // epoch 11: the first tranche is 10 epochs old, the second is fresh
        let change = ledger
            .rebase_user_funds(11, 1, 1_100_000_000, &params)
            .unwrap();
        let amounts: Vec<u64> = ledger.buckets().map(|b| b.amount).collect();
        // fresh tranche gains the bare 10%, the aged one 10% * 1.05
        assert_eq!(amounts, vec![110_500_000_000, 110_000_000_000]);
        assert_eq!(change, 20_500_000_000);
        assert_eq!(ledger.total(), 220_500_000_000);
    }

    #[test]
    fn rebase_user_funds_drops_zeroed_buckets() {
        let mut ledger = FifoLedger::new();
        ledger.add(1, 1).unwrap();
        ledger.add(2, 10 * UNIT).unwrap();
        let params = IncentiveParams::default();
        // multiplier of 1: a single base unit rounds down to nothing
        ledger.rebase_user_funds(2, 1, 1, &params).unwrap();
        assert_eq!(ledger.buckets().count(), 1);
    }
}
