//! Epoch-bucketed FIFO tranche accounting and the rebasing balance model.
//!
//! Every unit of balance is tracked as a tranche stamped with the epoch at
//! which it entered an account. Rebases walk those tranches and scale each one
//! by an age-derived incentive, so long-held funds capture more of a positive
//! rebase and less of a negative one than freshly deposited funds.

#![forbid(unsafe_code)]

pub mod fifo;
pub mod math;
pub mod token;

pub use fifo::{adjust_value, Bucket, FifoLedger, IncentiveParams, LedgerError};
pub use math::{max_incentive_factor, min_epoch, net_multiplier, MathError};
pub use token::{
    Balance, FeeParams, RebaseOutcome, RebaseToken, TokenConfig, TokenError, TokenEvent,
};

/// Number of base-10 fractional digits in every token amount.
pub const DECIMALS: u32 = 9;

/// Fixed-point scaling base; one whole token in base units.
pub const UNIT: u64 = 1_000_000_000;

/// Epoch assigned to genesis funds; the epoch counter never goes below this.
pub const GENESIS_EPOCH: u64 = 1;
