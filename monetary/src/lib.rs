//! Monetary-policy orchestration: oracle reads, rebase timing windows, and
//! the single entry point that triggers a rebase on the balance model.

#![forbid(unsafe_code)]

pub mod oracle;
pub mod policy;

pub use oracle::{Oracle, StaticOracle};
pub use policy::{
    McapShare, MonetaryPolicy, PolicyError, RebaseReport, RebaseTimingConfig, TargetRateStrategy,
};
