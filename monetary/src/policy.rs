//! Timing-window state machine around the token's rebase operation.

use governance::{Role, RoleRegistry};
use ledger::{RebaseOutcome, RebaseToken, TokenError, UNIT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::oracle::Oracle;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("restricted to admins: {0}")]
    RestrictedToAdmins(String),
    #[error("restricted to the orchestrator: {0}")]
    RestrictedToOrchestrator(String),
    #[error("minRebaseTimeIntervalSec cannot be 0")]
    ZeroInterval,
    #[error("rebase window offset must be lower than the interval")]
    OffsetOutOfRange,
    #[error("rebase window must end within the interval")]
    WindowTooLong,
    #[error("rebase lag should be bigger than 0")]
    ZeroRebaseLag,
    #[error("{0} oracle is not configured")]
    OracleNotConfigured(&'static str),
    #[error("{0} oracle is not ready")]
    OracleNotReady(&'static str),
    #[error("current time is outside the rebase window")]
    OutOfWindow,
    #[error("the rebase window for this interval was already used")]
    WindowAlreadyUsed,
    #[error("target mcap cannot be 0")]
    ZeroTargetMcap,
    #[error("target rate overflow")]
    TargetRateOverflow,
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Rebase scheduling parameters. A rebase is valid only inside
/// `[window_offset, window_offset + window_length)` of each interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebaseTimingConfig {
    pub min_rebase_interval_secs: u64,
    pub window_offset_secs: u64,
    pub window_length_secs: u64,
}

impl Default for RebaseTimingConfig {
    fn default() -> Self {
        // daily interval, 15 minute window opening at 20:00 UTC
        Self {
            min_rebase_interval_secs: 86_400,
            window_offset_secs: 72_000,
            window_length_secs: 900,
        }
    }
}

impl RebaseTimingConfig {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.min_rebase_interval_secs == 0 {
            return Err(PolicyError::ZeroInterval);
        }
        if self.window_offset_secs >= self.min_rebase_interval_secs {
            return Err(PolicyError::OffsetOutOfRange);
        }
        let window_end = self
            .window_offset_secs
            .checked_add(self.window_length_secs)
            .ok_or(PolicyError::WindowTooLong)?;
        if window_end > self.min_rebase_interval_secs {
            return Err(PolicyError::WindowTooLong);
        }
        Ok(())
    }

    pub fn in_window(&self, now: u64) -> bool {
        let into_interval = now % self.min_rebase_interval_secs;
        into_interval >= self.window_offset_secs
            && into_interval < self.window_offset_secs + self.window_length_secs
    }

    /// Start of the interval containing `now`.
    fn interval_start(&self, now: u64) -> u64 {
        now - now % self.min_rebase_interval_secs
    }
}

/// Normalization from the market-cap feed to the target exchange rate.
pub trait TargetRateStrategy: Send + Sync {
    fn target_rate(&self, mcap: u64) -> Result<u64, PolicyError>;
}

/// `target_rate = mcap * UNIT / target_mcap`: the token's price target tracks
/// its share of a reference market capitalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct McapShare {
    pub target_mcap: u64,
}

impl TargetRateStrategy for McapShare {
    fn target_rate(&self, mcap: u64) -> Result<u64, PolicyError> {
        if self.target_mcap == 0 {
            return Err(PolicyError::ZeroTargetMcap);
        }
        let rate = mcap as u128 * UNIT as u128 / self.target_mcap as u128;
        u64::try_from(rate).map_err(|_| PolicyError::TargetRateOverflow)
    }
}

/// Inputs and outcome of one orchestrated rebase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebaseReport {
    pub mcap: u64,
    pub target_rate: u64,
    pub exchange_price: u64,
    pub outcome: RebaseOutcome,
}

/// The monetary-policy orchestrator.
///
/// Owns the scheduling gate and the oracle handles; never touches ledger
/// state directly. Supply changes only happen through the token's own
/// rebase operation, which also owns the epoch counter.
pub struct MonetaryPolicy {
    /// Identity this policy acts under; grant it `MonetaryPolicy` on the token.
    id: String,
    roles: RoleRegistry,
    price_oracle: Option<Box<dyn Oracle>>,
    mcap_oracle: Option<Box<dyn Oracle>>,
    strategy: Box<dyn TargetRateStrategy>,
    orchestrator: Option<String>,
    rebase_lag: u64,
    timing: RebaseTimingConfig,
    /// Interval bucket of the last executed rebase.
    last_window: Option<u64>,
    epoch: u64,
}

impl MonetaryPolicy {
    pub fn new(
        id: impl Into<String>,
        roles: RoleRegistry,
        strategy: Box<dyn TargetRateStrategy>,
    ) -> Self {
        Self {
            id: id.into(),
            roles,
            price_oracle: None,
            mcap_oracle: None,
            strategy,
            orchestrator: None,
            rebase_lag: 10,
            timing: RebaseTimingConfig::default(),
            last_window: None,
            epoch: 1,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn rebase_lag(&self) -> u64 {
        self.rebase_lag
    }

    pub fn timing(&self) -> &RebaseTimingConfig {
        &self.timing
    }

    fn ensure_admin(&self, caller: &str) -> Result<(), PolicyError> {
        if self.roles.has_role(caller, Role::Admin) {
            Ok(())
        } else {
            Err(PolicyError::RestrictedToAdmins(caller.to_string()))
        }
    }

    pub fn set_price_oracle(
        &mut self,
        caller: &str,
        oracle: Box<dyn Oracle>,
    ) -> Result<(), PolicyError> {
        self.ensure_admin(caller)?;
        self.price_oracle = Some(oracle);
        Ok(())
    }

    pub fn set_mcap_oracle(
        &mut self,
        caller: &str,
        oracle: Box<dyn Oracle>,
    ) -> Result<(), PolicyError> {
        self.ensure_admin(caller)?;
        self.mcap_oracle = Some(oracle);
        Ok(())
    }

    pub fn set_target_rate_strategy(
        &mut self,
        caller: &str,
        strategy: Box<dyn TargetRateStrategy>,
    ) -> Result<(), PolicyError> {
        self.ensure_admin(caller)?;
        self.strategy = strategy;
        Ok(())
    }

    /// Nominate the only identity allowed to trigger rebases.
    pub fn set_orchestrator(&mut self, caller: &str, addr: &str) -> Result<(), PolicyError> {
        self.ensure_admin(caller)?;
        self.orchestrator = Some(addr.to_string());
        Ok(())
    }

    pub fn set_rebase_lag(&mut self, caller: &str, lag: u64) -> Result<(), PolicyError> {
        self.ensure_admin(caller)?;
        if lag == 0 {
            return Err(PolicyError::ZeroRebaseLag);
        }
        self.rebase_lag = lag;
        Ok(())
    }

    pub fn set_rebase_timing_parameters(
        &mut self,
        caller: &str,
        timing: RebaseTimingConfig,
    ) -> Result<(), PolicyError> {
        self.ensure_admin(caller)?;
        timing.validate()?;
        self.timing = timing;
        Ok(())
    }

    pub fn in_rebase_window(&self, now: u64) -> bool {
        self.timing.in_window(now)
    }

    /// Current oracle readings and the derived target rate, refusing zero
    /// (not-ready) data.
    pub fn rebase_params(&self) -> Result<(u64, u64, u64), PolicyError> {
        let mcap_oracle = self
            .mcap_oracle
            .as_ref()
            .ok_or(PolicyError::OracleNotConfigured("mcap"))?;
        let price_oracle = self
            .price_oracle
            .as_ref()
            .ok_or(PolicyError::OracleNotConfigured("token price"))?;
        let mcap = mcap_oracle.read();
        if mcap == 0 {
            return Err(PolicyError::OracleNotReady("mcap"));
        }
        let exchange_price = price_oracle.read();
        if exchange_price == 0 {
            return Err(PolicyError::OracleNotReady("token price"));
        }
        let target_rate = self.strategy.target_rate(mcap)?;
        Ok((mcap, target_rate, exchange_price))
    }

    /// Trigger a rebase on the token, gated by caller, window and one-shot
    /// use of the current interval. All checks run before any state changes;
    /// a failed token rebase leaves the policy untouched as well.
    pub fn rebase(
        &mut self,
        caller: &str,
        token: &mut RebaseToken,
        now: u64,
    ) -> Result<RebaseReport, PolicyError> {
        match &self.orchestrator {
            Some(orchestrator) if orchestrator == caller => {}
            _ => return Err(PolicyError::RestrictedToOrchestrator(caller.to_string())),
        }
        if !self.timing.in_window(now) {
            return Err(PolicyError::OutOfWindow);
        }
        let window = self.timing.interval_start(now);
        if self.last_window == Some(window) {
            return Err(PolicyError::WindowAlreadyUsed);
        }
        let (mcap, target_rate, exchange_price) = self.rebase_params()?;
        let outcome = token.rebase(&self.id, exchange_price, target_rate, self.rebase_lag)?;
        self.epoch += 1;
        self.last_window = Some(window);
        tracing::info!(
            epoch = outcome.epoch,
            old_supply = outcome.old_supply,
            new_supply = outcome.new_supply,
            multiplier = outcome.net_multiplier,
            "rebase executed"
        );
        Ok(RebaseReport {
            mcap,
            target_rate,
            exchange_price,
            outcome,
        })
    }
}
