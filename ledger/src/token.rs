//! Rebasing token with reflection-fee redistribution and per-account
//! age-stamped tranche ledgers.
//!
//! Balances come in two representations. Included accounts hold a share of a
//! reflection pool: a transfer fee shrinks the pool total, which raises the
//! value of every remaining share without touching individual entries.
//! Excluded accounts hold a literal amount and sit outside that dilution.
//! Both representations are carried through rebases, which scale each
//! account's tranches by their age-derived incentive.

use governance::{Role, RoleRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::fifo::{FifoLedger, IncentiveParams, LedgerError};
use crate::math::{min_epoch, net_multiplier, MathError};
use crate::{DECIMALS, GENESIS_EPOCH, UNIT};

/// Supply minted at genesis: five million whole tokens.
pub const INITIAL_SUPPLY: u64 = 5_000_000 * UNIT;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("{addr} is missing the {role:?} capability")]
    MissingCapability { addr: String, role: Role },
    #[error("account {0} is banned")]
    Banned(String),
    #[error("transfers are paused")]
    TransfersPaused,
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: u64, available: u64 },
    #[error("account {0} is already excluded")]
    AlreadyExcluded(String),
    #[error("account {0} is already included")]
    AlreadyIncluded(String),
    #[error("rebase would exhaust the total supply")]
    SupplyUnderflow,
    #[error("initial supply cannot be 0")]
    ZeroInitialSupply,
    #[error("fee divisor cannot be 0")]
    ZeroFeeDivisor,
    #[error("fee multiplier must be lower than the divisor")]
    FeeTooHigh,
    #[error("amount overflow")]
    Overflow,
    #[error(transparent)]
    Math(#[from] MathError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Observable outputs of the balance model, drained via
/// [`RebaseToken::take_events`]. `None` endpoints on a transfer denote a
/// mint (no source) or a burn (no destination).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenEvent {
    Transfer {
        from: Option<String>,
        to: Option<String>,
        amount: u64,
    },
    Rebase {
        epoch: u64,
        old_supply: u64,
        new_supply: u64,
    },
    AccountExcluded {
        addr: String,
    },
    AccountIncluded {
        addr: String,
    },
    Paused {
        by: String,
    },
}

/// Balance representation for a single account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Balance {
    /// Reflection-pool share of an included account.
    Scaled(u128),
    /// Literal amount of an excluded account.
    Raw(u64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Account {
    balance: Balance,
    funds: FifoLedger,
    banned: bool,
}

impl Account {
    fn included() -> Self {
        Self {
            balance: Balance::Scaled(0),
            funds: FifoLedger::new(),
            banned: false,
        }
    }
}

/// Per-transfer fee as a `multiplier / divisor` fraction of the amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeParams {
    pub multiplier: u64,
    pub divisor: u64,
}

impl Default for FeeParams {
    fn default() -> Self {
        // 0.2% per transfer
        Self {
            multiplier: 2,
            divisor: 1000,
        }
    }
}

impl FeeParams {
    fn fee_for(&self, amount: u64) -> u64 {
        (amount as u128 * self.multiplier as u128 / self.divisor as u128) as u64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub name: String,
    pub symbol: String,
    pub initial_supply: u64,
    pub fee: FeeParams,
    pub incentive: IncentiveParams,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            name: "elastic".to_string(),
            symbol: "ELX".to_string(),
            initial_supply: INITIAL_SUPPLY,
            fee: FeeParams::default(),
            incentive: IncentiveParams::default(),
        }
    }
}

/// Summary of one executed rebase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebaseOutcome {
    /// Epoch the rebase executed in (the counter advances past it).
    pub epoch: u64,
    pub old_supply: u64,
    pub new_supply: u64,
    pub net_multiplier: u64,
}

/// Largest reflection-pool total that maps onto `supply` without remainder,
/// so the genesis rate divides exactly.
fn initial_reflection(supply: u64) -> u128 {
    u128::MAX - u128::MAX % supply as u128
}

/// The rebasing balance model.
///
/// All mutating operations take `&mut self` and either commit fully or
/// return before the first state change; there is no observable intermediate
/// state between calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebaseToken {
    name: String,
    symbol: String,
    /// Monotonic rebase counter, advanced exactly once per successful rebase.
    epoch: u64,
    total_supply: u64,
    /// Reflection pool total across included accounts.
    r_total: u128,
    /// Sum of excluded accounts' raw balances.
    t_excluded: u64,
    accounts: HashMap<String, Account>,
    fee: FeeParams,
    incentive: IncentiveParams,
    paused: bool,
    roles: RoleRegistry,
    #[serde(skip)]
    events: Vec<TokenEvent>,
}

impl RebaseToken {
    /// Create the token with its whole initial supply held by
    /// `genesis_holder` as one genesis-epoch tranche.
    pub fn new(
        config: TokenConfig,
        roles: RoleRegistry,
        genesis_holder: &str,
    ) -> Result<Self, TokenError> {
        if config.initial_supply == 0 {
            return Err(TokenError::ZeroInitialSupply);
        }
        let r_total = initial_reflection(config.initial_supply);
        let mut funds = FifoLedger::new();
        funds.add(GENESIS_EPOCH, config.initial_supply)?;
        let mut accounts = HashMap::new();
        accounts.insert(
            genesis_holder.to_string(),
            Account {
                balance: Balance::Scaled(r_total),
                funds,
                banned: false,
            },
        );
        Ok(Self {
            name: config.name,
            symbol: config.symbol,
            epoch: GENESIS_EPOCH,
            total_supply: config.initial_supply,
            r_total,
            t_excluded: 0,
            accounts,
            fee: config.fee,
            incentive: config.incentive,
            paused: false,
            roles,
            events: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn decimals(&self) -> u32 {
        DECIMALS
    }

    pub fn total_supply(&self) -> u64 {
        self.total_supply
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_banned(&self, addr: &str) -> bool {
        self.accounts.get(addr).map_or(false, |a| a.banned)
    }

    pub fn is_excluded(&self, addr: &str) -> bool {
        matches!(
            self.accounts.get(addr).map(|a| a.balance),
            Some(Balance::Raw(_))
        )
    }

    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    /// Deployment-time hook for granting capabilities; not part of the
    /// steady-state surface.
    pub fn roles_mut(&mut self) -> &mut RoleRegistry {
        &mut self.roles
    }

    pub fn events(&self) -> &[TokenEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<TokenEvent> {
        std::mem::take(&mut self.events)
    }

    /// Reflection units per base unit. Zero only when no included balance
    /// exists.
    fn rate(&self) -> u128 {
        let t_total = (self.total_supply - self.t_excluded) as u128;
        if t_total == 0 {
            0
        } else {
            self.r_total / t_total
        }
    }

    pub fn balance_of(&self, addr: &str) -> u64 {
        match self.accounts.get(addr).map(|a| a.balance) {
            Some(Balance::Scaled(r)) => {
                let rate = self.rate();
                if rate == 0 {
                    0
                } else {
                    (r / rate) as u64
                }
            }
            Some(Balance::Raw(t)) => t,
            None => 0,
        }
    }

    fn ensure_role(&self, addr: &str, role: Role) -> Result<(), TokenError> {
        if self.roles.has_role(addr, role) {
            Ok(())
        } else {
            Err(TokenError::MissingCapability {
                addr: addr.to_string(),
                role,
            })
        }
    }

    fn balance_repr(&self, addr: &str) -> Balance {
        self.accounts
            .get(addr)
            .map(|a| a.balance)
            .unwrap_or(Balance::Scaled(0))
    }

    fn account_mut(&mut self, addr: &str) -> &mut Account {
        self.accounts
            .entry(addr.to_string())
            .or_insert_with(Account::included)
    }

    /// Bring an account's tranche ledger in line with its current balance.
    /// Fee yield accrued since the last reconciliation enters as a fresh
    /// tranche at the current epoch; rounding dust is debited FIFO.
    fn sync_funds(&mut self, addr: &str) -> Result<(), TokenError> {
        let balance = self.balance_of(addr);
        let epoch = self.epoch;
        let account = self.account_mut(addr);
        let tracked = account.funds.total();
        if balance > tracked {
            account.funds.add(epoch, balance - tracked)?;
        } else if tracked > balance {
            account.funds.sub(tracked - balance)?;
        }
        Ok(())
    }

    /// Move `amount` from `from` to `to`, applying the transfer fee when both
    /// parties are included. The fee share leaves the reflection pool, which
    /// redistributes it pro rata across every included holder. Returns the
    /// net amount received.
    pub fn transfer(&mut self, from: &str, to: &str, amount: u64) -> Result<u64, TokenError> {
        if self.paused {
            return Err(TokenError::TransfersPaused);
        }
        if self.is_banned(from) {
            return Err(TokenError::Banned(from.to_string()));
        }
        if self.is_banned(to) {
            return Err(TokenError::Banned(to.to_string()));
        }
        let available = self.balance_of(from);
        if amount > available {
            return Err(TokenError::InsufficientBalance {
                requested: amount,
                available,
            });
        }

        let from_repr = self.balance_repr(from);
        let to_repr = self.balance_repr(to);
        let both_included = matches!(
            (from_repr, to_repr),
            (Balance::Scaled(_), Balance::Scaled(_))
        );
        let fee = if both_included {
            self.fee.fee_for(amount)
        } else {
            0
        };
        let net = amount - fee;
        let rate = self.rate();

        if from == to {
            // a self-transfer still pays the fee and refreshes tranche age
            self.sync_funds(from)?;
            if let Balance::Scaled(r) = from_repr {
                let r_fee = fee as u128 * rate;
                let new_r = r.checked_sub(r_fee).ok_or(TokenError::Overflow)?;
                self.account_mut(from).balance = Balance::Scaled(new_r);
                self.r_total -= r_fee;
            }
        } else {
            // compute both sides before mutating anything
            let (new_from, new_to, r_total, t_excluded) = match (from_repr, to_repr) {
                (Balance::Scaled(rf), Balance::Scaled(rt)) => {
                    let r_amount = amount as u128 * rate;
                    let r_net = net as u128 * rate;
                    (
                        Balance::Scaled(rf.checked_sub(r_amount).ok_or(TokenError::Overflow)?),
                        Balance::Scaled(rt.checked_add(r_net).ok_or(TokenError::Overflow)?),
                        self.r_total - (r_amount - r_net),
                        self.t_excluded,
                    )
                }
                (Balance::Scaled(rf), Balance::Raw(tt)) => {
                    let r_amount = amount as u128 * rate;
                    (
                        Balance::Scaled(rf.checked_sub(r_amount).ok_or(TokenError::Overflow)?),
                        Balance::Raw(tt.checked_add(amount).ok_or(TokenError::Overflow)?),
                        self.r_total - r_amount,
                        self.t_excluded + amount,
                    )
                }
                (Balance::Raw(tf), Balance::Scaled(rt)) => {
                    let r_amount = amount as u128 * rate;
                    (
                        Balance::Raw(tf.checked_sub(amount).ok_or(TokenError::Overflow)?),
                        Balance::Scaled(rt.checked_add(r_amount).ok_or(TokenError::Overflow)?),
                        self.r_total.checked_add(r_amount).ok_or(TokenError::Overflow)?,
                        self.t_excluded - amount,
                    )
                }
                (Balance::Raw(tf), Balance::Raw(tt)) => (
                    Balance::Raw(tf.checked_sub(amount).ok_or(TokenError::Overflow)?),
                    Balance::Raw(tt.checked_add(amount).ok_or(TokenError::Overflow)?),
                    self.r_total,
                    self.t_excluded,
                ),
            };

            self.sync_funds(from)?;
            self.account_mut(from).balance = new_from;
            self.account_mut(to).balance = new_to;
            self.r_total = r_total;
            self.t_excluded = t_excluded;
        }

        let epoch = self.epoch;
        self.account_mut(from).funds.sub(amount)?;
        self.account_mut(to).funds.add(epoch, net)?;
        self.events.push(TokenEvent::Transfer {
            from: Some(from.to_string()),
            to: Some(to.to_string()),
            amount: net,
        });
        Ok(net)
    }

    /// Convert an included account to raw accounting, preserving its balance
    /// at the current rate.
    pub fn exclude_account(&mut self, caller: &str, addr: &str) -> Result<(), TokenError> {
        self.ensure_role(caller, Role::Admin)?;
        self.exclude_unchecked(addr)
    }

    fn exclude_unchecked(&mut self, addr: &str) -> Result<(), TokenError> {
        let rate = self.rate();
        match self.balance_repr(addr) {
            Balance::Raw(_) => Err(TokenError::AlreadyExcluded(addr.to_string())),
            Balance::Scaled(r) => {
                let t = if rate == 0 { 0 } else { (r / rate) as u64 };
                self.account_mut(addr).balance = Balance::Raw(t);
                self.r_total -= r;
                self.t_excluded += t;
                self.events.push(TokenEvent::AccountExcluded {
                    addr: addr.to_string(),
                });
                Ok(())
            }
        }
    }

    /// Convert an excluded account back to reflection accounting, preserving
    /// its balance at the current rate.
    pub fn include_account(&mut self, caller: &str, addr: &str) -> Result<(), TokenError> {
        self.ensure_role(caller, Role::Admin)?;
        if self.is_banned(addr) {
            return Err(TokenError::Banned(addr.to_string()));
        }
        match self.balance_repr(addr) {
            Balance::Scaled(_) => Err(TokenError::AlreadyIncluded(addr.to_string())),
            Balance::Raw(t) => {
                let rate = self.rate();
                let r = if rate == 0 && t > 0 {
                    // reflection pool is empty; re-anchor it on this balance
                    initial_reflection(t)
                } else {
                    t as u128 * rate
                };
                self.account_mut(addr).balance = Balance::Scaled(r);
                self.r_total = self.r_total.checked_add(r).ok_or(TokenError::Overflow)?;
                self.t_excluded -= t;
                self.events.push(TokenEvent::AccountIncluded {
                    addr: addr.to_string(),
                });
                Ok(())
            }
        }
    }

    /// Exclude the account and bar it from sending or receiving.
    pub fn ban_user(&mut self, caller: &str, addr: &str) -> Result<(), TokenError> {
        self.ensure_role(caller, Role::Admin)?;
        if !self.is_excluded(addr) {
            self.exclude_unchecked(addr)?;
        }
        self.account_mut(addr).banned = true;
        Ok(())
    }

    /// Gate or ungate transfers. Orthogonal to inclusion state.
    pub fn set_paused(&mut self, caller: &str, paused: bool) -> Result<(), TokenError> {
        self.ensure_role(caller, Role::Admin)?;
        if paused && !self.paused {
            self.events.push(TokenEvent::Paused {
                by: caller.to_string(),
            });
        }
        self.paused = paused;
        Ok(())
    }

    pub fn set_fee_params(&mut self, caller: &str, fee: FeeParams) -> Result<(), TokenError> {
        self.ensure_role(caller, Role::Admin)?;
        if fee.divisor == 0 {
            return Err(TokenError::ZeroFeeDivisor);
        }
        if fee.multiplier >= fee.divisor {
            return Err(TokenError::FeeTooHigh);
        }
        self.fee = fee;
        Ok(())
    }

    /// Create `amount` new units for `to`. Bridge claim settlement; requires
    /// the `Minter` capability.
    pub fn mint(&mut self, caller: &str, to: &str, amount: u64) -> Result<(), TokenError> {
        self.ensure_role(caller, Role::Minter)?;
        if self.is_banned(to) {
            return Err(TokenError::Banned(to.to_string()));
        }
        if amount == 0 {
            return Ok(());
        }
        let new_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(TokenError::Overflow)?;
        let rate = self.rate();
        match self.balance_repr(to) {
            Balance::Scaled(r) => {
                let r_add = if rate == 0 {
                    initial_reflection(amount)
                } else {
                    amount as u128 * rate
                };
                let new_r = r.checked_add(r_add).ok_or(TokenError::Overflow)?;
                let new_r_total = self
                    .r_total
                    .checked_add(r_add)
                    .ok_or(TokenError::Overflow)?;
                self.account_mut(to).balance = Balance::Scaled(new_r);
                self.r_total = new_r_total;
            }
            Balance::Raw(t) => {
                let new_t = t.checked_add(amount).ok_or(TokenError::Overflow)?;
                self.account_mut(to).balance = Balance::Raw(new_t);
                self.t_excluded += amount;
            }
        }
        let epoch = self.epoch;
        self.account_mut(to).funds.add(epoch, amount)?;
        self.total_supply = new_supply;
        self.events.push(TokenEvent::Transfer {
            from: None,
            to: Some(to.to_string()),
            amount,
        });
        Ok(())
    }

    /// Destroy `amount` units held by `from`. Bridge swap-out; requires the
    /// `Burner` capability.
    pub fn burn(&mut self, caller: &str, from: &str, amount: u64) -> Result<(), TokenError> {
        self.ensure_role(caller, Role::Burner)?;
        if amount == 0 {
            return Ok(());
        }
        let available = self.balance_of(from);
        if amount > available {
            return Err(TokenError::InsufficientBalance {
                requested: amount,
                available,
            });
        }
        self.sync_funds(from)?;
        let rate = self.rate();
        match self.balance_repr(from) {
            Balance::Scaled(r) => {
                let r_sub = amount as u128 * rate;
                let new_r = r.checked_sub(r_sub).ok_or(TokenError::Overflow)?;
                self.account_mut(from).balance = Balance::Scaled(new_r);
                self.r_total -= r_sub;
            }
            Balance::Raw(t) => {
                self.account_mut(from).balance = Balance::Raw(t - amount);
                self.t_excluded -= amount;
            }
        }
        self.account_mut(from).funds.sub(amount)?;
        self.total_supply -= amount;
        self.events.push(TokenEvent::Transfer {
            from: Some(from.to_string()),
            to: None,
            amount,
        });
        Ok(())
    }

    /// Adjust the supply toward the target price and advance the epoch by
    /// exactly one.
    ///
    /// Every account's tranche ledger is reconciled with its balance (fee
    /// yield enters as a fresh tranche), flattened past the incentive
    /// horizon, and scaled bucket by bucket. The reflection pool is then
    /// re-anchored so that included balances read back exactly as their
    /// adjusted tranche totals, which also heals accumulated rounding dust.
    ///
    /// Restricted to the `MonetaryPolicy` capability.
    pub fn rebase(
        &mut self,
        caller: &str,
        exchange_price: u64,
        target_price: u64,
        rebase_lag: u64,
    ) -> Result<RebaseOutcome, TokenError> {
        self.ensure_role(caller, Role::MonetaryPolicy)?;
        let multiplier = net_multiplier(exchange_price, target_price, rebase_lag)?;
        let current_epoch = self.epoch;
        let horizon = min_epoch(current_epoch, &self.incentive);
        let old_supply = self.total_supply;

        // stage every ledger so a failure leaves the model untouched
        let addrs: Vec<String> = self.accounts.keys().cloned().collect();
        let mut staged: Vec<(String, FifoLedger, u64)> = Vec::with_capacity(addrs.len());
        let mut included_total: u64 = 0;
        let mut excluded_total: u64 = 0;
        for addr in &addrs {
            let balance = self.balance_of(addr);
            let account = &self.accounts[addr];
            let mut funds = account.funds.clone();
            let tracked = funds.total();
            if balance > tracked {
                funds.add(current_epoch, balance - tracked)?;
            } else if tracked > balance {
                funds.sub(tracked - balance)?;
            }
            funds.flatten(horizon);
            funds.rebase_user_funds(current_epoch, horizon, multiplier, &self.incentive)?;
            let adjusted = funds.total();
            match account.balance {
                Balance::Scaled(_) => {
                    included_total = included_total
                        .checked_add(adjusted)
                        .ok_or(TokenError::Overflow)?;
                }
                Balance::Raw(_) => {
                    excluded_total = excluded_total
                        .checked_add(adjusted)
                        .ok_or(TokenError::Overflow)?;
                }
            }
            staged.push((addr.clone(), funds, adjusted));
        }
        let new_supply = included_total
            .checked_add(excluded_total)
            .ok_or(TokenError::Overflow)?;
        if new_supply == 0 {
            return Err(TokenError::SupplyUnderflow);
        }

        // commit: re-anchor the reflection pool on the adjusted totals
        let rate = if included_total == 0 {
            0
        } else {
            self.r_total / included_total as u128
        };
        self.r_total = rate * included_total as u128;
        for (addr, funds, adjusted) in staged {
            if let Some(account) = self.accounts.get_mut(&addr) {
                account.balance = match account.balance {
                    Balance::Scaled(_) => Balance::Scaled(adjusted as u128 * rate),
                    Balance::Raw(_) => Balance::Raw(adjusted),
                };
                account.funds = funds;
            }
        }
        self.t_excluded = excluded_total;
        self.total_supply = new_supply;
        self.epoch += 1;
        self.events.push(TokenEvent::Rebase {
            epoch: current_epoch,
            old_supply,
            new_supply,
        });
        Ok(RebaseOutcome {
            epoch: current_epoch,
            old_supply,
            new_supply,
            net_multiplier: multiplier,
        })
    }
}
