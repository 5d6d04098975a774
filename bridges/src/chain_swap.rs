//! Burn-and-claim swaps between chains.

use ledger::{RebaseToken, TokenError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Opaque signature check over a claim payload.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, payload: &[u8], signature: &[u8], signer: &str) -> bool;
}

/// Accepts every signature; wiring and tests only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSignatureVerifier;

impl SignatureVerifier for NoopSignatureVerifier {
    fn verify(&self, _payload: &[u8], _signature: &[u8], _signer: &str) -> bool {
        true
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("claim targets chain {claim} but this bridge serves {local}")]
    WrongChain { claim: String, local: String },
    #[error("invalid authority signature on claim {0}")]
    InvalidSignature(u64),
    #[error("claim {0} was already settled")]
    AlreadyClaimed(u64),
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Record of funds burned locally, awaiting settlement on the target chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapOut {
    pub nonce: u64,
    pub holder: String,
    pub amount: u64,
    pub to_chain: String,
}

/// Claim for funds burned on another chain, signed by the bridge authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapClaim {
    pub nonce: u64,
    pub recipient: String,
    pub amount: u64,
    pub to_chain: String,
    pub signature: Vec<u8>,
}

impl SwapClaim {
    /// Canonical byte encoding covered by the authority signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.extend_from_slice(self.recipient.as_bytes());
        out.extend_from_slice(&self.amount.to_le_bytes());
        out.extend_from_slice(self.to_chain.as_bytes());
        out
    }
}

/// One side of a cross-chain swap pair.
///
/// The bridge's `id` must hold `Burner` (for swap-out) and `Minter` (for
/// claim settlement) on the token it serves.
pub struct ChainBridge<V: SignatureVerifier> {
    id: String,
    chain: String,
    authority: String,
    verifier: V,
    next_nonce: u64,
    outgoing: Vec<SwapOut>,
    completed: HashSet<u64>,
}

impl<V: SignatureVerifier> ChainBridge<V> {
    pub fn new(
        id: impl Into<String>,
        chain: impl Into<String>,
        authority: impl Into<String>,
        verifier: V,
    ) -> Self {
        Self {
            id: id.into(),
            chain: chain.into(),
            authority: authority.into(),
            verifier,
            next_nonce: 0,
            outgoing: Vec::new(),
            completed: HashSet::new(),
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn outgoing(&self) -> &[SwapOut] {
        &self.outgoing
    }

    /// Burn `amount` from `holder` and record the swap for settlement on
    /// `to_chain`.
    pub fn swap_out(
        &mut self,
        token: &mut RebaseToken,
        holder: &str,
        amount: u64,
        to_chain: &str,
    ) -> Result<SwapOut, BridgeError> {
        token.burn(&self.id, holder, amount)?;
        let swap = SwapOut {
            nonce: self.next_nonce,
            holder: holder.to_string(),
            amount,
            to_chain: to_chain.to_string(),
        };
        self.next_nonce += 1;
        self.outgoing.push(swap.clone());
        tracing::debug!(
            nonce = swap.nonce,
            amount,
            to_chain,
            "funds burned for swap-out"
        );
        Ok(swap)
    }

    /// Settle a claim for funds burned on another chain by minting to the
    /// recipient. Each nonce settles at most once.
    pub fn claim(
        &mut self,
        token: &mut RebaseToken,
        claim: &SwapClaim,
    ) -> Result<(), BridgeError> {
        if claim.to_chain != self.chain {
            return Err(BridgeError::WrongChain {
                claim: claim.to_chain.clone(),
                local: self.chain.clone(),
            });
        }
        if self.completed.contains(&claim.nonce) {
            return Err(BridgeError::AlreadyClaimed(claim.nonce));
        }
        if !self
            .verifier
            .verify(&claim.signing_bytes(), &claim.signature, &self.authority)
        {
            return Err(BridgeError::InvalidSignature(claim.nonce));
        }
        token.mint(&self.id, &claim.recipient, claim.amount)?;
        self.completed.insert(claim.nonce);
        tracing::debug!(nonce = claim.nonce, amount = claim.amount, "claim settled");
        Ok(())
    }
}
