//! Cross-chain swap module.
//!
//! Funds leave this chain by being burned and re-enter on the far side when
//! an authority-signed claim is presented to that chain's bridge. The
//! signature scheme itself is an opaque primitive behind
//! [`SignatureVerifier`]; this module owns replay protection and chain
//! tagging, while the token only enforces the mint/burn capabilities.

#![forbid(unsafe_code)]

pub mod chain_swap;

pub use chain_swap::{
    BridgeError, ChainBridge, NoopSignatureVerifier, SignatureVerifier, SwapClaim, SwapOut,
};
