//! # licd-crypto — Request Authentication Primitives
//!
//! The coordinator core treats request authentication as an external
//! collaborator invoked before admission. This crate provides that
//! collaborator:
//!
//! - **Signatures** (`signature.rs`): HMAC-SHA256 over
//!   `tool|user|timestamp[|api_key]`, keyed by a per-vendor secret, with a
//!   replay window on the timestamp. [`RequestVerifier`] is the seam the
//!   HTTP layer calls; [`HmacVerifier`] is the production implementation.
//!
//! - **Token comparison** (`compare.rs`): constant-time equality for
//!   bearer API keys.
//!
//! ## Crate Policy
//!
//! - Secrets are zeroized on drop and redacted from `Debug` output.
//! - Signature bytes are compared in constant time.

pub mod compare;
pub mod signature;

pub use compare::constant_time_eq;
pub use signature::{
    sign, signing_payload, HmacVerifier, RequestVerifier, SignatureError, SignedBorrow,
    Verification, VendorSecret, DEFAULT_SIGNATURE_WINDOW_SECS,
};
