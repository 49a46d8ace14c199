//! # Borrow Request Signatures
//!
//! Vendor client libraries sign each borrow request with a secret compiled
//! into the library. The signature travels in three headers:
//!
//! ```text
//! X-Signature: hex(HMAC-SHA256(secret, "tool|user|timestamp[|api_key]"))
//! X-Timestamp: unix seconds
//! X-Vendor-ID: vendor identifier (optional, falls back to the default vendor)
//! ```
//!
//! The `|api_key` suffix is present when the client also authenticates with
//! a bearer key. Both payload forms are accepted when a bearer key is
//! supplied, since not every client library includes it.
//!
//! Timestamps further than the configured window from server time are
//! rejected to bound replay.

use std::collections::HashMap;
use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Default replay window: five minutes either side of server time.
pub const DEFAULT_SIGNATURE_WINDOW_SECS: u64 = 300;

/// Reasons a borrow request fails signature verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// Signatures are required but the request carried none.
    #[error("missing X-Signature or X-Timestamp header")]
    MissingHeaders,

    /// The vendor ID has no registered secret.
    #[error("unknown vendor: {0}")]
    UnknownVendor(String),

    /// `X-Timestamp` was not an integer.
    #[error("invalid timestamp format: {0:?}")]
    InvalidTimestamp(String),

    /// `X-Timestamp` fell outside the replay window.
    #[error("request expired (timestamp difference: {skew_secs}s, max {window_secs}s)")]
    Expired {
        /// Absolute difference between request and server time.
        skew_secs: u64,
        /// Configured window.
        window_secs: u64,
    },

    /// The signature did not match any accepted payload form.
    #[error("invalid signature")]
    InvalidSignature,

    /// The vendor secret could not key an HMAC.
    #[error("invalid signing key")]
    InvalidKey,
}

/// A vendor's shared secret. Zeroized on drop, redacted in `Debug`.
#[derive(Clone)]
pub struct VendorSecret(Zeroizing<Vec<u8>>);

impl VendorSecret {
    /// Wrap secret bytes.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for VendorSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VendorSecret([REDACTED])")
    }
}

/// Build the string a client signs.
pub fn signing_payload(tool: &str, user: &str, timestamp: &str, api_key: Option<&str>) -> String {
    match api_key {
        Some(key) => format!("{tool}|{user}|{timestamp}|{key}"),
        None => format!("{tool}|{user}|{timestamp}"),
    }
}

fn keyed_mac(secret: &[u8], payload: &str) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// Compute the lowercase hex HMAC-SHA256 of `payload` under `secret`.
pub fn sign(secret: &[u8], payload: &str) -> Result<String, SignatureError> {
    let mac = keyed_mac(secret, payload)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// The authentication-relevant parts of a borrow request.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignedBorrow<'a> {
    pub tool: &'a str,
    pub user: &'a str,
    /// `X-Signature` header value.
    pub signature: Option<&'a str>,
    /// `X-Timestamp` header value.
    pub timestamp: Option<&'a str>,
    /// `X-Vendor-ID` header value.
    pub vendor_id: Option<&'a str>,
    /// Bearer API key presented with the request, if any.
    pub api_key: Option<&'a str>,
}

/// Outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// No signature headers and signatures are optional.
    Unsigned,
    /// Signature matched the named vendor's secret.
    Verified { vendor_id: String },
}

/// Pluggable authentication step run before admission.
pub trait RequestVerifier: Send + Sync + fmt::Debug {
    /// Verify `request` against server time `now_epoch_secs`.
    fn verify(
        &self,
        request: &SignedBorrow<'_>,
        now_epoch_secs: i64,
    ) -> Result<Verification, SignatureError>;
}

/// HMAC-SHA256 verifier backed by a table of vendor secrets.
#[derive(Debug, Clone)]
pub struct HmacVerifier {
    vendors: HashMap<String, VendorSecret>,
    require_signatures: bool,
    window_secs: u64,
    default_vendor: String,
}

impl HmacVerifier {
    /// A verifier with no vendors, optional signatures, and the default window.
    pub fn new(default_vendor: impl Into<String>) -> Self {
        Self {
            vendors: HashMap::new(),
            require_signatures: false,
            window_secs: DEFAULT_SIGNATURE_WINDOW_SECS,
            default_vendor: default_vendor.into(),
        }
    }

    /// Register a vendor secret.
    pub fn with_vendor(mut self, vendor_id: impl Into<String>, secret: VendorSecret) -> Self {
        self.vendors.insert(vendor_id.into(), secret);
        self
    }

    /// Reject unsigned requests when `require` is true.
    pub fn require_signatures(mut self, require: bool) -> Self {
        self.require_signatures = require;
        self
    }

    /// Set the replay window.
    pub fn window_secs(mut self, secs: u64) -> Self {
        self.window_secs = secs;
        self
    }

    /// Whether unsigned requests are rejected.
    pub fn requires_signatures(&self) -> bool {
        self.require_signatures
    }

    /// Number of registered vendors.
    pub fn vendor_count(&self) -> usize {
        self.vendors.len()
    }
}

impl RequestVerifier for HmacVerifier {
    fn verify(
        &self,
        request: &SignedBorrow<'_>,
        now_epoch_secs: i64,
    ) -> Result<Verification, SignatureError> {
        let (Some(signature), Some(timestamp)) = (request.signature, request.timestamp) else {
            if self.require_signatures {
                return Err(SignatureError::MissingHeaders);
            }
            return Ok(Verification::Unsigned);
        };

        let vendor_id = request.vendor_id.unwrap_or(&self.default_vendor);
        let secret = self
            .vendors
            .get(vendor_id)
            .ok_or_else(|| SignatureError::UnknownVendor(vendor_id.to_string()))?;

        let request_time: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| SignatureError::InvalidTimestamp(timestamp.to_string()))?;
        let skew_secs = now_epoch_secs.abs_diff(request_time);
        if skew_secs > self.window_secs {
            return Err(SignatureError::Expired {
                skew_secs,
                window_secs: self.window_secs,
            });
        }

        let provided = hex::decode(signature.trim()).map_err(|_| SignatureError::InvalidSignature)?;

        let mut payloads = Vec::with_capacity(2);
        if let Some(key) = request.api_key {
            payloads.push(signing_payload(request.tool, request.user, timestamp.trim(), Some(key)));
        }
        payloads.push(signing_payload(request.tool, request.user, timestamp.trim(), None));

        for payload in &payloads {
            // verify_slice compares in constant time.
            if keyed_mac(secret.expose(), payload)?.verify_slice(&provided).is_ok() {
                return Ok(Verification::Verified {
                    vendor_id: vendor_id.to_string(),
                });
            }
        }

        tracing::warn!(vendor_id = %vendor_id, tool = %request.tool, "borrow signature mismatch");
        Err(SignatureError::InvalidSignature)
    }
}
