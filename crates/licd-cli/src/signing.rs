//! # Sign Subcommand
//!
//! Computes the headers a vendor client sends with a signed borrow:
//!
//! ```bash
//! licd sign --tool "Vector - VTT" --user alice --secret "$VENDOR_SECRET"
//! X-Signature: 5c1e...
//! X-Timestamp: 1767225600
//! X-Vendor-ID: techvendor
//! ```
//!
//! When the server has bearer auth enabled the token is part of the
//! signed payload, so pass it with `--api-key`.

use anyhow::{Context, Result};
use clap::Args;
use licd_crypto::{sign, signing_payload};

#[derive(Args, Debug)]
pub struct SignArgs {
    /// Tool name exactly as it will appear in the request body.
    #[arg(long)]
    pub tool: String,

    /// User name exactly as it will appear in the request body.
    #[arg(long)]
    pub user: String,

    /// Vendor shared secret.
    #[arg(long)]
    pub secret: String,

    #[arg(long, default_value = "techvendor")]
    pub vendor_id: String,

    /// Bearer token the request will carry, if any.
    #[arg(long)]
    pub api_key: Option<String>,

    /// Unix seconds to sign at. Defaults to now.
    #[arg(long)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub signature: String,
    pub timestamp: String,
    pub vendor_id: String,
}

impl SignedHeaders {
    pub fn lines(&self) -> [String; 3] {
        [
            format!("X-Signature: {}", self.signature),
            format!("X-Timestamp: {}", self.timestamp),
            format!("X-Vendor-ID: {}", self.vendor_id),
        ]
    }
}

pub fn run_signing(args: &SignArgs) -> Result<u8> {
    let now = chrono::Utc::now().timestamp();
    for line in signed_headers(args, now)?.lines() {
        println!("{line}");
    }
    Ok(0)
}

/// Sign the request described by `args`, at `args.timestamp` or `now`.
pub fn signed_headers(args: &SignArgs, now: i64) -> Result<SignedHeaders> {
    let timestamp = args.timestamp.unwrap_or(now).to_string();
    let payload = signing_payload(&args.tool, &args.user, &timestamp, args.api_key.as_deref());
    let signature = sign(args.secret.as_bytes(), &payload).context("signing borrow request")?;
    Ok(SignedHeaders {
        signature,
        timestamp,
        vendor_id: args.vendor_id.clone(),
    })
}
