//! # API Route Modules
//!
//! - `licenses` — borrow, return, heartbeat and status.
//! - `budget` — runtime pool configuration (`/config/budget`).
//! - `borrows` — active lease and overage charge listings.
//!
//! All of these sit behind bearer authentication. Health, version,
//! metrics and the OpenAPI document are mounted unauthenticated in
//! `lib.rs`.

pub mod borrows;
pub mod budget;
pub mod licenses;
