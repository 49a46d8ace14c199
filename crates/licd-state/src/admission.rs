//! # Admission Controller
//!
//! Turns a borrow request into a lease. The ledger's `reserve` makes the
//! decision; this layer mints the lease and, for priced overage borrows,
//! the charge. A lease that cannot be recorded gives its capacity back
//! before the error is returned, so a failed admission leaves no trace.

use std::sync::Arc;

use licd_core::{Timestamp, ToolName, UserName};

use crate::billing::{ChargeBook, OverageCharge};
use crate::error::AdmissionError;
use crate::lease::Lease;
use crate::ledger::LeaseLedger;
use crate::lifecycle::LeaseManager;
use crate::pool::CapacityClass;

/// A granted borrow.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseTicket {
    pub lease: Lease,
    pub class: CapacityClass,
    /// Set when the borrow was billed as overage.
    pub charge: Option<OverageCharge>,
}

#[derive(Debug, Clone)]
pub struct AdmissionController {
    ledger: Arc<LeaseLedger>,
    leases: Arc<LeaseManager>,
    charges: Arc<ChargeBook>,
}

impl AdmissionController {
    pub fn new(ledger: Arc<LeaseLedger>, leases: Arc<LeaseManager>, charges: Arc<ChargeBook>) -> Self {
        Self {
            ledger,
            leases,
            charges,
        }
    }

    /// Admit or deny a borrow of `tool` by `user` at `now`.
    pub fn try_admit(
        &self,
        tool: &ToolName,
        user: &UserName,
        now: Timestamp,
    ) -> Result<LeaseTicket, AdmissionError> {
        let reservation = self.ledger.reserve(tool)?;

        let lease = match self.leases.create_lease(&reservation, user, now) {
            Ok(lease) => lease,
            Err(e) => {
                if let Err(release_err) = self.ledger.release(tool) {
                    tracing::error!(tool = %tool, error = %release_err, "rollback release failed");
                }
                tracing::error!(tool = %tool, user = %user, error = %e, "lease could not be recorded");
                return Err(AdmissionError::Storage(e.to_string()));
            }
        };

        let charge = (reservation.class == CapacityClass::Overage && reservation.overage_price > 0.0)
            .then(|| {
                self.charges
                    .record(tool, user, lease.id, reservation.overage_price, now)
            });

        tracing::info!(
            tool = %tool,
            user = %user,
            lease_id = %lease.id,
            class = %reservation.class,
            "license borrowed"
        );
        Ok(LeaseTicket {
            lease,
            class: reservation.class,
            charge,
        })
    }
}
