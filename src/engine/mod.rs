//! Pure computation: location routing and the per-order tax ledger.
//!
//! Nothing in here performs I/O; the orchestration layer feeds it data
//! loaded from collaborators and the tax service.

pub mod ledger;
pub mod router;

pub use ledger::{LedgerEntry, TaxLedger};
pub use router::{
    FeeInclusion, KeepChoice, LineFilter, LocationOverride, LocationRouter, Partition,
    PlannedGroup, PlannedLine, RouterError,
};
