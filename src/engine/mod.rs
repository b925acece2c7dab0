//! Pure computation engines for deterministic settlement and incentive logic.
//!
//! Nothing in here touches storage or clocks; callers pass `now` explicitly.

pub mod aggregation;
pub mod credit_ledger;
pub mod ledger_entry;
pub mod settlement;
pub mod vesting;

pub use aggregation::{
    entry_for_rollup, platform_default_entry, platform_default_terms, rollup, EntityRollup,
    RollupReport, RollupRole, PLATFORM_DEFAULT_MARKUP_PERCENT,
};
pub use ledger_entry::{build_ledger_entry, build_ledger_entry_with_fallback, LedgerEntry};
pub use settlement::{
    apply_transition, buyer_status, check_transition, EvidenceEvent, SettlementEvent,
};
pub use vesting::{evaluate, installment_amounts};
