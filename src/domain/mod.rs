//! Domain types for the settlement ledger and incentive engine.
//!
//! This module provides:
//! - Lossless money handling via the Decimal wrapper
//! - Domain primitives: TimeMs, EntityId, OrderId, GrantId, Role, Track
//! - Orders, commercial terms, incentive grants, and credit ledger entries

pub mod credit;
pub mod decimal;
pub mod incentive;
pub mod order;
pub mod primitives;
pub mod terms;

pub use credit::{CreditBalance, CreditClass, CreditEntry, CreditSource, Receipt, GENESIS_HASH};
pub use decimal::Decimal;
pub use incentive::{IncentiveConfig, IncentiveGrant, Installment, InstallmentState, SpendSample};
pub use order::{
    BuyerPaymentStatus, BuyerStatus, LineItem, Order, Receipted, SupplierPayoutStatus,
};
pub use primitives::{EntityId, GrantId, OrderId, Role, TimeMs, Track};
pub use terms::{CommercialTerms, TermsBook, TermsVersion};
