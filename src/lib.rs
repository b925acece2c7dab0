pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod service;
pub mod store;

pub use config::{Config, StoreBackend};
pub use db::{init_db, Repository};
pub use domain::{
    CommercialTerms, CreditBalance, CreditEntry, Decimal, EntityId, GrantId, IncentiveConfig,
    IncentiveGrant, LineItem, Order, OrderId, Role, TimeMs, Track,
};
pub use error::{AppError, LedgerError};
pub use service::LedgerService;
pub use store::{LedgerStore, MemoryStore, StoreError};
