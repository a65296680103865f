//! BLP token ledger.
//!
//! A closed, fixed-supply fungible token: the whole supply is credited to one
//! holder at issuance and afterwards only moves between accounts.
//!
//! * [`address`] — 20-byte account identifiers and the reserved null address.
//! * [`ledger`] — balances, allowances, transfers and delegated transfers,
//!   plus the event log and state snapshots.
//! * [`config`] — token parameters and initial holder resolution.
//! * [`store`] — JSON state file used by the `blp` binary.

pub mod address;
pub mod config;
pub mod ledger;
pub mod store;

pub use address::{Address, AddressError};
pub use config::{ConfigError, TokenConfig};
pub use ledger::{
    events::{EventLog, EventSink, NoopSink, TokenEvent},
    snapshot::{LedgerSnapshot, SnapshotError},
    Amount, Ledger, LedgerError, TokenMetadata, DECIMALS, TOTAL_SUPPLY, UNLIMITED_ALLOWANCE,
};
pub use store::{StateFile, Store, StoreError};
