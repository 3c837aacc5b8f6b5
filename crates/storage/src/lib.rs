//! Storage layer for the ORE execution core
//!
//! This crate provides the byte-oriented [`Ledger`] adapter consumed by the
//! runtime, an in-memory ledger for hosts and tests, and [`SlabStorage`], the
//! persistent container layer. Containers are kept in slabs addressed by
//! stable [`SlabId`]s; large arrays and dictionaries are split into page
//! slabs so a mutation only rewrites the touched page and its root.

pub mod error;
pub mod guard;
pub mod ledger;
pub mod memory;
pub mod slab;
pub mod storage;
pub mod validation;

pub use error::{LedgerError, LedgerResult, Result, StorageError};
pub use guard::{panic_message, GuardedLedger};
pub use ledger::{Ledger, StorageIndex, STORAGE_INDEX_TAG};
pub use memory::MemoryLedger;
pub use slab::{Body, PageRef, Slab, SlabData, SlabElement, SlabId};
pub use storage::{CommitSummary, SlabStorage, DEFAULT_PAGE_CAPACITY};
pub use validation::ValidationReport;
