//! Interpreter and runtime of the ORE execution core
//!
//! Values live in a per-execution [`Heap`] on top of slab storage. The
//! [`Tracker`] enforces the resource rules at run time: a resource has one
//! live owner, cannot be used after it was moved or destroyed, and every
//! reference to it dies with it. The [`Runtime`] ties a fresh interpreter to
//! the host [`Interface`] and [`ore_storage::Ledger`] for each execution and
//! shares one [`ProgramCache`] between executions.

pub mod cache;
pub mod config;
pub mod crypto;
pub mod environment;
pub mod error;
pub mod export;
pub mod heap;
pub mod interface;
pub mod interpreter;
pub mod runtime;
pub mod tracker;
pub mod types;
pub mod value;

pub use cache::{CacheStats, ProgramCache};
pub use config::{ConfigError, RuntimeConfig};
pub use crypto::{AccountKeyInfo, HashAlgorithm, PublicKeyInfo, SignatureAlgorithm};
pub use environment::{CodeChange, Environment};
pub use error::{ConditionKind, Error, ExternalError, InternalError, InvalidationCause, Result, UserError, UserErrorKind};
pub use export::{export_value, import_value, ExportedValue};
pub use heap::Heap;
pub use interface::{ComputationKind, Event, Interface, MemoryInterface, MemoryKind, MemoryUsage, ResolvedLocation};
pub use interpreter::Interpreter;
pub use runtime::{Context, Runtime};
pub use tracker::{ResourceState, Tracker};
pub use types::{Authorization, CompositeType, PathType, StaticType};
pub use value::{IntegerKind, IntegerValue, Value};
