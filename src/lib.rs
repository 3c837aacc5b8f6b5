//! ORE
//!
//! Execution core for a resource-oriented smart-contract language: the
//! value model and its run-time resource tracking, slab storage over a host
//! ledger, the program cache, and the runtime entry points.

/// Module version information
pub mod version {
    /// The current version of the ORE library
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

pub use ore_common as common;
pub use ore_storage as storage;
pub use ore_syntax as syntax;
pub use ore_vm as vm;

pub use ore_common::{Address, Location, Path, PathDomain};
pub use ore_storage::{Ledger, MemoryLedger};
pub use ore_vm::{Context, Error, ExportedValue, Interface, MemoryInterface, Runtime, RuntimeConfig};

/// Install the global tracing subscriber, filtered by `RUST_LOG`. Does
/// nothing if a subscriber is already installed.
pub fn init_tracing() {
    use tracing_subscriber::FmtSubscriber;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn version_is_available() {
        assert!(!super::version::VERSION.is_empty());
    }

    #[test]
    fn init_tracing_twice_is_harmless() {
        super::init_tracing();
        super::init_tracing();
    }
}
