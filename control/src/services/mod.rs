pub mod benchmark;
pub mod boot_config;
pub mod discovery;
pub mod executor;
pub mod fleet;
pub mod reconciler;
pub mod results;

pub use benchmark::{BenchmarkOrchestrator, BenchmarkReport};
pub use boot_config::{BootConfig, ConfigGenerator};
pub use discovery::{DiscoveryService, HttpDiscovery};
pub use executor::{BoundedExecutor, OperationResult, Outcome};
pub use fleet::Fleet;
pub use reconciler::Diff;
