pub mod api;
pub mod batch;
pub mod clock;
pub mod config;
pub mod error;
pub mod mapper;
pub mod modules;
pub mod observability;
pub mod orchestrator;
pub mod record;
pub mod store;
pub mod transform;
pub mod validation;

pub use api::{ApiError, ContentApi, InMemoryContentApi, SimulatedContentApi};
pub use batch::{BatchOrchestrator, BatchPlan};
pub use clock::{MigrationClock, ProductionClock, SimulatedClock};
pub use config::MigrationConfig;
pub use error::MigrateError;
pub use mapper::{DirectoryTreeBuilder, UidMapper};
pub use modules::{MigrationContext, ModuleKind, ModuleReport};
pub use orchestrator::{MigrationOrchestrator, RunSummary};
pub use record::Record;
pub use store::{ChunkedStore, StoreOptions};
pub use validation::AsyncValidationPoller;
