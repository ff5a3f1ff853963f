//! Core application infrastructure

pub(crate) mod banner;
pub mod cli;
pub mod config;
pub mod constants;
pub mod shutdown;
pub mod storage;

pub use crate::app::CoreApp;
pub use cli::{CliConfig, Commands};
pub use config::{AppConfig, AuthConfig, IngestConfig, ServerConfig, StorageBackendType};
pub use storage::{AppStorage, DataSubdir};

pub use crate::data::StorageService;
pub use crate::domain::pricing::{PricingService, SpanCostInput, SpanCostOutput};
pub use shutdown::ShutdownService;
