pub mod error;
pub mod models;

pub use error::ConfigError;
pub use models::lifecycle::{LifecycleConfig, MonitorConfig};
pub use models::logging::{LogType, LoggingConfig};
pub use models::panel::{HttpConfig, PanelConfig, StorageConfig};
