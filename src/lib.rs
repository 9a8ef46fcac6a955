pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod ssh;
pub mod utils;

pub use cli::Cli;
pub use config::SshSettings;
pub use error::{ProxyError, RequestDecodeError};
pub use proxy::ProxyServer;
pub use ssh::{ClientIdentity, ConnectionPool};
