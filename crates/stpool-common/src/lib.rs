pub mod config;
pub mod errors;
pub mod guard;
pub mod types;

pub use config::{PoolConfig, ProtocolConfig, RegistryConfig};
pub use errors::{Error, Result};
pub use guard::ReentrancyGuard;
pub use types::*;
