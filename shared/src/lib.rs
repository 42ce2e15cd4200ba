pub mod cache;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod symbols;
pub mod upstream;

pub use cache::CacheStore;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use coordinator::{CoordinatorConfig, RefreshCoordinator};
pub use error::UpstreamError;
pub use models::*;
pub use symbols::{find_symbol, known_instruments, resolve_symbol};
pub use upstream::{HistoryFetcher, SupraClient};
