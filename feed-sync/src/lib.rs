pub mod types;
pub mod date;
pub mod dedup;
pub mod fetcher;
pub mod parser;
pub mod wechat;
pub mod ledger;
pub mod registry;
pub mod orchestrator;
pub mod scheduler;
pub mod config;

pub use types::*;
pub use fetcher::Fetcher;
pub use parser::FeedParser;
pub use wechat::{AccountInfo, RelayConfig, WeChatAdapter};
pub use ledger::{MemoryErrorLedger, RedisErrorLedger};
pub use registry::{MemorySourceRegistry, PgSourceRegistry};
pub use orchestrator::SyncOrchestrator;
pub use scheduler::Scheduler;
