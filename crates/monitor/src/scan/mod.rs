//! Volume scan engine — tiered scan methods behind a concurrency gate and a
//! TTL cache, with sync and async execution.

pub mod cache;
pub mod diskus;
pub mod du;
pub mod engine;
pub mod error;
pub mod fstype;
pub mod method;
pub mod native;

pub use cache::ScanCache;
pub use engine::{JobProgress, ScanEngine};
pub use error::{ScanError, ScanErrorCode};
pub use method::{MethodInfo, ScanMethod, ScanReport};
