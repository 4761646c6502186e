//! Runtime event ingestion and reconciliation.

pub mod backoff;
pub mod ingester;
pub mod model;
pub mod processor;
pub mod reconciler;

pub use ingester::EventIngester;
pub use model::{EventAction, EventKind, RuntimeEvent};
pub use processor::{EventProcessor, ProcessEvent};
pub use reconciler::{Reconcile, Reconciler};
