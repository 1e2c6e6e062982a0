//! Email delivery queue: claim, dispatch, retry.

pub mod dispatcher;
pub mod lock;
pub mod model;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use lock::{ClaimedBatch, LockManager};
pub use model::{DeliveryOutcome, EmailLogRecord, EmailStatus, NewEmail};
