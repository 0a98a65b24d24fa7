pub mod clock;
mod delivery;
mod dispatch;
mod engine;
pub mod executor;
mod retry;
mod scanner;
pub mod store;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use delivery::{DeliveryWorker, plan_transition};
pub use dispatch::{SubmitError, SubmitFuture, Submitter, TaskDispatcher};
pub use engine::{DeliveryEngine, EngineSettings};
pub use executor::{DeliveryTransport, HttpDeliveryExecutor};
pub use retry::BackoffPolicy;
pub use scanner::RetryScanner;
pub use store::{DeliveryStore, InMemoryDeliveryStore, PgDeliveryStore};
pub use types::{AttemptOutcome, ProcessOutcome, ScanReport};
