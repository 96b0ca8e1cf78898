pub mod backoff;
pub mod dlq;
pub mod scheduler;
pub mod sender;
pub mod signature;

pub use backoff::RetryPolicy;
pub use scheduler::{start_delivery_consumer, start_retry_sweeper};
pub use sender::DeliveryOutcome;
