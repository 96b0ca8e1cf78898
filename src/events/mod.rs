pub mod drainer;

pub use drainer::start_outbox_drainer;
