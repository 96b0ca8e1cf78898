pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod gateway;
pub mod housekeeper;
pub mod middleware;
pub mod models;
pub mod queue;
pub mod repos;
pub mod routes;
pub mod services;
pub mod state;
pub mod webhooks;

pub use config::Config;
pub use error::ServiceError;
pub use state::{AppState, SharedState};
