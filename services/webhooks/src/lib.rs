pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod infra;
pub mod router;
pub mod signing;
pub mod state;
pub mod usecase;
pub mod workers;
