pub mod api;
pub mod clients;
pub mod config;
pub mod delivery;
pub mod error;
pub mod metrics;
pub mod models;
pub mod utils;
pub mod worker;
