pub mod context;
pub mod delivery;
pub mod health;
pub mod job;
pub mod message;
pub mod registry;
pub mod retry;
pub mod status;
pub mod template;
