pub mod database;
pub mod health;
pub mod identity;
pub mod rbmq;
pub mod smtp;
