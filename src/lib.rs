pub mod agent;
pub mod config;
pub mod error;
pub mod execution;
pub mod inventory;
pub mod job;
pub mod services;
pub mod shutdown;
