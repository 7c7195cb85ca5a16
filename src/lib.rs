pub mod accrual;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod orders;
pub mod server;
