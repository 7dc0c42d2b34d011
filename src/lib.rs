pub mod api;
pub mod config;
pub mod error;
pub mod master;
pub mod protocol;
pub mod scheduler;
pub mod service;
pub mod shutdown;
pub mod worker;
