pub mod broker;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod storage;
