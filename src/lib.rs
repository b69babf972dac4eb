pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod orchestration;
pub mod runtime;
pub mod secrets;
