//! Command implementations for echo-sshd CLI

pub mod completion;
pub mod config;
pub mod connect;
pub mod keygen;
pub mod run;
pub mod version;
