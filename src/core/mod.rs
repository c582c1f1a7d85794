//! Core services and infrastructure

pub mod error_handling;
pub mod logging;
pub mod retry;
pub mod shutdown;
pub mod version;
