//! Core infrastructure shared by the queue client and its transports

pub mod error_handling;
pub mod logging;
pub mod retry;
pub mod version;
