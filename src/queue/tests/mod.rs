//! Test modules for the queue system
//!
//! Tests are organized by functional area; all of them run against the
//! in-memory broker.

mod helpers;

mod memory;
mod operator;
