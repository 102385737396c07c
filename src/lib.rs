pub mod core;
pub mod queue;
pub mod servicebus;
