pub mod error;
pub mod line;
pub mod message;
pub mod task;
