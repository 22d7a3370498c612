pub mod job;
pub mod message;
pub mod states;
pub mod stats;
