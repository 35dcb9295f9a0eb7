pub mod aggregator;
pub mod api;
pub mod cli;
pub mod error;
pub mod limiters;
pub mod package;
pub mod pubsub;
pub mod settings;
