pub mod actor;
pub mod client;
