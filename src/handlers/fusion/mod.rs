pub mod client;
pub mod reader;
pub mod session;
