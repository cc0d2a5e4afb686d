pub mod fusion;
pub mod relay;
pub mod report;
