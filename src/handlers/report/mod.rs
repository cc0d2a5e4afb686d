pub mod notifier;
pub mod sink;
