pub mod controller;
pub mod pin;
