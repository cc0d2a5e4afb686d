pub mod fusion_models;
pub mod heater_models;
