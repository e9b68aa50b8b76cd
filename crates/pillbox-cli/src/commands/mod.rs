pub mod alarm;
pub mod config;
