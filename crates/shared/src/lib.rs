pub mod config;
mod config_env;
pub mod models;
pub mod repos;
pub mod signing;
