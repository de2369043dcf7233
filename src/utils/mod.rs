pub mod config_loader;
pub mod logger;
