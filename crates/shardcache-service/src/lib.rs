pub mod caching;
pub mod config;
pub mod logging;
pub mod origin;
pub mod utils;
