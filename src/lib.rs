pub mod errors;
pub mod logging;
pub mod roadworks;
pub mod roadworks_config;

pub use roadworks_common as common;
