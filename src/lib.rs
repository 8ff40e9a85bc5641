pub mod codegen;
pub mod config;
pub mod errors;
pub mod factory;
pub mod logging;
pub mod preview;
pub mod util;
