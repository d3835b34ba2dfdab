mod check_config;
mod serve;

pub use check_config::execute_check_config;
pub use serve::{build_publisher, execute_serve};
