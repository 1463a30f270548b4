pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod log_record;
pub mod pose;
pub mod robot_state;
pub mod target;

pub use command::*;
pub use config::*;
pub use device::*;
pub use error::*;
pub use log_record::*;
pub use pose::*;
pub use robot_state::*;
pub use target::*;
