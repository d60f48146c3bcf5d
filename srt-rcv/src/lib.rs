mod config;
mod rcv_buffer;
mod tsbpd;
mod unit_queue;

pub use config::*;
pub use rcv_buffer::*;
pub use tsbpd::*;
pub use unit_queue::*;
