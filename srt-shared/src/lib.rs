mod msg_number;
mod packet;
mod seq_number;

pub use msg_number::*;
pub use packet::*;
pub use seq_number::*;
