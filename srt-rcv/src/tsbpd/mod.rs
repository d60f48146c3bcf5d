mod drift;
mod time;

pub use drift::*;
pub use time::*;
