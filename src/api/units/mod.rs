#[macro_use]
mod unit_base;

mod data_rate;
mod data_size;
mod is_newer;
mod time_delta;
mod timestamp;

pub use data_rate::*;
pub use data_size::*;
pub use is_newer::*;
pub use time_delta::*;
pub use timestamp::*;
