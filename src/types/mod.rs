pub mod candle;
pub mod option;
pub mod position;
pub mod signal;
pub mod trade;

pub use candle::*;
pub use option::*;
pub use position::*;
pub use signal::*;
pub use trade::*;
