pub mod ecu;
pub mod frame;
pub mod fw;
pub mod vin;

pub use ecu::*;
pub use frame::*;
pub use fw::*;
pub use vin::*;
