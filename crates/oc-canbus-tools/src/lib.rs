pub mod ecu_addrs;
pub mod error;
pub mod isotp;
pub mod mock;
pub mod parallel_query;
pub mod safety;
pub mod transport;
pub mod types;
pub mod uds;
pub mod vin;

pub use error::{CanError, CanResult};
pub use transport::CanTransport;
