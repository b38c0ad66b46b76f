pub mod manager;
pub mod protocol;
pub mod quantize;
pub mod setup;
pub mod transport;

pub use manager::*;
pub use protocol::*;
pub use quantize::*;
pub use setup::*;
pub use transport::FrameTransport;

#[cfg(test)]
pub(crate) use transport::mock;
