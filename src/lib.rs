//! Codec and CAN driver for J60-series joint motors.
//!
//! Motion commands are quantized into a packed 8-byte payload; replies are
//! unpacked back into position, velocity, torque and temperature. The
//! arbitration id carries a 6-bit opcode above a 5-bit motor address.

pub mod can;
pub mod config;
pub mod control_loop;
pub mod error;
pub mod motor;

pub use can::{
    build_frame, parse_frame, pack, unpack, CanBus, CommandFrame, FrameTransport, MotorCommand,
    MotorFaults, MotorResponse, MotorState, Opcode, Payload,
};
pub use config::ControllerConfig;
pub use control_loop::run_control_loop;
pub use error::{CodecError, CodecResult};
pub use motor::Motor;
