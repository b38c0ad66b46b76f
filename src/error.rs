//! Codec error types.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("Malformed payload: expected {expected} bytes, got {actual}")]
    MalformedPayload { expected: usize, actual: usize },

    #[error("Value {value} outside range [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },

    #[error("Invalid range: min={min}, max={max}, bits={bits}")]
    InvalidRange { min: f64, max: f64, bits: u8 },

    #[error("Control frame requires a motor command")]
    MissingCommand,

    #[error("Motor id {0} does not fit the 5-bit address field")]
    MotorIdOutOfRange(u8),
}

pub type CodecResult<T> = Result<T, CodecError>;
