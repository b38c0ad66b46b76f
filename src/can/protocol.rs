// CAN protocol definitions for the J60-series joint motor
use tracing::{info, warn};

use super::quantize::{dequantize, quantize, quantize_checked};
use crate::error::{CodecError, CodecResult};

/// Opcode occupies the arbitration id bits above this shift
pub const CAN_ID_SHIFT_BITS: u32 = 5;

/// Address field width when building a frame
pub const SEND_MOTOR_ID_MASK: u32 = 0x1F;

/// Address mask applied to received frames. Bit 4 is left out: the motor sets
/// it on its replies.
pub const RECEIVE_MOTOR_ID_MASK: u32 = 0x0F;

pub const OPCODE_MASK: u32 = 0x3F;

/// Payload length of a control frame (both directions)
pub const CONTROL_DLC: u8 = 8;

/// Raw CAN payload
pub type Payload = [u8; 8];

/// Field ranges and bit widths
pub mod ranges {
    use crate::can::quantize::ScalarRange;

    pub const SEND_POSITION: ScalarRange = ScalarRange::new(-40.0, 40.0, 16);
    pub const SEND_VELOCITY: ScalarRange = ScalarRange::new(-40.0, 40.0, 14);
    pub const SEND_TORQUE: ScalarRange = ScalarRange::new(-40.0, 40.0, 16);
    pub const SEND_KP: ScalarRange = ScalarRange::new(0.0, 1023.0, 10);
    pub const SEND_KD: ScalarRange = ScalarRange::new(0.0, 51.0, 8);

    pub const RECEIVE_POSITION: ScalarRange = ScalarRange::new(-40.0, 40.0, 20);
    pub const RECEIVE_VELOCITY: ScalarRange = ScalarRange::new(-40.0, 40.0, 20);
    pub const RECEIVE_TORQUE: ScalarRange = ScalarRange::new(-40.0, 40.0, 16);
    pub const RECEIVE_TEMPERATURE: ScalarRange = ScalarRange::new(-20.0, 200.0, 7);
}

/// Command selector carried in the arbitration id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Disable,
    Enable,
    Control,
    /// Set the current position as zero point
    SetHome,
    /// Clear latched faults
    ErrorReset,
    /// Read the fault status word
    GetStatusWord,
    /// Any code this crate does not handle
    Other(u8),
}

impl Opcode {
    pub const fn code(self) -> u8 {
        match self {
            Opcode::Disable => 1,
            Opcode::Enable => 2,
            Opcode::Control => 4,
            Opcode::SetHome => 6,
            Opcode::ErrorReset => 17,
            Opcode::GetStatusWord => 23,
            Opcode::Other(code) => code,
        }
    }

    /// Payload length sent with this opcode
    pub const fn send_dlc(self) -> u8 {
        match self {
            Opcode::Control => CONTROL_DLC,
            _ => 0,
        }
    }
}

impl From<u8> for Opcode {
    fn from(code: u8) -> Self {
        match code {
            1 => Opcode::Disable,
            2 => Opcode::Enable,
            4 => Opcode::Control,
            6 => Opcode::SetHome,
            17 => Opcode::ErrorReset,
            23 => Opcode::GetStatusWord,
            other => Opcode::Other(other),
        }
    }
}

/// Motion command sent to the motor
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotorCommand {
    pub position: f64,
    pub velocity: f64,
    pub torque: f64,
    pub kp: f64,
    pub kd: f64,
}

/// Which sensor the temperature reading comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureSource {
    Driver,
    Motor,
}

/// Motor state decoded from a control reply
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotorState {
    pub position: f64,
    pub velocity: f64,
    pub torque: f64,
    pub fault: bool,
    pub temperature: f64,
}

impl MotorState {
    /// The vendor SDK reads the flag bit as the temperature source rather than
    /// a fault. Both sources share one range, so `temperature` decodes the same
    /// either way.
    pub fn temperature_source(&self) -> TemperatureSource {
        if self.fault {
            TemperatureSource::Motor
        } else {
            TemperatureSource::Driver
        }
    }
}

/// Fault bits of the status word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotorFaults {
    pub over_voltage: bool,
    pub under_voltage: bool,
    pub over_current: bool,
    pub motor_over_temperature: bool,
    pub driver_over_temperature: bool,
    pub can_timeout: bool,
}

impl MotorFaults {
    pub fn from_word(word: u16) -> Self {
        Self {
            over_voltage: word & 0x01 != 0,
            under_voltage: word & 0x02 != 0,
            over_current: word & 0x04 != 0,
            motor_over_temperature: word & 0x08 != 0,
            driver_over_temperature: word & 0x10 != 0,
            can_timeout: word & 0x20 != 0,
        }
    }

    pub fn bits(&self) -> u16 {
        let mut word = 0u16;
        if self.over_voltage {
            word |= 0x01;
        }
        if self.under_voltage {
            word |= 0x02;
        }
        if self.over_current {
            word |= 0x04;
        }
        if self.motor_over_temperature {
            word |= 0x08;
        }
        if self.driver_over_temperature {
            word |= 0x10;
        }
        if self.can_timeout {
            word |= 0x20;
        }
        word
    }

    pub fn is_ok(&self) -> bool {
        self.bits() == 0
    }

    /// Names of the raised faults, in bit order
    pub fn active(&self) -> Vec<&'static str> {
        [
            (self.over_voltage, "over voltage"),
            (self.under_voltage, "under voltage"),
            (self.over_current, "over current"),
            (self.motor_over_temperature, "motor over temperature"),
            (self.driver_over_temperature, "driver over temperature"),
            (self.can_timeout, "CAN timeout"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect()
    }
}

/// Outbound frame ready for the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    pub id: u32,
    pub dlc: u8,
    pub data: Payload,
}

impl CommandFrame {
    /// Bytes actually put on the wire
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }
}

/// Classified inbound frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorResponse {
    pub motor_id: u8,
    pub opcode: Opcode,
    pub state: Option<MotorState>,
    pub faults: Option<MotorFaults>,
}

/// Combine opcode and motor address into an arbitration id
pub fn frame_id(opcode: Opcode, motor_id: u8) -> u32 {
    ((opcode.code() as u32 & OPCODE_MASK) << CAN_ID_SHIFT_BITS) | motor_id as u32
}

fn pack_raw(position: u32, velocity: u32, torque: u32, kp: u32, kd: u32) -> Payload {
    [
        position as u8,
        (position >> 8) as u8,
        velocity as u8,
        ((velocity >> 8) & 0x3F) as u8 | ((kp & 0x03) << 6) as u8,
        (kp >> 2) as u8,
        kd as u8,
        torque as u8,
        (torque >> 8) as u8,
    ]
}

/// Encode a motion command into a control payload
///
/// Out-of-range values are not rejected; their bits alias into neighbouring
/// ranges. Use [`pack_checked`] to fail instead.
pub fn pack(cmd: &MotorCommand) -> Payload {
    pack_raw(
        quantize(cmd.position, ranges::SEND_POSITION),
        quantize(cmd.velocity, ranges::SEND_VELOCITY),
        quantize(cmd.torque, ranges::SEND_TORQUE),
        quantize(cmd.kp, ranges::SEND_KP),
        quantize(cmd.kd, ranges::SEND_KD),
    )
}

/// Encode a motion command, rejecting any field outside its range
pub fn pack_checked(cmd: &MotorCommand) -> CodecResult<Payload> {
    Ok(pack_raw(
        quantize_checked(cmd.position, ranges::SEND_POSITION)?,
        quantize_checked(cmd.velocity, ranges::SEND_VELOCITY)?,
        quantize_checked(cmd.torque, ranges::SEND_TORQUE)?,
        quantize_checked(cmd.kp, ranges::SEND_KP)?,
        quantize_checked(cmd.kd, ranges::SEND_KD)?,
    ))
}

/// Decode motor state from a control reply
///
/// # Returns
/// * `Ok(MotorState)` for an 8-byte payload
/// * `Err(CodecError::MalformedPayload)` otherwise
pub fn unpack(data: &[u8]) -> CodecResult<MotorState> {
    let data: &Payload = data
        .try_into()
        .map_err(|_| CodecError::MalformedPayload {
            expected: CONTROL_DLC as usize,
            actual: data.len(),
        })?;
    let b = data.map(u32::from);

    let position = b[0] | (b[1] << 8) | ((b[2] & 0x0F) << 16);
    // High nibble of byte 2 is ORed in unshifted; it overlaps byte 3's low bits.
    let velocity = (b[2] & 0xF0) | (b[3] << 4) | (b[4] << 12);
    let torque = b[5] | (b[6] << 8);
    let fault = b[7] & 0x01 != 0;
    let temperature = (b[7] & 0xFF) >> 1;

    Ok(MotorState {
        position: dequantize(position, ranges::RECEIVE_POSITION),
        velocity: dequantize(velocity, ranges::RECEIVE_VELOCITY),
        torque: dequantize(torque, ranges::RECEIVE_TORQUE),
        fault,
        temperature: dequantize(temperature, ranges::RECEIVE_TEMPERATURE),
    })
}

/// Build an outbound frame
///
/// # Arguments
/// * `opcode` - Command selector
/// * `motor_id` - Motor address (5 bits)
/// * `cmd` - Motion command, required for `Opcode::Control` only
///
/// Unknown opcodes produce an empty frame rather than an error.
pub fn build_frame(
    opcode: Opcode,
    motor_id: u8,
    cmd: Option<&MotorCommand>,
) -> CodecResult<CommandFrame> {
    if motor_id as u32 > SEND_MOTOR_ID_MASK {
        return Err(CodecError::MotorIdOutOfRange(motor_id));
    }

    let data = match opcode {
        Opcode::Control => pack(cmd.ok_or(CodecError::MissingCommand)?),
        _ => [0u8; 8],
    };

    Ok(CommandFrame {
        id: frame_id(opcode, motor_id),
        dlc: opcode.send_dlc(),
        data,
    })
}

/// Classify an inbound frame and decode whatever it carries
///
/// Never fails: a malformed control payload or short status word is logged
/// and reported as absent.
pub fn parse_frame(frame_id: u32, data: &[u8]) -> MotorResponse {
    let opcode = Opcode::from(((frame_id >> CAN_ID_SHIFT_BITS) & OPCODE_MASK) as u8);
    let motor_id = (frame_id & RECEIVE_MOTOR_ID_MASK) as u8;

    let mut response = MotorResponse {
        motor_id,
        opcode,
        state: None,
        faults: None,
    };

    match opcode {
        Opcode::Control => match unpack(data) {
            Ok(state) => response.state = Some(state),
            Err(e) => warn!("Motor with id: {} control reply dropped: {}", motor_id, e),
        },
        Opcode::Disable => info!("Motor with id: {} disable success", motor_id),
        Opcode::Enable => info!("Motor with id: {} enable success", motor_id),
        Opcode::SetHome => info!("Motor with id: {} set zero point success", motor_id),
        Opcode::ErrorReset => info!("Motor with id: {} clear error success", motor_id),
        Opcode::GetStatusWord => {
            if data.len() >= 2 {
                let word = ((data[0] as u16) << 8) | data[1] as u16;
                response.faults = Some(MotorFaults::from_word(word));
            } else {
                warn!(
                    "Motor with id: {} status word: invalid data length {}",
                    motor_id,
                    data.len()
                );
            }
        }
        Opcode::Other(code) => {
            warn!("Received a frame with unknown opcode {} (id 0x{:X})", code, frame_id)
        }
    }

    response
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn command() -> impl Strategy<Value = MotorCommand> {
        (
            -40.0f64..=40.0,
            -40.0f64..=40.0,
            -40.0f64..=40.0,
            0.0f64..=1023.0,
            0.0f64..=51.0,
        )
            .prop_map(|(position, velocity, torque, kp, kd)| MotorCommand {
                position,
                velocity,
                torque,
                kp,
                kd,
            })
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(500))]

        #[test]
        fn prop_kp_low_bits_never_touch_velocity_bits(
            cmd in command(),
            kp_low in 0u32..4,
        ) {
            let base = pack(&cmd);
            let kp_raw = quantize(cmd.kp, ranges::SEND_KP);
            let kp = ((kp_raw & !0x03) | kp_low) as f64 * ranges::SEND_KP.resolution();
            let alt = pack(&MotorCommand { kp, ..cmd });
            prop_assert_eq!(base[3] & 0x3F, alt[3] & 0x3F);
        }

        #[test]
        fn prop_control_frame_always_eight_bytes(cmd in command(), motor_id in 0u8..32) {
            let frame = build_frame(Opcode::Control, motor_id, Some(&cmd)).unwrap();
            prop_assert_eq!(frame.dlc, 8);
            prop_assert_eq!(frame.payload().len(), 8);
            prop_assert_eq!(frame.id >> CAN_ID_SHIFT_BITS, 4);
            prop_assert_eq!(frame.id & SEND_MOTOR_ID_MASK, motor_id as u32);
        }

        #[test]
        fn prop_parse_never_panics(frame_id in 0u32..0x800, data in prop::collection::vec(any::<u8>(), 0..=8)) {
            let response = parse_frame(frame_id, &data);
            prop_assert!(response.motor_id <= 0x0F);
            if response.state.is_some() {
                prop_assert_eq!(data.len(), 8);
            }
        }

        #[test]
        fn prop_unpack_stays_in_range(data in any::<[u8; 8]>()) {
            let state = unpack(&data).unwrap();
            prop_assert!(state.position >= -40.0 && state.position <= 40.0 + 1e-9);
            prop_assert!(state.velocity >= -40.0 && state.velocity <= 40.0 + 1e-9);
            prop_assert!(state.torque >= -40.0 && state.torque <= 40.0 + 1e-9);
            prop_assert!(state.temperature >= -20.0 && state.temperature <= 200.0 + 1e-9);
        }
    }
}
