//! Single request/response exchanges with one motor.

use anyhow::Result;
use tracing::{debug, warn};

use crate::can::{
    build_frame, parse_frame, FrameTransport, MotorCommand, MotorFaults, MotorResponse, Opcode,
    RECEIVE_MOTOR_ID_MASK,
};

/// A motor address paired with the transport it is reached through
///
/// Holds no state between exchanges.
pub struct Motor<'a, T: FrameTransport> {
    transport: &'a mut T,
    id: u8,
    receive_timeout_ms: u32,
}

impl<'a, T: FrameTransport> Motor<'a, T> {
    pub fn new(transport: &'a mut T, id: u8, receive_timeout_ms: u32) -> Self {
        Self {
            transport,
            id,
            receive_timeout_ms,
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// Send one frame and wait for one reply
    ///
    /// # Returns
    /// * `Ok(Some(response))` if a reply arrived within the timeout
    /// * `Ok(None)` on timeout
    /// * `Err` if the frame could not be built or the transport failed
    pub async fn exchange(
        &mut self,
        opcode: Opcode,
        cmd: Option<&MotorCommand>,
    ) -> Result<Option<MotorResponse>> {
        let frame = build_frame(opcode, self.id, cmd)?;
        self.transport.send(frame.id, frame.dlc, &frame.data).await?;

        let Some((frame_id, data)) = self.transport.receive(self.receive_timeout_ms).await? else {
            warn!("Motor with id {} receive timeout", self.id);
            return Ok(None);
        };

        let response = parse_frame(frame_id, &data);
        if response.motor_id as u32 != self.id as u32 & RECEIVE_MOTOR_ID_MASK {
            warn!(
                "Motor with id {} got a reply from motor {}",
                self.id, response.motor_id
            );
        }
        debug!("Motor with id {} reply: {:?}", self.id, response);
        Ok(Some(response))
    }

    pub async fn enable(&mut self) -> Result<Option<MotorResponse>> {
        self.exchange(Opcode::Enable, None).await
    }

    pub async fn disable(&mut self) -> Result<Option<MotorResponse>> {
        self.exchange(Opcode::Disable, None).await
    }

    pub async fn control(&mut self, cmd: &MotorCommand) -> Result<Option<MotorResponse>> {
        self.exchange(Opcode::Control, Some(cmd)).await
    }

    /// Make the current position the zero point
    pub async fn set_home(&mut self) -> Result<Option<MotorResponse>> {
        self.exchange(Opcode::SetHome, None).await
    }

    /// Clear latched faults
    pub async fn reset_errors(&mut self) -> Result<Option<MotorResponse>> {
        self.exchange(Opcode::ErrorReset, None).await
    }

    /// Read the fault status word; `None` on timeout or an unexpected reply
    pub async fn status_word(&mut self) -> Result<Option<MotorFaults>> {
        Ok(self
            .exchange(Opcode::GetStatusWord, None)
            .await?
            .and_then(|response| response.faults))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::mock::MockTransport;
    use crate::can::frame_id;
    use crate::error::CodecError;

    #[tokio::test]
    async fn test_control_exchange() {
        let reply = vec![140, 36, 120, 135, 129, 243, 127, 66];
        let mut bus = MockTransport::with_replies([(144, reply)]);
        let cmd = MotorCommand {
            position: 5.0,
            kp: 5.0,
            ..Default::default()
        };

        let response = Motor::new(&mut bus, 0, 3)
            .control(&cmd)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(response.opcode, Opcode::Control);
        assert!(response.state.is_some());
        assert_eq!(bus.sent, vec![(128, vec![255, 143, 255, 95, 1, 0, 255, 127])]);
    }

    #[tokio::test]
    async fn test_enable_sends_empty_frame() {
        let mut bus = MockTransport::with_replies([(frame_id(Opcode::Enable, 0x13), vec![0])]);
        let response = Motor::new(&mut bus, 3, 3).enable().await.unwrap().unwrap();
        assert_eq!(response.opcode, Opcode::Enable);
        assert_eq!(response.motor_id, 3);
        assert_eq!(bus.sent, vec![((2 << 5) | 3, vec![])]);
    }

    #[tokio::test]
    async fn test_timeout_is_none() {
        let mut bus = MockTransport::default();
        let response = Motor::new(&mut bus, 1, 3).disable().await.unwrap();
        assert!(response.is_none());
        assert_eq!(bus.sent.len(), 1);
    }

    #[tokio::test]
    async fn test_status_word() {
        let mut bus = MockTransport::with_replies([(
            frame_id(Opcode::GetStatusWord, 0x11),
            vec![0x00, 0x04],
        )]);
        let faults = Motor::new(&mut bus, 1, 3).status_word().await.unwrap().unwrap();
        assert!(faults.over_current);
        assert!(!faults.is_ok());
    }

    #[tokio::test]
    async fn test_status_word_ignores_other_replies() {
        let mut bus = MockTransport::with_replies([(frame_id(Opcode::Control, 1), vec![0u8; 8])]);
        assert_eq!(Motor::new(&mut bus, 1, 3).status_word().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_motor_id_not_sent() {
        let mut bus = MockTransport::default();
        let err = Motor::new(&mut bus, 40, 3).enable().await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<CodecError>(),
            Some(&CodecError::MotorIdOutOfRange(40))
        );
        assert!(bus.sent.is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let mut bus = MockTransport {
            fail_sends: true,
            ..Default::default()
        };
        assert!(Motor::new(&mut bus, 1, 3).set_home().await.is_err());
    }
}
