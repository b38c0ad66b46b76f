use anyhow::{Context, Result};
use futures::StreamExt;
use std::future::Future;
use std::io;
use tokio::time::{sleep, timeout, Duration};
use tokio_socketcan::{CANFrame, CANSocket};
use tracing::{debug, info, warn};

use super::protocol::Payload;
use super::transport::FrameTransport;
use crate::config::ControllerConfig;

/// Linux errno for a full socket transmit queue
const ENOBUFS: i32 = 105;

/// Send retry policy
#[derive(Debug, Clone, Copy)]
pub struct BusOptions {
    /// Attempts per frame while the transmit queue reports no buffer space
    pub send_attempts: u32,
    /// Wait between attempts
    pub retry_backoff: Duration,
}

impl From<&ControllerConfig> for BusOptions {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            send_attempts: config.send_attempts.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Open SocketCAN interface
///
/// The socket is opened on construction and closed when the value is dropped.
pub struct CanBus {
    socket: CANSocket,
    interface_name: String,
    options: BusOptions,
}

impl CanBus {
    /// Open a CAN interface
    ///
    /// # Arguments
    /// * `interface` - CAN interface name (e.g., "can0", "vcan0")
    pub fn open(interface: &str, options: BusOptions) -> Result<Self> {
        info!("Connecting to CAN interface: {}", interface);

        let socket = CANSocket::open(interface)
            .with_context(|| format!("Failed to open CAN interface: {}", interface))?;

        info!("Successfully connected to {}", interface);
        Ok(Self {
            socket,
            interface_name: interface.to_string(),
            options,
        })
    }

    /// Get current interface name
    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

}

/// Queue one frame; socket errors keep their OS errno
async fn write_once(socket: &CANSocket, frame: CANFrame) -> io::Result<()> {
    match socket.write_frame(frame) {
        Ok(write) => write.await,
        Err(tokio_socketcan::Error::IO(e)) => Err(e),
        Err(e) => Err(io::Error::other(e)),
    }
}

fn is_no_buffer_space(e: &io::Error) -> bool {
    e.raw_os_error() == Some(ENOBUFS)
}

/// Run `write` until it succeeds, retrying only while the transmit queue is full
///
/// At most `options.send_attempts` attempts are made, `options.retry_backoff`
/// apart. Any other error is returned immediately.
async fn send_with_retry<F, Fut>(options: BusOptions, frame_id: u32, mut write: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    let mut attempt = 1;
    loop {
        match write().await {
            Ok(()) => return Ok(()),
            Err(e) if is_no_buffer_space(&e) && attempt < options.send_attempts => {
                warn!(
                    "CAN buffer is full (attempt {}/{}), waiting...",
                    attempt, options.send_attempts
                );
                attempt += 1;
                sleep(options.retry_backoff).await;
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to send CAN frame with ID 0x{:X}", frame_id))
            }
        }
    }
}

impl FrameTransport for CanBus {
    async fn send(&mut self, frame_id: u32, dlc: u8, data: &Payload) -> Result<()> {
        let payload = &data[..(dlc as usize).min(data.len())];
        debug!(
            "Sending CAN frame: ID=0x{:X}, dlc={}, data={:?}",
            frame_id, dlc, payload
        );

        let frame = CANFrame::new(frame_id, payload, false, false)
            .with_context(|| format!("Failed to create CAN frame with ID 0x{:X}", frame_id))?;
        let socket = &self.socket;

        send_with_retry(self.options, frame_id, move || write_once(socket, frame.clone())).await
    }

    async fn receive(&mut self, timeout_ms: u32) -> Result<Option<(u32, Vec<u8>)>> {
        match timeout(Duration::from_millis(u64::from(timeout_ms)), self.socket.next()).await {
            Ok(Some(Ok(frame))) => {
                debug!(
                    "Received CAN frame: ID=0x{:X}, data={:?}",
                    frame.id(),
                    frame.data()
                );
                Ok(Some((frame.id(), frame.data().to_vec())))
            }
            Ok(Some(Err(e))) => Err(anyhow::anyhow!("CAN receive error: {}", e)),
            Ok(None) => Err(anyhow::anyhow!("CAN socket closed")),
            Err(_) => Ok(None), // Timeout
        }
    }
}

impl Drop for CanBus {
    fn drop(&mut self) {
        info!("CAN interface '{}' shut down", self.interface_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_buffer_space_detection() {
        assert!(is_no_buffer_space(&io::Error::from_raw_os_error(ENOBUFS)));
        assert!(!is_no_buffer_space(&io::Error::from(io::ErrorKind::TimedOut)));
    }

    #[test]
    fn test_options_from_config() {
        let config = ControllerConfig {
            send_attempts: 0,
            retry_backoff_ms: 20,
            ..Default::default()
        };
        let options = BusOptions::from(&config);
        assert_eq!(options.send_attempts, 1);
        assert_eq!(options.retry_backoff, Duration::from_millis(20));
    }

    fn options(send_attempts: u32) -> BusOptions {
        BusOptions {
            send_attempts,
            retry_backoff: Duration::from_millis(100),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_buffer_retried_until_attempts_run_out() {
        let mut calls = 0;
        let result = send_with_retry(options(4), 0x81, || {
            calls += 1;
            async { Err(io::Error::from_raw_os_error(ENOBUFS)) }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(calls, 4);
        assert_eq!(
            err.downcast_ref::<io::Error>().and_then(io::Error::raw_os_error),
            Some(ENOBUFS)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_send_error_not_retried() {
        let mut calls = 0;
        let result = send_with_retry(options(4), 0x81, || {
            calls += 1;
            async { Err(io::Error::from(io::ErrorKind::BrokenPipe)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_succeeds_after_full_buffer() {
        let mut calls = 0;
        let start = tokio::time::Instant::now();
        let result = send_with_retry(options(4), 0x81, || {
            calls += 1;
            let outcome = if calls == 1 {
                Err(io::Error::from_raw_os_error(ENOBUFS))
            } else {
                Ok(())
            };
            async move { outcome }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls, 2);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_open_missing_interface_fails() {
        let result = CanBus::open("nocan-test0", BusOptions::from(&ControllerConfig::default()));
        assert!(result.is_err());
    }
}
