use std::future::Future;

use anyhow::Result;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::can::FrameTransport;
use crate::config::ControllerConfig;
use crate::motor::Motor;

/// Drive every configured motor until `shutdown` resolves
///
/// Enables each motor, sends the configured command to each one every control
/// period and polls each status word every status period. All motors are
/// disabled on the way out, including when enabling fails.
pub async fn run_control_loop<T: FrameTransport>(
    transport: &mut T,
    config: &ControllerConfig,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    info!("Started control of motors {:?}", config.motor_ids);

    let result = drive(transport, config, shutdown).await;
    if let Err(e) = &result {
        error!("Control loop failed: {:#}", e);
    }

    for &id in &config.motor_ids {
        if let Err(e) = Motor::new(transport, id, config.receive_timeout_ms)
            .disable()
            .await
        {
            error!("Motor with id {} disable failed: {:#}", id, e);
        }
    }

    info!("Ended control of motors {:?}", config.motor_ids);
    result
}

async fn drive<T: FrameTransport>(
    transport: &mut T,
    config: &ControllerConfig,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    for &id in &config.motor_ids {
        Motor::new(transport, id, config.receive_timeout_ms)
            .enable()
            .await?;
    }

    let mut control = interval(Duration::from_micros(config.control_period_us));
    control.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut status = interval(Duration::from_millis(config.status_period_ms));
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                return Ok(());
            }
            _ = control.tick() => {
                for &id in &config.motor_ids {
                    let mut motor = Motor::new(transport, id, config.receive_timeout_ms);
                    match motor.control(&config.command).await {
                        Ok(Some(response)) => {
                            if let Some(state) = response.state {
                                debug!(
                                    "Motor {}: pos={:.4} vel={:.4} torque={:.4} temp={:.1} flag={}",
                                    id, state.position, state.velocity, state.torque,
                                    state.temperature, state.fault
                                );
                            }
                        }
                        Ok(None) => {}
                        Err(e) => error!("Motor with id {} control failed: {:#}", id, e),
                    }
                }
            }
            _ = status.tick() => {
                for &id in &config.motor_ids {
                    let mut motor = Motor::new(transport, id, config.receive_timeout_ms);
                    match motor.status_word().await {
                        Ok(Some(faults)) => {
                            for fault in faults.active() {
                                error!("Motor with id: {} {}", id, fault);
                            }
                        }
                        Ok(None) => warn!("Motor with id {} status word unavailable", id),
                        Err(e) => error!("Motor with id {} status check failed: {:#}", id, e),
                    }
                }
            }
        }
    }
}
