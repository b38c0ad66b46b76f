// CAN interface setup and detection utilities

use anyhow::{Context, Result};
use std::process::Command;
use tracing::{debug, error, info, warn};

/// CAN interface information
#[derive(Debug, Clone, PartialEq)]
pub struct CanInterface {
    pub name: String,
    pub is_up: bool,
    pub interface_type: InterfaceType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InterfaceType {
    Hardware, // Hardware CAN (can0, can1)
    Virtual,  // Virtual CAN (vcan0, vcan1)
    Slcan,    // Serial line CAN (slcan0, slcan1)
}

/// Extract CAN interfaces from `ip link show` output
///
/// Format: "3: can0: <NOARP,UP,LOWER_UP> mtu 16 qdisc pfifo_fast state UP"
pub fn parse_ip_link_output(output: &str) -> Vec<CanInterface> {
    let mut interfaces = Vec::new();

    for line in output.lines() {
        // Interface definitions start with "<index>:"; continuation lines are indented
        if line.starts_with(char::is_whitespace) {
            continue;
        }
        let Some(colon_pos) = line.find(':') else {
            continue;
        };
        let after_number = &line[colon_pos + 1..];
        let Some(second_colon) = after_number.find(':') else {
            continue;
        };
        let name = after_number[..second_colon].trim();

        let interface_type = if name.starts_with("vcan") {
            InterfaceType::Virtual
        } else if name.starts_with("slcan") {
            InterfaceType::Slcan
        } else if name.starts_with("can") {
            InterfaceType::Hardware
        } else {
            continue;
        };

        let is_up = after_number
            .find('<')
            .and_then(|start| {
                let flags = &after_number[start + 1..];
                flags.find('>').map(|end| &flags[..end])
            })
            .is_some_and(|flags| flags.split(',').any(|f| f == "UP"));

        debug!("Found CAN interface: {} (UP: {})", name, is_up);
        interfaces.push(CanInterface {
            name: name.to_string(),
            is_up,
            interface_type,
        });
    }

    interfaces
}

/// Detect available CAN interfaces on the system
///
/// Uses `ip link show` to list all network interfaces and filters for CAN types
pub fn detect_can_interfaces() -> Result<Vec<CanInterface>> {
    let output = Command::new("ip")
        .args(["link", "show"])
        .output()
        .context("Failed to execute 'ip link show'")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "ip link show failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    let interfaces = parse_ip_link_output(&String::from_utf8_lossy(&output.stdout));
    info!("Detected {} CAN interfaces", interfaces.len());
    Ok(interfaces)
}

/// Arguments for `ip` that set the bitrate of a CAN interface
pub fn bitrate_args(interface_name: &str, bitrate: u32) -> Vec<String> {
    vec![
        "link".to_string(),
        "set".to_string(),
        interface_name.to_string(),
        "type".to_string(),
        "can".to_string(),
        "bitrate".to_string(),
        bitrate.to_string(),
    ]
}

/// `ip` invocation, optionally through `sudo`
pub fn ip_command(args: &[String], use_sudo: bool) -> Command {
    let mut command = if use_sudo {
        let mut command = Command::new("sudo");
        command.arg("ip");
        command
    } else {
        Command::new("ip")
    };
    command.args(args);
    command
}

fn run_ip(args: &[String], use_sudo: bool) -> Result<()> {
    let output = ip_command(args, use_sudo)
        .output()
        .with_context(|| format!("Failed to execute 'ip {}'", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("ip {} failed: {}", args.join(" "), stderr);
        return Err(anyhow::anyhow!("ip {} failed: {}", args.join(" "), stderr));
    }
    Ok(())
}

/// Configure a hardware CAN interface and bring it up
///
/// # Arguments
/// * `interface_name` - CAN interface name (e.g., "can0")
/// * `bitrate` - CAN bitrate (1000000 for 1 Mbps)
/// * `use_sudo` - Run `ip` through `sudo`
///
/// This function:
/// 1. Brings the interface down (the bitrate cannot change while it is up)
/// 2. Sets the bitrate
/// 3. Brings the interface up
pub fn configure_interface(interface_name: &str, bitrate: u32, use_sudo: bool) -> Result<()> {
    info!(
        "Configuring CAN interface {} at {} bps",
        interface_name, bitrate
    );

    bring_down_interface(interface_name, use_sudo)?;
    run_ip(&bitrate_args(interface_name, bitrate), use_sudo)
        .with_context(|| format!("Failed to set bitrate on {}", interface_name))?;
    bring_up_interface(interface_name, use_sudo)?;

    info!("CAN interface {} is ready", interface_name);
    Ok(())
}

/// Bring up a CAN interface
///
/// # Arguments
/// * `interface_name` - CAN interface name (e.g., "can0")
pub fn bring_up_interface(interface_name: &str, use_sudo: bool) -> Result<()> {
    info!("Bringing up interface {}", interface_name);

    run_ip(
        &[
            "link".to_string(),
            "set".to_string(),
            interface_name.to_string(),
            "up".to_string(),
        ],
        use_sudo,
    )
    .context("Failed to bring up interface")?;

    info!("Interface {} is now UP", interface_name);
    Ok(())
}

/// Bring down a CAN interface
///
/// A failure is only logged: the interface may already be down.
pub fn bring_down_interface(interface_name: &str, use_sudo: bool) -> Result<()> {
    info!("Bringing down interface {}", interface_name);

    if let Err(e) = run_ip(
        &[
            "link".to_string(),
            "set".to_string(),
            interface_name.to_string(),
            "down".to_string(),
        ],
        use_sudo,
    ) {
        warn!("Failed to bring down interface: {:#}", e);
    }

    Ok(())
}

/// Check if an interface is up
pub fn is_interface_up(interface_name: &str) -> Result<bool> {
    let interfaces = detect_can_interfaces()?;
    Ok(interfaces
        .iter()
        .find(|i| i.name == interface_name)
        .map(|i| i.is_up)
        .unwrap_or(false))
}
