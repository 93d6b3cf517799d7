use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, HostId};

fn get_host_from_id(host_id: HostId) -> Result<Host> {
    cpal::host_from_id(host_id).map_err(|e| anyhow::anyhow!("Failed to get audio host: {}", e))
}

/// The saved host if it is still available, otherwise the platform default.
pub fn select_host(saved_host_name: Option<&str>) -> HostId {
    let default_id = cpal::default_host().id();
    let Some(name) = saved_host_name else {
        return default_id;
    };
    match cpal::available_hosts().into_iter().find(|id| id.name() == name) {
        Some(id) => id,
        None => {
            log::warn!("Audio host '{}' not available, using {}", name, default_id.name());
            default_id
        }
    }
}

pub fn get_input_devices(host_id: HostId) -> Result<Vec<(String, Device)>> {
    let host = get_host_from_id(host_id)?;
    let devices = host.input_devices()?;
    let mut result = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            result.push((name, device));
        }
    }
    Ok(result)
}

pub fn get_output_devices(host_id: HostId) -> Result<Vec<(String, Device)>> {
    let host = get_host_from_id(host_id)?;
    let devices = host.output_devices()?;
    let mut result = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            result.push((name, device));
        }
    }
    Ok(result)
}

/// Human-readable device listing for the console.
pub fn describe_devices(host_id: HostId) -> Result<String> {
    let mut text = format!("Host: {}\n", host_id.name());
    text.push_str("Inputs:\n");
    for (name, _) in get_input_devices(host_id)? {
        text.push_str(&format!("  {}\n", name));
    }
    text.push_str("Outputs:\n");
    for (name, _) in get_output_devices(host_id)? {
        text.push_str(&format!("  {}\n", name));
    }
    Ok(text)
}
