//! `tessel target`: device listing and description.

use anyhow::{bail, Result};
use tessel_emit::TargetDevice;

/// List all built-in target devices.
pub fn list() -> Result<()> {
    println!("Built-in targets:");
    println!();
    for device in TargetDevice::presets() {
        let triple = if device.is_host() { "(host)" } else { device.triple.as_str() };
        println!("  {:<12} {triple}", device.device_name);
    }
    println!();
    println!("Use 'tessel target describe <name>' for details.");
    Ok(())
}

/// Describe one target device.
pub fn describe(name: &str) -> Result<()> {
    let Some(device) = TargetDevice::from_name(name) else {
        bail!("unknown target: '{name}'. Use 'tessel target list' to see available targets.");
    };
    println!("=== Target: {} ===", device.device_name);
    println!("  Triple:      {}", if device.is_host() { "(host)" } else { &device.triple });
    println!("  Data layout: {}", if device.data_layout.is_empty() { "(host)" } else { &device.data_layout });
    println!("  CPU:         {}", device.cpu);
    if !device.features.is_empty() {
        println!("  Features:    {}", device.features);
    }
    Ok(())
}
