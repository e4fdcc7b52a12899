//! Backend configuration: target device and code-generation options.

use serde::{Deserialize, Serialize};

/// Optimization profile, mapped to an LLVM optimization level when the
/// `llvm` feature is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizationLevel {
    /// Maximum throughput (-O3).
    Throughput,
    /// Small code (-O1).
    MinimalSize,
    /// -O2.
    #[default]
    Balanced,
    /// No optimization (-O0).
    Debug,
}

/// The device code is generated for.
///
/// An empty `triple` means the host; the LLVM backend substitutes the
/// host triple and layout when writing objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetDevice {
    pub device_name: String,
    pub triple: String,
    pub data_layout: String,
    pub cpu: String,
    pub features: String,
}

impl Default for TargetDevice {
    fn default() -> Self {
        Self::host()
    }
}

const ARM32_LAYOUT: &str = "e-m:e-p:32:32-Fi8-i64:64-v128:64:128-a:0:32-n32-S64";
const AARCH64_LAYOUT: &str = "e-m:e-i8:8:32-i16:16:32-i64:64-i128:128-n32:64-S128";

impl TargetDevice {
    pub fn host() -> Self {
        Self {
            device_name: "host".into(),
            triple: String::new(),
            data_layout: String::new(),
            cpu: "generic".into(),
            features: String::new(),
        }
    }

    /// Raspberry Pi 3 running a 32-bit OS.
    pub fn pi3() -> Self {
        Self {
            device_name: "pi3".into(),
            triple: "armv7-linux-gnueabihf".into(),
            data_layout: ARM32_LAYOUT.into(),
            cpu: "cortex-a53".into(),
            features: "+neon".into(),
        }
    }

    pub fn aarch64() -> Self {
        Self {
            device_name: "aarch64".into(),
            triple: "aarch64-unknown-linux-gnu".into(),
            data_layout: AARCH64_LAYOUT.into(),
            cpu: "cortex-a53".into(),
            features: String::new(),
        }
    }

    pub fn cortex_m4() -> Self {
        Self {
            device_name: "cortex-m4".into(),
            triple: "thumbv7em-arm-none-eabi".into(),
            data_layout: ARM32_LAYOUT.into(),
            cpu: "cortex-m4".into(),
            features: "+armv7e-m,+dsp,+fp-armv8d16sp".into(),
        }
    }

    /// Look up a preset by device name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "host" => Some(Self::host()),
            "pi3" => Some(Self::pi3()),
            "pi3_64" | "aarch64" => Some(Self::aarch64()),
            "cortex-m4" => Some(Self::cortex_m4()),
            _ => None,
        }
    }

    /// Every preset, in the order `from_name` documents them.
    pub fn presets() -> Vec<Self> {
        vec![Self::host(), Self::pi3(), Self::aarch64(), Self::cortex_m4()]
    }

    pub fn is_host(&self) -> bool {
        self.triple.is_empty()
    }
}

/// Options that apply to every function generated for a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerSettings {
    pub target_device: TargetDevice,
    pub optimize: bool,
    /// Emit comments and run-time prints that identify each node.
    pub include_diagnostic_info: bool,
    pub opt_level: OptimizationLevel,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            target_device: TargetDevice::host(),
            optimize: true,
            include_diagnostic_info: false,
            opt_level: OptimizationLevel::default(),
        }
    }
}

impl CompilerSettings {
    /// The effective level; `Debug` when optimization is switched off.
    pub fn effective_opt_level(&self) -> OptimizationLevel {
        if self.optimize {
            self.opt_level
        } else {
            OptimizationLevel::Debug
        }
    }
}
