//! Compiler parameters from a TOML file and command-line overrides.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tessel_compile::MapCompilerParameters;
use tessel_emit::TargetDevice;
use tessel_model::Map;

use crate::CompileArgs;

/// Read parameters from `path`, or use the defaults.
pub fn load_parameters(path: Option<&Path>) -> Result<MapCompilerParameters> {
    let Some(path) = path else {
        return Ok(MapCompilerParameters::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    MapCompilerParameters::from_toml(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Flag values win over the config file.
pub fn apply_overrides(parameters: &mut MapCompilerParameters, args: &CompileArgs) -> Result<()> {
    if let Some(name) = &args.module_name {
        parameters.module_name = name.clone();
    }
    if let Some(name) = &args.function_name {
        parameters.map_function_name = name.clone();
    }
    if args.profile {
        parameters.profile = true;
    }
    if args.diagnostics {
        parameters.compiler_settings.include_diagnostic_info = true;
    }
    if let Some(target) = &args.target {
        parameters.compiler_settings.target_device = TargetDevice::from_name(target).ok_or_else(|| {
            anyhow!("unknown target: '{target}'. Use 'tessel target list' to see available targets.")
        })?;
    }
    Ok(())
}

pub fn resolve_parameters(args: &CompileArgs) -> Result<MapCompilerParameters> {
    let mut parameters = load_parameters(args.config.as_deref())?;
    apply_overrides(&mut parameters, args)?;
    log::debug!(
        "module {} (predict function {}, target {})",
        parameters.module_name,
        parameters.map_function_name,
        parameters.compiler_settings.target_device.device_name
    );
    Ok(parameters)
}

pub fn load_map(path: &Path) -> Result<Map> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Map::from_json(&text).with_context(|| format!("parsing {}", path.display()))
}
