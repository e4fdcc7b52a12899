//! Map compiler configuration.

use serde::{Deserialize, Serialize};
use tessel_emit::CompilerSettings;
use tessel_model::DEFAULT_MAX_REFINEMENT_ITERATIONS;

use crate::error::CompileError;

/// Driver-level options for one compile.
///
/// Every field has a default, so a TOML file only needs the fields it
/// overrides:
///
/// ```toml
/// module_name = "darknet"
/// profile = true
///
/// [compiler_settings.target_device]
/// device_name = "pi3"
/// triple = "armv7-linux-gnueabihf"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapCompilerParameters {
    /// Module name, also the prefix of every generated API function.
    pub module_name: String,
    /// Name of the generated predict function.
    pub map_function_name: String,
    /// Instrument the module with performance counters.
    pub profile: bool,
    pub max_refinement_iterations: usize,
    /// Tag the predict function for the generated header. Only predict is
    /// affected; the `<prefix>_Get*` API functions and the profiling
    /// functions are always in the header.
    pub include_in_header: bool,
    pub compiler_settings: CompilerSettings,
}

impl Default for MapCompilerParameters {
    fn default() -> Self {
        Self {
            module_name: "tessel_module".into(),
            map_function_name: "predict".into(),
            profile: false,
            max_refinement_iterations: DEFAULT_MAX_REFINEMENT_ITERATIONS,
            include_in_header: true,
            compiler_settings: CompilerSettings::default(),
        }
    }
}

impl MapCompilerParameters {
    pub fn from_toml(text: &str) -> Result<Self, CompileError> {
        Ok(toml::from_str(text)?)
    }

    /// The prefix of generated API functions.
    pub fn namespace_prefix(&self) -> &str {
        &self.module_name
    }
}
