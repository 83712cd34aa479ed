//! Output plan
//!
//! Decides, from the merged parameters alone, which output channels a run
//! must provide. The executable is never consulted: whether it actually
//! opens a planned channel is only known once it has run.

use crate::error::{CambError, Result};
use crate::types::ParameterSet;

/// Every parameter key that names an output file
///
/// These are stripped from caller input. Keys that end up outside the plan
/// are sent blank so the executable writes nothing to disk for them.
pub const RESERVED_OUTPUT_KEYS: [&str; 9] = [
    "scalar_output_file",
    "vector_output_file",
    "tensor_output_file",
    "total_output_file",
    "lensed_output_file",
    "lens_potential_output_file",
    "lensed_total_output_file",
    "transfer_filename(1)",
    "transfer_matterpower(1)",
];

/// Switch key and the channels it adds, in plan order
const SWITCHES: [(&str, &[(&str, &str)]); 5] = [
    ("get_scalar_cls", &[("scalar_output_file", "scalar")]),
    ("get_vector_cls", &[("vector_output_file", "vector")]),
    ("get_tensor_cls", &[("tensor_output_file", "tensor")]),
    // The legacy wrapper listed the lensed output twice; one pipe is drained once
    ("do_lensing", &[("lensed_output_file", "lensed")]),
    (
        "get_transfer",
        &[
            ("transfer_filename(1)", "transfer"),
            ("transfer_matterpower(1)", "transfer_matterpower"),
        ],
    ),
];

/// One planned output channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChannel {
    /// Parameter key the channel path is injected under
    pub param_key: &'static str,
    /// Name of the result table
    pub result_name: &'static str,
}

/// Ordered list of channels a run will provide
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputPlan {
    channels: Vec<PlannedChannel>,
}

impl OutputPlan {
    /// Compute the plan for `params`
    ///
    /// Fails with a config error if any switch key is missing.
    pub fn plan(params: &ParameterSet, truthy: &str) -> Result<Self> {
        let mut channels = Vec::new();

        for (switch, outputs) in SWITCHES {
            let value = params.get(switch).ok_or_else(|| {
                CambError::Config(format!("missing output switch {}", switch))
            })?;
            if value.trim() != truthy {
                continue;
            }
            channels.extend(outputs.iter().map(|&(param_key, result_name)| PlannedChannel {
                param_key,
                result_name,
            }));
        }

        tracing::debug!(
            "Planned outputs: {:?}",
            channels.iter().map(|c| c.result_name).collect::<Vec<_>>()
        );
        Ok(Self { channels })
    }

    pub fn channels(&self) -> &[PlannedChannel] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Result names in plan order
    pub fn result_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.channels.iter().map(|c| c.result_name)
    }

    /// Whether `param_key` is one of the planned channels
    pub fn covers(&self, param_key: &str) -> bool {
        self.channels.iter().any(|c| c.param_key == param_key)
    }
}

/// Switch keys, in plan order
pub fn switch_keys() -> impl Iterator<Item = &'static str> {
    SWITCHES.iter().map(|(switch, _)| *switch)
}
