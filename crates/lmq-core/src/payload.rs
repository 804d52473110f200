//! Strongly typed quantization configuration payloads.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::Algorithm;

/// HQQ uniform quantization parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HqqParams {
    /// Weight bit width.
    pub nbits: u32,
    /// Number of weights sharing one scale/zero pair.
    pub group_size: u32,
}

impl HqqParams {
    /// Effective bits per parameter including 8-bit scale/zero with group size 128.
    pub fn bits_per_parameter(&self) -> f64 {
        let b1 = f64::from(self.nbits);
        let g1 = f64::from(self.group_size);
        b1 + 2.0 * 8.0 / g1 + 32.0 / g1 / 128.0
    }
}

/// Mixed-precision HQQ parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MxqParams {
    /// Average bit budget per parameter.
    pub budget: f64,
    /// Whether scales are themselves quantized.
    #[serde(default)]
    pub quant_scale: bool,
    /// Per-model sensitivity table, injected by the executor before quantization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quant_metrics_file: Option<PathBuf>,
}

/// GPTQ parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GptqParams {
    /// Weight bit width.
    pub bits: u32,
    /// Group size.
    pub group_size: u32,
    /// Hessian dampening percentage.
    pub damp_percent: f64,
    /// Activation order quantization.
    #[serde(default)]
    pub desc_act: bool,
}

/// AWQ parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwqParams {
    /// Weight bit width.
    pub w_bit: u32,
    /// Group size.
    pub q_group_size: u32,
    /// Asymmetric quantization with zero points.
    #[serde(default)]
    pub zero_point: bool,
    /// Kernel layout, e.g. `GEMM`.
    pub version: String,
}

/// Algorithm specific configuration payload.
///
/// The orchestrator never interprets the fields; it only threads the payload through
/// to the collaborators and records it in the metric file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algo", rename_all = "lowercase")]
pub enum QuantConfig {
    /// FP16 baseline, no parameters.
    Fp16,
    /// HQQ payload.
    Hqq(HqqParams),
    /// Mixed-precision HQQ payload.
    Mxq(MxqParams),
    /// GPTQ payload.
    Gptq(GptqParams),
    /// AWQ payload.
    Awq(AwqParams),
}

impl QuantConfig {
    /// Algorithm this payload belongs to.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            QuantConfig::Fp16 => Algorithm::Fp16,
            QuantConfig::Hqq(_) => Algorithm::Hqq,
            QuantConfig::Mxq(_) => Algorithm::Mxq,
            QuantConfig::Gptq(_) => Algorithm::Gptq,
            QuantConfig::Awq(_) => Algorithm::Awq,
        }
    }

    /// Whether the payload needs a precomputed per-model metadata file.
    pub fn requires_metadata(&self) -> bool {
        matches!(self, QuantConfig::Mxq(_))
    }

    /// Returns a copy with the metadata file attached. Non-MXQ payloads are unchanged.
    pub fn with_metadata_file(&self, path: &Path) -> Self {
        match self {
            QuantConfig::Mxq(params) => QuantConfig::Mxq(MxqParams {
                quant_metrics_file: Some(path.to_path_buf()),
                ..params.clone()
            }),
            other => other.clone(),
        }
    }
}

/// A configuration payload registered under a name within its algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedConfig {
    /// Configuration name, e.g. `b4g64`.
    pub name: String,
    /// Payload handed to collaborators.
    pub payload: QuantConfig,
}

impl NamedConfig {
    /// Creates a named configuration.
    pub fn new(name: impl Into<String>, payload: QuantConfig) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}
