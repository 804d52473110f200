//! Deterministic stand-ins for the quantization and evaluation collaborators.
//!
//! Every measurement is derived from a hash of the task key, so two runs over the same
//! grid produce identical metric files. Used for dry runs, demos and tests.

use std::collections::BTreeSet;
use std::path::Path;

use lmq_core::errors::LmqError;
use lmq_core::{Algorithm, QuantConfig, TaskKey, TaskType};
use serde::Serialize;

use crate::collab::{
    Collaborators, CreateRequest, Created, EvalContext, Evaluator, ModelAdapter, ModelHandle,
    QuantizeRequest, Quantized, ResourceMonitor, TokenizerHandle,
};
use crate::fsutil::atomic_write;
use crate::hash::digest_u64;
use crate::metrics::{MemorySample, MetricRecord};
use crate::serde::to_canonical_json_bytes;

fn unit_noise(key: &TaskKey, salt: &str) -> f64 {
    let base = digest_u64(format!("{key}#{salt}").as_bytes());
    (base % 10_000) as f64 / 10_000.0
}

/// Parameter count in billions guessed from ids such as `Llama-2-13b-hf`.
fn billions_of_parameters(model_id: &str) -> f64 {
    let short = lmq_core::short_model_id(model_id);
    short
        .split(['-', '_'])
        .filter_map(|part| {
            let digits = part.strip_suffix(['b', 'B'])?;
            digits.parse::<f64>().ok()
        })
        .next()
        .unwrap_or(1.0)
}

/// Average stored bits per weight implied by a configuration.
fn nominal_bits(config: &QuantConfig) -> f64 {
    match config {
        QuantConfig::Fp16 => 16.0,
        QuantConfig::Hqq(params) => params.bits_per_parameter(),
        QuantConfig::Mxq(params) => params.budget,
        QuantConfig::Gptq(params) => params.bits as f64 + 32.0 / params.group_size.max(1) as f64,
        QuantConfig::Awq(params) => {
            params.w_bit as f64 + 32.0 / params.q_group_size.max(1) as f64
        }
    }
}

fn artifact_gib(model_id: &str, config: &QuantConfig) -> f64 {
    billions_of_parameters(model_id) * nominal_bits(config) / 8.0
}

/// Adapter that pretends to load and quantize models.
#[derive(Debug, Clone)]
pub struct SyntheticAdapter {
    algorithm: Algorithm,
    snapshots: BTreeSet<TaskKey>,
}

impl SyntheticAdapter {
    /// Adapter for `algorithm`.
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            snapshots: BTreeSet::new(),
        }
    }

    fn snapshot_key(key: &TaskKey) -> TaskKey {
        TaskKey {
            task_type: TaskType::Quant,
            ..key.clone()
        }
    }
}

impl ModelAdapter for SyntheticAdapter {
    fn has_quantize_step(&self) -> bool {
        self.algorithm != Algorithm::Fp16
    }

    fn create(&mut self, request: &CreateRequest) -> Result<Created, LmqError> {
        let already_quantized =
            request.need_quantized && self.snapshots.contains(&Self::snapshot_key(&request.key));
        let loaded = if already_quantized {
            &request.config
        } else {
            &QuantConfig::Fp16
        };
        Ok(Created {
            model: ModelHandle {
                model_id: request.key.model_id.clone(),
                location: request
                    .snapshot_dir
                    .join(request.key.algorithm.as_str())
                    .join(request.key.short_model_id()),
                quantized: already_quantized,
            },
            tokenizer: TokenizerHandle {
                model_id: request.key.model_id.clone(),
            },
            already_quantized,
            artifact_size: artifact_gib(&request.key.model_id, loaded),
        })
    }

    fn quantize(
        &mut self,
        mut model: ModelHandle,
        _tokenizer: &TokenizerHandle,
        request: &QuantizeRequest,
    ) -> Result<Quantized, LmqError> {
        let params = billions_of_parameters(&request.key.model_id);
        let duration = params * 60.0 * (1.0 + unit_noise(&request.key, "quant"));
        model.quantized = true;
        model.location = request
            .snapshot_dir
            .join(request.key.algorithm.as_str())
            .join(format!(
                "{}-{}",
                request.key.short_model_id(),
                request.key.config_name
            ));
        self.snapshots.insert(Self::snapshot_key(&request.key));
        Ok(Quantized {
            model,
            duration_seconds: duration,
            artifact_size: artifact_gib(&request.key.model_id, &request.config),
        })
    }
}

/// Evaluator producing plausible, hash-derived scores.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticEvaluator;

impl SyntheticEvaluator {
    fn degradation(config: &QuantConfig) -> f64 {
        let lost = (16.0 - nominal_bits(config)).max(0.0);
        1.0 + lost * lost / 100.0
    }
}

impl Evaluator for SyntheticEvaluator {
    fn evaluate(
        &mut self,
        ctx: &EvalContext,
        _model: &ModelHandle,
        _tokenizer: &TokenizerHandle,
        mut record: MetricRecord,
    ) -> Result<MetricRecord, LmqError> {
        let factor = Self::degradation(&ctx.config);
        let params = billions_of_parameters(&ctx.key.model_id);
        record.ppl_wikitext = (5.0 + unit_noise(&ctx.key, "wikitext")) * factor;
        record.ppl_c4 = (7.0 + unit_noise(&ctx.key, "c4")) * factor;
        record.duration_wikitext = params * 20.0 * (1.0 + unit_noise(&ctx.key, "dw"));
        record.duration_c4 = params * 45.0 * (1.0 + unit_noise(&ctx.key, "dc"));
        Ok(record)
    }

    fn evaluate_detached(
        &mut self,
        ctx: &EvalContext,
        mut record: MetricRecord,
    ) -> Result<MetricRecord, LmqError> {
        let factor = Self::degradation(&ctx.config);
        let score = |salt: &str, base: f64| base * (0.9 + 0.1 * unit_noise(&ctx.key, salt)) / factor;
        match ctx.key.task_type {
            TaskType::EvalLeaderboard => {
                record.ifeval = score("ifeval", 0.40);
                record.bbh = score("bbh", 0.35);
                record.mathlevel5 = score("math", 0.02);
                record.gpqa = score("gpqa", 0.27);
                record.musr = score("musr", 0.38);
                record.mmlupro = score("mmlupro", 0.19);
                record.duration_leaderboard = 3_600.0 * (1.0 + unit_noise(&ctx.key, "dl"));
            }
            TaskType::EvalZeroshotCls => {
                record.acc1_zeroshot_cls = score("zs1", 0.70);
                record.acc5_zeroshot_cls = score("zs5", 0.91);
                record.recall_zeroshot_cls = score("zsr", 0.69);
                record.duration_zeroshot_cls = 300.0 * (1.0 + unit_noise(&ctx.key, "dz"));
            }
            TaskType::EvalLinearProbe => {
                record.acc1_linear_probe = score("lp1", 0.80);
                record.acc5_linear_probe = score("lp5", 0.96);
                record.recall_linear_probe = score("lpr", 0.79);
                record.duration_linear_probe = 900.0 * (1.0 + unit_noise(&ctx.key, "dlp"));
            }
            TaskType::Quant | TaskType::EvalPpl | TaskType::EvalModelStorage => {}
        }
        Ok(record)
    }
}

#[derive(Debug, Clone, Serialize)]
struct TraceEvent {
    seq: u64,
    action: &'static str,
    allocated: f64,
}

/// Monitor reporting a deterministic, slowly growing memory curve.
#[derive(Debug, Clone, Default)]
pub struct SyntheticMonitor {
    seq: u64,
    tracing: bool,
    events: Vec<TraceEvent>,
}

impl SyntheticMonitor {
    fn push(&mut self, action: &'static str, allocated: f64) {
        self.seq += 1;
        if self.tracing {
            self.events.push(TraceEvent {
                seq: self.seq,
                action,
                allocated,
            });
        }
    }
}

impl ResourceMonitor for SyntheticMonitor {
    fn reset_peak(&mut self) -> Result<(), LmqError> {
        self.push("reset_peak", 0.0);
        Ok(())
    }

    fn sample(&mut self) -> Result<MemorySample, LmqError> {
        let allocated = 1.0 + 0.25 * (self.seq % 16) as f64;
        self.push("sample", allocated);
        Ok(MemorySample {
            allocated,
            reserved: allocated * 1.25,
        })
    }

    fn start_trace(&mut self) -> Result<(), LmqError> {
        self.tracing = true;
        self.events.clear();
        Ok(())
    }

    fn dump_trace(&mut self, path: &Path) -> Result<(), LmqError> {
        let bytes = to_canonical_json_bytes(&self.events)?;
        self.tracing = false;
        self.events.clear();
        atomic_write(path, &bytes)
    }

    fn release(&mut self) -> Result<(), LmqError> {
        self.push("release", 0.0);
        Ok(())
    }
}

/// Collaborator set with synthetic adapters for every algorithm.
pub fn synthetic_collaborators() -> Collaborators {
    Algorithm::ALL.iter().fold(
        Collaborators::new(
            Box::new(SyntheticEvaluator),
            Box::new(SyntheticMonitor::default()),
        ),
        |collaborators, &algorithm| {
            collaborators.with_adapter(algorithm, Box::new(SyntheticAdapter::new(algorithm)))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmq_core::HqqParams;

    #[test]
    fn parameter_count_is_read_from_model_name() {
        assert_eq!(billions_of_parameters("meta-llama/Llama-2-13b-hf"), 13.0);
        assert_eq!(billions_of_parameters("meta-llama/Meta-Llama-3-8B"), 8.0);
        assert_eq!(billions_of_parameters("org/tiny"), 1.0);
    }

    #[test]
    fn fewer_bits_mean_smaller_artifacts_and_worse_perplexity() {
        let four = QuantConfig::Hqq(HqqParams {
            nbits: 4,
            group_size: 64,
        });
        let two = QuantConfig::Hqq(HqqParams {
            nbits: 2,
            group_size: 64,
        });
        assert!(artifact_gib("org/m-7b", &two) < artifact_gib("org/m-7b", &four));
        assert!(SyntheticEvaluator::degradation(&two) > SyntheticEvaluator::degradation(&four));
        assert_eq!(SyntheticEvaluator::degradation(&QuantConfig::Fp16), 1.0);
    }

    #[test]
    fn fp16_has_no_quantize_step() {
        assert!(!SyntheticAdapter::new(Algorithm::Fp16).has_quantize_step());
        assert!(SyntheticAdapter::new(Algorithm::Awq).has_quantize_step());
    }

    #[test]
    fn noise_is_deterministic() {
        let key = TaskKey::new("org/m", "b4g64", Algorithm::Hqq, TaskType::EvalPpl);
        assert_eq!(unit_noise(&key, "x"), unit_noise(&key, "x"));
        assert!((0.0..1.0).contains(&unit_noise(&key, "x")));
    }
}
