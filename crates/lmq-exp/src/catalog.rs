use std::collections::{BTreeMap, BTreeSet};

use lmq_core::errors::{ErrorInfo, LmqError};
use lmq_core::{
    Algorithm, AwqParams, GptqParams, HqqParams, MxqParams, NamedConfig, QuantConfig,
};
use serde::{Deserialize, Serialize};

/// Language models addressable by index on the command line.
pub const LLM_MODELS: [&str; 3] = [
    "meta-llama/Llama-2-7b-hf",
    "meta-llama/Llama-2-13b-hf",
    "meta-llama/Meta-Llama-3-8B",
];

/// Vision towers addressable by index on the command line.
pub const VIT_MODELS: [&str; 3] = [
    "laion/CLIP-ViT-B-32-laion2B-s34B-b79K",
    "laion/CLIP-ViT-H-14-laion2B-s32B-b79K",
    "laion/CLIP-ViT-L-14-laion2B-s32B-b82K",
];

const HQQ_GRID: [(u32, u32); 12] = [
    (8, 32),
    (8, 64),
    (8, 128),
    (4, 32),
    (4, 64),
    (4, 128),
    (3, 32),
    (3, 64),
    (3, 128),
    (2, 16),
    (2, 32),
    (2, 64),
];

const MXQ_BUDGETS: [f64; 26] = [
    7.80, 7.72, 7.64, 7.56, 7.48, 7.40, 7.32, 5.00, 4.95, 4.90, 4.86, 4.82, 4.78, 4.75, 4.73,
    4.50, 4.25, 4.01, 4.00, 3.96, 3.92, 3.76, 3.50, 3.00, 2.75, 2.48,
];

const GPTQ_GRID: [(u32, u32); 6] = [(4, 32), (4, 64), (4, 128), (3, 32), (3, 64), (3, 128)];

const AWQ_GROUPS: [u32; 3] = [32, 64, 128];

/// Model catalogue selecting which index table applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    /// Causal language models.
    #[default]
    Llm,
    /// CLIP vision transformers.
    Vit,
}

impl ModelFamily {
    /// Known model ids for the family.
    pub fn models(&self) -> &'static [&'static str] {
        match self {
            ModelFamily::Llm => &LLM_MODELS,
            ModelFamily::Vit => &VIT_MODELS,
        }
    }
}

/// Resolves model selectors into full model ids.
///
/// A selector is either an index into the family's table or a literal id containing
/// a `/`. Duplicates are dropped while keeping first-seen order.
pub fn resolve_models(family: ModelFamily, selectors: &[String]) -> Result<Vec<String>, LmqError> {
    let table = family.models();
    let mut seen = BTreeSet::new();
    let mut models = Vec::with_capacity(selectors.len());
    for selector in selectors {
        let selector = selector.trim();
        let model = if selector.contains('/') {
            selector.to_string()
        } else {
            let index: usize = selector.parse().map_err(|_| {
                LmqError::Config(
                    ErrorInfo::new("model-selector", "model selector is neither an index nor an id")
                        .with_context("selector", selector),
                )
            })?;
            table
                .get(index)
                .map(|id| id.to_string())
                .ok_or_else(|| {
                    LmqError::Config(
                        ErrorInfo::new("model-index", "model index out of range")
                            .with_context("index", index.to_string())
                            .with_context("available", table.len().to_string()),
                    )
                })?
        };
        if seen.insert(model.clone()) {
            models.push(model);
        }
    }
    Ok(models)
}

/// Registry of named configurations per algorithm.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigCatalog {
    entries: BTreeMap<Algorithm, Vec<NamedConfig>>,
}

impl Default for ConfigCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ConfigCatalog {
    /// Catalog without any configurations.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Catalog populated with the standard experiment configurations.
    pub fn builtin() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            Algorithm::Fp16,
            vec![NamedConfig::new("base", QuantConfig::Fp16)],
        );
        entries.insert(
            Algorithm::Hqq,
            HQQ_GRID
                .iter()
                .map(|&(nbits, group_size)| {
                    NamedConfig::new(
                        format!("b{nbits}g{group_size}"),
                        QuantConfig::Hqq(HqqParams { nbits, group_size }),
                    )
                })
                .collect(),
        );
        entries.insert(
            Algorithm::Mxq,
            MXQ_BUDGETS
                .iter()
                .map(|&budget| {
                    NamedConfig::new(
                        format!("{budget:.2}").replace('.', "_"),
                        QuantConfig::Mxq(MxqParams {
                            budget,
                            quant_scale: true,
                            quant_metrics_file: None,
                        }),
                    )
                })
                .collect(),
        );
        entries.insert(
            Algorithm::Gptq,
            GPTQ_GRID
                .iter()
                .map(|&(bits, group_size)| {
                    NamedConfig::new(
                        format!("b{bits}g{group_size}"),
                        QuantConfig::Gptq(GptqParams {
                            bits,
                            group_size,
                            damp_percent: 0.01,
                            desc_act: false,
                        }),
                    )
                })
                .collect(),
        );
        entries.insert(
            Algorithm::Awq,
            AWQ_GROUPS
                .iter()
                .map(|&q_group_size| {
                    NamedConfig::new(
                        format!("b4g{q_group_size}"),
                        QuantConfig::Awq(AwqParams {
                            w_bit: 4,
                            q_group_size,
                            zero_point: true,
                            version: "GEMM".to_string(),
                        }),
                    )
                })
                .collect(),
        );
        Self { entries }
    }

    /// Registered configurations for an algorithm, in registration order.
    pub fn configs(&self, algorithm: Algorithm) -> &[NamedConfig] {
        self.entries
            .get(&algorithm)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Registers an additional configuration. Names must be unique per algorithm and the
    /// payload must belong to the algorithm it is registered under.
    pub fn register(&mut self, algorithm: Algorithm, config: NamedConfig) -> Result<(), LmqError> {
        if config.payload.algorithm() != algorithm {
            return Err(LmqError::Config(
                ErrorInfo::new("config-algorithm-mismatch", "payload registered under wrong algorithm")
                    .with_context("algorithm", algorithm.as_str())
                    .with_context("payload", config.payload.algorithm().as_str())
                    .with_context("config", config.name.clone()),
            ));
        }
        let list = self.entries.entry(algorithm).or_default();
        if list.iter().any(|existing| existing.name == config.name) {
            return Err(LmqError::Config(
                ErrorInfo::new("config-duplicate", "config name already registered")
                    .with_context("algorithm", algorithm.as_str())
                    .with_context("config", config.name),
            ));
        }
        list.push(config);
        Ok(())
    }

    /// Looks up a single configuration by name.
    pub fn get(&self, algorithm: Algorithm, name: &str) -> Option<&NamedConfig> {
        self.configs(algorithm).iter().find(|config| config.name == name)
    }

    /// Resolves configuration names for one algorithm. `None` selects everything.
    ///
    /// FP16 has a single `base` configuration that is selected regardless of names.
    pub fn resolve(
        &self,
        algorithm: Algorithm,
        names: Option<&[String]>,
    ) -> Result<Vec<NamedConfig>, LmqError> {
        if algorithm == Algorithm::Fp16 {
            return Ok(self.configs(algorithm).to_vec());
        }
        let Some(names) = names else {
            return Ok(self.configs(algorithm).to_vec());
        };
        names
            .iter()
            .map(|name| {
                self.get(algorithm, name).cloned().ok_or_else(|| {
                    LmqError::Config(
                        ErrorInfo::new("unknown-config", "config not registered for algorithm")
                            .with_context("algorithm", algorithm.as_str())
                            .with_context("config", name.clone())
                            .with_hint("run `lmq configs` to list registered names"),
                    )
                })
            })
            .collect()
    }

    /// Resolves one set of configuration names across several algorithms.
    ///
    /// Each algorithm keeps the names it knows. A name unknown to every selected
    /// algorithm, or an algorithm left with no configuration, is a configuration error.
    pub fn resolve_many(
        &self,
        algorithms: &[Algorithm],
        names: Option<&[String]>,
    ) -> Result<BTreeMap<Algorithm, Vec<NamedConfig>>, LmqError> {
        let mut resolved = BTreeMap::new();
        for &algorithm in algorithms {
            let configs: Vec<NamedConfig> = match names {
                Some(names) if algorithm != Algorithm::Fp16 => names
                    .iter()
                    .filter_map(|name| self.get(algorithm, name).cloned())
                    .collect(),
                _ => self.resolve(algorithm, None)?,
            };
            if configs.is_empty() {
                return Err(LmqError::Config(
                    ErrorInfo::new("no-configs", "no configuration selected for algorithm")
                        .with_context("algorithm", algorithm.as_str()),
                ));
            }
            resolved.insert(algorithm, configs);
        }
        if let Some(names) = names {
            for name in names {
                let known = algorithms.iter().any(|&algorithm| {
                    algorithm == Algorithm::Fp16 || self.get(algorithm, name).is_some()
                });
                if !known {
                    return Err(LmqError::Config(
                        ErrorInfo::new("unknown-config", "config not registered for any selected algorithm")
                            .with_context("config", name.clone()),
                    ));
                }
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn builtin_catalog_names_are_unique() {
        let catalog = ConfigCatalog::builtin();
        for algorithm in Algorithm::ALL {
            let configs = catalog.configs(algorithm);
            let unique: BTreeSet<_> = configs.iter().map(|c| c.name.as_str()).collect();
            assert_eq!(unique.len(), configs.len(), "{algorithm}");
            assert!(!configs.is_empty());
        }
    }

    #[test]
    fn mxq_names_encode_budget() {
        let catalog = ConfigCatalog::builtin();
        let config = catalog.get(Algorithm::Mxq, "4_25").expect("registered");
        match &config.payload {
            QuantConfig::Mxq(params) => assert!((params.budget - 4.25).abs() < 1e-9),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn unknown_config_is_rejected() {
        let catalog = ConfigCatalog::builtin();
        let err = catalog
            .resolve(Algorithm::Hqq, Some(&names(&["b4g64", "b1g1"])))
            .unwrap_err();
        assert_eq!(err.info().code, "unknown-config");
        assert_eq!(err.info().context["config"], "b1g1");
    }

    #[test]
    fn fp16_ignores_requested_names() {
        let catalog = ConfigCatalog::builtin();
        let resolved = catalog
            .resolve(Algorithm::Fp16, Some(&names(&["b4g64"])))
            .expect("fp16");
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "base");
    }

    #[test]
    fn resolve_many_splits_names_per_algorithm() {
        let catalog = ConfigCatalog::builtin();
        let resolved = catalog
            .resolve_many(
                &[Algorithm::Hqq, Algorithm::Gptq],
                Some(&names(&["b8g32", "b4g64"])),
            )
            .expect("resolve");
        let hqq: Vec<_> = resolved[&Algorithm::Hqq].iter().map(|c| c.name.as_str()).collect();
        let gptq: Vec<_> = resolved[&Algorithm::Gptq].iter().map(|c| c.name.as_str()).collect();
        assert_eq!(hqq, vec!["b8g32", "b4g64"]);
        assert_eq!(gptq, vec!["b4g64"]);
    }

    #[test]
    fn resolve_many_rejects_empty_algorithm() {
        let catalog = ConfigCatalog::builtin();
        let err = catalog
            .resolve_many(&[Algorithm::Awq], Some(&names(&["b3g64"])))
            .unwrap_err();
        assert_eq!(err.info().code, "no-configs");
    }

    #[test]
    fn register_rejects_mismatched_payload() {
        let mut catalog = ConfigCatalog::empty();
        let err = catalog
            .register(Algorithm::Hqq, NamedConfig::new("x", QuantConfig::Fp16))
            .unwrap_err();
        assert_eq!(err.info().code, "config-algorithm-mismatch");
    }

    #[test]
    fn models_resolve_by_index_or_id() {
        let models = resolve_models(
            ModelFamily::Llm,
            &names(&["0", "org/custom-model", "0", "2"]),
        )
        .expect("models");
        assert_eq!(
            models,
            vec![
                "meta-llama/Llama-2-7b-hf".to_string(),
                "org/custom-model".to_string(),
                "meta-llama/Meta-Llama-3-8B".to_string(),
            ]
        );
        let err = resolve_models(ModelFamily::Vit, &names(&["7"])).unwrap_err();
        assert_eq!(err.info().code, "model-index");
    }
}
