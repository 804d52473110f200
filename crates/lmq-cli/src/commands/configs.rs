use std::error::Error;

use clap::Args;
use lmq_core::Algorithm;
use lmq_exp::{to_canonical_json_bytes, ConfigCatalog, ModelFamily};
use serde::Serialize;

#[derive(Args, Debug)]
pub struct ConfigsArgs {
    /// Only list configurations of this algorithm.
    #[arg(long)]
    pub algo: Option<String>,
    /// Emit canonical JSON including the full payloads.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct CatalogListing<'a> {
    llm_models: &'static [&'static str],
    vit_models: &'static [&'static str],
    configs: Vec<AlgorithmListing<'a>>,
}

#[derive(Debug, Serialize)]
struct AlgorithmListing<'a> {
    algorithm: Algorithm,
    configs: &'a [lmq_core::NamedConfig],
}

pub fn run(args: &ConfigsArgs) -> Result<(), Box<dyn Error>> {
    let catalog = ConfigCatalog::builtin();
    let algorithms: Vec<Algorithm> = match &args.algo {
        Some(raw) => vec![raw.parse()?],
        None => Algorithm::ALL.to_vec(),
    };
    let listing = CatalogListing {
        llm_models: ModelFamily::Llm.models(),
        vit_models: ModelFamily::Vit.models(),
        configs: algorithms
            .iter()
            .map(|&algorithm| AlgorithmListing {
                algorithm,
                configs: catalog.configs(algorithm),
            })
            .collect(),
    };

    if args.json {
        let bytes = to_canonical_json_bytes(&listing)?;
        println!("{}", String::from_utf8(bytes)?);
        return Ok(());
    }
    if args.algo.is_none() {
        for (family, models) in [("llm", listing.llm_models), ("vit", listing.vit_models)] {
            println!("{family} models:");
            for (idx, model) in models.iter().enumerate() {
                println!("  {idx}: {model}");
            }
        }
    }
    for entry in &listing.configs {
        let names: Vec<&str> = entry.configs.iter().map(|config| config.name.as_str()).collect();
        println!("{}: {}", entry.algorithm, names.join(" "));
    }
    Ok(())
}
