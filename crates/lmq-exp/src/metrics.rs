use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};
use lmq_core::errors::{ErrorInfo, LmqError};
use lmq_core::{QuantConfig, TaskKey, TaskType};
use serde::{Deserialize, Serialize};

use crate::fsutil::{atomic_write, io_error};
use crate::serde::to_canonical_json_bytes;

/// Identity columns leading every metric row.
pub const TEXT_COLUMNS: [&str; 4] = ["model", "algo", "config", "config_detail"];

macro_rules! metric_record {
    ($($field:ident),+ $(,)?) => {
        /// Fixed-schema measurements of one task, zero-initialised.
        ///
        /// Memory fields are GiB, durations seconds and `artifact_size` GiB on disk.
        /// Collaborators may contribute further named measurements through `extra`.
        #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
        #[serde(default)]
        pub struct MetricRecord {
            /// Short model id.
            pub model: String,
            /// Algorithm name.
            pub algo: String,
            /// Configuration name.
            pub config: String,
            /// Canonical JSON of the configuration payload.
            pub config_detail: String,
            $(
                #[allow(missing_docs)]
                pub $field: f64,
            )+
            /// Additional measurements keyed by column name.
            #[serde(flatten)]
            pub extra: BTreeMap<String, f64>,
        }

        impl MetricRecord {
            /// Numeric columns in schema order.
            pub const NUMERIC_COLUMNS: &'static [&'static str] = &[$(stringify!($field)),+];

            /// Value of a fixed numeric column.
            pub fn numeric(&self, column: &str) -> Option<f64> {
                match column {
                    $(stringify!($field) => Some(self.$field),)+
                    _ => None,
                }
            }

            fn numeric_mut(&mut self, column: &str) -> Option<&mut f64> {
                match column {
                    $(stringify!($field) => Some(&mut self.$field),)+
                    _ => None,
                }
            }
        }
    };
}

metric_record!(
    quant_duration,
    artifact_size,
    load_mem_allot,
    load_mem_reserved,
    ppl_mem_allot,
    ppl_mem_reserved,
    leaderboard_mem_allot,
    leaderboard_mem_reserved,
    zeroshot_mem_allot,
    zeroshot_mem_reserved,
    linear_probe_mem_allot,
    linear_probe_mem_reserved,
    ppl_wikitext,
    ppl_c4,
    duration_wikitext,
    duration_c4,
    duration_leaderboard,
    ifeval,
    bbh,
    mathlevel5,
    gpqa,
    musr,
    mmlupro,
    acc1_zeroshot_cls,
    acc5_zeroshot_cls,
    recall_zeroshot_cls,
    duration_zeroshot_cls,
    acc1_linear_probe,
    acc5_linear_probe,
    recall_linear_probe,
    duration_linear_probe,
);

/// Accelerator memory reading in GiB.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MemorySample {
    /// Peak allocated memory since the last reset.
    pub allocated: f64,
    /// Peak reserved memory since the last reset.
    pub reserved: f64,
}

/// Phase of a task a memory sample is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStage {
    /// After model creation.
    Load,
    /// After perplexity evaluation.
    Ppl,
    /// After leaderboard evaluation.
    Leaderboard,
    /// After zero-shot classification.
    Zeroshot,
    /// After linear-probe classification.
    LinearProbe,
}

impl MemoryStage {
    /// Stage sampled after the evaluation step of `task_type`, if it has one.
    pub fn for_task(task_type: TaskType) -> Option<Self> {
        match task_type {
            TaskType::EvalPpl => Some(MemoryStage::Ppl),
            TaskType::EvalLeaderboard => Some(MemoryStage::Leaderboard),
            TaskType::EvalZeroshotCls => Some(MemoryStage::Zeroshot),
            TaskType::EvalLinearProbe => Some(MemoryStage::LinearProbe),
            TaskType::Quant | TaskType::EvalModelStorage => None,
        }
    }
}

impl MetricRecord {
    /// Zero-initialised record labelled with the task identity.
    pub fn new(key: &TaskKey, config: &QuantConfig) -> Result<Self, LmqError> {
        let detail = String::from_utf8(to_canonical_json_bytes(config)?)
            .map_err(|err| LmqError::serde("config_detail", err.to_string()))?;
        Ok(Self {
            model: key.short_model_id().to_string(),
            algo: key.algorithm.as_str().to_string(),
            config: key.config_name.clone(),
            config_detail: detail,
            ..Self::default()
        })
    }

    /// Every fixed column in schema order.
    pub fn fixed_columns() -> impl Iterator<Item = &'static str> {
        TEXT_COLUMNS
            .iter()
            .copied()
            .chain(Self::NUMERIC_COLUMNS.iter().copied())
    }

    /// Stores a memory sample in the field pair of `stage`.
    pub fn record_memory(&mut self, stage: MemoryStage, sample: MemorySample) {
        let (allot, reserved) = match stage {
            MemoryStage::Load => (&mut self.load_mem_allot, &mut self.load_mem_reserved),
            MemoryStage::Ppl => (&mut self.ppl_mem_allot, &mut self.ppl_mem_reserved),
            MemoryStage::Leaderboard => (
                &mut self.leaderboard_mem_allot,
                &mut self.leaderboard_mem_reserved,
            ),
            MemoryStage::Zeroshot => (
                &mut self.zeroshot_mem_allot,
                &mut self.zeroshot_mem_reserved,
            ),
            MemoryStage::LinearProbe => (
                &mut self.linear_probe_mem_allot,
                &mut self.linear_probe_mem_reserved,
            ),
        };
        *allot = sample.allocated;
        *reserved = sample.reserved;
    }

    /// Text rendering of `column`; `None` when the column is an extra this record lacks.
    pub fn cell(&self, column: &str) -> Option<String> {
        match column {
            "model" => Some(self.model.clone()),
            "algo" => Some(self.algo.clone()),
            "config" => Some(self.config.clone()),
            "config_detail" => Some(self.config_detail.clone()),
            other => self
                .numeric(other)
                .or_else(|| self.extra.get(other).copied())
                .map(|value| value.to_string()),
        }
    }

    fn set_cell(&mut self, column: &str, raw: &str) -> Result<(), String> {
        match column {
            "model" => self.model = raw.to_string(),
            "algo" => self.algo = raw.to_string(),
            "config" => self.config = raw.to_string(),
            "config_detail" => self.config_detail = raw.to_string(),
            other => {
                let raw = raw.trim();
                if raw.is_empty() {
                    return Ok(());
                }
                let value: f64 = raw
                    .parse()
                    .map_err(|_| format!("column `{other}` holds non-numeric value `{raw}`"))?;
                match self.numeric_mut(other) {
                    Some(slot) => *slot = value,
                    None => {
                        self.extra.insert(other.to_string(), value);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Column list covering every record: fixed columns, then extras sorted by name.
pub fn union_columns<'a, I>(records: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a MetricRecord>,
{
    let extras: BTreeSet<&str> = records
        .into_iter()
        .flat_map(|record| record.extra.keys().map(String::as_str))
        .filter(|name| MetricRecord::fixed_columns().all(|fixed| fixed != *name))
        .collect();
    MetricRecord::fixed_columns()
        .map(str::to_string)
        .chain(extras.into_iter().map(str::to_string))
        .collect()
}

/// Encodes records as CSV under `columns`; absent extras render empty.
pub(crate) fn encode_rows(columns: &[String], records: &[MetricRecord]) -> Result<Vec<u8>, LmqError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer
        .write_record(columns)
        .map_err(|err| LmqError::serde("metric_encode", err.to_string()))?;
    for record in records {
        let row: Vec<String> = columns
            .iter()
            .map(|column| record.cell(column).unwrap_or_default())
            .collect();
        writer
            .write_record(&row)
            .map_err(|err| LmqError::serde("metric_encode", err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| LmqError::serde("metric_encode", err.to_string()))
}

/// Durably writes the per-task metric file (header plus one row).
pub fn write_partial(path: &Path, record: &MetricRecord) -> Result<(), LmqError> {
    let columns = union_columns([record]);
    let bytes = encode_rows(&columns, std::slice::from_ref(record))?;
    atomic_write(path, &bytes)
}

/// Reads a per-task metric file. Columns missing from the file keep their zero value.
pub fn read_partial(path: &Path) -> Result<MetricRecord, LmqError> {
    let malformed = |message: String| {
        LmqError::Serde(
            ErrorInfo::new("metric_parse", message).with_context("path", path.display().to_string()),
        )
    };
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|err| io_error("metric_open", path, err))?;
    let headers = reader
        .headers()
        .map_err(|err| malformed(err.to_string()))?
        .clone();
    let mut rows = reader.records();
    let row = match rows.next() {
        Some(row) => row.map_err(|err| malformed(err.to_string()))?,
        None => return Err(malformed("metric file has no data row".to_string())),
    };
    if rows.next().is_some() {
        return Err(malformed("metric file holds more than one row".to_string()));
    }
    let mut record = MetricRecord::default();
    for (column, raw) in headers.iter().zip(row.iter()) {
        record.set_cell(column.trim(), raw).map_err(malformed)?;
    }
    Ok(record)
}
