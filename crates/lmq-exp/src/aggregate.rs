use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lmq_core::errors::{ErrorInfo, LmqError};
use lmq_core::{RunProvenance, SchemaVersion};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ExperimentLayout;
use crate::fsutil::{atomic_write, ensure_dir, io_error, staging_path};
use crate::metrics::{encode_rows, read_partial, union_columns, MetricRecord};
use crate::serde::to_canonical_json_bytes;

/// Schema version of the report manifest.
pub const REPORT_SCHEMA: SchemaVersion = SchemaVersion::new(1, 0, 0);

/// Timestamp embedded in report file names.
pub const REPORT_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Combined table written by one aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentReport {
    /// Location of the CSV report.
    pub path: PathBuf,
    /// Location of the provenance manifest.
    pub manifest_path: PathBuf,
    /// Column header in output order.
    pub columns: Vec<String>,
    /// Records in source-file order.
    pub records: Vec<MetricRecord>,
    /// Provenance written beside the report.
    pub provenance: RunProvenance,
}

/// Lists per-task metric files in lexicographic order.
pub fn partial_metric_files(layout: &ExperimentLayout) -> Result<Vec<PathBuf>, LmqError> {
    let pattern = layout.partial_metric_pattern();
    let entries = glob::glob(&pattern).map_err(|err| {
        LmqError::Serde(
            ErrorInfo::new("partial_pattern", err.to_string()).with_context("pattern", pattern.clone()),
        )
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|err| io_error("partial_list", err.path(), err.error()))?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Unions every per-task metric file of the experiment into a new timestamped report.
///
/// Earlier reports are never overwritten. An experiment without metric files yields a
/// header-only report.
pub fn aggregate(
    layout: &ExperimentLayout,
    grid_hash: Option<&str>,
) -> Result<ExperimentReport, LmqError> {
    aggregate_at(layout, grid_hash, Utc::now())
}

pub(crate) fn aggregate_at(
    layout: &ExperimentLayout,
    grid_hash: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ExperimentReport, LmqError> {
    ensure_dir(layout.dir())?;
    let records = partial_metric_files(layout)?
        .iter()
        .map(|path| read_partial(path))
        .collect::<Result<Vec<_>, _>>()?;
    let columns = union_columns(&records);
    let bytes = encode_rows(&columns, &records)?;

    let stamp = now.format(REPORT_TIMESTAMP_FORMAT).to_string();
    let path = create_unique(layout, &stamp, &bytes)?;
    let manifest_path = path.with_extension("json");

    let mut tool_versions = BTreeMap::new();
    tool_versions.insert(
        env!("CARGO_PKG_NAME").to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    let provenance = RunProvenance {
        schema_version: REPORT_SCHEMA,
        experiment: layout.experiment().to_string(),
        grid_hash: grid_hash.unwrap_or_default().to_string(),
        records: records.len(),
        created_at: now.to_rfc3339(),
        tool_versions,
    };
    atomic_write(&manifest_path, &to_canonical_json_bytes(&provenance)?)?;
    info!(path = %path.display(), records = records.len(), "report written");

    Ok(ExperimentReport {
        path,
        manifest_path,
        columns,
        records,
        provenance,
    })
}

/// Creates `result-<experiment>-<stamp>[-n].csv`, picking the first unused suffix.
///
/// The content is staged and synced first, then linked under its final name, so a report
/// never appears partially written.
fn create_unique(layout: &ExperimentLayout, stamp: &str, bytes: &[u8]) -> Result<PathBuf, LmqError> {
    let staging = staging_path(&layout.report_path(stamp));
    let staged = File::create(&staging).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(err) = staged {
        let _ = fs::remove_file(&staging);
        return Err(io_error("report_write", &staging, err));
    }
    let linked = link_unique(layout, stamp, &staging);
    if let Err(err) = fs::remove_file(&staging) {
        warn!(path = %staging.display(), error = %err, "report staging file not removed");
    }
    linked
}

fn link_unique(layout: &ExperimentLayout, stamp: &str, staging: &Path) -> Result<PathBuf, LmqError> {
    let mut attempt = 0usize;
    loop {
        let name = if attempt == 0 {
            stamp.to_string()
        } else {
            format!("{stamp}-{attempt}")
        };
        let path = layout.report_path(&name);
        match fs::hard_link(staging, &path) {
            Ok(()) => return Ok(path),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(err) => return Err(io_error("report_create", &path, err)),
        }
    }
}

/// Reads a report manifest written by [`aggregate`].
///
/// Manifests from an incompatible report layout are rejected.
pub fn read_manifest(path: &Path) -> Result<RunProvenance, LmqError> {
    let bytes = std::fs::read(path).map_err(|err| io_error("manifest_read", path, err))?;
    let provenance: RunProvenance = crate::serde::from_json_slice(&bytes)?;
    if !REPORT_SCHEMA.can_read(&provenance.schema_version) {
        return Err(LmqError::Serde(
            ErrorInfo::new("manifest_schema", "report written by an incompatible version")
                .with_context("path", path.display().to_string())
                .with_context("found", provenance.schema_version.to_string())
                .with_context("supported", REPORT_SCHEMA.to_string()),
        ));
    }
    Ok(provenance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(model: &str, config: &str, ppl: f64) -> MetricRecord {
        MetricRecord {
            model: model.into(),
            algo: "hqq".into(),
            config: config.into(),
            ppl_wikitext: ppl,
            ..MetricRecord::default()
        }
    }

    #[test]
    fn same_second_aggregations_get_distinct_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = ExperimentLayout::new(dir.path(), "exp");
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("time");
        let first = aggregate_at(&layout, None, now).expect("first");
        let second = aggregate_at(&layout, None, now).expect("second");
        assert_eq!(
            first.path.file_name().and_then(|n| n.to_str()),
            Some("result-exp-20240501120000.csv")
        );
        assert_eq!(
            second.path.file_name().and_then(|n| n.to_str()),
            Some("result-exp-20240501120000-1.csv")
        );
        assert!(second.manifest_path.ends_with("result-exp-20240501120000-1.json"));
        let hidden = std::fs::read_dir(layout.dir())
            .expect("list")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with('.'))
            .count();
        assert_eq!(hidden, 0);
    }

    #[test]
    fn failed_report_write_leaves_no_report_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = ExperimentLayout::new(dir.path(), "exp");
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("time");
        let stamp = now.format(REPORT_TIMESTAMP_FORMAT).to_string();
        // A directory squatting on the staging name makes the write fail.
        std::fs::create_dir_all(staging_path(&layout.report_path(&stamp))).expect("squat");

        let err = aggregate_at(&layout, None, now).unwrap_err();
        assert_eq!(err.info().code, "report_write");
        assert!(!layout.report_path(&stamp).exists());
        assert!(!layout.report_path(&stamp).with_extension("json").exists());
    }

    #[test]
    fn empty_experiment_yields_header_only_report() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = ExperimentLayout::new(dir.path(), "exp");
        let report = aggregate(&layout, Some("abc")).expect("aggregate");
        assert!(report.records.is_empty());
        let text = std::fs::read_to_string(&report.path).expect("read");
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("model,algo,config,config_detail,quant_duration"));
        let manifest = read_manifest(&report.manifest_path).expect("manifest");
        assert_eq!(manifest.grid_hash, "abc");
        assert_eq!(manifest.records, 0);
    }

    #[test]
    fn files_are_read_in_lexicographic_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = ExperimentLayout::new(dir.path(), "exp");
        std::fs::create_dir_all(layout.dir()).expect("dir");
        for (name, rec) in [
            ("partial-hqq-m-b3g64.csv", record("m", "b3g64", 6.1)),
            ("partial-hqq-m-b2g64.csv", record("m", "b2g64", 9.0)),
            ("partial-hqq-m-b4g64.csv", record("m", "b4g64", 5.7)),
        ] {
            crate::metrics::write_partial(&layout.dir().join(name), &rec).expect("write");
        }
        std::fs::write(layout.dir().join("progress.csv"), "ignored").expect("ledger");
        let report = aggregate(&layout, None).expect("aggregate");
        let configs: Vec<_> = report.records.iter().map(|r| r.config.as_str()).collect();
        assert_eq!(configs, ["b2g64", "b3g64", "b4g64"]);
    }

    #[test]
    fn unparsable_partial_names_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = ExperimentLayout::new(dir.path(), "exp");
        std::fs::create_dir_all(layout.dir()).expect("dir");
        let bad = layout.dir().join("partial-hqq-m-b4g64.csv");
        std::fs::write(&bad, "model,ppl_wikitext\nm,not-a-number\n").expect("write");
        let err = aggregate(&layout, None).unwrap_err();
        assert!(matches!(err, LmqError::Serde(_)));
        assert_eq!(
            err.info().context.get("path"),
            Some(&bad.display().to_string())
        );
    }

    #[test]
    fn manifests_from_a_newer_layout_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = ExperimentLayout::new(dir.path(), "exp");
        let report = aggregate(&layout, None).expect("aggregate");
        let mut provenance = report.provenance.clone();
        provenance.schema_version = SchemaVersion::new(REPORT_SCHEMA.major + 1, 0, 0);
        std::fs::write(
            &report.manifest_path,
            to_canonical_json_bytes(&provenance).expect("json"),
        )
        .expect("rewrite");
        let err = read_manifest(&report.manifest_path).unwrap_err();
        assert_eq!(err.info().code, "manifest_schema");
    }
}
