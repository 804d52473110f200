use lmq_core::errors::{ErrorInfo, LmqError};
use lmq_core::{Algorithm, TaskType};

fn sample_info(code: &str, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, message)
        .with_context("model", "meta-llama/Llama-2-7b-hf")
        .with_context("config", "b4g64")
}

#[test]
fn config_error_surface() {
    let err = LmqError::Config(sample_info("CFG001", "config not registered"));
    assert_eq!(err.info().code, "CFG001");
    assert!(err.info().context.contains_key("config"));
}

#[test]
fn missing_artifact_error_surface() {
    let err = LmqError::MissingArtifact(sample_info("ART001", "fnorm table absent"));
    assert_eq!(err.info().code, "ART001");
    assert!(err.info().context.contains_key("model"));
}

#[test]
fn collaborator_error_surface() {
    let err = LmqError::Collaborator(sample_info("COL001", "out of memory"));
    assert_eq!(err.info().code, "COL001");
}

#[test]
fn ledger_error_surface() {
    let err = LmqError::Ledger(sample_info("LED001", "corrupt row"));
    assert_eq!(err.info().code, "LED001");
}

#[test]
fn serde_error_surface() {
    let err = LmqError::Serde(sample_info("S001", "schema mismatch"));
    assert_eq!(err.info().code, "S001");
}

#[test]
fn display_includes_context_and_hint() {
    let err = LmqError::Config(
        ErrorInfo::new("unknown-config", "config not found")
            .with_context("algorithm", "hqq")
            .with_hint("run `lmq configs`"),
    );
    let rendered = err.to_string();
    assert_eq!(
        rendered,
        "configuration error: config not found (code: unknown-config) | context: [algorithm=hqq] | hint: run `lmq configs`"
    );
}

#[test]
fn unknown_names_are_configuration_errors() {
    let err = "int3".parse::<Algorithm>().unwrap_err();
    assert!(matches!(err, LmqError::Config(_)));
    assert_eq!(err.info().context["algorithm"], "int3");

    let err = "eval_magic".parse::<TaskType>().unwrap_err();
    assert!(matches!(err, LmqError::Config(_)));
}

#[test]
fn errors_serialize_with_family_tag() {
    let err = LmqError::Ledger(ErrorInfo::new("ledger-parse", "bad status"));
    let json = serde_json::to_value(&err).expect("serialize");
    assert_eq!(json["family"], "Ledger");
    assert_eq!(json["detail"]["code"], "ledger-parse");
}
