//! Collaborators backed by an external program.
//!
//! Each call runs `<program> [args..] <action>` with a JSON request on stdin and reads a
//! JSON response from stdout. Actions are `create`, `quantize`, `evaluate`,
//! `evaluate-detached`, `reset-peak`, `sample-memory`, `start-trace`, `dump-trace` and
//! `release`. Standard error is passed through to the operator.

use std::ffi::OsString;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use lmq_core::errors::{ErrorInfo, LmqError};
use lmq_core::Algorithm;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::collab::{
    Collaborators, CreateRequest, Created, EvalContext, Evaluator, ModelAdapter, ModelHandle,
    QuantizeRequest, Quantized, ResourceMonitor, RuntimeLimits, TokenizerHandle,
};
use crate::metrics::{MemorySample, MetricRecord};
use crate::serde::to_canonical_json_bytes;

/// Thread-count variables set on every child process.
const THREAD_VARS: [&str; 3] = ["OMP_NUM_THREADS", "MKL_NUM_THREADS", "OPENBLAS_NUM_THREADS"];

/// An external collaborator program and the arguments preceding the action name.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessProgram {
    program: PathBuf,
    args: Vec<OsString>,
    limits: RuntimeLimits,
}

impl ProcessProgram {
    /// Program invoked with no leading arguments.
    pub fn new(program: impl Into<PathBuf>, limits: RuntimeLimits) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            limits,
        }
    }

    /// Adds arguments placed before the action name.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn failure(&self, code: &str, action: &str, message: impl Into<String>) -> LmqError {
        LmqError::Collaborator(
            ErrorInfo::new(code, message)
                .with_context("program", self.program.display().to_string())
                .with_context("action", action),
        )
    }

    fn invoke<Req: Serialize>(&self, action: &str, request: &Req) -> Result<Vec<u8>, LmqError> {
        let payload = to_canonical_json_bytes(request)?;
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(action)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        let threads = self.limits.thread_limit.to_string();
        for var in THREAD_VARS {
            command.env(var, &threads);
        }
        if let Some(cache) = &self.limits.cache_dir {
            command.env("HF_HOME", cache);
        }
        debug!(program = %self.program.display(), action, "spawning collaborator");
        let mut child = command
            .spawn()
            .map_err(|err| self.failure("process-spawn", action, err.to_string()))?;
        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&payload) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {}
                Err(err) => return Err(self.failure("process-stdin", action, err.to_string())),
            }
        }
        let output = child
            .wait_with_output()
            .map_err(|err| self.failure("process-wait", action, err.to_string()))?;
        if !output.status.success() {
            return Err(LmqError::Collaborator(
                ErrorInfo::new("process-exit", "collaborator exited with failure")
                    .with_context("program", self.program.display().to_string())
                    .with_context("action", action)
                    .with_context("status", output.status.to_string()),
            ));
        }
        Ok(output.stdout)
    }

    fn call<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        action: &str,
        request: &Req,
    ) -> Result<Resp, LmqError> {
        let stdout = self.invoke(action, request)?;
        serde_json::from_slice(&stdout)
            .map_err(|err| self.failure("process-response", action, err.to_string()))
    }

    fn notify<Req: Serialize>(&self, action: &str, request: &Req) -> Result<(), LmqError> {
        self.invoke(action, request).map(|_| ())
    }
}

#[derive(Serialize)]
struct QuantizeCall<'a> {
    model: &'a ModelHandle,
    tokenizer: &'a TokenizerHandle,
    request: &'a QuantizeRequest,
}

#[derive(Serialize)]
struct EvaluateCall<'a> {
    ctx: &'a EvalContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a ModelHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tokenizer: Option<&'a TokenizerHandle>,
    record: &'a MetricRecord,
}

#[derive(Serialize)]
struct TraceCall<'a> {
    path: &'a Path,
}

#[derive(Serialize)]
struct Empty {}

/// Model adapter forwarding to a [`ProcessProgram`].
#[derive(Debug, Clone)]
pub struct ProcessAdapter {
    program: ProcessProgram,
    algorithm: Algorithm,
}

impl ProcessAdapter {
    /// Adapter for `algorithm`.
    pub fn new(program: ProcessProgram, algorithm: Algorithm) -> Self {
        Self { program, algorithm }
    }
}

impl ModelAdapter for ProcessAdapter {
    fn has_quantize_step(&self) -> bool {
        self.algorithm != Algorithm::Fp16
    }

    fn create(&mut self, request: &CreateRequest) -> Result<Created, LmqError> {
        self.program.call("create", request)
    }

    fn quantize(
        &mut self,
        model: ModelHandle,
        tokenizer: &TokenizerHandle,
        request: &QuantizeRequest,
    ) -> Result<Quantized, LmqError> {
        self.program.call(
            "quantize",
            &QuantizeCall {
                model: &model,
                tokenizer,
                request,
            },
        )
    }
}

/// Evaluator forwarding to a [`ProcessProgram`].
#[derive(Debug, Clone)]
pub struct ProcessEvaluator {
    program: ProcessProgram,
}

impl ProcessEvaluator {
    /// Evaluator calling `program`.
    pub fn new(program: ProcessProgram) -> Self {
        Self { program }
    }
}

impl Evaluator for ProcessEvaluator {
    fn evaluate(
        &mut self,
        ctx: &EvalContext,
        model: &ModelHandle,
        tokenizer: &TokenizerHandle,
        record: MetricRecord,
    ) -> Result<MetricRecord, LmqError> {
        self.program.call(
            "evaluate",
            &EvaluateCall {
                ctx,
                model: Some(model),
                tokenizer: Some(tokenizer),
                record: &record,
            },
        )
    }

    fn evaluate_detached(
        &mut self,
        ctx: &EvalContext,
        record: MetricRecord,
    ) -> Result<MetricRecord, LmqError> {
        self.program.call(
            "evaluate-detached",
            &EvaluateCall {
                ctx,
                model: None,
                tokenizer: None,
                record: &record,
            },
        )
    }
}

/// Resource monitor forwarding to a [`ProcessProgram`].
#[derive(Debug, Clone)]
pub struct ProcessMonitor {
    program: ProcessProgram,
}

impl ProcessMonitor {
    /// Monitor calling `program`.
    pub fn new(program: ProcessProgram) -> Self {
        Self { program }
    }
}

impl ResourceMonitor for ProcessMonitor {
    fn reset_peak(&mut self) -> Result<(), LmqError> {
        self.program.notify("reset-peak", &Empty {})
    }

    fn sample(&mut self) -> Result<MemorySample, LmqError> {
        self.program.call("sample-memory", &Empty {})
    }

    fn start_trace(&mut self) -> Result<(), LmqError> {
        self.program.notify("start-trace", &Empty {})
    }

    fn dump_trace(&mut self, path: &Path) -> Result<(), LmqError> {
        self.program.notify("dump-trace", &TraceCall { path })
    }

    fn release(&mut self) -> Result<(), LmqError> {
        self.program.notify("release", &Empty {})
    }
}

/// Collaborator set routing every call through `program`.
pub fn process_collaborators(program: &ProcessProgram) -> Collaborators {
    Algorithm::ALL.iter().fold(
        Collaborators::new(
            Box::new(ProcessEvaluator::new(program.clone())),
            Box::new(ProcessMonitor::new(program.clone())),
        ),
        |collaborators, &algorithm| {
            collaborators.with_adapter(
                algorithm,
                Box::new(ProcessAdapter::new(program.clone(), algorithm)),
            )
        },
    )
}
