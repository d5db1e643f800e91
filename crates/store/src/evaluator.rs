// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Out-of-process expression evaluation for the transform pipeline.
//!
//! The pipeline treats expressions, filters and scripts as opaque strings
//! handed to an [`Evaluator`]. The process implementation spawns a fresh
//! interpreter per call, exchanges hex-encoded bytes as JSON over
//! stdin/stdout, and kills the child on timeout. No state is shared
//! across calls, so buggy user code cannot poison the pipeline or touch
//! the store.

use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::trace;

pub const DEFAULT_EVAL_TIMEOUT: Duration = Duration::from_secs(5);

/// What an evaluation produced. Field presence depends on what the user
/// code returned; the pipeline knows the role (filter, key expression,
/// value expression, script) and reads the slots accordingly.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EvalOutcome {
    pub new_key: Option<Vec<u8>>,
    pub new_value: Option<Vec<u8>>,
    pub accept: Option<bool>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EvalFailure {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Failed(String),
}

#[async_trait::async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        code: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<EvalOutcome, EvalFailure>;
}

/// The stdin/stdout harness executed by the default interpreter. It
/// exposes `key` and `value` as byte strings, evaluates the user
/// expression, and reports the result typed: tuples become a key/value
/// pair, other values a single byte result, and everything feeds the
/// truthiness flag used by filters.
const PYTHON_HARNESS: &str = r#"
import sys, json, binascii

def to_bytes(x):
    if isinstance(x, bytes):
        return x
    if isinstance(x, str):
        return x.encode()
    return json.dumps(x).encode()

req = json.load(sys.stdin)
key = binascii.unhexlify(req["key"])
value = binascii.unhexlify(req["value"])
try:
    result = eval(req["code"], {"json": json, "key": key, "value": value})
    out = {"filter": bool(result)}
    if isinstance(result, tuple) and len(result) == 2:
        out["key"] = binascii.hexlify(to_bytes(result[0])).decode()
        out["value"] = binascii.hexlify(to_bytes(result[1])).decode()
    elif result is not None and not isinstance(result, bool):
        out["value"] = binascii.hexlify(to_bytes(result)).decode()
except Exception as exc:
    out = {"error": str(exc)}
json.dump(out, sys.stdout)
"#;

/// Spawns one interpreter process per evaluation.
///
/// Resource ceilings beyond the timeout (memory, cpu) are the command's
/// concern: operators point `program` at a wrapper applying their limits.
pub struct ProcessEvaluator {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl Default for ProcessEvaluator {
    fn default() -> Self {
        Self {
            program: "python3".to_owned(),
            args: vec!["-c".to_owned(), PYTHON_HARNESS.to_owned()],
            timeout: DEFAULT_EVAL_TIMEOUT,
        }
    }
}

impl ProcessEvaluator {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

#[derive(Deserialize)]
struct EvalResponse {
    key: Option<String>,
    value: Option<String>,
    filter: Option<bool>,
    error: Option<String>,
}

fn parse_response(raw: &[u8]) -> Result<EvalOutcome, EvalFailure> {
    let response: EvalResponse = serde_json::from_slice(raw)
        .map_err(|e| EvalFailure::Failed(format!("malformed evaluator response: {e}")))?;
    if let Some(error) = response.error {
        return Err(EvalFailure::Failed(error));
    }
    let decode = |field: Option<String>| {
        field
            .map(|text| {
                hex::decode(text).map_err(|e| {
                    EvalFailure::Failed(format!("malformed bytes in evaluator response: {e}"))
                })
            })
            .transpose()
    };
    Ok(EvalOutcome {
        new_key: decode(response.key)?,
        new_value: decode(response.value)?,
        accept: response.filter,
    })
}

#[async_trait::async_trait]
impl Evaluator for ProcessEvaluator {
    async fn evaluate(
        &self,
        code: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<EvalOutcome, EvalFailure> {
        let request = serde_json::json!({
            "code": code,
            "key": hex::encode(key),
            "value": hex::encode(value),
        })
        .to_string();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EvalFailure::Failed(format!("failed to spawn evaluator: {e}")))?;

        let mut stdin = child.stdin.take().expect("stdin is piped");
        let mut stdout = child.stdout.take().expect("stdout is piped");

        let run = async {
            stdin
                .write_all(request.as_bytes())
                .await
                .map_err(|e| EvalFailure::Failed(format!("failed to write request: {e}")))?;
            drop(stdin);

            let mut raw = Vec::new();
            stdout
                .read_to_end(&mut raw)
                .await
                .map_err(|e| EvalFailure::Failed(format!("failed to read response: {e}")))?;
            let status = child
                .wait()
                .await
                .map_err(|e| EvalFailure::Failed(format!("failed to await evaluator: {e}")))?;
            if !status.success() {
                return Err(EvalFailure::Failed(format!(
                    "evaluator exited with {status}"
                )));
            }
            Ok(raw)
        };

        let raw = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                let _ = child.start_kill();
                return Err(EvalFailure::Timeout(self.timeout));
            }
        };

        trace!(bytes = raw.len(), "Evaluator responded");
        parse_response(&raw)
    }
}
