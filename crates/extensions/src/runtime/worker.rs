//! One script-engine process per extension, driven over line-delimited JSON.

use std::{
    collections::{BTreeMap, HashMap},
    process::Stdio,
    sync::Arc,
};

use {
    futures::{StreamExt, stream::FuturesUnordered},
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
        process::{Child, ChildStdin, ChildStdout, Command},
        task::JoinHandle,
    },
    tracing::{debug, error, info, trace, warn},
};

use crate::{
    error::{Error, Result},
    loader::LoadedExtensionSource,
    manifest::{ExtensionManifest, ExtensionRecord},
    network::{HttpBridge, HttpGetRequest, HttpGetResponse},
};

/// Script evaluated by the engine with `-e`.
pub(crate) const HARNESS: &str = include_str!("harness.js");

/// Message id reserved for the initial `load`.
const LOAD_ID: u64 = 0;

// ── Protocol ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum HostMessage<'a> {
    #[serde(rename_all = "camelCase")]
    Load {
        id: u64,
        extension_id: &'a str,
        slug: &'a str,
        entry_path: String,
        manifest: &'a ExtensionManifest,
        code: &'a str,
    },
    Call {
        id: u64,
        method: &'a str,
        payload: &'a Value,
        settings: &'a Value,
    },
    #[serde(rename_all = "camelCase")]
    HttpResult {
        request_id: u64,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        kind: Option<&'static str>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum WorkerMessage {
    Result {
        id: u64,
        ok: bool,
        #[serde(default)]
        value: Value,
        #[serde(default)]
        error: Option<WorkerError>,
    },
    #[serde(rename_all = "camelCase")]
    Http {
        request_id: u64,
        url: String,
        #[serde(default)]
        headers: Option<HashMap<String, String>>,
        #[serde(default)]
        search_params: Option<BTreeMap<String, Value>>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    Log {
        #[serde(default)]
        level: String,
        #[serde(default)]
        message: String,
        #[serde(default)]
        meta: Option<Value>,
    },
}

#[derive(Debug, Deserialize)]
struct WorkerError {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    message: String,
}

// ── Worker ──────────────────────────────────────────────────────────────────

/// Engine command line. The harness is appended as `-e <harness>`.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
}

pub(crate) struct Worker {
    extension_id: String,
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    /// Set once the pipe broke or the process exited; the worker must be
    /// replaced.
    broken: bool,
    stderr_task: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn(command: &WorkerCommand, record: &ExtensionRecord) -> Result<Self> {
        debug!(
            extension_id = %record.id,
            program = %command.program,
            "spawning extension worker"
        );

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .arg("-e")
            .arg(HARNESS)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::domain(format!(
                    "failed to spawn extension worker `{}`: {e}",
                    command.program
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::domain("failed to capture worker stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::domain("failed to capture worker stdout"))?;

        let stderr_task = child.stderr.take().map(|stderr| {
            let extension_id = record.id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        warn!(extension_id = %extension_id, stderr = %trimmed, "extension worker stderr");
                    }
                }
            })
        });

        Ok(Self {
            extension_id: record.id.clone(),
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: LOAD_ID + 1,
            broken: false,
            stderr_task,
        })
    }

    pub(crate) fn is_broken(&self) -> bool {
        self.broken
    }

    /// Evaluate the compiled bundle inside the worker.
    pub(crate) async fn load(
        &mut self,
        record: &ExtensionRecord,
        source: &LoadedExtensionSource,
        bridge: &Arc<HttpBridge>,
    ) -> Result<()> {
        let message = HostMessage::Load {
            id: LOAD_ID,
            extension_id: &record.id,
            slug: &record.slug,
            entry_path: source.entry_path.display().to_string(),
            manifest: &record.manifest,
            code: &source.code,
        };
        self.exchange(&message, LOAD_ID, record, "load", bridge)
            .await
            .map(|_| ())
    }

    pub(crate) async fn call(
        &mut self,
        record: &ExtensionRecord,
        method: &str,
        payload: &Value,
        settings: &Value,
        bridge: &Arc<HttpBridge>,
    ) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        let message = HostMessage::Call {
            id,
            method,
            payload,
            settings,
        };
        self.exchange(&message, id, record, method, bridge).await
    }

    /// Send one request and pump worker messages until its result arrives.
    /// HTTP requests issued by the plugin meanwhile are served concurrently.
    async fn exchange(
        &mut self,
        message: &HostMessage<'_>,
        id: u64,
        record: &ExtensionRecord,
        method: &str,
        bridge: &Arc<HttpBridge>,
    ) -> Result<Value> {
        let result = self.pump(message, id, record, method, bridge).await;
        if let Err(Error::Io(_)) = &result {
            self.broken = true;
        }
        result
    }

    async fn pump(
        &mut self,
        message: &HostMessage<'_>,
        id: u64,
        record: &ExtensionRecord,
        method: &str,
        bridge: &Arc<HttpBridge>,
    ) -> Result<Value> {
        let Self {
            stdin,
            stdout,
            broken,
            ..
        } = self;
        write_line(stdin, message).await?;

        let mut http = FuturesUnordered::new();
        loop {
            tokio::select! {
                Some((request_id, outcome)) = http.next(), if !http.is_empty() => {
                    write_line(stdin, &http_result(request_id, outcome)).await?;
                },
                line = stdout.next_line() => {
                    let Some(line) = line? else {
                        *broken = true;
                        return Err(Error::plugin(&record.id, method, "worker exited unexpectedly"));
                    };
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    trace!(extension_id = %record.id, raw = %trimmed, "worker -> host");
                    match serde_json::from_str::<WorkerMessage>(trimmed) {
                        Ok(WorkerMessage::Result { id: got, ok, value, error }) if got == id => {
                            return if ok {
                                Ok(value)
                            } else {
                                Err(plugin_error(record, method, error))
                            };
                        },
                        Ok(WorkerMessage::Result { id: got, .. }) => {
                            warn!(extension_id = %record.id, id = got, "result for unknown request id");
                        },
                        Ok(WorkerMessage::Http { request_id, url, headers, search_params, timeout_ms }) => {
                            let bridge = Arc::clone(bridge);
                            let request = HttpGetRequest {
                                url,
                                headers: headers.unwrap_or_default(),
                                search_params: search_params.unwrap_or_default(),
                                timeout_ms,
                            };
                            http.push(async move { (request_id, bridge.get(request).await) });
                        },
                        Ok(WorkerMessage::Log { level, message, meta }) => {
                            forward_log(record, &level, &message, meta.as_ref());
                        },
                        Err(e) => {
                            debug!(extension_id = %record.id, error = %e, line = %trimmed, "worker sent non-protocol line");
                        },
                    }
                },
            }
        }
    }

    pub(crate) async fn kill(mut self) {
        if let Some(handle) = self.stderr_task.take() {
            handle.abort();
        }
        if let Err(e) = self.child.kill().await {
            debug!(extension_id = %self.extension_id, error = %e, "worker already exited");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(handle) = self.stderr_task.take() {
            handle.abort();
        }
    }
}

async fn write_line(stdin: &mut ChildStdin, message: &HostMessage<'_>) -> Result<()> {
    let mut payload = serde_json::to_string(message)?;
    payload.push('\n');
    stdin.write_all(payload.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}

fn http_result(
    request_id: u64,
    outcome: Result<HttpGetResponse>,
) -> HostMessage<'static> {
    match outcome {
        Ok(resp) => HostMessage::HttpResult {
            request_id,
            ok: true,
            status: Some(resp.status),
            body: Some(resp.body),
            error: None,
            kind: None,
        },
        Err(e) => HostMessage::HttpResult {
            request_id,
            ok: false,
            status: None,
            body: None,
            kind: Some(if e.is_validation() {
                "validation"
            } else {
                "domain"
            }),
            error: Some(e.to_string()),
        },
    }
}

fn plugin_error(record: &ExtensionRecord, method: &str, error: Option<WorkerError>) -> Error {
    let Some(error) = error else {
        return Error::plugin(&record.id, method, "unknown error");
    };
    match error.kind.as_str() {
        "validation" => Error::validation(error.message),
        _ => Error::plugin(&record.id, method, error.message),
    }
}

fn forward_log(record: &ExtensionRecord, level: &str, message: &str, meta: Option<&Value>) {
    let meta = meta.map(Value::to_string).unwrap_or_default();
    match level {
        "debug" => debug!(
            extension_id = %record.id,
            extension_name = %record.name,
            extension_version = %record.version,
            meta = %meta,
            "{message}"
        ),
        "warn" => warn!(
            extension_id = %record.id,
            extension_name = %record.name,
            extension_version = %record.version,
            meta = %meta,
            "{message}"
        ),
        "error" => error!(
            extension_id = %record.id,
            extension_name = %record.name,
            extension_version = %record.version,
            meta = %meta,
            "{message}"
        ),
        _ => info!(
            extension_id = %record.id,
            extension_name = %record.name,
            extension_version = %record.version,
            meta = %meta,
            "{message}"
        ),
    }
}
