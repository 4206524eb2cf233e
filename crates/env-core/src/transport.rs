//! HTTP client for the engine's built-in RL interface.
//!
//! The engine must be started with `--rl-interface=<host:port>`. Two routes
//! exist: `POST /evaluate` takes a raw JavaScript source string and returns
//! the JSON-encoded evaluation result, and `POST /step` takes newline-joined
//! `"<player_id>;<command_json>"` lines, advances the simulation one turn and
//! returns the engine state. This layer only forwards bytes and surfaces
//! transport failures; it never interprets command semantics and never
//! retries.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Engine-side query for the current simulation time in seconds.
///
/// Helper snippets return `JSON.stringify`-ed objects, hence the extra decode
/// in [`normalize_eval_result`].
pub const SIM_TIME_QUERY: &str = "(function(){\
var cmpTimer=Engine.QueryInterface(SYSTEM_ENTITY,IID_Timer);\
if(!cmpTimer) return JSON.stringify({error:'no IID_Timer'});\
var t=typeof cmpTimer.GetTime==='function'?cmpTimer.GetTime():-1;\
return JSON.stringify({time:t});\
})()";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("rl interface unreachable: {0}")]
    Connect(String),
    #[error("rl interface request timed out after {0:?}")]
    Timeout(Duration),
    #[error("rl interface returned http {0}")]
    Status(u16),
    #[error("rl interface returned non-json body: {0}")]
    Decode(String),
}

/// Boundary the proxy session uses to reach the engine.
///
/// Deliberately has no `step` method: advancing the simulation clock belongs
/// to the stepper alone, and consumers of this trait cannot do it by
/// construction. [`RlClient`] implements it against the live interface; tests
/// substitute queued fakes.
pub trait EngineApi: Send + Sync {
    fn evaluate<'a>(
        &'a self,
        code: &'a str,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Value, TransportError>> + Send + 'a>>;

    fn push_command<'a>(
        &'a self,
        player_id: u32,
        cmd: &'a Value,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Value, TransportError>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct RlClient {
    base_url: String,
    http: reqwest::Client,
}

impl RlClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(
        &self,
        route: &str,
        body: String,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let url = format!("{}/{route}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .body(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(timeout)
                } else {
                    TransportError::Connect(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        serde_json::from_str(&text).map_err(|_| TransportError::Decode(excerpt(&text)))
    }

    /// Evaluates JS in the simulation script interface and returns the
    /// (normalized) JSON result.
    pub async fn evaluate(&self, code: &str, timeout: Duration) -> Result<Value, TransportError> {
        let raw = self.post("evaluate", code.to_string(), timeout).await?;
        Ok(normalize_eval_result(raw))
    }

    /// Applies one simulation step with a list of `(player_id, command)`
    /// pairs. An empty list advances the clock one turn with no commands.
    ///
    /// This is the only call in the workspace that moves simulation time.
    pub async fn step(
        &self,
        commands: &[(u32, Value)],
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        self.post("step", step_body(commands), timeout).await
    }

    /// Injects a command through `IID_CommandQueue.PushLocalCommand` via
    /// `/evaluate`, so a running visual match picks it up without the
    /// simulation being stepped from here.
    pub async fn push_command(
        &self,
        player_id: u32,
        cmd: &Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        self.evaluate(&push_command_code(player_id, cmd), timeout)
            .await
    }
}

impl EngineApi for RlClient {
    fn evaluate<'a>(
        &'a self,
        code: &'a str,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Value, TransportError>> + Send + 'a>> {
        Box::pin(async move { RlClient::evaluate(self, code, timeout).await })
    }

    fn push_command<'a>(
        &'a self,
        player_id: u32,
        cmd: &'a Value,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Value, TransportError>> + Send + 'a>> {
        Box::pin(async move { RlClient::push_command(self, player_id, cmd, timeout).await })
    }
}

pub(crate) fn step_body(commands: &[(u32, Value)]) -> String {
    commands
        .iter()
        .map(|(pid, cmd)| format!("{pid};{cmd}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn push_command_code(player_id: u32, cmd: &Value) -> String {
    format!(
        "(function(){{\
var cmpCQ=Engine.QueryInterface(SYSTEM_ENTITY,IID_CommandQueue);\
cmpCQ.PushLocalCommand({player_id},{cmd});\
return JSON.stringify({{ok:true}});\
}})()"
    )
}

/// The RL interface JSON-encodes evaluation results; engine-side helper
/// snippets typically `JSON.stringify` theirs on top of that. If the decoded
/// value is itself a JSON object/array string, decode one more level.
pub fn normalize_eval_result(value: Value) -> Value {
    if let Value::String(s) = &value {
        let t = s.trim();
        let looks_encoded = (t.starts_with('{') && t.ends_with('}'))
            || (t.starts_with('[') && t.ends_with(']'));
        if looks_encoded && let Ok(inner) = serde_json::from_str::<Value>(t) {
            return inner;
        }
    }
    value
}

/// Best-effort extraction of `{time: <seconds>}` from a [`SIM_TIME_QUERY`]
/// result.
pub fn parse_sim_time(value: &Value) -> Option<f64> {
    value.get("time").and_then(Value::as_f64)
}

fn excerpt(s: &str) -> String {
    const MAX: usize = 200;
    let t = s.trim();
    if t.len() <= MAX {
        t.to_string()
    } else {
        let mut end = MAX;
        while !t.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &t[..end])
    }
}
