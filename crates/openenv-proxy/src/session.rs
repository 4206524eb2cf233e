//! Proxy session: episode bookkeeping, action dispatch, and pre-forward
//! validation.
//!
//! The session talks to the engine only through [`EngineApi`], which has no
//! step method, so every code path here is structurally unable to advance the
//! simulation clock. Ownership validation prefers the stepper's snapshot (no
//! engine traffic at all for a rejection) and falls back to a live ownership
//! query when no usable snapshot is configured.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use uuid::Uuid;

use zeroad_env_core::action::{Action, Observation, ResetRequest, SessionState, ValidationError};
use zeroad_env_core::command::EngineCommand;
use zeroad_env_core::config::{env_or, env_parse_or};
use zeroad_env_core::snapshot::{EntityIndex, Snapshot};
use zeroad_env_core::transport::{
    DEFAULT_TIMEOUT, EngineApi, SIM_TIME_QUERY, TransportError, parse_sim_time,
};

/// Gap between the two sim-time samples used for stepper detection.
const STEPPER_PROBE_GAP: Duration = Duration::from_millis(50);

/// Process-scoped proxy configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub bind_addr: String,
    pub rl_url: String,
    /// Snapshot file written by the stepper; enables engine-free validation.
    pub snapshot_path: Option<PathBuf>,
    /// A snapshot older than this is ignored for validation.
    pub snapshot_stale_after: Duration,
}

impl ProxySettings {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_or("ZEROAD_PROXY_ADDR", "127.0.0.1:8001"),
            rl_url: env_or("ZEROAD_RL_URL", "http://127.0.0.1:6000"),
            snapshot_path: std::env::var("ZEROAD_STATE_OUT")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            snapshot_stale_after: Duration::from_secs_f64(env_parse_or(
                "ZEROAD_STATE_STALE_AFTER",
                10.0,
            )),
        }
    }
}

enum ValidateFailure {
    Rejected(ValidationError),
    Transport(TransportError),
}

/// Stateful proxy session for one running engine instance.
pub struct Session {
    engine: Arc<dyn EngineApi>,
    rl_url: String,
    snapshot_path: Option<PathBuf>,
    snapshot_stale_after: Duration,
    episode_id: Option<String>,
    step_count: u64,
    last_sim_time: Option<f64>,
    stepper_detected: Option<bool>,
}

impl Session {
    pub fn new(
        engine: Arc<dyn EngineApi>,
        rl_url: impl Into<String>,
        snapshot_path: Option<PathBuf>,
        snapshot_stale_after: Duration,
    ) -> Self {
        Self {
            engine,
            rl_url: rl_url.into(),
            snapshot_path,
            snapshot_stale_after,
            episode_id: None,
            step_count: 0,
            last_sim_time: None,
            stepper_detected: None,
        }
    }

    pub fn from_settings(engine: Arc<dyn EngineApi>, settings: &ProxySettings) -> Self {
        Self::new(
            engine,
            settings.rl_url.clone(),
            settings.snapshot_path.clone(),
            settings.snapshot_stale_after,
        )
    }

    pub fn state(&self) -> SessionState {
        SessionState {
            episode_id: self.episode_id.clone(),
            step_count: self.step_count,
            rl_url: self.rl_url.clone(),
            last_sim_time: self.last_sim_time,
            stepper_detected: self.stepper_detected,
        }
    }

    /// Resets local session state. Does not reset the running match; it
    /// probes connectivity and whether a stepper is advancing the clock.
    pub async fn reset(&mut self, req: ResetRequest) -> Observation {
        self.episode_id = Some(
            req.episode_id
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        );
        self.step_count = 0;

        let ping = match self.engine.evaluate("1+1", DEFAULT_TIMEOUT).await {
            Ok(v) => v,
            Err(err) => {
                return self.observe_err("rl_interface_unreachable", err.to_string());
            }
        };

        // A stepper is running iff sim time advances on its own between two
        // samples.
        let t1 = self.sim_time().await;
        tokio::time::sleep(STEPPER_PROBE_GAP).await;
        let t2 = self.sim_time().await;
        self.stepper_detected = match (t1, t2) {
            (Some(a), Some(b)) => Some(b > a),
            _ => None,
        };
        self.last_sim_time = t2.or(t1);

        self.observe_ok(json!({"ping": ping, "seed": req.seed}))
    }

    /// Executes one OpenEnv step. Never calls the engine's native `/step`.
    pub async fn step(&mut self, action: Action, timeout_s: Option<f64>) -> Observation {
        let timeout = timeout_s
            .filter(|s| *s > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(DEFAULT_TIMEOUT);

        let result = match action {
            Action::Evaluate { code } => {
                if code.trim().is_empty() {
                    return self.reject(ValidationError::invalid_command(
                        "evaluate requires non-empty 'code'",
                    ));
                }
                self.engine.evaluate(&code, timeout).await
            }
            Action::PushCommand { player_id, cmd } => {
                if let Err(err) = cmd.check_shape() {
                    return self.reject(err);
                }
                match self.validate_ownership(player_id, &cmd).await {
                    Ok(()) => {}
                    Err(ValidateFailure::Rejected(err)) => return self.reject(err),
                    Err(ValidateFailure::Transport(err)) => {
                        return self.observe_err("transport_error", err.to_string());
                    }
                }
                let payload = match serde_json::to_value(&cmd) {
                    Ok(v) => v,
                    Err(e) => return self.reject(ValidationError::invalid_command(e.to_string())),
                };
                self.engine.push_command(player_id, &payload, timeout).await
            }
        };

        match result {
            Ok(value) => {
                self.step_count += 1;
                if let Some(t) = self.sim_time().await {
                    self.last_sim_time = Some(t);
                }
                self.observe_ok(value)
            }
            Err(err) => self.observe_err("transport_error", err.to_string()),
        }
    }

    async fn sim_time(&self) -> Option<f64> {
        let v = self.engine.evaluate(SIM_TIME_QUERY, DEFAULT_TIMEOUT).await.ok()?;
        parse_sim_time(&v)
    }

    async fn validate_ownership(
        &self,
        player_id: u32,
        cmd: &EngineCommand,
    ) -> Result<(), ValidateFailure> {
        let owned = cmd.owned_entities();
        let targets = cmd.referenced_targets();
        if owned.is_empty() && targets.is_empty() {
            return Ok(());
        }

        if let Some(index) = self.fresh_snapshot_index() {
            return index
                .validate_ownership(player_id, cmd)
                .map_err(ValidateFailure::Rejected);
        }

        // No usable snapshot: ask the engine's ownership components directly.
        // Still an /evaluate call; the simulation is not stepped.
        let code = ownership_query_code(player_id, &owned, &targets);
        let out = self
            .engine
            .evaluate(&code, DEFAULT_TIMEOUT)
            .await
            .map_err(ValidateFailure::Transport)?;
        parse_ownership_result(&out).map_err(ValidateFailure::Rejected)
    }

    fn fresh_snapshot_index(&self) -> Option<EntityIndex> {
        let path = self.snapshot_path.as_deref()?;
        let snap = Snapshot::load(path)?;
        let fresh =
            snap.age_secs(Snapshot::now_timestamp()) <= self.snapshot_stale_after.as_secs_f64();
        fresh.then(|| snap.entity_index())
    }

    fn observe_ok(&self, result: Value) -> Observation {
        Observation {
            ok: true,
            result,
            error: None,
            detail: None,
            episode_id: self.episode_id.clone(),
            step_count: self.step_count,
            stepper_detected: self.stepper_detected,
            sim_time: self.last_sim_time,
        }
    }

    fn observe_err(&self, tag: &str, detail: String) -> Observation {
        Observation {
            ok: false,
            result: Value::Null,
            error: Some(tag.to_string()),
            detail: Some(detail),
            episode_id: self.episode_id.clone(),
            step_count: self.step_count,
            stepper_detected: self.stepper_detected,
            sim_time: self.last_sim_time,
        }
    }

    fn reject(&self, err: ValidationError) -> Observation {
        self.observe_err(err.tag(), err.to_string())
    }
}

fn ownership_query_code(player_id: u32, owned: &[u64], exist: &[u64]) -> String {
    let owned = serde_json::to_string(owned).unwrap_or_else(|_| "[]".to_string());
    let exist = serde_json::to_string(exist).unwrap_or_else(|_| "[]".to_string());
    format!(
        "(function(){{\
var playerId={player_id};\
var ownedIds={owned};\
var existIds={exist};\
var missing=[];\
var wrongOwner=[];\
function exists(id){{\
return !!(Engine.QueryInterface(id,IID_Ownership)||Engine.QueryInterface(id,IID_Identity)||Engine.QueryInterface(id,IID_Position));\
}}\
for(var i=0;i<ownedIds.length;i++){{\
var id=ownedIds[i];\
var cmpOwn=Engine.QueryInterface(id,IID_Ownership);\
if(!cmpOwn){{missing.push(id);continue;}}\
var owner=typeof cmpOwn.GetOwner==='function'?cmpOwn.GetOwner():cmpOwn.owner;\
if(owner!==playerId)wrongOwner.push({{id:id,owner:owner}});\
}}\
for(var j=0;j<existIds.length;j++){{\
var tid=existIds[j];\
if(!exists(tid))missing.push(tid);\
}}\
if(missing.length||wrongOwner.length)return{{ok:false,missing:missing,wrongOwner:wrongOwner}};\
return{{ok:true}};\
}})()"
    )
}

fn parse_ownership_result(out: &Value) -> Result<(), ValidationError> {
    if out.get("ok").and_then(Value::as_bool) != Some(false) {
        // Best effort: an unexpected shape is treated as "nothing to reject".
        return Ok(());
    }

    let missing: Vec<u64> = out
        .get("missing")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_default();
    if !missing.is_empty() {
        return Err(ValidationError::InvalidEntityIds { missing });
    }

    let wrong: Vec<(u64, i64)> = out
        .get("wrongOwner")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(|w| {
                    Some((w.get("id")?.as_u64()?, w.get("owner")?.as_i64()?))
                })
                .collect()
        })
        .unwrap_or_default();
    if !wrong.is_empty() {
        return Err(ValidationError::WrongOwner { entities: wrong });
    }

    Err(ValidationError::invalid_command("engine rejected the command"))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    use super::*;
    use zeroad_env_core::snapshot::EngineState;

    #[derive(Default)]
    struct FakeEngine {
        evaluations: Mutex<VecDeque<Result<Value, TransportError>>>,
        eval_codes: Mutex<Vec<String>>,
        pushed: Mutex<Vec<(u32, Value)>>,
        push_results: Mutex<VecDeque<Result<Value, TransportError>>>,
    }

    impl FakeEngine {
        fn queue_eval(&self, result: Result<Value, TransportError>) {
            self.evaluations.lock().unwrap().push_back(result);
        }

        fn queue_push(&self, result: Result<Value, TransportError>) {
            self.push_results.lock().unwrap().push_back(result);
        }

        fn eval_codes(&self) -> Vec<String> {
            self.eval_codes.lock().unwrap().clone()
        }

        fn pushed(&self) -> Vec<(u32, Value)> {
            self.pushed.lock().unwrap().clone()
        }

        fn engine_calls(&self) -> usize {
            self.eval_codes.lock().unwrap().len() + self.pushed.lock().unwrap().len()
        }
    }

    impl EngineApi for FakeEngine {
        fn evaluate<'a>(
            &'a self,
            code: &'a str,
            _timeout: Duration,
        ) -> Pin<Box<dyn Future<Output = Result<Value, TransportError>> + Send + 'a>> {
            Box::pin(async move {
                self.eval_codes.lock().unwrap().push(code.to_string());
                self.evaluations
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| {
                        Err(TransportError::Connect("no evaluation queued".to_string()))
                    })
            })
        }

        fn push_command<'a>(
            &'a self,
            player_id: u32,
            cmd: &'a Value,
            _timeout: Duration,
        ) -> Pin<Box<dyn Future<Output = Result<Value, TransportError>> + Send + 'a>> {
            Box::pin(async move {
                self.pushed.lock().unwrap().push((player_id, cmd.clone()));
                self.push_results
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| {
                        Err(TransportError::Connect("no push result queued".to_string()))
                    })
            })
        }
    }

    fn session(engine: Arc<FakeEngine>, snapshot_path: Option<PathBuf>) -> Session {
        Session::new(
            engine,
            "http://127.0.0.1:6000",
            snapshot_path,
            Duration::from_secs(10),
        )
    }

    fn write_snapshot(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("latest_state.json");
        let state: EngineState = serde_json::from_value(json!({
            "entities": {
                "10": {"owner": 1, "template": "units/athen/support_female_citizen", "position": [480.0, 360.0]},
                "11": {"owner": 2, "template": "units/spart/infantry_spearman_b", "position": [100.0, 90.0]},
                "12": {"owner": 0, "template": "gaia/tree/oak", "position": [200.0, 210.0]}
            },
            "players": []
        }))
        .unwrap();
        Snapshot {
            step: 50,
            time: Snapshot::now_timestamp(),
            state,
        }
        .write_atomic(&path)
        .unwrap();
        path
    }

    fn walk(entities: Vec<u64>) -> Action {
        Action::PushCommand {
            player_id: 1,
            cmd: EngineCommand::Walk {
                entities,
                x: 480.0,
                z: 360.0,
                queued: false,
                push_front: None,
            },
        }
    }

    #[tokio::test]
    async fn reset_resets_counter_and_mints_fresh_episode_ids() {
        let engine = Arc::new(FakeEngine::default());
        let mut session = session(engine.clone(), None);

        for _ in 0..2 {
            engine.queue_eval(Ok(json!(2)));
            engine.queue_eval(Ok(json!({"time": 1.0})));
            engine.queue_eval(Ok(json!({"time": 2.0})));
        }

        let first = session.reset(ResetRequest::default()).await;
        assert!(first.ok);
        assert_eq!(first.step_count, 0);
        assert_eq!(first.stepper_detected, Some(true));
        let first_id = first.episode_id.clone().expect("episode id");

        let second = session.reset(ResetRequest::default()).await;
        let second_id = second.episode_id.clone().expect("episode id");
        assert_ne!(first_id, second_id);
        assert_eq!(second.step_count, 0);
    }

    #[tokio::test]
    async fn reset_honors_caller_supplied_episode_id() {
        let engine = Arc::new(FakeEngine::default());
        let mut session = session(engine.clone(), None);
        engine.queue_eval(Ok(json!(2)));

        let obs = session
            .reset(ResetRequest {
                seed: Some(7),
                episode_id: Some("match-42".to_string()),
            })
            .await;
        assert!(obs.ok);
        assert_eq!(obs.episode_id.as_deref(), Some("match-42"));
        assert_eq!(obs.result.get("seed"), Some(&json!(7)));
    }

    #[tokio::test]
    async fn reset_reports_unreachable_engine() {
        let engine = Arc::new(FakeEngine::default());
        let mut session = session(engine.clone(), None);
        engine.queue_eval(Err(TransportError::Connect("refused".to_string())));

        let obs = session.reset(ResetRequest::default()).await;
        assert!(!obs.ok);
        assert_eq!(obs.error.as_deref(), Some("rl_interface_unreachable"));
    }

    #[tokio::test]
    async fn evaluate_forwards_code_and_returns_result() {
        let engine = Arc::new(FakeEngine::default());
        let mut session = session(engine.clone(), None);
        engine.queue_eval(Ok(json!(2)));

        let obs = session
            .step(
                Action::Evaluate {
                    code: "1+1".to_string(),
                },
                None,
            )
            .await;
        assert!(obs.ok);
        assert_eq!(obs.result, json!(2));
        assert_eq!(obs.step_count, 1);
        assert_eq!(engine.eval_codes()[0], "1+1");
    }

    #[tokio::test]
    async fn evaluate_with_empty_code_is_rejected_locally() {
        let engine = Arc::new(FakeEngine::default());
        let mut session = session(engine.clone(), None);

        let obs = session
            .step(
                Action::Evaluate {
                    code: "  ".to_string(),
                },
                None,
            )
            .await;
        assert!(!obs.ok);
        assert_eq!(obs.error.as_deref(), Some("invalid_command"));
        assert_eq!(engine.engine_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_entity_is_rejected_without_engine_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_snapshot(&dir);
        let engine = Arc::new(FakeEngine::default());
        let mut session = session(engine.clone(), Some(path));

        let obs = session.step(walk(vec![999_999]), None).await;
        assert!(!obs.ok);
        assert_eq!(obs.error.as_deref(), Some("invalid_entity_ids"));
        assert_eq!(obs.step_count, 0);
        assert_eq!(engine.engine_calls(), 0);
    }

    #[tokio::test]
    async fn wrong_owner_is_rejected_without_engine_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_snapshot(&dir);
        let engine = Arc::new(FakeEngine::default());
        let mut session = session(engine.clone(), Some(path));

        // Entity 11 belongs to player 2, request claims player 1.
        let obs = session.step(walk(vec![11]), None).await;
        assert!(!obs.ok);
        assert_eq!(obs.error.as_deref(), Some("wrong_owner"));
        assert_eq!(engine.engine_calls(), 0);
    }

    #[tokio::test]
    async fn malformed_command_is_rejected_before_validation() {
        let engine = Arc::new(FakeEngine::default());
        let mut session = session(engine.clone(), None);

        let obs = session.step(walk(vec![]), None).await;
        assert!(!obs.ok);
        assert_eq!(obs.error.as_deref(), Some("invalid_command"));
        assert_eq!(engine.engine_calls(), 0);
    }

    #[tokio::test]
    async fn valid_command_is_forwarded_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_snapshot(&dir);
        let engine = Arc::new(FakeEngine::default());
        let mut session = session(engine.clone(), Some(path));
        engine.queue_push(Ok(json!({"ok": true})));

        let obs = session.step(walk(vec![10]), None).await;
        assert!(obs.ok);
        assert_eq!(obs.step_count, 1);

        let pushed = engine.pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].0, 1);
        assert_eq!(pushed[0].1.get("type"), Some(&json!("walk")));
    }

    #[tokio::test]
    async fn gather_from_gaia_target_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_snapshot(&dir);
        let engine = Arc::new(FakeEngine::default());
        let mut session = session(engine.clone(), Some(path));
        engine.queue_push(Ok(json!({"ok": true})));

        let obs = session
            .step(
                Action::PushCommand {
                    player_id: 1,
                    cmd: EngineCommand::Gather {
                        entities: vec![10],
                        target: 12,
                        queued: false,
                    },
                },
                None,
            )
            .await;
        assert!(obs.ok);
    }

    #[tokio::test]
    async fn live_ownership_query_is_used_without_snapshot() {
        let engine = Arc::new(FakeEngine::default());
        let mut session = session(engine.clone(), None);
        engine.queue_eval(Ok(json!({"ok": false, "missing": [999], "wrongOwner": []})));

        let obs = session.step(walk(vec![999]), None).await;
        assert!(!obs.ok);
        assert_eq!(obs.error.as_deref(), Some("invalid_entity_ids"));
        assert!(engine.pushed().is_empty());

        let codes = engine.eval_codes();
        assert_eq!(codes.len(), 1);
        assert!(codes[0].contains("ownedIds=[999]"));
    }

    #[tokio::test]
    async fn stale_snapshot_falls_back_to_live_query() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest_state.json");
        Snapshot {
            step: 1,
            time: Snapshot::now_timestamp() - 3600.0,
            state: EngineState::default(),
        }
        .write_atomic(&path)
        .unwrap();

        let engine = Arc::new(FakeEngine::default());
        let mut session = session(engine.clone(), Some(path));
        engine.queue_eval(Ok(json!({"ok": true})));
        engine.queue_push(Ok(json!({"ok": true})));

        let obs = session.step(walk(vec![10]), None).await;
        assert!(obs.ok);
        assert!(engine.eval_codes()[0].contains("ownedIds=[10]"));
        assert_eq!(engine.pushed().len(), 1);
    }

    #[tokio::test]
    async fn transport_failure_surfaces_with_generic_tag() {
        let engine = Arc::new(FakeEngine::default());
        let mut session = session(engine.clone(), None);
        engine.queue_eval(Err(TransportError::Timeout(Duration::from_secs(10))));

        let obs = session
            .step(
                Action::Evaluate {
                    code: "1+1".to_string(),
                },
                None,
            )
            .await;
        assert!(!obs.ok);
        assert_eq!(obs.error.as_deref(), Some("transport_error"));
        assert_eq!(obs.step_count, 0);
    }

    #[test]
    fn ownership_query_embeds_both_id_lists() {
        let code = ownership_query_code(2, &[5, 6], &[77]);
        assert!(code.contains("var playerId=2;"));
        assert!(code.contains("var ownedIds=[5,6];"));
        assert!(code.contains("var existIds=[77];"));
        assert!(code.contains("IID_Ownership"));
    }

    #[test]
    fn ownership_result_parsing_prefers_missing_over_wrong_owner() {
        let err = parse_ownership_result(
            &json!({"ok": false, "missing": [9], "wrongOwner": [{"id": 5, "owner": 2}]}),
        )
        .unwrap_err();
        assert_eq!(err.tag(), "invalid_entity_ids");

        let err =
            parse_ownership_result(&json!({"ok": false, "wrongOwner": [{"id": 5, "owner": 2}]}))
                .unwrap_err();
        assert_eq!(
            err,
            ValidationError::WrongOwner {
                entities: vec![(5, 2)]
            }
        );

        assert!(parse_ownership_result(&json!({"ok": true})).is_ok());
        assert!(parse_ownership_result(&json!(2)).is_ok());
    }
}
