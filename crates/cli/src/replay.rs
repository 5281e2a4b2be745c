//! `vnf-ledger replay` -- apply a JSON-lines call log to a fresh ledger.
//!
//! Each non-blank line is one call, for example
//!
//! ```text
//! {"op": "confirm_registration", "caller": "backend", "identity": "alice", "success": true}
//! {"op": "request_deploy", "caller": "alice", "template_id": "tplA", "parameters": "cpu=2"}
//! ```
//!
//! Every call produces exactly one output line: the emitted event envelope,
//! the query result, or the rejection. Lines starting with `#` are comments.
//!
//! The ledger clock starts at [`REPLAY_EPOCH`] and ticks one second per call,
//! so replaying a script twice prints the same bytes.

use std::io::Write;

use serde::Deserialize;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::debug;
use vnf_ledger_engine::{
    CorrelationId, Identity, LedgerError, LifecycleEngine, ManualClock, ResourceRecord,
};
use vnf_ledger_storage::MemoryStorage;

pub(crate) const REPLAY_EPOCH: OffsetDateTime = OffsetDateTime::UNIX_EPOCH;

/// One inbound ledger call.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum Call {
    SetBackend {
        caller: Identity,
        backend: Identity,
    },
    RequestRegistration {
        caller: Identity,
        proof: String,
    },
    ConfirmRegistration {
        caller: Identity,
        identity: Identity,
        success: bool,
    },
    RequestUnregistration {
        caller: Identity,
    },
    ConfirmUnregistration {
        caller: Identity,
        identity: Identity,
        success: bool,
    },
    RequestDeploy {
        caller: Identity,
        template_id: String,
        #[serde(default)]
        parameters: String,
    },
    ConfirmDeploy {
        caller: Identity,
        correlation_id: CorrelationId,
        owner: Identity,
        success: bool,
        #[serde(default)]
        external_id: String,
    },
    RequestDelete {
        caller: Identity,
        correlation_id: CorrelationId,
    },
    ConfirmDelete {
        caller: Identity,
        correlation_id: CorrelationId,
        owner: Identity,
        success: bool,
    },
    GetRecord {
        caller: Identity,
        correlation_id: CorrelationId,
    },
    ListRecords {
        caller: Identity,
        owner: Identity,
    },
}

/// Totals for a replayed script.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReplaySummary {
    pub(crate) applied: usize,
    pub(crate) rejected: usize,
    pub(crate) malformed: usize,
}

impl ReplaySummary {
    pub(crate) fn is_clean(&self) -> bool {
        self.rejected == 0 && self.malformed == 0
    }
}

/// Apply every call in `script` to `engine`, writing one JSON line per call.
///
/// `clock` must be the engine's clock; it advances after each call.
pub(crate) async fn run(
    engine: &mut LifecycleEngine<MemoryStorage>,
    clock: &ManualClock,
    script: &str,
    out: &mut impl Write,
) -> std::io::Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();

    for (index, line) in script.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let output = match serde_json::from_str::<Call>(trimmed) {
            Ok(call) => match apply(engine, call).await {
                Ok(result) => {
                    summary.applied += 1;
                    json!({ "line": line_no, "ok": true, "result": result })
                }
                Err(err) => {
                    summary.rejected += 1;
                    debug!(line = line_no, code = err.code(), "call rejected");
                    json!({
                        "line": line_no,
                        "ok": false,
                        "error": err.to_string(),
                        "code": err.code(),
                        "retryable": err.is_retryable(),
                    })
                }
            },
            Err(err) => {
                summary.malformed += 1;
                json!({
                    "line": line_no,
                    "ok": false,
                    "error": err.to_string(),
                    "code": "malformed_call",
                    "retryable": false,
                })
            }
        };
        writeln!(out, "{}", output)?;
        clock.advance(time::Duration::SECOND);
    }

    Ok(summary)
}

async fn apply(
    engine: &mut LifecycleEngine<MemoryStorage>,
    call: Call,
) -> Result<Value, LedgerError> {
    let envelope = match call {
        Call::SetBackend { caller, backend } => {
            engine.set_backend(&caller, backend.clone())?;
            return Ok(json!({ "backend": backend }));
        }
        Call::RequestRegistration { caller, proof } => {
            engine.request_registration(&caller, &proof).await?
        }
        Call::ConfirmRegistration {
            caller,
            identity,
            success,
        } => engine.confirm_registration(&caller, &identity, success).await?,
        Call::RequestUnregistration { caller } => engine.request_unregistration(&caller).await?,
        Call::ConfirmUnregistration {
            caller,
            identity,
            success,
        } => {
            engine
                .confirm_unregistration(&caller, &identity, success)
                .await?
        }
        Call::RequestDeploy {
            caller,
            template_id,
            parameters,
        } => {
            engine
                .request_deploy(&caller, &template_id, &parameters)
                .await?
        }
        Call::ConfirmDeploy {
            caller,
            correlation_id,
            owner,
            success,
            external_id,
        } => {
            engine
                .confirm_deploy(&caller, correlation_id, &owner, success, &external_id)
                .await?
        }
        Call::RequestDelete {
            caller,
            correlation_id,
        } => engine.request_delete(&caller, correlation_id).await?,
        Call::ConfirmDelete {
            caller,
            correlation_id,
            owner,
            success,
        } => {
            engine
                .confirm_delete(&caller, correlation_id, &owner, success)
                .await?
        }
        Call::GetRecord {
            caller,
            correlation_id,
        } => {
            let record = engine.get_record(&caller, correlation_id).await?;
            return Ok(record_json(&record));
        }
        Call::ListRecords { caller, owner } => {
            let records = engine.list_records(&caller, &owner).await?;
            return Ok(Value::Array(records.iter().map(record_json).collect()));
        }
    };
    Ok(json!({ "event": envelope }))
}

fn record_json(record: &ResourceRecord) -> Value {
    json!({
        "correlation_id": record.correlation_id,
        "owner": record.owner,
        "template_id": record.template_id,
        "parameters": record.parameters,
        "external_id": record.external_id,
        "state": record.state(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use vnf_ledger_engine::EngineConfig;

    use super::*;

    async fn replay_raw(script: &str) -> (ReplaySummary, String) {
        let clock = Arc::new(ManualClock::new(REPLAY_EPOCH));
        let mut engine = LifecycleEngine::with_creator(
            MemoryStorage::new(),
            Identity::from("creator"),
            EngineConfig::default(),
        )
        .with_clock(clock.clone());
        let mut out = Vec::new();
        let summary = run(&mut engine, &clock, script, &mut out).await.unwrap();
        (summary, String::from_utf8(out).unwrap())
    }

    async fn replay(script: &str) -> (ReplaySummary, Vec<Value>) {
        let (summary, raw) = replay_raw(script).await;
        let lines = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        (summary, lines)
    }

    #[tokio::test]
    async fn deploy_script_emits_events_in_order() {
        let script = r#"
# bootstrap
{"op": "set_backend", "caller": "creator", "backend": "backend"}
{"op": "confirm_registration", "caller": "backend", "identity": "U", "success": true}
{"op": "request_deploy", "caller": "U", "template_id": "tplA", "parameters": "cpu=2"}
{"op": "confirm_deploy", "caller": "backend", "correlation_id": 1, "owner": "U", "success": true, "external_id": "vnf-1"}
{"op": "get_record", "caller": "U", "correlation_id": 1}
"#;
        let (summary, lines) = replay(script).await;
        assert!(summary.is_clean());
        assert_eq!(summary.applied, 5);
        assert_eq!(lines.len(), 5);

        assert_eq!(lines[0]["line"], 3);
        assert_eq!(lines[2]["result"]["event"]["event"]["type"], "DeployRequested");
        assert_eq!(lines[2]["result"]["event"]["event"]["correlation_id"], 1);
        assert_eq!(lines[3]["result"]["event"]["sequence"], 3);
        assert_eq!(lines[4]["result"]["state"], "deployed");
        assert_eq!(lines[4]["result"]["external_id"], "vnf-1");
    }

    #[tokio::test]
    async fn rejections_are_reported_and_replay_continues() {
        let script = r#"
{"op": "request_deploy", "caller": "U", "template_id": "tplA"}
{"op": "set_backend", "caller": "U", "backend": "U"}
not json
{"op": "set_backend", "caller": "creator", "backend": "backend"}
"#;
        let (summary, lines) = replay(script).await;
        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.applied, 1);
        assert_eq!(lines[0]["code"], "not_registered");
        assert_eq!(lines[0]["retryable"], true);
        assert_eq!(lines[1]["code"], "unauthorized");
        assert_eq!(lines[2]["code"], "malformed_call");
        assert_eq!(lines[3]["ok"], true);
    }

    #[tokio::test]
    async fn replay_output_is_reproducible() {
        let script = r#"
{"op": "set_backend", "caller": "creator", "backend": "backend"}
{"op": "confirm_registration", "caller": "backend", "identity": "U", "success": true}
{"op": "request_deploy", "caller": "U", "template_id": "tplA"}
"#;
        let (_, first) = replay_raw(script).await;
        let (_, second) = replay_raw(script).await;
        assert_eq!(first, second);

        let lines: Vec<Value> = first
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(
            lines[1]["result"]["event"]["emitted_at"],
            "1970-01-01T00:00:01Z"
        );
        assert_eq!(
            lines[2]["result"]["event"]["emitted_at"],
            "1970-01-01T00:00:02Z"
        );
    }
}
