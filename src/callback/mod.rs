//! Engine callback protocol.
//!
//! The engine reports progress as `(code, json)` pairs. [`route`] turns one
//! callback into an [`Outcome`] (state change, log lines, session close) and
//! [`CallbackDispatcher`] applies it to the shared state and the log.

mod connection;
pub mod strings;
mod sub_task;
mod task_chain;

use crate::logs::LogAggregator;
use crate::model::{ExecutionState, LogItem, LogLevel, SessionStatus};
use crate::orchestrator::ExecutionStateCell;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    InternalError,
    InitFailed,
    ConnectionInfo,
    AllTasksCompleted,
    AsyncCallInfo,
    Destroyed,
    TaskChainError,
    TaskChainStart,
    TaskChainCompleted,
    TaskChainExtraInfo,
    TaskChainStopped,
    SubTaskError,
    SubTaskStart,
    SubTaskCompleted,
    SubTaskExtraInfo,
    SubTaskStopped,
    ReportRequest,
}

impl CallbackKind {
    pub fn from_code(code: i32) -> Option<Self> {
        let kind = match code {
            0 => CallbackKind::InternalError,
            1 => CallbackKind::InitFailed,
            2 => CallbackKind::ConnectionInfo,
            3 => CallbackKind::AllTasksCompleted,
            4 => CallbackKind::AsyncCallInfo,
            5 => CallbackKind::Destroyed,
            10000 => CallbackKind::TaskChainError,
            10001 => CallbackKind::TaskChainStart,
            10002 => CallbackKind::TaskChainCompleted,
            10003 => CallbackKind::TaskChainExtraInfo,
            10004 => CallbackKind::TaskChainStopped,
            20000 => CallbackKind::SubTaskError,
            20001 => CallbackKind::SubTaskStart,
            20002 => CallbackKind::SubTaskCompleted,
            20003 => CallbackKind::SubTaskExtraInfo,
            20004 => CallbackKind::SubTaskStopped,
            30000 => CallbackKind::ReportRequest,
            _ => return None,
        };
        Some(kind)
    }
}

/// A decoded callback.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackMessage {
    pub code: i32,
    pub kind: CallbackKind,
    /// Parsed payload; `None` when the JSON was absent, blank or malformed.
    pub details: Option<Value>,
}

impl CallbackMessage {
    /// Returns `None` for codes outside the protocol.
    pub fn decode(code: i32, json: Option<&str>) -> Option<Self> {
        let kind = CallbackKind::from_code(code)?;
        let details = match json.map(str::trim) {
            None | Some("") => None,
            Some(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(?kind, error = %e, "malformed callback payload");
                    None
                }
            },
        };
        Some(Self {
            code,
            kind,
            details,
        })
    }
}

/// A user-visible log line produced by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub content: String,
    pub level: LogLevel,
    pub tooltip: Option<String>,
}

impl LogLine {
    pub fn new(content: impl Into<String>, level: LogLevel) -> Self {
        Self {
            content: content.into(),
            level,
            tooltip: None,
        }
    }

    pub fn with_tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = Some(tooltip.into());
        self
    }

    fn into_item(self) -> LogItem {
        let item = LogItem::new(self.content, self.level);
        match self.tooltip {
            Some(tooltip) => item.with_tooltip(tooltip),
            None => item,
        }
    }
}

/// Everything one callback asks of the supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub state: Option<ExecutionState>,
    pub lines: Vec<LogLine>,
    pub end_session: Option<SessionStatus>,
}

impl Outcome {
    fn lines(lines: Vec<LogLine>) -> Self {
        Self {
            lines,
            ..Self::default()
        }
    }

    fn with_state(state: ExecutionState, lines: Vec<LogLine>) -> Self {
        Self {
            state: Some(state),
            lines,
            end_session: None,
        }
    }
}

/// Decide what a decoded callback means. Pure; no side effects besides
/// diagnostics.
pub fn route(msg: &CallbackMessage) -> Outcome {
    let details = msg.details.as_ref();
    // Handlers only run when there is a payload to inspect.
    let handle = |f: fn(CallbackKind, &Value) -> Vec<LogLine>| -> Vec<LogLine> {
        details.map(|d| f(msg.kind, d)).unwrap_or_default()
    };

    match msg.kind {
        CallbackKind::InternalError => {
            tracing::warn!(details = ?details, "engine internal error");
            Outcome::default()
        }
        CallbackKind::InitFailed => {
            let what = details.and_then(|d| str_field(d, "what")).unwrap_or_default();
            let why = details.and_then(|d| str_field(d, "why")).unwrap_or_default();
            tracing::error!(%what, %why, "engine initialization failed");
            let reason = if why.is_empty() {
                what
            } else {
                format!("{what} ({why})")
            };
            let mut line = LogLine::new(strings::tr_args("InitFailed", &[&reason]), LogLevel::Error);
            // Raw payload for the details view.
            if let Some(d) = details {
                line = line.with_tooltip(d.to_string());
            }
            Outcome::with_state(ExecutionState::Error, vec![line])
        }
        CallbackKind::ConnectionInfo => Outcome::lines(handle(connection::handle)),
        CallbackKind::AllTasksCompleted => Outcome {
            state: Some(ExecutionState::Idle),
            lines: handle(task_chain::handle),
            end_session: Some(SessionStatus::Completed),
        },
        CallbackKind::AsyncCallInfo => {
            tracing::debug!(details = ?details, "async call info consumed by the orchestrator");
            Outcome::default()
        }
        CallbackKind::Destroyed => {
            tracing::info!("engine instance destroyed");
            Outcome::with_state(ExecutionState::Idle, Vec::new())
        }
        CallbackKind::TaskChainError => {
            Outcome::with_state(ExecutionState::Error, handle(task_chain::handle))
        }
        CallbackKind::TaskChainStopped => {
            Outcome::with_state(ExecutionState::Idle, handle(task_chain::handle))
        }
        CallbackKind::TaskChainStart
        | CallbackKind::TaskChainCompleted
        | CallbackKind::TaskChainExtraInfo => Outcome::lines(handle(task_chain::handle)),
        CallbackKind::SubTaskError
        | CallbackKind::SubTaskStart
        | CallbackKind::SubTaskCompleted
        | CallbackKind::SubTaskExtraInfo => Outcome::lines(handle(sub_task::handle)),
        CallbackKind::SubTaskStopped => {
            tracing::debug!("sub task stopped");
            Outcome::default()
        }
        CallbackKind::ReportRequest => {
            tracing::debug!(details = ?details, "report request ignored");
            Outcome::default()
        }
    }
}

/// Applies callbacks to the shared execution state and the log.
#[derive(Clone)]
pub struct CallbackDispatcher {
    logs: LogAggregator,
    state: ExecutionStateCell,
}

impl CallbackDispatcher {
    pub fn new(logs: LogAggregator, state: ExecutionStateCell) -> Self {
        Self { logs, state }
    }

    pub fn dispatch(&self, code: i32, json: Option<&str>) {
        let Some(msg) = CallbackMessage::decode(code, json) else {
            tracing::warn!(code, json = ?json, "unknown callback code");
            return;
        };
        tracing::debug!(kind = ?msg.kind, json = ?json, "dispatch");
        self.apply(route(&msg));
    }

    /// The state change lands before any line is queued.
    fn apply(&self, outcome: Outcome) {
        if let Some(state) = outcome.state {
            self.state.set(state);
        }
        for line in outcome.lines {
            self.logs.append(line.into_item());
        }
        if let Some(status) = outcome.end_session {
            self.logs.end_session(status);
        }
    }
}

// Lenient payload accessors: numbers and booleans read as strings, numeric
// strings read as integers.

pub(crate) fn str_field(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn int_field(v: &Value, key: &str) -> Option<i64> {
    match v.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

pub(crate) fn bool_field(v: &Value, key: &str) -> Option<bool> {
    match v.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    }
}

pub(crate) fn obj<'a>(v: &'a Value, key: &str) -> Option<&'a Value> {
    v.get(key).filter(|inner| inner.is_object())
}

pub(crate) fn join_array(v: &Value, key: &str, sep: &str) -> Option<String> {
    let items = v.get(key)?.as_array()?;
    let parts: Vec<String> = items
        .iter()
        .map(|item| match item {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    Some(parts.join(sep))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{RecordingStore, StoreEvent};

    fn routed(code: i32, json: &str) -> Outcome {
        route(&CallbackMessage::decode(code, Some(json)).unwrap())
    }

    #[test]
    fn unknown_codes_do_not_decode() {
        assert!(CallbackMessage::decode(6, Some("{}")).is_none());
        assert!(CallbackMessage::decode(-1, None).is_none());
        assert!(CallbackMessage::decode(40000, None).is_none());
    }

    #[test]
    fn malformed_payload_still_dispatches() {
        let msg = CallbackMessage::decode(10000, Some("{not json")).unwrap();
        assert_eq!(msg.details, None);
        let outcome = route(&msg);
        assert_eq!(outcome.state, Some(ExecutionState::Error));
        assert!(outcome.lines.is_empty());

        let blank = CallbackMessage::decode(3, Some("   ")).unwrap();
        assert_eq!(blank.details, None);
        let outcome = route(&blank);
        assert_eq!(outcome.state, Some(ExecutionState::Idle));
        assert_eq!(outcome.end_session, Some(SessionStatus::Completed));
    }

    #[test]
    fn all_tasks_completed_closes_the_session() {
        let outcome = routed(3, r#"{"finished_tasks":[1,2]}"#);
        assert_eq!(outcome.state, Some(ExecutionState::Idle));
        assert_eq!(outcome.end_session, Some(SessionStatus::Completed));
        assert_eq!(outcome.lines.len(), 1);
        assert_eq!(outcome.lines[0].level, LogLevel::Success);
    }

    #[test]
    fn init_failed_reports_what_and_why() {
        let outcome = routed(1, r#"{"what":"Resource","why":"missing"}"#);
        assert_eq!(outcome.state, Some(ExecutionState::Error));
        assert_eq!(
            outcome.lines,
            vec![LogLine::new(
                "Initialization failed: Resource (missing)",
                LogLevel::Error
            )
            .with_tooltip(r#"{"what":"Resource","why":"missing"}"#)]
        );
    }

    #[tokio::test]
    async fn tooltips_reach_the_log() {
        let logs = LogAggregator::spawn(10, None);
        let dispatcher = CallbackDispatcher::new(logs.clone(), ExecutionStateCell::new());
        dispatcher.dispatch(1, Some(r#"{"what":"Resource"}"#));
        dispatcher.dispatch(10001, Some(r#"{"taskchain":"Fight"}"#));
        logs.flush().await;

        let items = logs.snapshot();
        assert_eq!(items.len(), 2);
        assert!(items[0].has_details());
        assert!(items[0].to_line().ends_with(r#"| {"what":"Resource"}"#));
        assert!(!items[1].has_details());
    }

    #[test]
    fn async_call_info_is_not_logged() {
        let outcome = routed(4, r#"{"what":"Connect","details":{"ret":true}}"#);
        assert_eq!(outcome, Outcome::default());
    }

    #[test]
    fn destroyed_and_stopped_go_idle() {
        assert_eq!(routed(5, "{}").state, Some(ExecutionState::Idle));
        let stopped = routed(10004, r#"{"taskchain":"Mall"}"#);
        assert_eq!(stopped.state, Some(ExecutionState::Idle));
        assert_eq!(stopped.lines[0].level, LogLevel::Info);
    }

    #[test]
    fn payload_accessors_are_lenient() {
        let v: Value = serde_json::json!({"a": 12, "b": "34", "c": true, "d": ["x", 1]});
        assert_eq!(str_field(&v, "a").as_deref(), Some("12"));
        assert_eq!(int_field(&v, "b"), Some(34));
        assert_eq!(bool_field(&v, "c"), Some(true));
        assert_eq!(join_array(&v, "d", ", ").as_deref(), Some("x, 1"));
        assert!(obj(&v, "a").is_none());
    }

    #[tokio::test]
    async fn task_chain_error_sets_state_before_the_line_is_logged() {
        let state = ExecutionStateCell::new();
        state.set(ExecutionState::Running);
        let store = RecordingStore::observing(state.clone());
        let logs = LogAggregator::spawn(10, Some(Box::new(store.clone())));
        logs.start_session(vec!["Fight".into()]);
        let dispatcher = CallbackDispatcher::new(logs.clone(), state.clone());

        dispatcher.dispatch(10000, Some(r#"{"taskchain":"Fight"}"#));
        logs.flush().await;

        assert_eq!(state.get(), ExecutionState::Error);
        let events = store.events();
        match &events[1] {
            StoreEvent::Log(content, level, seen) => {
                assert!(content.contains("Combat"), "{content}");
                assert_eq!(*level, LogLevel::Error);
                assert_eq!(*seen, Some(ExecutionState::Error));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn extreme_counters_do_not_stop_later_callbacks() {
        let state = ExecutionStateCell::new();
        state.set(ExecutionState::Running);
        let logs = LogAggregator::spawn(10, None);
        let dispatcher = CallbackDispatcher::new(logs.clone(), state.clone());

        dispatcher.dispatch(
            2,
            Some(r#"{"what":"Reconnecting","details":{"times":9223372036854775807}}"#),
        );
        dispatcher.dispatch(
            20003,
            Some(r#"{"what":"EnterFacility","details":{"facility":"Mfg","index":"9223372036854775807"}}"#),
        );
        dispatcher.dispatch(
            20003,
            Some(r#"{"what":"StageDrops","details":{"stats":[{"itemName":"x","quantity":1e300,"addQuantity":-1e300}],"cur_times":1e300}}"#),
        );
        dispatcher.dispatch(10000, Some(r#"{"taskchain":"Fight"}"#));
        logs.flush().await;

        assert_eq!(state.get(), ExecutionState::Error);
        let lines = logs.snapshot();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[3].content, "Task error: Combat");
    }

    #[tokio::test]
    async fn unknown_code_changes_nothing() {
        let state = ExecutionStateCell::new();
        let logs = LogAggregator::spawn(10, None);
        let dispatcher = CallbackDispatcher::new(logs.clone(), state.clone());
        dispatcher.dispatch(12345, Some(r#"{"taskchain":"Fight"}"#));
        logs.flush().await;
        assert_eq!(state.get(), ExecutionState::Idle);
        assert!(logs.snapshot().is_empty());
    }
}
