use super::strings::{tr, tr_args};
use super::{str_field, CallbackKind, LogLine};
use crate::model::LogLevel;
use serde_json::Value;

/// Task-chain callbacks (10000..=10004) and `AllTasksCompleted`.
pub(super) fn handle(kind: CallbackKind, details: &Value) -> Vec<LogLine> {
    let chain = || tr(&str_field(details, "taskchain").unwrap_or_else(|| "Unknown".into()));

    let line = match kind {
        CallbackKind::TaskChainError => {
            LogLine::new(format!("{}{}", tr("TaskError"), chain()), LogLevel::Error)
        }
        CallbackKind::TaskChainStart => {
            LogLine::new(format!("{}{}", tr("StartTask"), chain()), LogLevel::Trace)
        }
        CallbackKind::TaskChainCompleted => {
            LogLine::new(format!("{}{}", tr("CompleteTask"), chain()), LogLevel::Success)
        }
        CallbackKind::TaskChainStopped => {
            LogLine::new(format!("{}{}", tr("CompleteTask"), chain()), LogLevel::Info)
        }
        CallbackKind::TaskChainExtraInfo => return extra_info(details),
        CallbackKind::AllTasksCompleted => {
            LogLine::new(tr_args("AllTasksComplete", &[&""]), LogLevel::Success)
        }
        other => {
            tracing::warn!(kind = ?other, "not a task chain callback");
            return Vec::new();
        }
    };
    vec![line]
}

fn extra_info(details: &Value) -> Vec<LogLine> {
    let what = str_field(details, "what");
    let why = str_field(details, "why");
    match (what.as_deref(), why.as_deref()) {
        (Some("RoutingRestart"), Some("TooManyBattlesAhead")) => {
            let cost = str_field(details, "node_cost").unwrap_or_else(|| "?".into());
            vec![LogLine::new(
                tr_args("RoutingRestartTooManyBattles", &[&cost]),
                LogLevel::Warning,
            )]
        }
        _ => {
            tracing::debug!(what = ?what, why = ?why, "task chain extra info not shown");
            Vec::new()
        }
    }
}
