use super::strings::{tr, tr_args};
use super::{int_field, obj, str_field, CallbackKind, LogLine};
use crate::model::LogLevel;
use serde_json::Value;

/// Screenshot latency (ms) from which the device counts as severely slow.
const SCREENCAP_SEVERE_MS: i64 = 800;
/// Screenshot latency (ms) from which the device counts as slow.
const SCREENCAP_MODERATE_MS: i64 = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScreencapSpeed {
    Normal,
    Moderate,
    Severe,
}

fn classify(ms: Option<i64>) -> ScreencapSpeed {
    match ms {
        Some(ms) if ms >= SCREENCAP_SEVERE_MS => ScreencapSpeed::Severe,
        Some(ms) if ms >= SCREENCAP_MODERATE_MS => ScreencapSpeed::Moderate,
        _ => ScreencapSpeed::Normal,
    }
}

/// `ConnectionInfo` callbacks, keyed by `what`.
pub(super) fn handle(_kind: CallbackKind, details: &Value) -> Vec<LogLine> {
    let Some(what) = str_field(details, "what") else {
        return Vec::new();
    };
    let inner = obj(details, "details");

    let line = match what.as_str() {
        "Connected" => {
            let address = inner.and_then(|d| str_field(d, "address"));
            tracing::info!(address = ?address, "engine connected to device");
            return Vec::new();
        }
        "UnsupportedResolution" => LogLine::new(tr("ResolutionNotSupported"), LogLevel::Error),
        "ResolutionError" => LogLine::new(tr("ResolutionAcquisitionFailure"), LogLevel::Error),
        "Reconnecting" => {
            let times = inner
                .and_then(|d| int_field(d, "times"))
                .unwrap_or(0)
                .saturating_add(1);
            LogLine::new(format!("{} ({times})", tr("TryToReconnect")), LogLevel::Error)
        }
        "Reconnected" => LogLine::new(tr("ReconnectSuccess"), LogLevel::Success),
        "Disconnect" => LogLine::new(tr("ReconnectFailed"), LogLevel::Error),
        "ScreencapFailed" => LogLine::new(tr("ScreencapFailed"), LogLevel::Error),
        "TouchModeNotAvailable" => LogLine::new(tr("TouchModeNotAvailable"), LogLevel::Error),
        "FastestWayToScreencap" => {
            let cost = inner
                .and_then(|d| str_field(d, "cost"))
                .unwrap_or_else(|| "???".into());
            let method = inner
                .and_then(|d| str_field(d, "method"))
                .unwrap_or_else(|| "???".into());
            match classify(cost.parse().ok()) {
                ScreencapSpeed::Normal => LogLine::new(
                    tr_args("FastestWayToScreencap", &[&cost, &method]),
                    LogLevel::Trace,
                ),
                speed => slow_screencap(speed, &cost),
            }
        }
        "ScreencapCost" => {
            let field = |key: &str| {
                inner
                    .and_then(|d| str_field(d, key))
                    .unwrap_or_else(|| "?".into())
            };
            let (min, avg, max) = (field("min"), field("avg"), field("max"));
            match classify(avg.parse().ok()) {
                ScreencapSpeed::Normal => LogLine::new(
                    tr_args("ScreencapCost", &[&min, &avg, &max, &""]),
                    LogLevel::Trace,
                ),
                speed => slow_screencap(speed, &avg),
            }
        }
        other => {
            tracing::debug!(what = other, "connection info not shown");
            return Vec::new();
        }
    };
    vec![line]
}

fn slow_screencap(speed: ScreencapSpeed, ms: &str) -> LogLine {
    let key = if speed == ScreencapSpeed::Severe {
        "FastestWayToScreencapErrorTip"
    } else {
        "FastestWayToScreencapWarningTip"
    };
    LogLine::new(tr_args(key, &[&ms]), LogLevel::Warning)
}
