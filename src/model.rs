use crate::error::ResourceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use time::macros::format_description;
use time::OffsetDateTime;

/// Maximum number of log items kept in memory.
pub const MAX_LOG_COUNT: usize = 500;

/// How long `start()` waits for the engine to acknowledge the connect request.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Resolution used for the off-screen display in background mode.
pub const DEFAULT_DISPLAY_WIDTH: u32 = 1280;
pub const DEFAULT_DISPLAY_HEIGHT: u32 = 720;

/// Value the remote service returns when the virtual display could not be started.
pub const DISPLAY_NONE: i32 = -1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub run_mode: RunMode,
    /// Root directory handed to the engine's `setup`/`LoadResource`.
    pub resource_dir: PathBuf,
    /// Directory for persisted session logs.
    pub log_dir: PathBuf,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    pub log_capacity: usize,
    /// Size of the physical screen, consulted in foreground mode.
    pub screen: ScreenSize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            run_mode: RunMode::Background,
            resource_dir: PathBuf::from("."),
            log_dir: crate::storage::default_log_dir(),
            connect_timeout: CONNECT_TIMEOUT,
            log_capacity: MAX_LOG_COUNT,
            screen: ScreenSize::default(),
        }
    }
}

/// Execution state shared between the orchestrator and the callback dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionState {
    Idle,
    Starting,
    Running,
    Error,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionState::Idle => "IDLE",
            ExecutionState::Starting => "STARTING",
            ExecutionState::Running => "RUNNING",
            ExecutionState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceLoadState {
    NotLoaded,
    Loading(String),
    /// Loading again after the resource files were updated.
    Reloading(String),
    Ready,
    Failed(String),
}

impl ResourceLoadState {
    pub fn loading() -> Self {
        ResourceLoadState::Loading("Loading engine resources, please wait ...".into())
    }

    pub fn reloading() -> Self {
        ResourceLoadState::Reloading("Reloading engine resources, please wait ...".into())
    }
}

/// How the engine sees the sandboxed application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Mirror the physical screen; requires landscape orientation.
    Foreground,
    /// Render into an off-screen virtual display.
    Background,
}

impl RunMode {
    /// Display-mode value understood by the remote service.
    pub fn display_mode(self) -> i32 {
        match self {
            RunMode::Foreground => 0,
            RunMode::Background => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl ScreenSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }
}

impl Default for ScreenSize {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLAY_WIDTH, DEFAULT_DISPLAY_HEIGHT)
    }
}

/// Task chain types understood by the engine's `AppendTask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    StartUp,
    CloseDown,
    Fight,
    Recruit,
    Infrast,
    Mall,
    Award,
    Roguelike,
    #[serde(rename = "Reclamation2")]
    Reclamation,
    Copilot,
    #[serde(rename = "SSSCopilot")]
    SssCopilot,
    Depot,
    OperBox,
}

impl TaskType {
    pub const ALL: [TaskType; 13] = [
        TaskType::StartUp,
        TaskType::CloseDown,
        TaskType::Fight,
        TaskType::Recruit,
        TaskType::Infrast,
        TaskType::Mall,
        TaskType::Award,
        TaskType::Roguelike,
        TaskType::Reclamation,
        TaskType::Copilot,
        TaskType::SssCopilot,
        TaskType::Depot,
        TaskType::OperBox,
    ];

    /// Wire name passed to the engine.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::StartUp => "StartUp",
            TaskType::CloseDown => "CloseDown",
            TaskType::Fight => "Fight",
            TaskType::Recruit => "Recruit",
            TaskType::Infrast => "Infrast",
            TaskType::Mall => "Mall",
            TaskType::Award => "Award",
            TaskType::Roguelike => "Roguelike",
            TaskType::Reclamation => "Reclamation2",
            TaskType::Copilot => "Copilot",
            TaskType::SssCopilot => "SSSCopilot",
            TaskType::Depot => "Depot",
            TaskType::OperBox => "OperBox",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

/// One entry for the engine's task queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskParams {
    pub task_type: TaskType,
    /// Parameters as a JSON document, passed through untouched.
    pub params: String,
}

impl TaskParams {
    pub fn new(task_type: TaskType, params: impl Into<String>) -> Self {
        Self {
            task_type,
            params: params.into(),
        }
    }
}

/// Phase of `start()` that failed while creating or configuring the engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitPhase {
    CreateInstance,
    SetTouchMode,
}

/// Phase of `start()` that failed while attaching the engine to a display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectPhase {
    DisplayMode,
    VirtualDisplay,
    MaaConnect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartResult {
    /// Tasks are running; carries the engine version.
    Success(String),
    ResourceError(Option<ResourceError>),
    InitializationError(InitPhase),
    ConnectionError(ConnectPhase),
    StartError,
    /// Foreground mode needs a landscape screen.
    PortraitOrientationError,
}

impl StartResult {
    pub fn is_success(&self) -> bool {
        matches!(self, StartResult::Success(_))
    }

    /// Status written to the session record when `start()` ends with this result.
    pub fn session_status(&self) -> Option<SessionStatus> {
        let status = match self {
            StartResult::Success(_) => return None,
            StartResult::ResourceError(_) => SessionStatus::ResourceError,
            StartResult::PortraitOrientationError => SessionStatus::Portrait,
            StartResult::InitializationError(InitPhase::CreateInstance) => {
                SessionStatus::CreateInstanceError
            }
            StartResult::InitializationError(InitPhase::SetTouchMode) => {
                SessionStatus::SetTouchModeError
            }
            StartResult::ConnectionError(ConnectPhase::DisplayMode) => {
                SessionStatus::DisplayModeError
            }
            StartResult::ConnectionError(ConnectPhase::VirtualDisplay) => {
                SessionStatus::VirtualDisplayError
            }
            StartResult::ConnectionError(ConnectPhase::MaaConnect) => {
                SessionStatus::MaaConnectError
            }
            StartResult::StartError => SessionStatus::StartError,
        };
        Some(status)
    }
}

impl fmt::Display for StartResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartResult::Success(version) => write!(f, "Tasks running (engine {version})"),
            StartResult::ResourceError(_) => f.write_str("Resource load failed"),
            StartResult::InitializationError(InitPhase::CreateInstance) => {
                f.write_str("Failed to create engine instance")
            }
            StartResult::InitializationError(InitPhase::SetTouchMode) => {
                f.write_str("Failed to set touch mode")
            }
            StartResult::ConnectionError(ConnectPhase::DisplayMode) => {
                f.write_str("Failed to set display mode")
            }
            StartResult::ConnectionError(ConnectPhase::VirtualDisplay) => {
                f.write_str("Failed to start virtual display")
            }
            StartResult::ConnectionError(ConnectPhase::MaaConnect) => {
                f.write_str("Engine connection timed out or failed")
            }
            StartResult::StartError => f.write_str("Engine failed to start"),
            StartResult::PortraitOrientationError => {
                f.write_str("Screen is in portrait orientation; foreground mode needs landscape")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopResult {
    Success,
    Failed,
}

/// Terminal status written to the end of a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Completed,
    Stopped,
    StopFailed,
    ResourceError,
    Portrait,
    CreateInstanceError,
    SetTouchModeError,
    DisplayModeError,
    VirtualDisplayError,
    MaaConnectError,
    StartError,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Stopped => "STOPPED",
            SessionStatus::StopFailed => "STOP_FAILED",
            SessionStatus::ResourceError => "RESOURCE_ERROR",
            SessionStatus::Portrait => "PORTRAIT",
            SessionStatus::CreateInstanceError => "CREATE_INSTANCE_ERROR",
            SessionStatus::SetTouchModeError => "SET_TOUCH_MODE_ERROR",
            SessionStatus::DisplayModeError => "DISPLAY_MODE_ERROR",
            SessionStatus::VirtualDisplayError => "VIRTUAL_DISPLAY_ERROR",
            SessionStatus::MaaConnectError => "MAA_CONNECT_ERROR",
            SessionStatus::StartError => "START_ERROR",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a user-visible log line. Each level carries a short display
/// name and a colour for presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Message,
    Info,
    Success,
    Warning,
    Error,
    Trace,
    #[serde(rename = "RECRUIT_STAR_1")]
    RecruitStar1,
    #[serde(rename = "RECRUIT_STAR_2")]
    RecruitStar2,
    #[serde(rename = "RECRUIT_STAR_3")]
    RecruitStar3,
    #[serde(rename = "RECRUIT_STAR_4")]
    RecruitStar4,
    #[serde(rename = "RECRUIT_STAR_5")]
    RecruitStar5,
    #[serde(rename = "RECRUIT_STAR_6")]
    RecruitStar6,
    RecruitRobot,
    RoguelikeSuccess,
    RoguelikeCombat,
    RoguelikeEmergency,
    RoguelikeBoss,
    RoguelikeAbandon,
    Rare,
}

impl LogLevel {
    /// Persisted name, as written into session records.
    pub fn name(self) -> &'static str {
        match self {
            LogLevel::Message => "MESSAGE",
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Trace => "TRACE",
            LogLevel::RecruitStar1 => "RECRUIT_STAR_1",
            LogLevel::RecruitStar2 => "RECRUIT_STAR_2",
            LogLevel::RecruitStar3 => "RECRUIT_STAR_3",
            LogLevel::RecruitStar4 => "RECRUIT_STAR_4",
            LogLevel::RecruitStar5 => "RECRUIT_STAR_5",
            LogLevel::RecruitStar6 => "RECRUIT_STAR_6",
            LogLevel::RecruitRobot => "RECRUIT_ROBOT",
            LogLevel::RoguelikeSuccess => "ROGUELIKE_SUCCESS",
            LogLevel::RoguelikeCombat => "ROGUELIKE_COMBAT",
            LogLevel::RoguelikeEmergency => "ROGUELIKE_EMERGENCY",
            LogLevel::RoguelikeBoss => "ROGUELIKE_BOSS",
            LogLevel::RoguelikeAbandon => "ROGUELIKE_ABANDON",
            LogLevel::Rare => "RARE",
        }
    }

    /// Short label shown next to the line.
    pub fn display_name(self) -> &'static str {
        match self {
            LogLevel::Message => "MSG",
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WRN",
            LogLevel::Error => "ERR",
            LogLevel::Trace => "TRACE",
            LogLevel::RecruitStar1 => "1★",
            LogLevel::RecruitStar2 => "2★",
            LogLevel::RecruitStar3 => "3★",
            LogLevel::RecruitStar4 => "4★",
            LogLevel::RecruitStar5 => "5★",
            LogLevel::RecruitStar6 => "6★",
            LogLevel::RecruitRobot => "ROBOT",
            LogLevel::RoguelikeSuccess => "WIN",
            LogLevel::RoguelikeCombat => "COMBAT",
            LogLevel::RoguelikeEmergency => "EMERGENCY",
            LogLevel::RoguelikeBoss => "BOSS",
            LogLevel::RoguelikeAbandon => "ABANDON",
            LogLevel::Rare => "RARE",
        }
    }

    /// RGB colour for presentation layers.
    pub fn color(self) -> u32 {
        match self {
            LogLevel::Message => 0x000000,
            LogLevel::Info => 0x409EFF,
            LogLevel::Success => 0x67C23A,
            LogLevel::Warning => 0xE6A23C,
            LogLevel::Error => 0xF56C6C,
            LogLevel::Trace => 0x909399,
            LogLevel::RecruitStar1 => 0x333333,
            LogLevel::RecruitStar2 => 0x99CC33,
            LogLevel::RecruitStar3 => 0x3399FF,
            LogLevel::RecruitStar4 => 0x9966FF,
            LogLevel::RecruitStar5 => 0xFFAA33,
            LogLevel::RecruitStar6 => 0xFF8C00,
            LogLevel::RecruitRobot => 0x666666,
            LogLevel::RoguelikeSuccess => 0x52C41A,
            LogLevel::RoguelikeCombat => 0x1890FF,
            LogLevel::RoguelikeEmergency => 0xFA8C16,
            LogLevel::RoguelikeBoss => 0xEB2F96,
            LogLevel::RoguelikeAbandon => 0x8C8C8C,
            LogLevel::Rare => 0xFFAA00,
        }
    }

}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn next_log_id() -> u64 {
    static IDS: OnceLock<AtomicU64> = OnceLock::new();
    IDS.get_or_init(|| {
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        AtomicU64::new(u64::try_from(millis).unwrap_or_default())
    })
    .fetch_add(1, Ordering::Relaxed)
        + 1
}

/// A single user-visible log line. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogItem {
    /// Process-wide unique and increasing; seeded from the wall clock.
    pub id: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub content: String,
    pub level: LogLevel,
    pub show_time: bool,
    #[serde(default)]
    pub tooltip: Option<String>,
    #[serde(default)]
    pub screenshot_path: Option<String>,
}

impl LogItem {
    pub fn new(content: impl Into<String>, level: LogLevel) -> Self {
        Self {
            id: next_log_id(),
            timestamp: OffsetDateTime::now_utc(),
            content: content.into(),
            level,
            show_time: true,
            tooltip: None,
            screenshot_path: None,
        }
    }

    pub fn with_tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = Some(tooltip.into());
        self
    }

    pub fn formatted_time(&self) -> String {
        self.timestamp
            .format(format_description!("[hour]:[minute]:[second]"))
            .unwrap_or_else(|_| "--:--:--".into())
    }

    pub fn has_details(&self) -> bool {
        self.tooltip.is_some() || self.screenshot_path.is_some()
    }

    /// Render a single line for text output, details appended after `|`.
    pub fn to_line(&self) -> String {
        let mut line = if self.show_time {
            format!(
                "{} [{}] {}",
                self.formatted_time(),
                self.level.display_name(),
                self.content
            )
        } else {
            format!("[{}] {}", self.level.display_name(), self.content)
        };
        if self.has_details() {
            for detail in [&self.tooltip, &self.screenshot_path].into_iter().flatten() {
                line.push_str(" | ");
                line.push_str(detail);
            }
        }
        line
    }
}
