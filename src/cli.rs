use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use taskchain_supervisor::callback::CallbackDispatcher;
use taskchain_supervisor::engine::{
    ConnectAck, EngineHandle, RawCallback, ServiceConnector, SimulatedEngine, SimulatedFailures,
};
use taskchain_supervisor::health::ConnectionHealthMonitor;
use taskchain_supervisor::logs::LogAggregator;
use taskchain_supervisor::model::{
    ExecutionState, LogItem, LogLevel, ResourceLoadState, RunMode, ScreenSize, SupervisorConfig,
    TaskParams, TaskType, CONNECT_TIMEOUT, MAX_LOG_COUNT,
};
use taskchain_supervisor::orchestrator::{ExecutionOrchestrator, ExecutionStateCell};
use taskchain_supervisor::resource::ResourceLoadCoordinator;
use taskchain_supervisor::storage::{self, JsonlSessionStore, SessionEntry, SessionStore};
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, watch};

const RESOURCE_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "tcsup",
    version,
    about = "Supervisor for a task-chain automation engine"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Display the engine runs against
    #[arg(long, value_enum, default_value_t = RunMode::Background, global = true)]
    pub run_mode: RunMode,

    /// Directory holding the engine's resource files
    #[arg(long, default_value = ".", global = true)]
    pub resource_dir: PathBuf,

    /// Directory for session logs (defaults to the platform data directory)
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// How long to wait for the engine to acknowledge the connect request
    #[arg(long, default_value_t = humantime::Duration::from(CONNECT_TIMEOUT), global = true)]
    pub connect_timeout: humantime::Duration,

    /// Number of log lines kept in memory
    #[arg(long, default_value_t = MAX_LOG_COUNT, global = true)]
    pub log_capacity: usize,

    /// Physical screen size, WIDTHxHEIGHT (used in foreground mode)
    #[arg(long, default_value = "1280x720", value_parser = parse_screen, global = true)]
    pub screen: ScreenSize,

    /// Colour log lines by level (24-bit ANSI)
    #[arg(long, global = true)]
    pub color: bool,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run tasks against the simulated engine
    Run {
        /// Task to queue, TYPE or TYPE=PARAMS_JSON; repeatable, run in order
        #[arg(long = "task", required = true, value_parser = parse_task)]
        tasks: Vec<TaskParams>,

        /// JSON-lines callback transcript the engine replays after start
        #[arg(long)]
        script: Option<PathBuf>,

        /// Print the final log as JSON instead of streaming lines
        #[arg(long)]
        json: bool,

        /// Do not write a session log file
        #[arg(long)]
        no_persist: bool,

        /// Make one engine step fail; repeatable
        #[arg(long = "fail", value_enum)]
        failures: Vec<FailStep>,

        /// How the engine answers the connect request
        #[arg(long, value_enum, default_value_t = AckMode::Accept)]
        connect_ack: AckMode,
    },
    /// Feed a JSON-lines callback transcript through the dispatcher
    Replay {
        file: PathBuf,

        /// Print the resulting log as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect and maintain persisted session logs
    Logs {
        #[command(subcommand)]
        action: LogsCommand,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FailStep {
    Unavailable,
    Setup,
    LoadResource,
    CreateInstance,
    TouchMode,
    DisplayMode,
    VirtualDisplay,
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AckMode {
    Accept,
    Reject,
    Silent,
}

fn simulated_failures(steps: &[FailStep]) -> SimulatedFailures {
    let mut failures = SimulatedFailures::default();
    for step in steps {
        let flag = match step {
            FailStep::Unavailable => &mut failures.unavailable,
            FailStep::Setup => &mut failures.setup,
            FailStep::LoadResource => &mut failures.load_resource,
            FailStep::CreateInstance => &mut failures.create_instance,
            FailStep::TouchMode => &mut failures.touch_mode,
            FailStep::DisplayMode => &mut failures.display_mode,
            FailStep::VirtualDisplay => &mut failures.virtual_display,
            FailStep::Start => &mut failures.start,
            FailStep::Stop => &mut failures.stop,
        };
        *flag = true;
    }
    failures
}

#[derive(Debug, Subcommand, Clone)]
pub enum LogsCommand {
    /// List session logs, newest first
    List,
    /// Print one session log
    Show { name: String },
    /// Delete one session log
    Delete { name: String },
    /// Delete session logs older than the given number of days
    Cleanup {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
}

fn parse_screen(value: &str) -> Result<ScreenSize, String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {value:?}"))?;
    let width = w.trim().parse().map_err(|e| format!("bad width: {e}"))?;
    let height = h.trim().parse().map_err(|e| format!("bad height: {e}"))?;
    Ok(ScreenSize::new(width, height))
}

fn parse_task(value: &str) -> Result<TaskParams, String> {
    let (name, params) = match value.split_once('=') {
        Some((name, params)) => (name.trim(), params.trim()),
        None => (value.trim(), "{}"),
    };
    let Some(task_type) = TaskType::from_wire(name) else {
        let known: Vec<&str> = TaskType::ALL.iter().map(|t| t.as_str()).collect();
        return Err(format!(
            "unknown task type {name:?}; expected one of {}",
            known.join(", ")
        ));
    };
    serde_json::from_str::<serde_json::Value>(params)
        .map_err(|e| format!("task parameters are not valid JSON: {e}"))?;
    Ok(TaskParams::new(task_type, params))
}

/// Text form of a log line, optionally wrapped in the level's colour.
fn render_line(item: &LogItem, color: bool) -> String {
    let line = item.to_line();
    if !color || item.level == LogLevel::Message {
        return line;
    }
    let rgb = item.level.color();
    format!(
        "\x1b[38;2;{};{};{}m{}\x1b[0m",
        (rgb >> 16) & 0xFF,
        (rgb >> 8) & 0xFF,
        rgb & 0xFF,
        line
    )
}

/// Build a `SupervisorConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> SupervisorConfig {
    SupervisorConfig {
        run_mode: args.run_mode,
        resource_dir: args.resource_dir.clone(),
        log_dir: args
            .log_dir
            .clone()
            .unwrap_or_else(storage::default_log_dir),
        connect_timeout: Duration::from(args.connect_timeout),
        log_capacity: args.log_capacity,
        screen: args.screen,
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let config = build_config(&args);
    tracing::debug!(config = %serde_json::to_string(&config)?, "configuration");

    match args.command {
        Command::Run {
            tasks,
            script,
            json,
            no_persist,
            failures,
            connect_ack,
        } => {
            let engine = SimulatedEngine::new();
            engine.set_failures(simulated_failures(&failures));
            engine.set_connect_ack(match connect_ack {
                AckMode::Accept => ConnectAck::Accept,
                AckMode::Reject => ConnectAck::Reject,
                AckMode::Silent => ConnectAck::Silent,
            });
            let script = match script {
                Some(path) => read_transcript(&path)?,
                None => SimulatedEngine::default_script(&tasks),
            };
            engine.set_script(script);

            let output = Output {
                json,
                color: args.color,
            };
            let persist = !no_persist;
            run_tasks(&config, engine, tasks, output, persist).await
        }
        Command::Replay { file, json } => {
            let output = Output {
                json,
                color: args.color,
            };
            replay(&config, &file, output).await
        }
        Command::Logs { action } => manage_logs(&config.log_dir, action),
    }
}

#[derive(Debug, Clone, Copy)]
struct Output {
    json: bool,
    color: bool,
}

/// Read a JSON-lines callback transcript: one `{"code":..,"json":..}` per line.
fn read_transcript(path: &Path) -> Result<Vec<RawCallback>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read transcript {}", path.display()))?;
    let mut callbacks = Vec::new();
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let callback: RawCallback = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid callback", path.display(), n + 1))?;
        callbacks.push(callback);
    }
    Ok(callbacks)
}

/// Print log lines as they are appended until `done` fires.
fn spawn_log_forwarder(
    mut snapshots: watch::Receiver<Arc<Vec<LogItem>>>,
    out: mpsc::UnboundedSender<OutputLine>,
    color: bool,
    mut done: oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_id = 0u64;
        let mut forward = |items: &[LogItem]| {
            for item in items {
                if item.id <= last_id {
                    continue;
                }
                let _ = out.send(OutputLine::Stdout(render_line(item, color)));
                last_id = item.id;
            }
        };
        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let items = snapshots.borrow_and_update().clone();
                    forward(items.as_slice());
                }
                _ = &mut done => {
                    let items = snapshots.borrow().clone();
                    forward(items.as_slice());
                    break;
                }
            }
        }
    })
}

async fn run_tasks(
    config: &SupervisorConfig,
    engine: SimulatedEngine,
    tasks: Vec<TaskParams>,
    output: Output,
    persist: bool,
) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();

    let handle = Arc::new(EngineHandle::new(Arc::new(engine.clone())));
    let resources = Arc::new(ResourceLoadCoordinator::new(
        handle.clone(),
        &config.resource_dir,
    ));
    let store: Option<Box<dyn SessionStore>> = if persist {
        Some(Box::new(JsonlSessionStore::new(&config.log_dir)))
    } else {
        None
    };
    let logs = LogAggregator::spawn(config.log_capacity, store);

    let (monitor, died) =
        ConnectionHealthMonitor::spawn(engine.connectivity(), resources.clone(), config.run_mode);
    let mut resource_state = resources.subscribe();
    let orchestrator = ExecutionOrchestrator::new(
        handle,
        resources,
        logs.clone(),
        Arc::new(config.screen),
        config,
    );
    orchestrator.watch_service_died(died);
    engine.announce_connected();

    // The monitor loads resources on connect; let that settle so start()
    // does not sample an in-flight load.
    let settled = tokio::time::timeout(
        RESOURCE_SETTLE_TIMEOUT,
        resource_state.wait_for(|s| {
            matches!(s, ResourceLoadState::Ready | ResourceLoadState::Failed(_))
        }),
    )
    .await
    .is_ok_and(|r| r.is_ok());
    if !settled {
        tracing::warn!("resources still loading; starting anyway");
    }

    let (done_tx, done_rx) = oneshot::channel();
    let forwarder = (!output.json).then(|| {
        spawn_log_forwarder(logs.subscribe(), out_tx.clone(), output.color, done_rx)
    });

    let started = orchestrator.start(&tasks).await;
    if started.is_success() {
        let mut state = orchestrator.state().subscribe();
        tokio::select! {
            res = state.wait_for(|s| *s != ExecutionState::Running) => {
                res.context("execution state channel closed")?;
            }
            _ = tokio::signal::ctrl_c() => {
                let _ = out_tx.send(OutputLine::Stderr("Interrupted, stopping…".into()));
                let stopped = orchestrator.stop().await;
                tracing::info!(?stopped, "stop requested from the terminal");
            }
        }
    }
    orchestrator.logs().flush().await;

    if let Some(forwarder) = forwarder {
        let _ = done_tx.send(());
        let _ = forwarder.await;
    }
    if output.json {
        let out = serde_json::to_string_pretty(&*orchestrator.logs().snapshot())?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    }
    let final_state = orchestrator.state().get();
    let _ = out_tx.send(OutputLine::Stderr(format!("Final state: {final_state}")));
    if persist {
        let _ = out_tx.send(OutputLine::Stderr(format!(
            "Session logs: {}",
            config.log_dir.display()
        )));
    }

    drop(monitor);
    drop(orchestrator);
    drop(out_tx);
    let _ = out_handle.await;

    if !started.is_success() {
        bail!("start failed: {started}");
    }
    if final_state == ExecutionState::Error {
        bail!("tasks ended in an error state");
    }
    Ok(())
}

async fn replay(config: &SupervisorConfig, file: &Path, output: Output) -> Result<()> {
    let callbacks = read_transcript(file)?;
    let logs = LogAggregator::spawn(config.log_capacity, None);
    let state = ExecutionStateCell::new();
    let dispatcher = CallbackDispatcher::new(logs.clone(), state.clone());
    for callback in &callbacks {
        dispatcher.dispatch(callback.code, callback.json.as_deref());
    }
    logs.flush().await;

    let (out_tx, out_handle) = spawn_output_writer();
    let snapshot = logs.snapshot();
    if output.json {
        let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&*snapshot)?));
    } else {
        for item in snapshot.iter() {
            let _ = out_tx.send(OutputLine::Stdout(render_line(item, output.color)));
        }
    }
    let _ = out_tx.send(OutputLine::Stderr(format!(
        "Replayed {} callback(s); final state: {}",
        callbacks.len(),
        state.get()
    )));
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

fn format_millis(ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|t| {
            t.format(time::macros::format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second]"
            ))
            .ok()
        })
        .unwrap_or_else(|| ms.to_string())
}

fn manage_logs(dir: &Path, action: LogsCommand) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match action {
        LogsCommand::List => {
            let sessions = storage::list_sessions(dir)
                .with_context(|| format!("failed to list {}", dir.display()))?;
            if sessions.is_empty() {
                writeln!(out, "No session logs in {}", dir.display())?;
            }
            for info in sessions {
                writeln!(
                    out,
                    "{}  {}  {} task(s)  {} bytes",
                    info.file_name,
                    format_millis(info.start_time),
                    info.task_count,
                    info.size
                )?;
            }
        }
        LogsCommand::Show { name } => {
            let entries = storage::read_session(dir, &name)
                .with_context(|| format!("failed to read session log {name}"))?;
            for entry in entries {
                match entry {
                    SessionEntry::Header { start_time, tasks } => writeln!(
                        out,
                        "== started {} :: {}",
                        format_millis(start_time),
                        tasks.join(", ")
                    )?,
                    SessionEntry::Log {
                        level, content, ..
                    } => writeln!(out, "[{level}] {content}")?,
                    SessionEntry::Footer { end_time, status } => {
                        writeln!(out, "== ended {} :: {status}", format_millis(end_time))?
                    }
                }
            }
        }
        LogsCommand::Delete { name } => {
            storage::delete_session(dir, &name)
                .with_context(|| format!("failed to delete session log {name}"))?;
            writeln!(out, "Deleted {name}")?;
        }
        LogsCommand::Cleanup { days } => {
            let deleted = storage::cleanup_now(dir, days)
                .with_context(|| format!("failed to clean up {}", dir.display()))?;
            writeln!(out, "Deleted {deleted} session log(s) older than {days} day(s)")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_argument_forms() {
        let bare = parse_task("Fight").unwrap();
        assert_eq!(bare, TaskParams::new(TaskType::Fight, "{}"));

        let with_params = parse_task(r#"Mall={"shopping":true}"#).unwrap();
        assert_eq!(with_params.task_type, TaskType::Mall);
        assert_eq!(with_params.params, r#"{"shopping":true}"#);

        assert!(parse_task("Dance").is_err());
        assert!(parse_task("Fight={oops").is_err());
    }

    #[test]
    fn screen_argument() {
        assert_eq!(parse_screen("2400x1080").unwrap(), ScreenSize::new(2400, 1080));
        assert!(parse_screen("2400").is_err());
        assert!(parse_screen("ax1").is_err());
    }

    #[test]
    fn config_from_flags() {
        let cli = Cli::parse_from([
            "tcsup",
            "--run-mode",
            "foreground",
            "--connect-timeout",
            "500ms",
            "--log-dir",
            "/tmp/sessions",
            "run",
            "--task",
            "StartUp",
            "--task",
            "Fight",
        ]);
        let config = build_config(&cli);
        assert_eq!(config.run_mode, RunMode::Foreground);
        assert_eq!(config.connect_timeout, Duration::from_millis(500));
        assert_eq!(config.log_dir, PathBuf::from("/tmp/sessions"));
        match cli.command {
            Command::Run { tasks, .. } => assert_eq!(tasks.len(), 2),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn defaults_match_the_library_config() {
        let cli = Cli::parse_from(["tcsup", "logs", "list"]);
        let config = build_config(&cli);
        let defaults = SupervisorConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_millis(2000));
        assert_eq!(config.connect_timeout, defaults.connect_timeout);
        assert_eq!(config.run_mode, defaults.run_mode);
        assert_eq!(config.log_capacity, defaults.log_capacity);
        assert_eq!(config.screen, ScreenSize::new(1280, 720));
        assert_eq!(config.log_dir, defaults.log_dir);

        let cli = Cli::parse_from(["tcsup", "logs", "cleanup"]);
        match cli.command {
            Command::Logs {
                action: LogsCommand::Cleanup { days },
            } => assert_eq!(days, 30),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn forwarder_prints_each_line_once() {
        let first = LogItem::new("first", LogLevel::Info);
        let second = LogItem::new("second", LogLevel::Info);
        let third = LogItem::new("third", LogLevel::Info);

        let (snapshots_tx, snapshots_rx) = watch::channel(Arc::new(Vec::new()));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let forwarder = spawn_log_forwarder(snapshots_rx, out_tx, false, done_rx);

        snapshots_tx.send_replace(Arc::new(vec![first.clone(), second.clone()]));
        tokio::task::yield_now().await;
        snapshots_tx.send_replace(Arc::new(vec![first.clone(), second.clone(), third.clone()]));
        tokio::task::yield_now().await;
        done_tx.send(()).unwrap();
        forwarder.await.unwrap();

        let mut printed = Vec::new();
        while let Ok(line) = out_rx.try_recv() {
            match line {
                OutputLine::Stdout(text) => printed.push(text),
                OutputLine::Stderr(text) => panic!("unexpected stderr line {text}"),
            }
        }
        assert_eq!(
            printed,
            vec![first.to_line(), second.to_line(), third.to_line()]
        );
    }

    #[test]
    fn colour_follows_the_level() {
        let warning = LogItem::new("slow", LogLevel::Warning);
        let coloured = render_line(&warning, true);
        assert!(coloured.starts_with("\x1b[38;2;230;162;60m"));
        assert!(coloured.ends_with("slow\x1b[0m"));
        assert_eq!(render_line(&warning, false), warning.to_line());

        let plain = LogItem::new("hello", LogLevel::Message);
        assert_eq!(render_line(&plain, true), plain.to_line());
    }

    #[test]
    fn failure_switches() {
        let failures = simulated_failures(&[FailStep::CreateInstance, FailStep::Stop]);
        assert!(failures.create_instance);
        assert!(failures.stop);
        assert!(!failures.start);
        assert!(!failures.unavailable);

        let cli = Cli::parse_from([
            "tcsup",
            "run",
            "--task",
            "Fight",
            "--fail",
            "virtual-display",
            "--connect-ack",
            "silent",
        ]);
        match cli.command {
            Command::Run {
                failures,
                connect_ack,
                ..
            } => {
                assert_eq!(failures, vec![FailStep::VirtualDisplay]);
                assert_eq!(connect_ack, AckMode::Silent);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn transcript_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("callbacks.jsonl");
        std::fs::write(
            &path,
            "{\"code\":10001,\"json\":\"{\\\"taskchain\\\":\\\"Fight\\\"}\"}\n\n{\"code\":3}\n",
        )
        .unwrap();
        let callbacks = read_transcript(&path).unwrap();
        assert_eq!(callbacks.len(), 2);
        assert_eq!(callbacks[1], RawCallback { code: 3, json: None });

        std::fs::write(&path, "not json\n").unwrap();
        assert!(read_transcript(&path).is_err());
    }
}
