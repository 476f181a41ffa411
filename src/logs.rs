//! Session-bracketed, bounded log aggregation.
//!
//! All mutations go through one worker that owns the buffer and the session
//! store, so concurrent writers never interleave. Each operation comes in a
//! fire-and-forget form and an `*_and_wait` form that resolves once the write
//! (and its persistence side effect) is done.

use crate::model::{LogItem, LogLevel, SessionStatus};
use crate::storage::SessionStore;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// Ordered log lines with a fixed capacity; the oldest lines are evicted first.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    items: VecDeque<LogItem>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: LogItem) {
        while self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogItem> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<LogItem> {
        self.items.iter().cloned().collect()
    }
}

enum LogCommand {
    Append(LogItem, Option<oneshot::Sender<()>>),
    Clear(Option<oneshot::Sender<()>>),
    StartSession(Vec<String>, Option<oneshot::Sender<bool>>),
    EndSession(SessionStatus, Option<oneshot::Sender<()>>),
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle to the log worker.
#[derive(Clone)]
pub struct LogAggregator {
    tx: mpsc::UnboundedSender<LogCommand>,
    snapshot: watch::Receiver<Arc<Vec<LogItem>>>,
}

impl LogAggregator {
    /// Spawn the worker. Must be called from within a Tokio runtime.
    pub fn spawn(capacity: usize, store: Option<Box<dyn SessionStore>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (snap_tx, snapshot) = watch::channel(Arc::new(Vec::new()));
        let worker = LogWorker {
            buffer: LogBuffer::new(capacity),
            store,
            snapshot: snap_tx,
        };
        tokio::task::spawn_blocking(move || worker.run(rx));
        Self { tx, snapshot }
    }

    fn send(&self, cmd: LogCommand) {
        if self.tx.send(cmd).is_err() {
            tracing::warn!("log worker is gone; dropping log command");
        }
    }

    pub fn append(&self, item: LogItem) {
        self.send(LogCommand::Append(item, None));
    }

    pub fn append_line(&self, content: impl Into<String>, level: LogLevel) {
        self.append(LogItem::new(content, level));
    }

    pub async fn append_and_wait(&self, item: LogItem) {
        let (done, wait) = oneshot::channel();
        self.send(LogCommand::Append(item, Some(done)));
        let _ = wait.await;
    }

    pub async fn append_line_and_wait(&self, content: impl Into<String>, level: LogLevel) {
        self.append_and_wait(LogItem::new(content, level)).await;
    }

    /// Wipe the in-memory view only; the session record is untouched.
    pub fn clear_logs(&self) {
        self.send(LogCommand::Clear(None));
    }

    pub async fn clear_logs_and_wait(&self) {
        let (done, wait) = oneshot::channel();
        self.send(LogCommand::Clear(Some(done)));
        let _ = wait.await;
    }

    pub fn start_session(&self, task_names: Vec<String>) {
        self.send(LogCommand::StartSession(task_names, None));
    }

    /// Clear the buffer and open a new session record. Returns whether the
    /// record could be opened (true when no store is attached).
    pub async fn start_session_and_wait(&self, task_names: Vec<String>) -> bool {
        let (done, wait) = oneshot::channel();
        self.send(LogCommand::StartSession(task_names, Some(done)));
        wait.await.unwrap_or(false)
    }

    pub fn end_session(&self, status: SessionStatus) {
        self.send(LogCommand::EndSession(status, None));
    }

    pub async fn end_session_and_wait(&self, status: SessionStatus) {
        let (done, wait) = oneshot::channel();
        self.send(LogCommand::EndSession(status, Some(done)));
        let _ = wait.await;
    }

    /// Resolve once every command queued before this call has been applied.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.send(LogCommand::Flush(done));
        let _ = wait.await;
    }

    /// Current in-memory view, oldest first.
    pub fn snapshot(&self) -> Arc<Vec<LogItem>> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<LogItem>>> {
        self.snapshot.clone()
    }
}

struct LogWorker {
    buffer: LogBuffer,
    store: Option<Box<dyn SessionStore>>,
    snapshot: watch::Sender<Arc<Vec<LogItem>>>,
}

impl LogWorker {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<LogCommand>) {
        while let Some(cmd) = rx.blocking_recv() {
            match cmd {
                LogCommand::Append(item, done) => {
                    tracing::debug!(
                        target: "session_log",
                        severity = item.level.name(),
                        "{}",
                        item.content
                    );
                    if let Some(store) = self.store.as_mut() {
                        store.append_log(&item);
                    }
                    self.buffer.push(item);
                    self.publish();
                    notify(done, ());
                }
                LogCommand::Clear(done) => {
                    self.buffer.clear();
                    self.publish();
                    notify(done, ());
                }
                LogCommand::StartSession(names, done) => {
                    self.buffer.clear();
                    self.publish();
                    let opened = self
                        .store
                        .as_mut()
                        .map(|s| s.start_session(&names))
                        .unwrap_or(true);
                    notify(done, opened);
                }
                LogCommand::EndSession(status, done) => {
                    if let Some(store) = self.store.as_mut() {
                        store.end_session(status.as_str());
                    }
                    notify(done, ());
                }
                LogCommand::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(Arc::new(self.buffer.to_vec()));
    }
}

fn notify<T>(done: Option<oneshot::Sender<T>>, value: T) {
    if let Some(done) = done {
        let _ = done.send(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{RecordingStore, StoreEvent};

    fn item(n: usize) -> LogItem {
        LogItem::new(format!("line {n}"), LogLevel::Info)
    }

    #[test]
    fn buffer_keeps_the_newest_items_in_order() {
        let mut buffer = LogBuffer::new(500);
        for n in 1..=501 {
            buffer.push(item(n));
        }
        assert_eq!(buffer.len(), 500);
        let contents: Vec<String> = buffer.iter().map(|i| i.content.clone()).collect();
        let expected: Vec<String> = (2..=501).map(|n| format!("line {n}")).collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn buffer_never_exceeds_capacity() {
        let mut buffer = LogBuffer::new(7);
        let mut last_id = 0;
        for n in 0..100 {
            buffer.push(item(n));
            assert!(buffer.len() <= 7);
            let ids: Vec<u64> = buffer.iter().map(|i| i.id).collect();
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            last_id = *ids.last().unwrap();
        }
        assert_eq!(buffer.iter().last().map(|i| i.id), Some(last_id));
    }

    #[tokio::test]
    async fn start_session_clears_the_buffer() {
        let logs = LogAggregator::spawn(10, None);
        logs.append_and_wait(item(1)).await;
        logs.append_and_wait(item(2)).await;
        assert_eq!(logs.snapshot().len(), 2);

        assert!(logs.start_session_and_wait(vec!["Fight".into()]).await);
        assert!(logs.snapshot().is_empty());

        logs.append_and_wait(item(3)).await;
        assert_eq!(logs.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn clear_only_touches_the_in_memory_view() {
        let store = RecordingStore::default();
        let logs = LogAggregator::spawn(10, Some(Box::new(store.clone())));
        logs.start_session(vec!["Mall".into()]);
        logs.append(item(1));
        logs.clear_logs();
        logs.append(item(2));
        logs.end_session(SessionStatus::Completed);
        logs.flush().await;

        assert_eq!(logs.snapshot().len(), 1);
        let events = store.events();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], StoreEvent::Start(vec!["Mall".into()]));
        assert!(matches!(&events[1], StoreEvent::Log(c, LogLevel::Info, None) if c == "line 1"));
        assert!(matches!(&events[2], StoreEvent::Log(c, _, _) if c == "line 2"));
        assert_eq!(events[3], StoreEvent::End("COMPLETED".into()));
    }

    #[tokio::test]
    async fn concurrent_writers_are_serialized() {
        let logs = LogAggregator::spawn(50, None);
        let mut handles = Vec::new();
        for writer in 0..8 {
            let logs = logs.clone();
            handles.push(tokio::spawn(async move {
                for n in 0..20 {
                    logs.append_line_and_wait(format!("{writer}:{n}"), LogLevel::Trace)
                        .await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        logs.flush().await;

        let snap = logs.snapshot();
        assert_eq!(snap.len(), 50);
        // Each writer's own lines keep their relative order.
        for writer in 0..8 {
            let prefix = format!("{writer}:");
            let seq: Vec<u32> = snap
                .iter()
                .filter_map(|i| i.content.strip_prefix(&prefix))
                .map(|n| n.parse().unwrap())
                .collect();
            assert!(seq.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
