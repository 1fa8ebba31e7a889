//! Async worker driving a [`Session`] from a line-oriented command stream
//!
//! Commands are read on a separate task so that, under
//! [`QueuePolicy::Supersede`], requests arriving during a run are visible when
//! the run finishes. Only `process-image` requests without a `colors`
//! override are dropped, so superseding never loses a change to the
//! target set. Handling itself is strictly sequential: one command at a
//! time, in arrival order, on a blocking thread.

use crate::{
    config::{QueuePolicy, SessionConfig},
    error::{ChromaKeyError, Result},
    protocol::{self, Command, CommandMessage, Notification, NotificationMessage},
    session::Session,
    tracing_config::spans,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};

/// Destination for outbound notifications
#[async_trait]
pub trait NotificationSink: Send {
    /// Deliver one notification; an error here is fatal for the worker
    async fn send(&mut self, message: NotificationMessage) -> Result<()>;
}

/// Writes notifications as JSON lines, flushing after each one
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> NotificationSink for JsonLinesSink<W> {
    async fn send(&mut self, message: NotificationMessage) -> Result<()> {
        let line = protocol::to_json_line(&message)?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Forwards notifications to an in-process channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<NotificationMessage>,
}

impl ChannelSink {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NotificationMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn send(&mut self, message: NotificationMessage) -> Result<()> {
        self.sender
            .send(message)
            .map_err(|_| ChromaKeyError::internal("Notification receiver was dropped"))
    }
}

/// Counters reported when the worker stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Commands handed to the session
    pub commands_handled: usize,
    /// Lines that could not be parsed
    pub malformed_lines: usize,
    /// `process-image` requests dropped under [`QueuePolicy::Supersede`]
    pub superseded: usize,
}

enum Inbound {
    Command(CommandMessage),
    Malformed {
        id: Option<String>,
        error: ChromaKeyError,
    },
    ReadFailed(std::io::Error),
}

impl Inbound {
    fn is_process_image(&self) -> bool {
        matches!(self, Self::Command(message) if message.command.is_process_image())
    }
}

/// Sequential command processor owning one session
#[derive(Debug, Clone)]
pub struct Worker {
    session: Arc<Mutex<Session>>,
    queue_policy: QueuePolicy,
}

impl Worker {
    /// Create a worker with a fresh session
    pub fn new(config: SessionConfig) -> Result<Self> {
        Ok(Self::from_session(Session::new(config)?))
    }

    #[must_use]
    pub fn from_session(session: Session) -> Self {
        Self {
            queue_policy: session.config().queue_policy,
            session: Arc::new(Mutex::new(session)),
        }
    }

    /// Run `f` against the session, recovering from a previous panic
    pub fn with_session<T>(&self, f: impl FnOnce(&mut Session) -> T) -> T {
        f(&mut lock_session(&self.session))
    }

    /// Process commands from `reader` until end of input
    ///
    /// Malformed lines produce an error notification and processing continues.
    /// A read failure is reported once and ends the worker with an error, as
    /// does any failure to deliver a notification.
    pub async fn run<R, S>(&self, reader: R, sink: &mut S) -> Result<WorkerStats>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        S: NotificationSink + ?Sized,
    {
        let (sender, mut inbound) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(read_commands(reader, sender));
        let outcome = self.dispatch_loop(&mut inbound, sink).await;
        reader_task.abort();
        outcome
    }

    async fn dispatch_loop<S>(
        &self,
        inbound: &mut mpsc::UnboundedReceiver<Inbound>,
        sink: &mut S,
    ) -> Result<WorkerStats>
    where
        S: NotificationSink + ?Sized,
    {
        let mut stats = WorkerStats::default();
        let mut pending = VecDeque::new();

        loop {
            let next = match pending.pop_front() {
                Some(next) => next,
                None => match inbound.recv().await {
                    Some(next) => next,
                    None => break,
                },
            };

            match next {
                Inbound::Command(message) => {
                    if self.queue_policy == QueuePolicy::Supersede
                        && is_supersedable(&message.command)
                    {
                        while let Ok(waiting) = inbound.try_recv() {
                            pending.push_back(waiting);
                        }
                        if pending.iter().any(Inbound::is_process_image) {
                            info!(
                                id = ?message.id,
                                "Dropping process-image superseded by a newer request"
                            );
                            stats.superseded += 1;
                            continue;
                        }
                    }

                    let CommandMessage { id, command } = message;
                    let span = spans::command(command.name(), id.as_deref());
                    let notifications = self.handle(command).instrument(span).await;
                    stats.commands_handled += 1;
                    for notification in notifications {
                        sink.send(NotificationMessage::new(notification, id.clone()))
                            .await?;
                    }
                },
                Inbound::Malformed { id, error } => {
                    warn!(error = %error, "Rejecting malformed command");
                    stats.malformed_lines += 1;
                    sink.send(NotificationMessage::new(Notification::error(&error), id))
                        .await?;
                },
                Inbound::ReadFailed(e) => {
                    let error = ChromaKeyError::protocol(format!("Failed to read commands: {}", e));
                    // The transport is already broken; a failed report changes nothing.
                    let _ = sink
                        .send(NotificationMessage::new(Notification::error(&error), None))
                        .await;
                    return Err(error);
                },
            }
        }

        debug!(?stats, "Command stream ended");
        Ok(stats)
    }

    async fn handle(&self, command: Command) -> Vec<Notification> {
        let session = Arc::clone(&self.session);
        let name = command.name();
        let span = tracing::Span::current();

        let outcome = tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            lock_session(&session).handle(command)
        })
        .await;

        outcome.unwrap_or_else(|e| {
            let error = ChromaKeyError::internal(format!("Handling {} failed: {}", name, e));
            vec![Notification::error(&error)]
        })
    }
}

/// A `colors` override is committed to the session, so only plain runs may be dropped
fn is_supersedable(command: &Command) -> bool {
    matches!(command, Command::ProcessImage { colors: None, .. })
}

fn lock_session(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|poisoned| {
        let mut guard = poisoned.into_inner();
        guard.recover();
        guard
    })
}

async fn read_commands<R>(mut reader: R, sender: mpsc::UnboundedSender<Inbound>)
where
    R: AsyncBufRead + Unpin,
{
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        let inbound = match reader.read_until(b'\n', &mut buffer).await {
            Ok(0) => break,
            Ok(_) => match std::str::from_utf8(&buffer) {
                Ok(line) => match protocol::parse_line(line) {
                    Ok(Some(message)) => Inbound::Command(message),
                    Ok(None) => continue,
                    Err(error) => Inbound::Malformed {
                        id: protocol::correlation_id(line),
                        error,
                    },
                },
                Err(e) => Inbound::Malformed {
                    id: None,
                    error: ChromaKeyError::protocol(format!("Command line is not UTF-8: {}", e)),
                },
            },
            Err(e) => Inbound::ReadFailed(e),
        };

        let failed = matches!(inbound, Inbound::ReadFailed(_));
        if sender.send(inbound).is_err() || failed {
            break;
        }
    }
}

/// Serve the protocol over the process's stdin and stdout
pub async fn serve_stdio(config: SessionConfig) -> Result<WorkerStats> {
    let worker = Worker::new(config)?;
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut sink = JsonLinesSink::new(tokio::io::stdout());
    info!(
        output = %worker.with_session(|session| session.output_path().display().to_string()),
        "Serving commands on stdin"
    );
    worker.run(stdin, &mut sink).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rgb;
    use tempfile::TempDir;

    fn worker_in(dir: &TempDir, policy: QueuePolicy) -> Worker {
        let config = SessionConfig::builder()
            .output_path(dir.path().join("processed_image.png"))
            .queue_policy(policy)
            .build()
            .unwrap();
        Worker::new(config).unwrap()
    }

    async fn run_lines(worker: &Worker, input: &str) -> (WorkerStats, Vec<NotificationMessage>) {
        let (mut sink, mut receiver) = ChannelSink::new();
        let reader = std::io::Cursor::new(input.as_bytes().to_vec());
        let stats = worker.run(reader, &mut sink).await.unwrap();
        drop(sink);
        let mut messages = Vec::new();
        while let Some(message) = receiver.recv().await {
            messages.push(message);
        }
        (stats, messages)
    }

    #[tokio::test]
    async fn test_state_commands_are_silent() {
        let dir = TempDir::new().unwrap();
        let worker = worker_in(&dir, QueuePolicy::Queue);
        let input = concat!(
            r#"{"command":"add-color","color":[10,20,30],"tolerance":5}"#,
            "\n\n",
            r#"{"command":"update-tolerance","index":4,"tolerance":9}"#,
            "\n",
            r#"{"command":"update-edge-settings","enabled":true,"sensitivity":30}"#,
            "\n"
        );

        let (stats, messages) = run_lines(&worker, input).await;
        assert_eq!(stats.commands_handled, 3);
        assert!(messages.is_empty());
        worker.with_session(|session| {
            assert_eq!(session.targets().len(), 1);
            assert_eq!(session.targets().get(0).unwrap().tolerance.value(), 5);
            assert!(session.edge_settings().enabled);
        });
    }

    #[tokio::test]
    async fn test_malformed_lines_do_not_stop_the_worker() {
        let dir = TempDir::new().unwrap();
        let worker = worker_in(&dir, QueuePolicy::Queue);
        let input = concat!(
            r#"{"command":"bogus","id":"a"}"#,
            "\n",
            "{not json\n",
            r#"{"command":"add-color","color":[1,1,1]}"#,
            "\n"
        );

        let (stats, messages) = run_lines(&worker, input).await;
        assert_eq!(stats.malformed_lines, 2);
        assert_eq!(stats.commands_handled, 1);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id.as_deref(), Some("a"));
        assert!(messages.iter().all(|m| m.notification.is_error()));
        worker.with_session(|session| assert_eq!(session.targets().len(), 1));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_malformed() {
        let dir = TempDir::new().unwrap();
        let worker = worker_in(&dir, QueuePolicy::Queue);
        let (mut sink, mut receiver) = ChannelSink::new();
        let reader = std::io::Cursor::new(vec![0xff, 0xfe, b'\n']);

        let stats = worker.run(reader, &mut sink).await.unwrap();
        assert_eq!(stats.malformed_lines, 1);
        assert!(receiver.recv().await.unwrap().notification.is_error());
    }

    #[tokio::test]
    async fn test_closed_sink_is_fatal() {
        let dir = TempDir::new().unwrap();
        let worker = worker_in(&dir, QueuePolicy::Queue);
        let (mut sink, receiver) = ChannelSink::new();
        drop(receiver);

        let reader = std::io::Cursor::new(b"garbage\n".to_vec());
        let err = worker.run(reader, &mut sink).await.unwrap_err();
        assert!(err.to_string().contains("receiver was dropped"));
    }

    #[tokio::test]
    async fn test_with_session_exposes_state() {
        let dir = TempDir::new().unwrap();
        let worker = worker_in(&dir, QueuePolicy::Supersede);
        worker.with_session(|session| session.add_color(Rgb::new(0, 0, 0), 1));
        let count = worker.with_session(|session| session.targets().len());
        assert_eq!(count, 1);
    }
}
