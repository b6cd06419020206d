//! The event socket: transport ownership, command/reply correlation,
//! background-job correlation, and event fan-out.
//!
//! One reader task drives the [`FrameParser`](crate::frame::FrameParser)
//! and dispatches every frame exactly once: command and api replies
//! complete the head waiter of their FIFO, BACKGROUND_JOB events complete
//! the matching job waiter, everything else is broadcast to subscribers.
//! Writes are serialized; a waiter is enqueued while the writer lock is
//! still held, so the i-th command always owns the i-th reply.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::{
    command::{ApiResponse, BackgroundJobResult, Command, CommandReply},
    constants::*,
    error::{EslError, EslResult},
    event::{EventFormat, EventMessage, EventName},
    frame::{ContentType, Frame, FrameParser},
};

/// Timeouts applied to awaited completions.
#[derive(Debug, Clone, Copy)]
pub struct SocketConfig {
    /// Deadline for a synchronous `command/reply` or `api/response`
    pub command_timeout: Duration,
    /// Deadline for event-correlated completions (execute, bgapi)
    pub response_timeout: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

/// Why the socket went down; regenerated into an [`EslError`] for every
/// caller that observes the teardown.
#[derive(Debug, Clone)]
enum DisconnectCause {
    Closed,
    Rejected(String),
    Protocol(String),
    Io(String),
    Exited,
}

impl DisconnectCause {
    fn to_error(&self) -> EslError {
        match self {
            DisconnectCause::Closed | DisconnectCause::Exited => EslError::ConnectionClosed,
            DisconnectCause::Rejected(reason) => EslError::Rejected {
                reason: reason.clone(),
            },
            DisconnectCause::Protocol(message) => EslError::protocol(message.clone()),
            DisconnectCause::Io(message) => EslError::protocol(format!("IO failure: {}", message)),
        }
    }
}

/// Item carried on the broadcast channel.
#[derive(Debug, Clone)]
enum StreamItem {
    Event(Arc<EventMessage>),
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyKind {
    Command,
    Api,
}

/// A pending reply slot. `tx == None` is a tombstone left by a timed-out
/// caller; the matching reply is consumed and discarded to keep the FIFO
/// aligned.
struct Slot {
    id: u64,
    tx: Option<oneshot::Sender<EslResult<Frame>>>,
}

#[derive(Default)]
struct Correlations {
    command_waiters: VecDeque<Slot>,
    api_waiters: VecDeque<Slot>,
    jobs: HashMap<String, oneshot::Sender<EventMessage>>,
    /// Job-UUIDs announced in a bgapi reply whose caller has not yet
    /// registered a waiter.
    announced_jobs: HashMap<String, Option<EventMessage>>,
    next_slot_id: u64,
}

impl Correlations {
    fn fifo(&mut self, kind: ReplyKind) -> &mut VecDeque<Slot> {
        match kind {
            ReplyKind::Command => &mut self.command_waiters,
            ReplyKind::Api => &mut self.api_waiters,
        }
    }

    fn enqueue(&mut self, kind: ReplyKind, tx: oneshot::Sender<EslResult<Frame>>) -> u64 {
        self.next_slot_id += 1;
        let id = self.next_slot_id;
        self.fifo(kind).push_back(Slot { id, tx: Some(tx) });
        id
    }

    fn tombstone(&mut self, kind: ReplyKind, id: u64) {
        if let Some(slot) = self.fifo(kind).iter_mut().find(|s| s.id == id) {
            slot.tx = None;
        }
    }

    /// Drop a slot whose command never made it onto the wire.
    fn remove(&mut self, kind: ReplyKind, id: u64) {
        let fifo = self.fifo(kind);
        if let Some(pos) = fifo.iter().position(|s| s.id == id) {
            fifo.remove(pos);
        }
    }

    fn complete_head(&mut self, kind: ReplyKind, frame: Frame) {
        match self.fifo(kind).pop_front() {
            Some(Slot { tx: Some(tx), .. }) => {
                let _ = tx.send(Ok(frame));
            }
            Some(Slot { tx: None, .. }) => {
                trace!("discarding reply for timed-out waiter");
            }
            None => {
                warn!(content_type = ?frame.content_type, "unsolicited reply frame, dropping");
            }
        }
    }

    fn fail_all(&mut self, cause: &DisconnectCause) {
        for slot in self
            .command_waiters
            .drain(..)
            .chain(self.api_waiters.drain(..))
        {
            if let Some(tx) = slot.tx {
                let _ = tx.send(Err(cause.to_error()));
            }
        }
        self.jobs.clear();
        self.announced_jobs.clear();
    }
}

struct Shared {
    correlations: StdMutex<Correlations>,
    events_tx: broadcast::Sender<StreamItem>,
    connected: AtomicBool,
    authenticated: AtomicBool,
    disconnect_cause: StdMutex<Option<DisconnectCause>>,
    config: SocketConfig,
}

impl Shared {
    fn teardown(&self, cause: DisconnectCause) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        debug!(?cause, "event socket teardown");
        *self.disconnect_cause.lock().unwrap() = Some(cause.clone());
        self.correlations.lock().unwrap().fail_all(&cause);
        let _ = self.events_tx.send(StreamItem::Disconnected);
    }

    fn closed_error(&self) -> EslError {
        self.disconnect_cause
            .lock()
            .unwrap()
            .as_ref()
            .map(DisconnectCause::to_error)
            .unwrap_or(EslError::ConnectionClosed)
    }
}

/// Handle to one ESL connection. Cheap to clone; all clones share the
/// transport, correlation state, and event broadcaster.
#[derive(Clone)]
pub struct EventSocket {
    shared: Arc<Shared>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

/// Pre-registered waiter for the first frame the server sends.
pub(crate) struct GreetingWaiter {
    id: u64,
    rx: oneshot::Receiver<EslResult<Frame>>,
}

impl EventSocket {
    /// Wrap an established TCP stream and start the reader task.
    ///
    /// `authenticated` is true for outbound sockets, which never see an
    /// auth handshake.
    pub(crate) fn start(stream: TcpStream, config: SocketConfig, authenticated: bool) -> Self {
        Self::spawn_on(stream, Self::new_shared(config, authenticated))
    }

    /// Like [`EventSocket::start`], but with a waiter for the server's
    /// greeting frame registered before the reader task can dispatch it.
    pub(crate) fn start_inbound(stream: TcpStream, config: SocketConfig) -> (Self, GreetingWaiter) {
        let shared = Self::new_shared(config, false);
        let (tx, rx) = oneshot::channel();
        let id = shared
            .correlations
            .lock()
            .unwrap()
            .enqueue(ReplyKind::Command, tx);
        let socket = Self::spawn_on(stream, shared);
        (socket, GreetingWaiter { id, rx })
    }

    fn new_shared(config: SocketConfig, authenticated: bool) -> Arc<Shared> {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Shared {
            correlations: StdMutex::new(Correlations::default()),
            events_tx,
            connected: AtomicBool::new(true),
            authenticated: AtomicBool::new(authenticated),
            disconnect_cause: StdMutex::new(None),
            config,
        })
    }

    fn spawn_on(stream: TcpStream, shared: Arc<Shared>) -> Self {
        let (read_half, write_half) = stream.into_split();
        tokio::spawn(reader_loop(read_half, Arc::clone(&shared)));
        Self {
            shared,
            writer: Arc::new(Mutex::new(write_half)),
        }
    }

    /// Socket is up and (for inbound) authenticated.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn is_authenticated(&self) -> bool {
        self.shared.authenticated.load(Ordering::SeqCst)
    }

    pub(crate) fn set_authenticated(&self) {
        self.shared.authenticated.store(true, Ordering::SeqCst);
    }

    pub fn config(&self) -> &SocketConfig {
        &self.shared.config
    }

    fn ensure_ready(&self) -> EslResult<()> {
        if !self.is_connected() {
            return Err(self.shared.closed_error());
        }
        if !self.is_authenticated() {
            return Err(EslError::AuthPending);
        }
        Ok(())
    }

    /// Write a command and enqueue its reply waiter atomically.
    async fn issue(
        &self,
        command: &Command,
        kind: ReplyKind,
    ) -> EslResult<(u64, oneshot::Receiver<EslResult<Frame>>)> {
        let wire = command.to_wire_format();
        debug!(command = %command, "sending command");

        let mut writer = self.writer.lock().await;
        // enqueue first: the server may reply before write_all returns.
        // The writer lock keeps slot order identical to wire order.
        let (tx, rx) = oneshot::channel();
        let id = self
            .shared
            .correlations
            .lock()
            .unwrap()
            .enqueue(kind, tx);
        if let Err(err) = writer.write_all(wire.as_bytes()).await {
            self.shared.correlations.lock().unwrap().remove(kind, id);
            return Err(EslError::Io(err));
        }
        Ok((id, rx))
    }

    async fn await_reply(
        &self,
        kind: ReplyKind,
        id: u64,
        rx: oneshot::Receiver<EslResult<Frame>>,
        deadline: Duration,
    ) -> EslResult<Frame> {
        match timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self.shared.closed_error()),
            Err(_) => {
                self.shared
                    .correlations
                    .lock()
                    .unwrap()
                    .tombstone(kind, id);
                Err(EslError::Timeout {
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
        }
    }

    /// Wait for the server's greeting (the inbound `auth/request`).
    pub(crate) async fn greeting(&self, waiter: GreetingWaiter) -> EslResult<Frame> {
        self.await_reply(
            ReplyKind::Command,
            waiter.id,
            waiter.rx,
            self.shared.config.command_timeout,
        )
        .await
    }

    /// Send a command during the handshake, before authentication.
    pub(crate) async fn send_command_unchecked(&self, command: Command) -> EslResult<CommandReply> {
        if !self.is_connected() {
            return Err(self.shared.closed_error());
        }
        let (id, rx) = self.issue(&command, ReplyKind::Command).await?;
        let frame = self
            .await_reply(ReplyKind::Command, id, rx, self.shared.config.command_timeout)
            .await?;
        Ok(CommandReply::from_frame(&frame))
    }

    /// Send a command and return the next `command/reply`.
    pub async fn send_command(&self, command: Command) -> EslResult<CommandReply> {
        self.ensure_ready()?;
        self.send_command_unchecked(command).await
    }

    /// Send an api command and return its `api/response`.
    pub async fn send_api(&self, command: &str) -> EslResult<ApiResponse> {
        self.ensure_ready()?;
        let command = Command::Api {
            command: command.to_string(),
        };
        let (id, rx) = self.issue(&command, ReplyKind::Api).await?;
        let frame = self
            .await_reply(ReplyKind::Api, id, rx, self.shared.config.command_timeout)
            .await?;
        Ok(ApiResponse::from_frame(&frame))
    }

    /// Run an api command in the background and await its BACKGROUND_JOB
    /// completion.
    ///
    /// With `job_uuid` supplied the `Job-UUID` header rides along with the
    /// request; otherwise the server assigns one and announces it in the
    /// `command/reply`.
    pub async fn bg_api(
        &self,
        command: &str,
        arg: Option<&str>,
        job_uuid: Option<String>,
    ) -> EslResult<BackgroundJobResult> {
        self.ensure_ready()?;

        let command_text = match arg {
            Some(arg) => format!("{} {}", command, arg),
            None => command.to_string(),
        };

        let (job_uuid, job_rx) = match job_uuid {
            Some(uuid) => {
                // register before sending; the event cannot outrun us
                let (tx, rx) = oneshot::channel();
                self.shared
                    .correlations
                    .lock()
                    .unwrap()
                    .jobs
                    .insert(uuid.clone(), tx);

                let reply = self
                    .send_command_for_job(&command_text, Some(&uuid))
                    .await;
                match reply.and_then(CommandReply::into_result) {
                    Ok(_) => (uuid, rx),
                    Err(err) => {
                        self.shared.correlations.lock().unwrap().jobs.remove(&uuid);
                        return Err(err);
                    }
                }
            }
            None => {
                let reply = self
                    .send_command_for_job(&command_text, None)
                    .await?
                    .into_result()?;
                let uuid = reply.job_uuid().ok_or_else(|| {
                    EslError::protocol("bgapi reply carried no Job-UUID header")
                })?;

                let (tx, rx) = oneshot::channel();
                {
                    let mut corr = self.shared.correlations.lock().unwrap();
                    match corr.announced_jobs.remove(&uuid) {
                        // completion already arrived and was stashed
                        Some(Some(event)) => {
                            return Ok(BackgroundJobResult::from_event(uuid, &event));
                        }
                        _ => {
                            corr.jobs.insert(uuid.clone(), tx);
                        }
                    }
                }
                (uuid, rx)
            }
        };

        let deadline = self.shared.config.response_timeout;
        match timeout(deadline, job_rx).await {
            Ok(Ok(event)) => Ok(BackgroundJobResult::from_event(job_uuid, &event)),
            Ok(Err(_)) => Err(EslError::JobLost { job_uuid }),
            Err(_) => {
                let mut corr = self.shared.correlations.lock().unwrap();
                corr.jobs.remove(&job_uuid);
                corr.announced_jobs.remove(&job_uuid);
                drop(corr);
                Err(EslError::Timeout {
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
        }
    }

    async fn send_command_for_job(
        &self,
        command_text: &str,
        job_uuid: Option<&str>,
    ) -> EslResult<CommandReply> {
        let command = Command::BgApi {
            command: command_text.to_string(),
            job_uuid: job_uuid.map(str::to_string),
        };
        let (id, rx) = self.issue(&command, ReplyKind::Command).await?;
        let frame = self
            .await_reply(ReplyKind::Command, id, rx, self.shared.config.command_timeout)
            .await?;
        Ok(CommandReply::from_frame(&frame))
    }

    /// Execute a dialplan application and wait for its
    /// CHANNEL_EXECUTE_COMPLETE.
    ///
    /// Correlation is by `Application-UUID`: the `Event-UUID` generated
    /// for the request comes back on the completion event, which
    /// disambiguates repeated applications on one channel.
    pub async fn execute_app(
        &self,
        uuid: &str,
        app: &str,
        arg: Option<&str>,
        event_lock: bool,
    ) -> EslResult<Arc<EventMessage>> {
        self.ensure_ready()?;

        let event_uuid = uuid::Uuid::new_v4().to_string();
        // subscribe before sending so the completion cannot be missed
        let mut events = self.events();

        let reply = self
            .send_execute(uuid, app, arg, &event_uuid, event_lock, false)
            .await?
            .into_result()?;
        let wanted = reply.event_uuid().unwrap_or_else(|| event_uuid.clone());

        let deadline = self.shared.config.response_timeout;
        let wait = async {
            loop {
                match events.next().await? {
                    Some(event) => {
                        if event.event_name() == Some(EventName::ChannelExecuteComplete)
                            && event.uuid() == Some(uuid)
                            && event.application().as_deref() == Some(app)
                            && event.application_uuid().as_deref() == Some(wanted.as_str())
                        {
                            return Ok(event);
                        }
                    }
                    None => return Err(self.shared.closed_error()),
                }
            }
        };
        match timeout(deadline, wait).await {
            Ok(result) => result,
            Err(_) => Err(EslError::Timeout {
                timeout_ms: deadline.as_millis() as u64,
            }),
        }
    }

    /// Execute a dialplan application without waiting for completion;
    /// resolves with the `command/reply` acking the request.
    pub async fn execute_app_async(
        &self,
        uuid: &str,
        app: &str,
        arg: Option<&str>,
        event_lock: bool,
    ) -> EslResult<CommandReply> {
        self.ensure_ready()?;
        let event_uuid = uuid::Uuid::new_v4().to_string();
        self.send_execute(uuid, app, arg, &event_uuid, event_lock, true)
            .await
    }

    async fn send_execute(
        &self,
        uuid: &str,
        app: &str,
        arg: Option<&str>,
        event_uuid: &str,
        event_lock: bool,
        r#async: bool,
    ) -> EslResult<CommandReply> {
        let command = Command::Execute {
            uuid: uuid.to_string(),
            app: app.to_string(),
            arg: arg.map(str::to_string),
            event_uuid: event_uuid.to_string(),
            event_lock,
            r#async,
        };
        self.send_command_unchecked(command).await
    }

    /// Subscribe to the given event names.
    pub async fn subscribe_events(
        &self,
        format: EventFormat,
        events: &[EventName],
    ) -> EslResult<()> {
        let events_str = if events.contains(&EventName::All) {
            "ALL".to_string()
        } else {
            events
                .iter()
                .map(|e| e.as_wire())
                .collect::<Vec<_>>()
                .join(" ")
        };
        self.send_command(Command::Events {
            format,
            events: events_str,
        })
        .await?
        .into_result()?;
        Ok(())
    }

    /// Install a server-side event filter.
    pub async fn filter(&self, header: &str, value: &str) -> EslResult<CommandReply> {
        self.send_command(Command::Filter {
            header: header.to_string(),
            value: value.to_string(),
        })
        .await?
        .into_result()
    }

    /// Remove a server-side event filter.
    pub async fn filter_delete(
        &self,
        header: &str,
        value: Option<&str>,
    ) -> EslResult<CommandReply> {
        self.send_command(Command::FilterDelete {
            header: header.to_string(),
            value: value.map(str::to_string),
        })
        .await?
        .into_result()
    }

    /// Subscribe to this session's events only (outbound sockets).
    pub async fn myevents(&self, format: EventFormat, uuid: Option<&str>) -> EslResult<()> {
        self.send_command_unchecked(Command::MyEvents {
            format,
            uuid: uuid.map(str::to_string),
        })
        .await?
        .into_result()?;
        Ok(())
    }

    /// Toggle diversion of session events to this socket.
    pub async fn divert_events(&self, on: bool) -> EslResult<()> {
        self.send_command(Command::DivertEvents { on })
            .await?
            .into_result()?;
        Ok(())
    }

    /// Unsubscribe from specific event names.
    pub async fn nixevent(&self, events: &[EventName]) -> EslResult<()> {
        let events_str = events
            .iter()
            .map(|e| e.as_wire())
            .collect::<Vec<_>>()
            .join(" ");
        self.send_command(Command::NixEvent { events: events_str })
            .await?
            .into_result()?;
        Ok(())
    }

    /// Unsubscribe from all events.
    pub async fn noevents(&self) -> EslResult<()> {
        self.send_command(Command::NoEvents).await?.into_result()?;
        Ok(())
    }

    /// New subscription to the live event stream.
    ///
    /// Joins from now on: a subscriber sees every event the reader
    /// dispatches after this call, in wire order.
    pub fn events(&self) -> EventStream {
        let ended = !self.is_connected();
        EventStream {
            rx: self.shared.events_tx.subscribe(),
            ended,
        }
    }

    /// Send `exit`, await the reply, then tear the socket down.
    pub async fn exit(&self) -> EslResult<()> {
        self.ensure_ready()?;
        let reply = self.send_command_unchecked(Command::Exit).await;
        self.shared.teardown(DisconnectCause::Exited);
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        reply.map(|_| ())
    }
}

/// Multicast view of the socket's event stream.
///
/// `next()` yields events in arrival order; `Ok(None)` means the socket
/// disconnected. A subscriber that falls [`EVENT_CHANNEL_CAPACITY`]
/// events behind is cut off with [`EslError::SlowConsumer`] and the
/// stream ends; the reader task is never blocked on a subscriber.
pub struct EventStream {
    rx: broadcast::Receiver<StreamItem>,
    ended: bool,
}

impl EventStream {
    /// Next event, or `None` once the socket is gone.
    pub async fn next(&mut self) -> EslResult<Option<Arc<EventMessage>>> {
        if self.ended {
            return Ok(None);
        }
        match self.rx.recv().await {
            Ok(StreamItem::Event(event)) => Ok(Some(event)),
            Ok(StreamItem::Disconnected) | Err(broadcast::error::RecvError::Closed) => {
                self.ended = true;
                Ok(None)
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                self.ended = true;
                warn!(missed, "event subscriber lagged, disconnecting it");
                Err(EslError::SlowConsumer { missed })
            }
        }
    }

    /// Next event matching `predicate`, or `None` at end of stream.
    pub async fn next_matching<F>(&mut self, mut predicate: F) -> EslResult<Option<Arc<EventMessage>>>
    where
        F: FnMut(&EventMessage) -> bool,
    {
        while let Some(event) = self.next().await? {
            if predicate(&event) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }
}

async fn reader_loop(mut read_half: OwnedReadHalf, shared: Arc<Shared>) {
    let mut parser = FrameParser::new();
    let mut buf = vec![0u8; SOCKET_BUF_SIZE];

    let cause = loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                break if parser.is_idle() {
                    DisconnectCause::Closed
                } else {
                    DisconnectCause::Protocol("connection closed mid-frame".to_string())
                };
            }
            Ok(n) => {
                trace!(bytes = n, "read from socket");
                if let Err(err) = parser.feed(&buf[..n]) {
                    break DisconnectCause::Protocol(err.to_string());
                }
                match drain_frames(&mut parser, &shared) {
                    Ok(true) => {}
                    Ok(false) => break DisconnectCause::Closed,
                    Err(err) => break DisconnectCause::Protocol(err.to_string()),
                }
            }
            Err(err) => break DisconnectCause::Io(err.to_string()),
        }
    };

    shared.teardown(cause);
}

/// Dispatch every complete frame in the buffer. `Ok(false)` means a
/// disconnect notice ended the session cleanly.
fn drain_frames(parser: &mut FrameParser, shared: &Shared) -> EslResult<bool> {
    while let Some(frame) = parser.parse()? {
        match frame.content_type {
            ContentType::CommandReply => {
                announce_job_if_any(shared, &frame);
                shared
                    .correlations
                    .lock()
                    .unwrap()
                    .complete_head(ReplyKind::Command, frame);
            }
            ContentType::AuthRequest => {
                shared
                    .correlations
                    .lock()
                    .unwrap()
                    .complete_head(ReplyKind::Command, frame);
            }
            ContentType::ApiResponse => {
                shared
                    .correlations
                    .lock()
                    .unwrap()
                    .complete_head(ReplyKind::Api, frame);
            }
            ContentType::EventPlain | ContentType::EventJson | ContentType::EventXml => {
                dispatch_event(shared, &frame)?;
            }
            ContentType::DisconnectNotice => {
                debug!("received disconnect notice");
                return Ok(false);
            }
            ContentType::RudeRejection => {
                let reason = frame.body_text().unwrap_or_default();
                shared.teardown(DisconnectCause::Rejected(reason));
                return Ok(false);
            }
            ContentType::Other(ref kind) => {
                trace!(content_type = %kind, "ignoring frame");
            }
        }
    }
    Ok(true)
}

fn dispatch_event(shared: &Shared, frame: &Frame) -> EslResult<()> {
    let event = EventMessage::from_frame(frame)?;

    if event.event_name() == Some(EventName::BackgroundJob) {
        if let Some(job_uuid) = event.job_uuid() {
            let mut corr = shared.correlations.lock().unwrap();
            if let Some(tx) = corr.jobs.remove(&job_uuid) {
                trace!(%job_uuid, "completing background job");
                corr.announced_jobs.remove(&job_uuid);
                let _ = tx.send(event);
                return Ok(());
            }
            if let Some(stash) = corr.announced_jobs.get_mut(&job_uuid) {
                trace!(%job_uuid, "stashing early background job completion");
                *stash = Some(event);
                return Ok(());
            }
        }
    }

    // broadcast::send only fails when there are no subscribers; events
    // nobody listens for are simply dropped
    let _ = shared.events_tx.send(StreamItem::Event(Arc::new(event)));
    Ok(())
}

/// Note a server-assigned Job-UUID the moment its reply is dispatched, so
/// a BACKGROUND_JOB racing the caller's registration is stashed instead
/// of lost. Called from the reply path before the waiter resumes.
fn announce_job_if_any(shared: &Shared, frame: &Frame) {
    if let Some(job_uuid) = frame.header(HEADER_JOB_UUID) {
        shared
            .correlations
            .lock()
            .unwrap()
            .announced_jobs
            .insert(job_uuid.to_string(), None);
    }
}
