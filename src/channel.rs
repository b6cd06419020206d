//! A live FreeSWITCH call, reconstructed from the event stream.
//!
//! A [`Channel`] subscribes to its socket's events filtered by its UUID
//! and keeps the most recent event as its state. Call-control operations
//! check that state first: anything that needs media resolves as a no-op
//! on an unanswered call instead of bothering the server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{
    constants::*,
    error::{EslError, EslResult},
    event::{AnswerState, ChannelState, EventFormat, EventMessage, EventName, HangupCause},
    socket::{EventSocket, EventStream},
};

type HangupCallback = Box<dyn FnOnce(Arc<EventMessage>) + Send + 'static>;

/// Which half of a bridged call an audio operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    ALeg,
    BLeg,
    Both,
}

/// Options for the `play_and_get_digits` application.
#[derive(Debug, Clone)]
pub struct PlayGetDigitsOptions {
    pub min_digits: u32,
    pub max_digits: u32,
    pub max_tries: u32,
    pub timeout_ms: u32,
    pub terminators: String,
    pub file: String,
    pub invalid_file: String,
    pub variable_name: String,
}

impl Default for PlayGetDigitsOptions {
    fn default() -> Self {
        Self {
            min_digits: 1,
            max_digits: 11,
            max_tries: 3,
            timeout_ms: 5000,
            terminators: "#".to_string(),
            file: "silence_stream://250".to_string(),
            invalid_file: "silence_stream://250".to_string(),
            variable_name: "read_digits".to_string(),
        }
    }
}

/// Options for the `read` application.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub min_digits: u32,
    pub max_digits: u32,
    pub file: String,
    pub variable_name: String,
    pub timeout_ms: u32,
    pub terminators: String,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            min_digits: 1,
            max_digits: 11,
            file: "silence_stream://250".to_string(),
            variable_name: "read_digits".to_string(),
            timeout_ms: 5000,
            terminators: "#".to_string(),
        }
    }
}

/// Digits collected by [`Channel::read`].
#[derive(Debug, Clone, Default)]
pub struct ReadResult {
    pub digits: String,
    pub terminator: Option<String>,
}

/// Options for the `say` application.
#[derive(Debug, Clone)]
pub struct SayOptions {
    /// Language module, e.g. `en`
    pub module: String,
    /// What is being said, e.g. `NUMBER`, `CURRENCY`
    pub say_type: String,
    /// `pronounced`, `iterated`, or `counted`
    pub say_method: String,
    pub text: String,
}

struct ChannelInner {
    uuid: String,
    socket: EventSocket,
    last_event: RwLock<Arc<EventMessage>>,
    disposed: AtomicBool,
    hangup_callback: StdMutex<Option<HangupCallback>>,
    monitor: StdMutex<Option<JoinHandle<()>>>,
}

/// Handle to one live call. Cheap to clone.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Build a channel from its first event and start tracking it.
    ///
    /// The initial event must carry the call UUID; for outbound sockets
    /// that is the CHANNEL_DATA from the `connect` reply, for inbound use
    /// whatever event introduced the call (typically CHANNEL_ANSWER or
    /// CHANNEL_CREATE after an originate).
    pub fn new(socket: EventSocket, initial: EventMessage) -> EslResult<Self> {
        let uuid = initial
            .uuid()
            .ok_or_else(|| EslError::protocol("initial channel event carries no UUID"))?
            .to_string();

        // subscribe before construction returns so no event is missed
        let events = socket.events();

        let inner = Arc::new(ChannelInner {
            uuid,
            socket,
            last_event: RwLock::new(Arc::new(initial)),
            disposed: AtomicBool::new(false),
            hangup_callback: StdMutex::new(None),
            monitor: StdMutex::new(None),
        });

        let handle = tokio::spawn(monitor_loop(Arc::clone(&inner), events));
        *inner.monitor.lock().unwrap() = Some(handle);

        Ok(Self { inner })
    }

    /// Call UUID; immutable for the channel's lifetime.
    pub fn uuid(&self) -> &str {
        &self.inner.uuid
    }

    /// Most recent event observed for this UUID.
    pub fn last_event(&self) -> Arc<EventMessage> {
        self.inner.last_event.read().unwrap().clone()
    }

    /// Register the hangup callback. Invoked exactly once, with the
    /// CHANNEL_HANGUP event, after the channel disposes itself.
    pub fn on_hangup<F>(&self, callback: F)
    where
        F: FnOnce(Arc<EventMessage>) + Send + 'static,
    {
        *self.inner.hangup_callback.lock().unwrap() = Some(Box::new(callback));
    }

    pub fn channel_state(&self) -> Option<ChannelState> {
        self.last_event().channel_state()
    }

    pub fn answered(&self) -> Option<AnswerState> {
        self.last_event().answer_state()
    }

    pub fn is_answered(&self) -> bool {
        self.answered() == Some(AnswerState::Answered)
    }

    pub fn is_pre_answered(&self) -> bool {
        self.answered() == Some(AnswerState::Early)
    }

    /// True while the last event carries `Other-Leg-Unique-ID`.
    pub fn is_bridged(&self) -> bool {
        self.last_event().has_header(HEADER_OTHER_LEG_UNIQUE_ID)
    }

    /// UUID of the bridged peer, when bridged.
    pub fn other_leg_uuid(&self) -> Option<String> {
        self.last_event().other_leg_uuid()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn socket(&self) -> &EventSocket {
        &self.inner.socket
    }

    /// Release the event subscription. Idempotent; also runs on hangup.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(uuid = %self.inner.uuid, "channel disposed");
        if let Some(handle) = self.inner.monitor.lock().unwrap().take() {
            handle.abort();
        }
    }

    fn ensure_usable(&self) -> EslResult<()> {
        if self.is_disposed() {
            return Err(EslError::invalid_operation(format!(
                "channel {} is disposed",
                self.inner.uuid
            )));
        }
        Ok(())
    }

    /// Kill the call unless it is already down.
    pub async fn hangup(&self, cause: HangupCause) -> EslResult<()> {
        if !(self.is_answered() || self.is_pre_answered()) {
            return Ok(());
        }
        self.ensure_usable()?;
        self.inner
            .socket
            .send_api(&format!("uuid_kill {} {}", self.inner.uuid, cause.as_wire()))
            .await?
            .into_result()?;
        Ok(())
    }

    /// Play a file on one or both legs. No-op before answer.
    ///
    /// The A-leg uses `playback`; the B-leg (and `Both`) go through
    /// `displace_session`, whose flags select direction: `w` writes
    /// toward the A-leg, `r` toward the B-leg, `m` mixes with live audio.
    pub async fn play_file(
        &self,
        file: &str,
        leg: Leg,
        mix: bool,
        terminator: Option<&str>,
    ) -> EslResult<()> {
        if !self.is_answered() {
            return Ok(());
        }
        self.ensure_usable()?;

        if let Some(terminator) = terminator {
            self.set_channel_variable("playback_terminators", terminator)
                .await?;
        }

        match leg {
            Leg::ALeg => {
                self.inner
                    .socket
                    .execute_app(&self.inner.uuid, "playback", Some(file), true)
                    .await?;
            }
            Leg::BLeg => {
                let arg = displace_arg(file, mix, 'r');
                self.inner
                    .socket
                    .execute_app(&self.inner.uuid, "displace_session", Some(&arg), false)
                    .await?;
            }
            Leg::Both => {
                let toward_a = displace_arg(file, mix, 'w');
                let toward_b = displace_arg(file, mix, 'r');
                futures_util::future::try_join(
                    self.inner.socket.execute_app(
                        &self.inner.uuid,
                        "displace_session",
                        Some(&toward_a),
                        false,
                    ),
                    self.inner.socket.execute_app(
                        &self.inner.uuid,
                        "displace_session",
                        Some(&toward_b),
                        false,
                    ),
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Prompt and collect digits via `play_and_get_digits`.
    ///
    /// Returns the collected digits, `None` before answer or when nothing
    /// was entered.
    pub async fn play_get_digits(
        &self,
        options: PlayGetDigitsOptions,
    ) -> EslResult<Option<String>> {
        if !self.is_answered() {
            return Ok(None);
        }
        self.ensure_usable()?;

        let arg = format!(
            "{} {} {} {} {} {} {} {}",
            options.min_digits,
            options.max_digits,
            options.max_tries,
            options.timeout_ms,
            options.terminators,
            options.file,
            options.invalid_file,
            options.variable_name,
        );
        let complete = self
            .inner
            .socket
            .execute_app(&self.inner.uuid, "play_and_get_digits", Some(&arg), true)
            .await?;

        let digits = complete
            .get_variable(&options.variable_name)
            .filter(|digits| !digits.is_empty());
        Ok(digits)
    }

    /// Collect digits via the `read` application.
    ///
    /// Returns the digits plus the terminator that ended collection;
    /// empty before answer.
    pub async fn read(&self, options: ReadOptions) -> EslResult<ReadResult> {
        if !self.is_answered() {
            return Ok(ReadResult::default());
        }
        self.ensure_usable()?;

        let arg = format!(
            "{} {} {} {} {} {}",
            options.min_digits,
            options.max_digits,
            options.file,
            options.variable_name,
            options.timeout_ms,
            options.terminators,
        );
        let complete = self
            .inner
            .socket
            .execute_app(&self.inner.uuid, "read", Some(&arg), true)
            .await?;

        Ok(ReadResult {
            digits: complete
                .get_variable(&options.variable_name)
                .unwrap_or_default(),
            terminator: complete.get_variable("read_terminator_used"),
        })
    }

    /// Speak via the `say` application. No-op before answer.
    pub async fn say(&self, options: SayOptions) -> EslResult<()> {
        if !self.is_answered() {
            return Ok(());
        }
        self.ensure_usable()?;
        let arg = format!(
            "{} {} {} {}",
            options.module, options.say_type, options.say_method, options.text
        );
        self.inner
            .socket
            .execute_app(&self.inner.uuid, "say", Some(&arg), true)
            .await?;
        Ok(())
    }

    /// Read a channel variable with `uuid_getvar`.
    ///
    /// FreeSWITCH answers with the bare value; `_undef_` means the
    /// variable is not set.
    pub async fn get_channel_variable(&self, name: &str) -> EslResult<Option<String>> {
        self.ensure_usable()?;
        let response = self
            .inner
            .socket
            .send_api(&format!("uuid_getvar {} {}", self.inner.uuid, name))
            .await?;
        let body = response.body_text().trim();
        if body.is_empty() || body == "_undef_" || !response.success() {
            Ok(None)
        } else {
            Ok(Some(body.to_string()))
        }
    }

    /// Bridge this call to another live channel with `uuid_bridge`.
    pub async fn bridge(&self, other_uuid: &str) -> EslResult<()> {
        if !(self.is_answered() || self.is_pre_answered()) {
            return Ok(());
        }
        self.ensure_usable()?;
        self.inner
            .socket
            .send_api(&format!("uuid_bridge {} {}", self.inner.uuid, other_uuid))
            .await?
            .into_result()?;
        Ok(())
    }

    /// Blind-transfer the call to a dialplan destination with
    /// `uuid_transfer`.
    pub async fn transfer_to(&self, destination: &str) -> EslResult<()> {
        if !(self.is_answered() || self.is_pre_answered()) {
            return Ok(());
        }
        self.ensure_usable()?;
        self.inner
            .socket
            .send_api(&format!("uuid_transfer {} {}", self.inner.uuid, destination))
            .await?
            .into_result()?;
        Ok(())
    }

    /// `uuid_setvar <uuid> <name> <value>`.
    pub async fn set_channel_variable(&self, name: &str, value: &str) -> EslResult<()> {
        self.ensure_usable()?;
        self.inner
            .socket
            .send_api(&format!("uuid_setvar {} {} {}", self.inner.uuid, name, value))
            .await?
            .into_result()?;
        Ok(())
    }

    /// Send DTMF digits into the call. No-op before answer.
    pub async fn send_dtmf(&self, digits: &str, duration_ms: Option<u32>) -> EslResult<()> {
        if !self.is_answered() {
            return Ok(());
        }
        self.ensure_usable()?;
        let arg = format!("{}@{}", digits, duration_ms.unwrap_or(2000));
        self.inner
            .socket
            .execute_app(&self.inner.uuid, "send_dtmf", Some(&arg), true)
            .await?;
        Ok(())
    }

    /// Start in-band DTMF detection on the media stream.
    pub async fn start_detecting_inband_dtmf(&self) -> EslResult<()> {
        self.ensure_usable()?;
        self.inner
            .socket
            .subscribe_events(EventFormat::Plain, &[EventName::Dtmf])
            .await?;
        self.inner
            .socket
            .send_api(&format!("uuid_dtmf_session {} start", self.inner.uuid))
            .await?
            .into_result()?;
        Ok(())
    }

    /// Stop in-band DTMF detection.
    pub async fn stop_detecting_inband_dtmf(&self) -> EslResult<()> {
        self.ensure_usable()?;
        self.inner
            .socket
            .send_api(&format!("uuid_dtmf_session {} stop", self.inner.uuid))
            .await?
            .into_result()?;
        Ok(())
    }

    /// Stream of this channel's DTMF digits.
    pub fn dtmf(&self) -> DtmfStream {
        DtmfStream {
            uuid: self.inner.uuid.clone(),
            events: self.inner.socket.events(),
        }
    }

    /// Stream of two-digit feature codes.
    ///
    /// Digits are paired inside a 2-second window; a pair whose first
    /// digit equals `prefix` (default `#`) is emitted concatenated,
    /// anything else is discarded.
    pub fn feature_codes(&self, prefix: Option<&str>) -> FeatureCodeStream {
        FeatureCodeStream {
            dtmf: self.dtmf(),
            prefix: prefix.unwrap_or("#").to_string(),
        }
    }
}

fn displace_arg(file: &str, mix: bool, direction: char) -> String {
    let mut flags = String::new();
    if mix {
        flags.push('m');
    }
    flags.push(direction);
    format!("{} {}", file, flags)
}

async fn monitor_loop(inner: Arc<ChannelInner>, mut events: EventStream) {
    loop {
        match events.next().await {
            Ok(Some(event)) => {
                if event.uuid() != Some(inner.uuid.as_str()) {
                    continue;
                }
                *inner.last_event.write().unwrap() = Arc::clone(&event);

                match event.event_name() {
                    Some(EventName::ChannelAnswer) => {
                        debug!(uuid = %inner.uuid, "channel answered");
                    }
                    Some(EventName::ChannelHangup) => {
                        debug!(
                            uuid = %inner.uuid,
                            cause = ?event.hangup_cause(),
                            "channel hung up"
                        );
                        // dispose first so the callback observes a dead channel
                        inner.disposed.store(true, Ordering::SeqCst);
                        let callback = inner.hangup_callback.lock().unwrap().take();
                        if let Some(callback) = callback {
                            callback(event);
                        }
                        inner.monitor.lock().unwrap().take();
                        return;
                    }
                    _ => {}
                }
            }
            Ok(None) => {
                debug!(uuid = %inner.uuid, "event stream ended");
                return;
            }
            Err(err) => {
                warn!(uuid = %inner.uuid, error = %err, "channel monitor cut off");
                return;
            }
        }
    }
}

/// DTMF digits for one channel, projected from the event stream.
pub struct DtmfStream {
    uuid: String,
    events: EventStream,
}

impl DtmfStream {
    /// Next digit, or `None` at end of stream.
    pub async fn next(&mut self) -> EslResult<Option<String>> {
        let uuid = self.uuid.clone();
        let event = self
            .events
            .next_matching(|event| {
                event.event_name() == Some(EventName::Dtmf)
                    && event.uuid() == Some(uuid.as_str())
            })
            .await?;
        Ok(event.and_then(|e| e.dtmf_digit()))
    }
}

/// Two-digit feature codes recognized from the DTMF stream.
pub struct FeatureCodeStream {
    dtmf: DtmfStream,
    prefix: String,
}

impl FeatureCodeStream {
    /// Next feature code, or `None` at end of stream.
    pub async fn next(&mut self) -> EslResult<Option<String>> {
        loop {
            let Some(first) = self.dtmf.next().await? else {
                return Ok(None);
            };
            if first != self.prefix {
                continue;
            }
            match timeout(FEATURE_CODE_WINDOW, self.dtmf.next()).await {
                Ok(Ok(Some(second))) => return Ok(Some(format!("{}{}", first, second))),
                Ok(Ok(None)) => return Ok(None),
                Ok(Err(err)) => return Err(err),
                // window expired with a lone prefix digit
                Err(_) => continue,
            }
        }
    }
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor.lock().unwrap().take() {
            handle.abort();
        }
    }
}
