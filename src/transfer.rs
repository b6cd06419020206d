//! Attended-transfer orchestration.
//!
//! `att_xfer` spans three legs: B is the transferor (this channel), A is
//! the party B was bridged to, and C is the leg FreeSWITCH originates
//! toward the transfer target. The outcome is never announced directly;
//! it has to be inferred from which events arrive across the three legs.
//! [`TransferWatcher`] accumulates those observations and evaluates the
//! outcome rules after each one, first match wins.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
    channel::Channel,
    error::{EslError, EslResult},
    event::{EventMessage, EventName},
};

/// How an attended transfer ended.
#[derive(Debug, Clone)]
pub enum AttXferResult {
    /// A and C are bridged; B is out of the call.
    Success,
    /// All three legs were joined into a threeway.
    Threeway,
    /// The transfer failed; `None` when cancelled or disconnected.
    Failed(Option<AttXferFailure>),
    /// A hung up while the transfer was in progress.
    Hangup(Arc<EventMessage>),
}

/// Failure modes distinguishable from the event pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttXferFailure {
    /// C never answered.
    NoAnswer,
    /// C rejected the call.
    CallRejected,
    /// C answered, then hung up before the transfer completed.
    NormalClearing,
}

/// Pure event-pattern evaluator for one attended transfer.
///
/// Feed it every event seen on the socket after `att_xfer` was issued;
/// [`TransferWatcher::observe`] returns the outcome as soon as one rule
/// matches.
pub struct TransferWatcher {
    /// B: the transferor's leg
    b_uuid: String,
    /// A: the original remote party, if B was bridged
    a_uuid: Option<String>,
    c_answer: bool,
    c_hangup: bool,
    c_bridge_other: Option<String>,
    b_hangup: bool,
    a_hangup: Option<Arc<EventMessage>>,
    a_bridge_other: Option<String>,
    execute_complete: Option<Arc<EventMessage>>,
}

impl TransferWatcher {
    pub fn new(b_uuid: String, a_uuid: Option<String>) -> Self {
        Self {
            b_uuid,
            a_uuid,
            c_answer: false,
            c_hangup: false,
            c_bridge_other: None,
            b_hangup: false,
            a_hangup: None,
            a_bridge_other: None,
            execute_complete: None,
        }
    }

    fn is_c_leg(&self, uuid: &str) -> bool {
        uuid != self.b_uuid && self.a_uuid.as_deref() != Some(uuid)
    }

    /// Record one event and evaluate the outcome rules.
    pub fn observe(&mut self, event: &Arc<EventMessage>) -> Option<AttXferResult> {
        let Some(uuid) = event.uuid() else {
            return None;
        };
        let uuid = uuid.to_string();

        match event.event_name() {
            Some(EventName::ChannelAnswer) if self.is_c_leg(&uuid) => {
                trace!(%uuid, "C leg answered");
                self.c_answer = true;
            }
            Some(EventName::ChannelHangup) => {
                if self.is_c_leg(&uuid) {
                    trace!(%uuid, "C leg hung up");
                    self.c_hangup = true;
                } else if uuid == self.b_uuid {
                    trace!(%uuid, "B leg hung up");
                    self.b_hangup = true;
                } else {
                    trace!(%uuid, "A leg hung up");
                    self.a_hangup = Some(Arc::clone(event));
                }
            }
            Some(EventName::ChannelBridge) => {
                if self.is_c_leg(&uuid) {
                    self.c_bridge_other = event.other_leg_uuid();
                } else if self.a_uuid.as_deref() == Some(uuid.as_str()) {
                    self.a_bridge_other = event.other_leg_uuid();
                }
            }
            Some(EventName::ChannelExecuteComplete)
                if uuid == self.b_uuid && event.application().as_deref() == Some("att_xfer") =>
            {
                trace!(%uuid, "att_xfer execute complete");
                self.execute_complete = Some(Arc::clone(event));
            }
            _ => {}
        }

        self.evaluate()
    }

    fn complete_variable(&self, name: &str) -> Option<String> {
        self.execute_complete
            .as_ref()
            .and_then(|event| event.get_variable(name))
    }

    /// The outcome rule table; order matters.
    fn evaluate(&self) -> Option<AttXferResult> {
        let disposition = self.complete_variable("originate_disposition");

        if self.c_hangup && disposition.as_deref() == Some("NO_ANSWER") {
            return Some(AttXferResult::Failed(Some(AttXferFailure::NoAnswer)));
        }

        if self.c_hangup && disposition.as_deref() == Some("CALL_REJECTED") {
            return Some(AttXferResult::Failed(Some(AttXferFailure::CallRejected)));
        }

        if self.c_answer
            && self.c_hangup
            && self.complete_variable("att_xfer_result").as_deref() == Some("success")
            && self.complete_variable("last_bridge_hangup_cause").as_deref()
                == Some("NORMAL_CLEARING")
            && disposition.as_deref() == Some("SUCCESS")
        {
            return Some(AttXferResult::Failed(Some(AttXferFailure::NormalClearing)));
        }

        if self
            .complete_variable("xfer_uuids")
            .filter(|uuids| !uuids.is_empty())
            .is_some()
        {
            return Some(AttXferResult::Threeway);
        }

        // B pressed the completion key: B drops out, C gets bridged to A
        if self.c_answer
            && self.b_hangup
            && self.c_bridge_other.is_some()
            && self.c_bridge_other == self.a_uuid
        {
            return Some(AttXferResult::Success);
        }

        // same outcome observed from A's side of the new bridge
        if self.b_hangup
            && self.c_answer
            && self
                .a_bridge_other
                .as_ref()
                .is_some_and(|other| other != &self.b_uuid)
        {
            return Some(AttXferResult::Success);
        }

        if let Some(event) = &self.a_hangup {
            return Some(AttXferResult::Hangup(Arc::clone(event)));
        }

        None
    }
}

impl Channel {
    /// Attended transfer of this channel's call to `endpoint`.
    ///
    /// Issues `att_xfer` asynchronously on this leg (B) and watches the
    /// event stream for the three-leg pattern that reveals the outcome.
    /// Cancellation, a refused execute request, or a dropped socket all
    /// come back as `Failed(None)`. Callers wanting a deadline wrap this
    /// in `tokio::time::timeout`.
    pub async fn attended_transfer(&self, endpoint: &str) -> EslResult<AttXferResult> {
        let b_uuid = self.uuid().to_string();
        let a_uuid = self.last_event().other_leg_uuid();
        debug!(b = %b_uuid, a = ?a_uuid, %endpoint, "starting attended transfer");

        // subscribe before issuing so no outcome event can slip past
        let mut events = self.socket().events();

        let issued = self
            .socket()
            .execute_app_async(&b_uuid, "att_xfer", Some(endpoint), false)
            .await
            .and_then(|reply| reply.into_result());
        if let Err(err) = issued {
            debug!(error = %err, "att_xfer request failed");
            return Ok(AttXferResult::Failed(None));
        }

        let mut watcher = TransferWatcher::new(b_uuid, a_uuid);
        loop {
            match events.next().await {
                Ok(Some(event)) => {
                    if let Some(result) = watcher.observe(&event) {
                        debug!(?result, "attended transfer resolved");
                        return Ok(result);
                    }
                }
                Ok(None) => {
                    debug!("socket closed during attended transfer");
                    return Ok(AttXferResult::Failed(None));
                }
                Err(err @ EslError::SlowConsumer { .. }) => return Err(err),
                Err(err) => {
                    debug!(error = %err, "attended transfer event stream error");
                    return Ok(AttXferResult::Failed(None));
                }
            }
        }
    }
}
