//! Client commands and their reply types

use crate::{
    constants::*,
    error::{EslError, EslResult},
    event::{EventFormat, EventMessage},
    frame::Frame,
};
use indexmap::IndexMap;
use std::fmt;

/// Commands the client can issue over the socket.
///
/// [`Command::to_wire_format`] produces the exact bytes sent, terminator
/// included. Single-line commands end with `\n\n`; `sendmsg` emits its
/// header block followed by `\n\n`.
#[derive(Debug, Clone)]
pub enum Command {
    /// `auth <password>`
    Auth { password: String },
    /// `api <command>`
    Api { command: String },
    /// `bgapi <command>` with an optional pre-chosen `Job-UUID` header
    BgApi {
        command: String,
        job_uuid: Option<String>,
    },
    /// `event <format> <names...>`
    Events {
        format: EventFormat,
        events: String,
    },
    /// `filter <header> <value>`
    Filter { header: String, value: String },
    /// `filter delete <header> [value]`
    FilterDelete {
        header: String,
        value: Option<String>,
    },
    /// `myevents [<uuid>] <format>`
    MyEvents {
        format: EventFormat,
        uuid: Option<String>,
    },
    /// `divert_events on|off`
    DivertEvents { on: bool },
    /// `nixevent <names...>`
    NixEvent { events: String },
    /// `noevents`
    NoEvents,
    /// `linger [<seconds>]`
    Linger { timeout: Option<u32> },
    /// `nolinger`
    NoLinger,
    /// `connect` (outbound handshake)
    Connect,
    /// `exit`
    Exit,
    /// `sendmsg <uuid>` with `call-command: execute`
    Execute {
        uuid: String,
        app: String,
        arg: Option<String>,
        event_uuid: String,
        event_lock: bool,
        r#async: bool,
    },
    /// Escape hatch for anything not covered above; sent verbatim
    Custom { command: String },
}

impl Command {
    fn simple(cmd: &str, args: &[&str]) -> String {
        let mut line = String::from(cmd);
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line.push_str(COMMAND_TERMINATOR);
        line
    }

    /// Serialize to the exact bytes put on the wire.
    pub fn to_wire_format(&self) -> String {
        match self {
            Command::Auth { password } => Self::simple("auth", &[password]),
            Command::Api { command } => Self::simple("api", &[command]),
            Command::BgApi { command, job_uuid } => match job_uuid {
                Some(uuid) => format!(
                    "bgapi {}{}Job-UUID: {}{}",
                    command, LINE_TERMINATOR, uuid, COMMAND_TERMINATOR
                ),
                None => Self::simple("bgapi", &[command]),
            },
            Command::Events { format, events } => {
                Self::simple("event", &[&format.to_string(), events])
            }
            Command::Filter { header, value } => Self::simple("filter", &[header, value]),
            Command::FilterDelete { header, value } => match value {
                Some(v) => Self::simple("filter", &["delete", header, v]),
                None => Self::simple("filter", &["delete", header]),
            },
            Command::MyEvents { format, uuid } => match uuid {
                Some(u) => Self::simple("myevents", &[u, &format.to_string()]),
                None => Self::simple("myevents", &[&format.to_string()]),
            },
            Command::DivertEvents { on } => {
                Self::simple("divert_events", &[if *on { "on" } else { "off" }])
            }
            Command::NixEvent { events } => Self::simple("nixevent", &[events]),
            Command::NoEvents => Self::simple("noevents", &[]),
            Command::Linger { timeout } => match timeout {
                Some(n) => Self::simple("linger", &[&n.to_string()]),
                None => Self::simple("linger", &[]),
            },
            Command::NoLinger => Self::simple("nolinger", &[]),
            Command::Connect => Self::simple("connect", &[]),
            Command::Exit => Self::simple("exit", &[]),
            Command::Execute {
                uuid,
                app,
                arg,
                event_uuid,
                event_lock,
                r#async,
            } => {
                let mut msg = format!("sendmsg {}{}", uuid, LINE_TERMINATOR);
                msg.push_str("call-command: execute\n");
                msg.push_str(&format!("execute-app-name: {}\n", app));
                if let Some(arg) = arg {
                    msg.push_str(&format!("execute-app-arg: {}\n", arg));
                }
                msg.push_str(&format!("event-lock: {}\n", event_lock));
                if *r#async {
                    msg.push_str("async: true\n");
                }
                msg.push_str(&format!("Event-UUID: {}", event_uuid));
                msg.push_str(COMMAND_TERMINATOR);
                msg
            }
            Command::Custom { command } => Self::simple(command, &[]),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // first line only, for log lines
        let wire = self.to_wire_format();
        f.write_str(wire.lines().next().unwrap_or_default())
    }
}

/// Reply to a `command/reply` frame.
#[derive(Debug, Clone)]
pub struct CommandReply {
    headers: IndexMap<String, String>,
    reply_text: String,
    success: bool,
}

impl CommandReply {
    pub(crate) fn from_frame(frame: &Frame) -> Self {
        let reply_text = frame
            .header(HEADER_REPLY_TEXT)
            .unwrap_or_default()
            .to_string();
        let success = reply_text.starts_with("+OK");
        Self {
            headers: frame.headers.clone(),
            reply_text,
            success,
        }
    }

    /// `Reply-Text` began with `+OK`.
    pub fn success(&self) -> bool {
        self.success
    }

    /// Full `Reply-Text` value.
    pub fn reply_text(&self) -> &str {
        &self.reply_text
    }

    /// Header value, percent-decoded.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.get(name).map(|v| crate::event::decode_value(v))
    }

    /// All reply headers in wire order.
    pub fn headers(&self) -> &IndexMap<String, String> {
        &self.headers
    }

    /// `Job-UUID` assigned by the server to a `bgapi` request.
    pub fn job_uuid(&self) -> Option<String> {
        self.header(HEADER_JOB_UUID)
    }

    /// `Event-UUID` echoed back for an execute request.
    pub fn event_uuid(&self) -> Option<String> {
        self.header(HEADER_EVENT_UUID)
    }

    /// Error on `-ERR`, passing the reply through otherwise.
    pub fn into_result(self) -> EslResult<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(EslError::CommandFailed {
                reply_text: self.reply_text,
            })
        }
    }
}

/// Reply to an `api/response` frame; the body is the command's stdout.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    body_text: String,
    success: bool,
}

impl ApiResponse {
    pub(crate) fn from_frame(frame: &Frame) -> Self {
        Self::from_body(frame.body_text().unwrap_or_default())
    }

    pub(crate) fn from_body(body_text: String) -> Self {
        let success = !body_text.starts_with("-ERR") && !body_text.starts_with("-USAGE");
        Self { body_text, success }
    }

    /// Body did not begin with `-ERR` or `-USAGE`.
    pub fn success(&self) -> bool {
        self.success
    }

    /// Raw response body.
    pub fn body_text(&self) -> &str {
        &self.body_text
    }

    /// Error on `-ERR`/`-USAGE`, passing the body through otherwise.
    pub fn into_result(self) -> EslResult<String> {
        if self.success {
            Ok(self.body_text)
        } else {
            Err(EslError::CommandFailed {
                reply_text: self.body_text,
            })
        }
    }
}

/// Completion of a `bgapi` job, derived from its BACKGROUND_JOB event.
#[derive(Debug, Clone)]
pub struct BackgroundJobResult {
    job_uuid: String,
    body_text: String,
    success: bool,
}

impl BackgroundJobResult {
    pub(crate) fn from_event(job_uuid: String, event: &EventMessage) -> Self {
        let body_text = event.body().unwrap_or_default().to_string();
        let success = ApiResponse::from_body(body_text.clone()).success();
        Self {
            job_uuid,
            body_text,
            success,
        }
    }

    /// Job-UUID this result correlates to.
    pub fn job_uuid(&self) -> &str {
        &self.job_uuid
    }

    /// Job output, `ApiResponse`-encoded.
    pub fn body_text(&self) -> &str {
        &self.body_text
    }

    pub fn success(&self) -> bool {
        self.success
    }
}
