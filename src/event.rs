//! Event names, channel states, hangup causes, and the immutable
//! [`EventMessage`] view over one event frame.

use crate::{
    constants::*,
    error::{EslError, EslResult},
    frame::{ContentType, Frame},
};
use indexmap::IndexMap;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Event serialization format for `event`/`myevents` subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventFormat {
    /// Plain text format (default)
    #[default]
    Plain,
    /// JSON format
    Json,
    /// XML format
    Xml,
}

impl fmt::Display for EventFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventFormat::Plain => write!(f, "plain"),
            EventFormat::Json => write!(f, "json"),
            EventFormat::Xml => write!(f, "xml"),
        }
    }
}

/// Declares an enum whose variants map 1:1 to FreeSWITCH wire names.
macro_rules! wire_name_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $wire:literal,)+ }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            /// Parse from the wire name (case-insensitive).
            pub fn from_wire(s: &str) -> Option<Self> {
                match s.to_ascii_uppercase().as_str() {
                    $($wire => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// Canonical wire name.
            pub fn as_wire(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_wire())
            }
        }

        impl FromStr for $name {
            type Err = ();

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_wire(s).ok_or(())
            }
        }
    };
}

wire_name_enum! {
    /// FreeSWITCH event names in the canonical order of `switch_event.c`.
    EventName {
        Custom => "CUSTOM",
        Clone => "CLONE",
        ChannelCreate => "CHANNEL_CREATE",
        ChannelDestroy => "CHANNEL_DESTROY",
        ChannelState => "CHANNEL_STATE",
        ChannelCallstate => "CHANNEL_CALLSTATE",
        ChannelAnswer => "CHANNEL_ANSWER",
        ChannelHangup => "CHANNEL_HANGUP",
        ChannelHangupComplete => "CHANNEL_HANGUP_COMPLETE",
        ChannelExecute => "CHANNEL_EXECUTE",
        ChannelExecuteComplete => "CHANNEL_EXECUTE_COMPLETE",
        ChannelHold => "CHANNEL_HOLD",
        ChannelUnhold => "CHANNEL_UNHOLD",
        ChannelBridge => "CHANNEL_BRIDGE",
        ChannelUnbridge => "CHANNEL_UNBRIDGE",
        ChannelProgress => "CHANNEL_PROGRESS",
        ChannelProgressMedia => "CHANNEL_PROGRESS_MEDIA",
        ChannelOutgoing => "CHANNEL_OUTGOING",
        ChannelPark => "CHANNEL_PARK",
        ChannelUnpark => "CHANNEL_UNPARK",
        ChannelApplication => "CHANNEL_APPLICATION",
        ChannelOriginate => "CHANNEL_ORIGINATE",
        ChannelUuid => "CHANNEL_UUID",
        Api => "API",
        Log => "LOG",
        InboundChan => "INBOUND_CHAN",
        OutboundChan => "OUTBOUND_CHAN",
        Startup => "STARTUP",
        Shutdown => "SHUTDOWN",
        Publish => "PUBLISH",
        Unpublish => "UNPUBLISH",
        Talk => "TALK",
        Notalk => "NOTALK",
        SessionCrash => "SESSION_CRASH",
        ModuleLoad => "MODULE_LOAD",
        ModuleUnload => "MODULE_UNLOAD",
        Dtmf => "DTMF",
        Message => "MESSAGE",
        PresenceIn => "PRESENCE_IN",
        NotifyIn => "NOTIFY_IN",
        PresenceOut => "PRESENCE_OUT",
        PresenceProbe => "PRESENCE_PROBE",
        MessageWaiting => "MESSAGE_WAITING",
        MessageQuery => "MESSAGE_QUERY",
        Roster => "ROSTER",
        Codec => "CODEC",
        BackgroundJob => "BACKGROUND_JOB",
        DetectedSpeech => "DETECTED_SPEECH",
        DetectedTone => "DETECTED_TONE",
        PrivateCommand => "PRIVATE_COMMAND",
        Heartbeat => "HEARTBEAT",
        Trap => "TRAP",
        AddSchedule => "ADD_SCHEDULE",
        DelSchedule => "DEL_SCHEDULE",
        ExeSchedule => "EXE_SCHEDULE",
        ReSchedule => "RE_SCHEDULE",
        ReloadXml => "RELOADXML",
        Notify => "NOTIFY",
        PhoneFeature => "PHONE_FEATURE",
        PhoneFeatureSubscribe => "PHONE_FEATURE_SUBSCRIBE",
        SendMessage => "SEND_MESSAGE",
        RecvMessage => "RECV_MESSAGE",
        RequestParams => "REQUEST_PARAMS",
        ChannelData => "CHANNEL_DATA",
        General => "GENERAL",
        Command => "COMMAND",
        SessionHeartbeat => "SESSION_HEARTBEAT",
        ClientDisconnected => "CLIENT_DISCONNECTED",
        ServerDisconnected => "SERVER_DISCONNECTED",
        SendInfo => "SEND_INFO",
        RecvInfo => "RECV_INFO",
        RecvRtcpMessage => "RECV_RTCP_MESSAGE",
        SendRtcpMessage => "SEND_RTCP_MESSAGE",
        CallSecure => "CALL_SECURE",
        Nat => "NAT",
        RecordStart => "RECORD_START",
        RecordStop => "RECORD_STOP",
        PlaybackStart => "PLAYBACK_START",
        PlaybackStop => "PLAYBACK_STOP",
        CallUpdate => "CALL_UPDATE",
        Failure => "FAILURE",
        SocketData => "SOCKET_DATA",
        MediaBugStart => "MEDIA_BUG_START",
        MediaBugStop => "MEDIA_BUG_STOP",
        ConferenceDataQuery => "CONFERENCE_DATA_QUERY",
        ConferenceData => "CONFERENCE_DATA",
        CallSetupReq => "CALL_SETUP_REQ",
        CallSetupResult => "CALL_SETUP_RESULT",
        CallDetail => "CALL_DETAIL",
        DeviceState => "DEVICE_STATE",
        Text => "TEXT",
        ShutdownRequested => "SHUTDOWN_REQUESTED",
        All => "ALL",
    }
}

wire_name_enum! {
    /// Channel state machine states (`CS_*` in `switch_types.h`).
    ChannelState {
        New => "CS_NEW",
        Init => "CS_INIT",
        Routing => "CS_ROUTING",
        SoftExecute => "CS_SOFT_EXECUTE",
        Execute => "CS_EXECUTE",
        ExchangeMedia => "CS_EXCHANGE_MEDIA",
        Park => "CS_PARK",
        ConsumeMedia => "CS_CONSUME_MEDIA",
        Hibernate => "CS_HIBERNATE",
        Reset => "CS_RESET",
        Hangup => "CS_HANGUP",
        Reporting => "CS_REPORTING",
        Destroy => "CS_DESTROY",
        None => "CS_NONE",
    }
}

wire_name_enum! {
    /// Hangup causes (`switch_call_cause_t`). Q.850 names plus the
    /// FreeSWITCH-specific set.
    HangupCause {
        None => "NONE",
        Unspecified => "UNSPECIFIED",
        UnallocatedNumber => "UNALLOCATED_NUMBER",
        NoRouteTransitNet => "NO_ROUTE_TRANSIT_NET",
        NoRouteDestination => "NO_ROUTE_DESTINATION",
        ChannelUnacceptable => "CHANNEL_UNACCEPTABLE",
        CallAwardedDelivered => "CALL_AWARDED_DELIVERED",
        NormalClearing => "NORMAL_CLEARING",
        UserBusy => "USER_BUSY",
        NoUserResponse => "NO_USER_RESPONSE",
        NoAnswer => "NO_ANSWER",
        SubscriberAbsent => "SUBSCRIBER_ABSENT",
        CallRejected => "CALL_REJECTED",
        NumberChanged => "NUMBER_CHANGED",
        RedirectionToNewDestination => "REDIRECTION_TO_NEW_DESTINATION",
        ExchangeRoutingError => "EXCHANGE_ROUTING_ERROR",
        DestinationOutOfOrder => "DESTINATION_OUT_OF_ORDER",
        InvalidNumberFormat => "INVALID_NUMBER_FORMAT",
        FacilityRejected => "FACILITY_REJECTED",
        ResponseToStatusEnquiry => "RESPONSE_TO_STATUS_ENQUIRY",
        NormalUnspecified => "NORMAL_UNSPECIFIED",
        NormalCircuitCongestion => "NORMAL_CIRCUIT_CONGESTION",
        NetworkOutOfOrder => "NETWORK_OUT_OF_ORDER",
        NormalTemporaryFailure => "NORMAL_TEMPORARY_FAILURE",
        SwitchCongestion => "SWITCH_CONGESTION",
        AccessInfoDiscarded => "ACCESS_INFO_DISCARDED",
        RequestedChanUnavail => "REQUESTED_CHAN_UNAVAIL",
        PreEmpted => "PRE_EMPTED",
        FacilityNotSubscribed => "FACILITY_NOT_SUBSCRIBED",
        OutgoingCallBarred => "OUTGOING_CALL_BARRED",
        IncomingCallBarred => "INCOMING_CALL_BARRED",
        BearercapabilityNotauth => "BEARERCAPABILITY_NOTAUTH",
        BearercapabilityNotavail => "BEARERCAPABILITY_NOTAVAIL",
        ServiceUnavailable => "SERVICE_UNAVAILABLE",
        BearercapabilityNotimpl => "BEARERCAPABILITY_NOTIMPL",
        ChanNotImplemented => "CHAN_NOT_IMPLEMENTED",
        FacilityNotImplemented => "FACILITY_NOT_IMPLEMENTED",
        ServiceNotImplemented => "SERVICE_NOT_IMPLEMENTED",
        InvalidCallReference => "INVALID_CALL_REFERENCE",
        IncompatibleDestination => "INCOMPATIBLE_DESTINATION",
        InvalidMsgUnspecified => "INVALID_MSG_UNSPECIFIED",
        MandatoryIeMissing => "MANDATORY_IE_MISSING",
        MessageTypeNonexist => "MESSAGE_TYPE_NONEXIST",
        WrongMessage => "WRONG_MESSAGE",
        IeNonexist => "IE_NONEXIST",
        InvalidIeContents => "INVALID_IE_CONTENTS",
        WrongCallState => "WRONG_CALL_STATE",
        RecoveryOnTimerExpire => "RECOVERY_ON_TIMER_EXPIRE",
        MandatoryIeLengthError => "MANDATORY_IE_LENGTH_ERROR",
        ProtocolError => "PROTOCOL_ERROR",
        Interworking => "INTERWORKING",
        Success => "SUCCESS",
        OriginatorCancel => "ORIGINATOR_CANCEL",
        Crash => "CRASH",
        SystemShutdown => "SYSTEM_SHUTDOWN",
        LoseRace => "LOSE_RACE",
        ManagerRequest => "MANAGER_REQUEST",
        BlindTransfer => "BLIND_TRANSFER",
        AttendedTransfer => "ATTENDED_TRANSFER",
        AllottedTimeout => "ALLOTTED_TIMEOUT",
        UserChallenge => "USER_CHALLENGE",
        MediaTimeout => "MEDIA_TIMEOUT",
        PickedOff => "PICKED_OFF",
        UserNotRegistered => "USER_NOT_REGISTERED",
        ProgressTimeout => "PROGRESS_TIMEOUT",
        GatewayDown => "GATEWAY_DOWN",
    }
}

/// Answer state reported in the `Answer-State` header.
///
/// The wire value is lowercase, unlike every other FreeSWITCH enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnswerState {
    Early,
    Ringing,
    Answered,
    Hangup,
}

impl AnswerState {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "early" => Some(AnswerState::Early),
            "ringing" => Some(AnswerState::Ringing),
            "answered" => Some(AnswerState::Answered),
            "hangup" => Some(AnswerState::Hangup),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            AnswerState::Early => "early",
            AnswerState::Ringing => "ringing",
            AnswerState::Answered => "answered",
            AnswerState::Hangup => "hangup",
        }
    }
}

impl fmt::Display for AnswerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Percent-decode a header value; values without `%` pass through.
pub(crate) fn decode_value(raw: &str) -> String {
    if !raw.contains('%') {
        return raw.to_string();
    }
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Immutable view of one event frame.
///
/// Typed fields (name, uuid, channel state, answer state, hangup cause)
/// are parsed once at construction; header and variable accessors
/// percent-decode on each call. Equality is by identity: two distinct
/// frames are distinct events even if their headers match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    headers: IndexMap<String, String>,
    body: Option<String>,
    event_name: Option<EventName>,
    uuid: Option<String>,
    channel_state: Option<ChannelState>,
    answer_state: Option<AnswerState>,
    hangup_cause: Option<HangupCause>,
}

impl EventMessage {
    /// Build from an event frame, decoding plain/json/xml bodies.
    pub fn from_frame(frame: &Frame) -> EslResult<Self> {
        match frame.content_type {
            ContentType::EventPlain => {
                let mut headers = envelope_headers(frame);
                let mut body = None;
                if let Some(text) = frame.body_text() {
                    let (event_headers, event_body) = parse_plain_event_body(&text)?;
                    headers.extend(event_headers);
                    body = event_body;
                }
                Ok(Self::from_parts(headers, body))
            }
            ContentType::EventJson => {
                let text = frame
                    .body_text()
                    .ok_or_else(|| EslError::protocol("JSON event missing body"))?;
                let value: serde_json::Value = serde_json::from_str(&text)?;
                let obj = value
                    .as_object()
                    .ok_or_else(|| EslError::protocol("JSON event body is not an object"))?;

                let mut headers = IndexMap::new();
                let mut body = None;
                for (key, value) in obj {
                    let value_str = match value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    if key == "_body" {
                        body = Some(value_str);
                    } else {
                        headers.insert(key.clone(), value_str);
                    }
                }
                Ok(Self::from_parts(headers, body))
            }
            ContentType::EventXml => {
                let text = frame
                    .body_text()
                    .ok_or_else(|| EslError::protocol("XML event missing body"))?;
                let (headers, body) = parse_xml_event_body(&text)?;
                Ok(Self::from_parts(headers, body))
            }
            _ => Err(EslError::protocol("frame is not an event")),
        }
    }

    /// Build directly from a header map, e.g. the CHANNEL_DATA headers an
    /// outbound `connect` reply carries.
    pub fn from_headers(headers: IndexMap<String, String>) -> Self {
        Self::from_parts(headers, None)
    }

    fn from_parts(headers: IndexMap<String, String>, body: Option<String>) -> Self {
        let event_name = headers
            .get(HEADER_EVENT_NAME)
            .and_then(|v| EventName::from_wire(&decode_value(v)));
        let uuid = headers
            .get(HEADER_UNIQUE_ID)
            .or_else(|| headers.get(HEADER_CHANNEL_CALL_UUID))
            .map(|v| decode_value(v));
        let channel_state = headers
            .get(HEADER_CHANNEL_STATE)
            .and_then(|v| ChannelState::from_wire(&decode_value(v)));
        let answer_state = headers
            .get(HEADER_ANSWER_STATE)
            .and_then(|v| AnswerState::from_wire(&decode_value(v)));
        let hangup_cause = headers
            .get(HEADER_HANGUP_CAUSE)
            .and_then(|v| HangupCause::from_wire(&decode_value(v)));

        Self {
            headers,
            body,
            event_name,
            uuid,
            channel_state,
            answer_state,
            hangup_cause,
        }
    }

    /// Parsed `Event-Name`.
    pub fn event_name(&self) -> Option<EventName> {
        self.event_name
    }

    /// `Event-Subclass`, meaningful for `CUSTOM` events.
    pub fn event_subclass(&self) -> Option<String> {
        self.get_header(HEADER_EVENT_SUBCLASS)
    }

    /// Call UUID from `Unique-ID`, falling back to `Channel-Call-UUID`.
    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    /// Parsed `Channel-State`.
    pub fn channel_state(&self) -> Option<ChannelState> {
        self.channel_state
    }

    /// Parsed `Answer-State`.
    pub fn answer_state(&self) -> Option<AnswerState> {
        self.answer_state
    }

    /// Parsed `Hangup-Cause`.
    pub fn hangup_cause(&self) -> Option<HangupCause> {
        self.hangup_cause
    }

    /// Header value, percent-decoded.
    pub fn get_header(&self, name: &str) -> Option<String> {
        self.headers.get(name).map(|v| decode_value(v))
    }

    /// Channel variable, i.e. the `variable_<name>` header, percent-decoded.
    pub fn get_variable(&self, name: &str) -> Option<String> {
        self.headers
            .get(&format!("{}{}", VARIABLE_PREFIX, name))
            .map(|v| decode_value(v))
    }

    /// Raw header map in wire order.
    pub fn headers(&self) -> &IndexMap<String, String> {
        &self.headers
    }

    /// True when the event carries the named header.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// Event body, e.g. a BACKGROUND_JOB's api output.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// `Job-UUID` header (BACKGROUND_JOB correlation).
    pub fn job_uuid(&self) -> Option<String> {
        self.get_header(HEADER_JOB_UUID)
    }

    /// `Application` header (CHANNEL_EXECUTE_COMPLETE).
    pub fn application(&self) -> Option<String> {
        self.get_header(HEADER_APPLICATION)
    }

    /// `Application-UUID` header, matching the `Event-UUID` sent with the
    /// execute request.
    pub fn application_uuid(&self) -> Option<String> {
        self.get_header(HEADER_APPLICATION_UUID)
    }

    /// `Other-Leg-Unique-ID` header, present while bridged.
    pub fn other_leg_uuid(&self) -> Option<String> {
        self.get_header(HEADER_OTHER_LEG_UNIQUE_ID)
    }

    /// `DTMF-Digit` header of a DTMF event.
    pub fn dtmf_digit(&self) -> Option<String> {
        self.get_header(HEADER_DTMF_DIGIT)
    }
}

/// Envelope headers minus the transport bookkeeping ones.
fn envelope_headers(frame: &Frame) -> IndexMap<String, String> {
    frame
        .headers
        .iter()
        .filter(|(k, _)| k.as_str() != HEADER_CONTENT_TYPE && k.as_str() != HEADER_CONTENT_LENGTH)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Split a plain event body into its header block and optional inner body.
///
/// The inner body length comes from the event's own `Content-Length`
/// header, exactly as BACKGROUND_JOB results are delivered.
fn parse_plain_event_body(text: &str) -> EslResult<(IndexMap<String, String>, Option<String>)> {
    let mut headers = IndexMap::new();
    let mut rest = text;

    while let Some(newline) = rest.find('\n') {
        let line = rest[..newline].trim_end_matches('\r');
        rest = &rest[newline + 1..];
        if line.is_empty() {
            break;
        }
        let Some(colon) = line.find(':') else {
            return Err(EslError::InvalidHeader {
                header: line.to_string(),
            });
        };
        let name = line[..colon].to_string();
        let value = line[colon + 1..].trim_start_matches(' ');
        headers.insert(name, value.to_string());
    }

    let body = match headers.get(HEADER_CONTENT_LENGTH) {
        Some(v) => {
            let length: usize = v.trim().parse().map_err(|_| EslError::InvalidHeader {
                header: format!("{}: {}", HEADER_CONTENT_LENGTH, v),
            })?;
            let taken = rest
                .as_bytes()
                .get(..length)
                .ok_or_else(|| EslError::protocol("event body shorter than its Content-Length"))?;
            Some(String::from_utf8_lossy(taken).into_owned())
        }
        None => None,
    };

    Ok((headers, body))
}

/// Walk `<event><headers>...</headers><body>...</body></event>`.
fn parse_xml_event_body(text: &str) -> EslResult<(IndexMap<String, String>, Option<String>)> {
    use quick_xml::events::Event as XmlEvent;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(text);

    let mut headers = IndexMap::new();
    let mut body = None;
    let mut in_headers = false;
    let mut current: Option<String> = None;
    let mut in_body = false;

    loop {
        match reader.read_event()? {
            XmlEvent::Start(e) => match e.name().as_ref() {
                b"headers" => in_headers = true,
                b"body" => in_body = true,
                name if in_headers => {
                    current = Some(String::from_utf8_lossy(name).into_owned());
                }
                _ => {}
            },
            XmlEvent::End(e) => match e.name().as_ref() {
                b"headers" => in_headers = false,
                b"body" => in_body = false,
                _ => current = None,
            },
            XmlEvent::Text(t) => {
                let text = t.unescape()?.into_owned();
                if text.trim().is_empty() {
                    continue;
                }
                if in_body {
                    body = Some(text);
                } else if let Some(name) = current.take() {
                    headers.insert(name, text);
                }
            }
            XmlEvent::Eof => break,
            _ => {}
        }
    }

    Ok((headers, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameParser;

    fn event_from(data: &[u8]) -> EventMessage {
        let mut parser = FrameParser::new();
        parser.feed(data).unwrap();
        let frame = parser.parse().unwrap().unwrap();
        EventMessage::from_frame(&frame).unwrap()
    }

    #[test]
    fn event_name_round_trip() {
        assert_eq!(
            EventName::from_wire("CHANNEL_EXECUTE_COMPLETE"),
            Some(EventName::ChannelExecuteComplete)
        );
        assert_eq!(
            EventName::ChannelExecuteComplete.to_string(),
            "CHANNEL_EXECUTE_COMPLETE"
        );
        assert_eq!(
            EventName::from_wire("background_job"),
            Some(EventName::BackgroundJob)
        );
        assert_eq!(EventName::from_wire("RELOADXML"), Some(EventName::ReloadXml));
        assert_eq!(EventName::from_wire("NOT_A_REAL_EVENT"), None);
    }

    #[test]
    fn channel_state_parse() {
        assert_eq!(
            ChannelState::from_wire("CS_EXECUTE"),
            Some(ChannelState::Execute)
        );
        assert_eq!(
            ChannelState::from_wire("CS_EXCHANGE_MEDIA"),
            Some(ChannelState::ExchangeMedia)
        );
        assert_eq!(ChannelState::Destroy.as_wire(), "CS_DESTROY");
    }

    #[test]
    fn answer_state_is_lowercase_on_wire() {
        assert_eq!(AnswerState::from_wire("early"), Some(AnswerState::Early));
        assert_eq!(
            AnswerState::from_wire("ANSWERED"),
            Some(AnswerState::Answered)
        );
        assert_eq!(AnswerState::Answered.to_string(), "answered");
    }

    #[test]
    fn hangup_cause_parse() {
        assert_eq!(
            HangupCause::from_wire("NORMAL_CLEARING"),
            Some(HangupCause::NormalClearing)
        );
        assert_eq!(
            HangupCause::from_wire("ORIGINATOR_CANCEL"),
            Some(HangupCause::OriginatorCancel)
        );
        assert_eq!(HangupCause::from_wire("TOTALLY_MADE_UP"), None);
    }

    #[test]
    fn plain_event_headers_in_body() {
        let body = "Event-Name: CHANNEL_ANSWER\nUnique-ID: abc-123\nAnswer-State: answered\nChannel-State: CS_EXECUTE\n\n";
        let wire = format!(
            "Content-Length: {}\nContent-Type: text/event-plain\n\n{}",
            body.len(),
            body
        );
        let event = event_from(wire.as_bytes());
        assert_eq!(event.event_name(), Some(EventName::ChannelAnswer));
        assert_eq!(event.uuid(), Some("abc-123"));
        assert_eq!(event.answer_state(), Some(AnswerState::Answered));
        assert_eq!(event.channel_state(), Some(ChannelState::Execute));
    }

    #[test]
    fn plain_event_with_inner_body() {
        let body =
            "Event-Name: BACKGROUND_JOB\nJob-UUID: 7f4de4bc\nContent-Length: 14\n\n+OK 3c9a-d00d\n";
        let wire = format!(
            "Content-Length: {}\nContent-Type: text/event-plain\n\n{}",
            body.len(),
            body
        );
        let event = event_from(wire.as_bytes());
        assert_eq!(event.event_name(), Some(EventName::BackgroundJob));
        assert_eq!(event.job_uuid().as_deref(), Some("7f4de4bc"));
        assert_eq!(event.body(), Some("+OK 3c9a-d00d\n"));
    }

    #[test]
    fn json_event_body() {
        let body = r#"{"Event-Name":"CHANNEL_HANGUP","Unique-ID":"u-1","Hangup-Cause":"NORMAL_CLEARING","_body":"ignored payload"}"#;
        let wire = format!(
            "Content-Length: {}\nContent-Type: text/event-json\n\n{}",
            body.len(),
            body
        );
        let event = event_from(wire.as_bytes());
        assert_eq!(event.event_name(), Some(EventName::ChannelHangup));
        assert_eq!(event.uuid(), Some("u-1"));
        assert_eq!(event.hangup_cause(), Some(HangupCause::NormalClearing));
        assert_eq!(event.body(), Some("ignored payload"));
    }

    #[test]
    fn xml_event_body() {
        let body = "<event><headers><Event-Name>CHANNEL_ANSWER</Event-Name><Unique-ID>u-xml</Unique-ID></headers></event>";
        let wire = format!(
            "Content-Length: {}\nContent-Type: text/event-xml\n\n{}",
            body.len(),
            body
        );
        let event = event_from(wire.as_bytes());
        assert_eq!(event.event_name(), Some(EventName::ChannelAnswer));
        assert_eq!(event.uuid(), Some("u-xml"));
    }

    #[test]
    fn variable_lookup_and_decoding() {
        let body = "Event-Name: CHANNEL_EXECUTE_COMPLETE\nUnique-ID: u-2\nvariable_originate_disposition: NO_ANSWER\nvariable_sip_from_display: Test%20User%20%28123%29\n\n";
        let wire = format!(
            "Content-Length: {}\nContent-Type: text/event-plain\n\n{}",
            body.len(),
            body
        );
        let event = event_from(wire.as_bytes());
        assert_eq!(
            event.get_variable("originate_disposition").as_deref(),
            Some("NO_ANSWER")
        );
        assert_eq!(
            event.get_variable("sip_from_display").as_deref(),
            Some("Test User (123)")
        );
        assert_eq!(event.get_variable("no_such_variable"), None);
    }

    #[test]
    fn header_decoding_is_lazy() {
        let body = "Event-Name: HEARTBEAT\nUp-Time: 0%20years%2C%200%20days\n\n";
        let wire = format!(
            "Content-Length: {}\nContent-Type: text/event-plain\n\n{}",
            body.len(),
            body
        );
        let event = event_from(wire.as_bytes());
        // raw map keeps the encoded value, accessor decodes
        assert_eq!(
            event.headers().get("Up-Time").map(String::as_str),
            Some("0%20years%2C%200%20days")
        );
        assert_eq!(
            event.get_header("Up-Time").as_deref(),
            Some("0 years, 0 days")
        );
    }

    #[test]
    fn channel_call_uuid_fallback() {
        let body = "Event-Name: DTMF\nChannel-Call-UUID: fallback-uuid\nDTMF-Digit: 5\n\n";
        let wire = format!(
            "Content-Length: {}\nContent-Type: text/event-plain\n\n{}",
            body.len(),
            body
        );
        let event = event_from(wire.as_bytes());
        assert_eq!(event.uuid(), Some("fallback-uuid"));
        assert_eq!(event.dtmf_digit().as_deref(), Some("5"));
    }

    #[test]
    fn custom_event_subclass() {
        let body = "Event-Name: CUSTOM\nEvent-Subclass: sofia%3A%3Aregister\nUnique-ID: u-3\n\n";
        let wire = format!(
            "Content-Length: {}\nContent-Type: text/event-plain\n\n{}",
            body.len(),
            body
        );
        let event = event_from(wire.as_bytes());
        assert_eq!(event.event_name(), Some(EventName::Custom));
        assert_eq!(event.event_subclass().as_deref(), Some("sofia::register"));
    }

    #[test]
    fn from_headers_channel_data() {
        let mut headers = IndexMap::new();
        headers.insert("Event-Name".to_string(), "CHANNEL_DATA".to_string());
        headers.insert("Unique-ID".to_string(), "outbound-uuid".to_string());
        headers.insert("Answer-State".to_string(), "ringing".to_string());
        let event = EventMessage::from_headers(headers);
        assert_eq!(event.event_name(), Some(EventName::ChannelData));
        assert_eq!(event.uuid(), Some("outbound-uuid"));
        assert_eq!(event.answer_state(), Some(AnswerState::Ringing));
    }
}
