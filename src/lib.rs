//! FreeSWITCH Event Socket Library (ESL) client with call-control channels
//!
//! This crate turns the raw line-oriented ESL protocol into a
//! concurrency-safe programming model built around two types:
//!
//! - [`EventSocket`] — owns one TCP connection to FreeSWITCH, correlates
//!   command replies and background jobs, and broadcasts the event
//!   stream to any number of subscribers.
//! - [`Channel`] — a live call identified by its UUID, whose state is
//!   continuously rebuilt from the event stream and which exposes
//!   call-control operations (play, read digits, hang up, attended
//!   transfer).
//!
//! # Inbound connection
//!
//! ```rust,no_run
//! use freeswitch_eventsocket::{inbound, EslError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EslError> {
//!     let socket = inbound::connect("localhost", 8021, "ClueCon").await?;
//!
//!     let response = socket.send_api("status").await?;
//!     println!("{}", response.body_text());
//!
//!     socket.exit().await
//! }
//! ```
//!
//! # Event subscription
//!
//! ```rust,no_run
//! use freeswitch_eventsocket::{inbound, EventFormat, EventName};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let socket = inbound::connect("localhost", 8021, "ClueCon").await?;
//!     socket
//!         .subscribe_events(
//!             EventFormat::Plain,
//!             &[EventName::ChannelAnswer, EventName::ChannelHangup],
//!         )
//!         .await?;
//!
//!     let mut events = socket.events();
//!     while let Some(event) = events.next().await? {
//!         println!("{:?} on {:?}", event.event_name(), event.uuid());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Outbound call handling
//!
//! ```rust,no_run
//! use freeswitch_eventsocket::{HangupCause, Leg, OutboundListener};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = OutboundListener::bind("0.0.0.0:8040").await?;
//!     listener
//!         .serve(|session| async move {
//!             let channel = session.channel;
//!             let _ = channel
//!                 .play_file("ivr/ivr-welcome.wav", Leg::ALeg, false, None)
//!                 .await;
//!             let _ = channel.hangup(HangupCause::NormalClearing).await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod command;
pub mod constants;
pub mod error;
pub mod event;
pub mod frame;
pub mod inbound;
pub mod outbound;
pub mod socket;
pub mod transfer;

pub use channel::{
    Channel, DtmfStream, FeatureCodeStream, Leg, PlayGetDigitsOptions, ReadOptions, ReadResult,
    SayOptions,
};
pub use command::{ApiResponse, BackgroundJobResult, Command, CommandReply};
pub use error::{EslError, EslResult};
pub use event::{
    AnswerState, ChannelState, EventFormat, EventMessage, EventName, HangupCause,
};
pub use frame::{ContentType, Frame, FrameParser};
pub use inbound::InboundConfig;
pub use outbound::{OutboundListener, OutboundSession};
pub use socket::{EventSocket, EventStream, SocketConfig};
pub use transfer::{AttXferFailure, AttXferResult, TransferWatcher};
