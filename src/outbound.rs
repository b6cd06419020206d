//! Outbound connections: FreeSWITCH dials us for each new session
//! (`<action application="socket" data="host:port async full"/>`).
//!
//! The accept loop itself is deliberately thin; the interesting part is
//! the per-connection handshake: `connect` yields the initiating
//! channel's variables as headers, `myevents` scopes the event stream to
//! that session, and the resulting CHANNEL_DATA becomes the first
//! [`EventMessage`] of a [`Channel`].

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{debug, error, info};

use crate::{
    channel::Channel,
    command::Command,
    error::EslResult,
    event::{EventFormat, EventMessage},
    socket::{EventSocket, SocketConfig},
};

/// Listener for outbound sessions from FreeSWITCH.
pub struct OutboundListener {
    listener: TcpListener,
    config: SocketConfig,
    /// `linger` seconds to request after the handshake, if any
    linger: Option<u32>,
    format: EventFormat,
}

/// One accepted outbound session: the socket plus the channel FreeSWITCH
/// created it for.
pub struct OutboundSession {
    pub socket: EventSocket,
    pub channel: Channel,
}

impl OutboundListener {
    /// Bind with default timeouts, no linger, plain events.
    pub async fn bind(addr: impl ToSocketAddrs) -> EslResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "outbound listener bound");
        Ok(Self {
            listener,
            config: SocketConfig::default(),
            linger: None,
            format: EventFormat::Plain,
        })
    }

    /// Request `linger <seconds>` after each handshake so trailing events
    /// still arrive after hangup.
    pub fn with_linger(mut self, seconds: u32) -> Self {
        self.linger = Some(seconds);
        self
    }

    pub fn with_config(mut self, config: SocketConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_format(mut self, format: EventFormat) -> Self {
        self.format = format;
        self
    }

    pub fn local_addr(&self) -> EslResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one connection and run the outbound handshake.
    pub async fn accept(&self) -> EslResult<OutboundSession> {
        let (stream, addr) = self.listener.accept().await?;
        self.handshake(stream, addr).await
    }

    async fn handshake(
        &self,
        stream: tokio::net::TcpStream,
        addr: SocketAddr,
    ) -> EslResult<OutboundSession> {
        info!(%addr, "accepted outbound connection");

        // mod_event_socket does not challenge outbound connections
        let socket = EventSocket::start(stream, self.config, true);

        let reply = socket.send_command_unchecked(Command::Connect).await?;
        let channel_data = EventMessage::from_headers(reply.headers().clone());
        debug!(uuid = ?channel_data.uuid(), "received channel data");

        if let Some(seconds) = self.linger {
            socket
                .send_command_unchecked(Command::Linger {
                    timeout: Some(seconds),
                })
                .await?
                .into_result()?;
        }

        socket.myevents(self.format, None).await?;

        let channel = Channel::new(socket.clone(), channel_data)?;
        Ok(OutboundSession { socket, channel })
    }

    /// Accept loop: spawn `handler` for every session. A failed handshake
    /// only loses that session; a listener error ends the loop.
    pub async fn serve<H, Fut>(self, handler: H) -> EslResult<()>
    where
        H: Fn(OutboundSession) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            match self.handshake(stream, addr).await {
                Ok(session) => {
                    tokio::spawn(handler(session));
                }
                Err(err) => {
                    error!(%addr, error = %err, "outbound handshake failed");
                }
            }
        }
    }
}
