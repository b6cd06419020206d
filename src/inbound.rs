//! Inbound connections: the client dials FreeSWITCH and authenticates.

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    command::Command,
    constants::*,
    error::{EslError, EslResult},
    frame::ContentType,
    socket::{EventSocket, GreetingWaiter, SocketConfig},
};

/// Everything needed to reach a FreeSWITCH event socket.
#[derive(Debug, Clone)]
pub struct InboundConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub socket: SocketConfig,
}

impl InboundConfig {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
            socket: SocketConfig::default(),
        }
    }
}

/// Connect and authenticate with default timeouts.
///
/// No events are subscribed; follow up with
/// [`EventSocket::subscribe_events`] as needed.
pub async fn connect(host: &str, port: u16, password: &str) -> EslResult<EventSocket> {
    connect_with(InboundConfig::new(host, port, password)).await
}

/// Connect and authenticate.
pub async fn connect_with(config: InboundConfig) -> EslResult<EventSocket> {
    info!(host = %config.host, port = config.port, "connecting to FreeSWITCH");

    let connect_deadline = config.socket.command_timeout;
    let stream = match timeout(
        connect_deadline,
        TcpStream::connect((config.host.as_str(), config.port)),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            warn!(error = %err, "TCP connect failed");
            return Err(EslError::Io(err));
        }
        Err(_) => {
            warn!(timeout_ms = connect_deadline.as_millis() as u64, "TCP connect timed out");
            return Err(EslError::Timeout {
                timeout_ms: connect_deadline.as_millis() as u64,
            });
        }
    };

    let (socket, greeting) = EventSocket::start_inbound(stream, config.socket);
    authenticate(&socket, greeting, &config.password).await?;
    info!("connected and authenticated");
    Ok(socket)
}

async fn authenticate(
    socket: &EventSocket,
    greeting: GreetingWaiter,
    password: &str,
) -> EslResult<()> {
    debug!("waiting for auth request");
    let frame = socket.greeting(greeting).await?;
    if frame.content_type != ContentType::AuthRequest {
        return Err(EslError::protocol(format!(
            "expected auth/request, got {:?}",
            frame.content_type
        )));
    }

    debug!("sending auth");
    let reply = socket
        .send_command_unchecked(Command::Auth {
            password: password.to_string(),
        })
        .await?;

    if !reply.success() {
        let reason = if reply.reply_text().is_empty() {
            "authentication failed".to_string()
        } else {
            reply.reply_text().to_string()
        };
        return Err(EslError::auth_failed(reason));
    }

    socket.set_authenticated();
    debug!("authentication accepted");
    Ok(())
}

/// Connect to the default ESL port.
pub async fn connect_default(host: &str, password: &str) -> EslResult<EventSocket> {
    connect(host, DEFAULT_ESL_PORT, password).await
}
