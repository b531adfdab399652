//! ==============================================================================
//! bus.rs - mqtt subscriber for device telemetry
//! ==============================================================================
//!
//! purpose:
//!     keeps one live subscription to the telemetry topic on the broker and
//!     hands every publish to the ingestion task (ingest.rs) as raw bytes.
//!     parsing and store mutation never happen on this task.
//!
//! connection lifecycle:
//!
//!     Disconnected ──dial──▶ Connecting ──suback──▶ Subscribed
//!                                 ▲   │                 │
//!                            dial │   │ fail            │ fail (io error, disconnect)
//!                                 │   ▼                 │
//!                              Reconnecting ◀───────────┘
//!
//!     - every session gets a fresh client + event loop
//!     - the wait for CONNACK is bounded by `connect_timeout_secs`
//!     - reconnects happen after a fixed `reconnect_delay_secs`, forever
//!
//! delivery:
//!     subscriptions use QoS 0 (at most once). duplicates and reordering are
//!     tolerated downstream. if the ingestion queue is full the publish is
//!     dropped rather than stalling the event loop (keep-alives must flow).
//!
//! relationships:
//!     - configured by: config.rs (BrokerConfig)
//!     - feeds: ingest.rs (InboundMessage over mpsc)
//!     - observed by: server.rs (/api/status reads the state watch)
//!
//! ==============================================================================

use crate::config::BrokerConfig;
use crate::ingest::InboundMessage;

use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, NetworkOptions, Packet, QoS,
    SubscribeReasonCode, Transport,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

// ==============================================================================
// state machine
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BusState {
    Disconnected,
    Connecting,
    Subscribed,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// a connection attempt starts
    Dial,
    /// broker acknowledged our subscription
    Subscribed,
    /// connect, subscribe or the live session failed
    Failed,
}

impl BusState {
    /// transitions not in the diagram leave the state unchanged
    pub fn on(self, event: BusEvent) -> BusState {
        match (self, event) {
            (BusState::Disconnected | BusState::Reconnecting, BusEvent::Dial) => BusState::Connecting,
            (BusState::Connecting, BusEvent::Subscribed) => BusState::Subscribed,
            (BusState::Connecting | BusState::Subscribed, BusEvent::Failed) => {
                BusState::Reconnecting
            }
            (state, _) => state,
        }
    }

    pub fn is_connected(self) -> bool {
        self == BusState::Subscribed
    }
}

// ==============================================================================
// errors
// ==============================================================================

#[derive(Debug, Error)]
pub enum BusError {
    #[error("invalid broker uri {uri:?}: {reason}")]
    InvalidBrokerUri { uri: String, reason: &'static str },

    #[error("no CONNACK within {0:?}")]
    ConnectTimeout(Duration),

    #[error("broker refused connection: {0:?}")]
    Refused(ConnectReturnCode),

    #[error("connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("broker rejected subscription to {0}")]
    SubscribeRejected(String),

    #[error("broker closed the session")]
    Disconnected,

    #[error("ingestion queue closed")]
    IngestClosed,
}

// ==============================================================================
// broker address
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// `mqtts://host:port` / `ssl://` / `tls://` use tls (default port 8883);
/// `mqtt://` / `tcp://` are plain (default port 1883). no scheme means tls.
/// ipv6 literals go in brackets (`[::1]:8883`); a trailing path is ignored.
pub fn parse_broker_uri(uri: &str) -> Result<BrokerEndpoint, BusError> {
    let invalid = |reason| BusError::InvalidBrokerUri { uri: uri.to_string(), reason };

    let (rest, tls) = match uri.trim().split_once("://") {
        Some(("mqtts" | "ssl" | "tls", rest)) => (rest, true),
        Some(("mqtt" | "tcp", rest)) => (rest, false),
        Some(_) => return Err(invalid("unsupported scheme")),
        None => (uri.trim(), true),
    };
    let authority = rest.split_once('/').map_or(rest, |(authority, _)| authority);
    if authority.contains('@') {
        return Err(invalid("credentials go in broker.username / broker.password"));
    }
    let default_port = if tls { 8883 } else { 1883 };

    let (host, port) = match authority.strip_prefix('[') {
        Some(bracketed) => {
            let (host, tail) = bracketed.split_once(']').ok_or_else(|| invalid("unclosed ["))?;
            let port = match tail {
                "" => default_port,
                tail => tail
                    .strip_prefix(':')
                    .and_then(|port| port.parse().ok())
                    .ok_or_else(|| invalid("bad port"))?,
            };
            (host, port)
        }
        None => match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().map_err(|_| invalid("bad port"))?),
            None => (authority, default_port),
        },
    };
    if host.is_empty() {
        return Err(invalid("missing host"));
    }

    Ok(BrokerEndpoint { host: host.to_string(), port, tls })
}

// ==============================================================================
// subscriber
// ==============================================================================

pub struct BusSubscriber {
    config: BrokerConfig,
    outbox: mpsc::Sender<InboundMessage>,
    state: watch::Sender<BusState>,
}

impl BusSubscriber {
    pub fn new(
        config: BrokerConfig,
        outbox: mpsc::Sender<InboundMessage>,
    ) -> (Self, watch::Receiver<BusState>) {
        let (state, watcher) = watch::channel(BusState::Disconnected);
        (Self { config, outbox, state }, watcher)
    }

    /// run forever; only a bad broker uri or a closed ingestion queue ends it
    pub async fn run(self) -> Result<(), BusError> {
        let endpoint = parse_broker_uri(&self.config.uri)?;
        if !endpoint.tls {
            warn!(uri = %self.config.uri, "broker connection is not encrypted");
        }
        let reconnect_delay = Duration::from_secs(self.config.reconnect_delay_secs);

        loop {
            self.transition(BusEvent::Dial);
            info!(host = %endpoint.host, port = endpoint.port, "connecting to broker");

            match self.session(&endpoint).await {
                Err(BusError::IngestClosed) => {
                    self.state.send_replace(BusState::Disconnected);
                    return Err(BusError::IngestClosed);
                }
                Err(e) => error!(error = %e, "broker session ended"),
                Ok(()) => {}
            }

            self.transition(BusEvent::Failed);
            info!(delay = ?reconnect_delay, "reconnecting");
            tokio::time::sleep(reconnect_delay).await;
        }
    }

    fn transition(&self, event: BusEvent) {
        self.state.send_modify(|state| *state = state.on(event));
    }

    fn mqtt_options(&self, endpoint: &BrokerEndpoint) -> MqttOptions {
        let mut options =
            MqttOptions::new(self.config.client_id.as_str(), endpoint.host.as_str(), endpoint.port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs.max(5)));
        options.set_clean_session(true);

        if let Some(username) = &self.config.username {
            let password = self.config.password.clone().unwrap_or_default();
            options.set_credentials(username.as_str(), password);
        }
        if endpoint.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }

    /// one connection: connect, subscribe, then forward publishes until it breaks
    async fn session(&self, endpoint: &BrokerEndpoint) -> Result<(), BusError> {
        let (client, mut event_loop) = AsyncClient::new(self.mqtt_options(endpoint), 10);

        // rumqttc applies its own 5s bound to tcp + tls + CONNACK unless told otherwise
        let mut network = NetworkOptions::new();
        network.set_connection_timeout(self.config.connect_timeout_secs);
        event_loop.set_network_options(network);

        let connect_timeout = Duration::from_secs(self.config.connect_timeout_secs);
        tokio::time::timeout(connect_timeout, wait_for_connack(&mut event_loop))
            .await
            .map_err(|_| BusError::ConnectTimeout(connect_timeout))??;
        info!("connected to broker");

        let topic = self.config.topic.as_str();
        client.subscribe(topic, QoS::AtMostOnce).await?;

        loop {
            match event_loop.poll().await? {
                Event::Incoming(Packet::Publish(publish)) => {
                    self.forward(InboundMessage {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    })?;
                }
                Event::Incoming(Packet::SubAck(ack)) => {
                    if ack.return_codes.iter().any(|c| matches!(c, SubscribeReasonCode::Failure)) {
                        return Err(BusError::SubscribeRejected(topic.to_string()));
                    }
                    self.transition(BusEvent::Subscribed);
                    info!(topic = %topic, "subscribed");
                }
                Event::Incoming(Packet::Disconnect) => return Err(BusError::Disconnected),
                other => debug!(event = ?other, "mqtt event"),
            }
        }
    }

    fn forward(&self, message: InboundMessage) -> Result<(), BusError> {
        match self.outbox.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!(topic = %message.topic, "ingestion queue full, dropping message");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(BusError::IngestClosed),
        }
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), BusError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = event_loop.poll().await? {
            return match ack.code {
                ConnectReturnCode::Success => Ok(()),
                code => Err(BusError::Refused(code)),
            };
        }
    }
}
