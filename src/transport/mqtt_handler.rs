use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttSettings;
use super::{OutboundMessage, Publisher, TransportError};
use crate::driver::ForceIntake;

const RECONNECT_BACKOFF_STEP: Duration = Duration::from_millis(200);
const MAX_BACKOFF_STEPS: u32 = 10;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub commands_accepted: u64,
    pub commands_rejected: u64,
    pub connection_errors: u64,
}

/// Client half and event loop of one broker connection
pub struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
}

impl MqttTransport {
    /// Configures the connection. Nothing is sent until the dispatcher starts
    /// polling the event loop.
    pub fn connect(settings: &MqttSettings, client_id: &str) -> Self {
        info!(
            "Configuring MQTT connection to {}:{} as {}",
            settings.host, settings.port, client_id
        );
        let mut options = MqttOptions::new(client_id, settings.host.clone(), settings.port);
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs));
        if let (Some(user), Some(password)) = (&settings.user, &settings.password) {
            options.set_credentials(user.clone(), password.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, settings.channel_capacity);
        Self { client, eventloop }
    }

    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
        }
    }

    pub fn into_dispatcher(self, force_topic: String, intake: ForceIntake) -> ForceDispatcher {
        let (status, _) = watch::channel(ConnectionState::Connecting);
        ForceDispatcher {
            client: self.client,
            eventloop: self.eventloop,
            force_topic,
            intake,
            status,
            stats: DispatchStats::default(),
        }
    }
}

/// Publishes outbound messages without waiting on the broker.
///
/// Uses the non-blocking client calls so a stalled connection can never hold
/// up the publish loop; a full request queue surfaces as an error instead.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, message: &OutboundMessage) -> Result<(), TransportError> {
        let payload = message.to_json()?;
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)?;
        Ok(())
    }
}

/// Drives the MQTT event loop and routes inbound force commands to the intake
pub struct ForceDispatcher {
    client: AsyncClient,
    eventloop: EventLoop,
    force_topic: String,
    intake: ForceIntake,
    status: watch::Sender<ConnectionState>,
    stats: DispatchStats,
}

impl ForceDispatcher {
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionState> {
        self.status.subscribe()
    }

    /// Polls the connection until `shutdown` is cancelled
    pub async fn run(mut self, shutdown: CancellationToken) -> DispatchStats {
        info!("Starting force dispatcher on topic {}", self.force_topic);
        let mut consecutive_errors: u32 = 0;

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    consecutive_errors = 0;
                    self.set_state(ConnectionState::Connected);
                    info!("Connected to broker, subscribing to {}", self.force_topic);
                    // The broker drops subscriptions with the session, so
                    // subscribe again after every (re)connect
                    if let Err(e) = self.client.try_subscribe(&self.force_topic, QoS::AtMostOnce) {
                        error!("Failed to subscribe to {}: {}", self.force_topic, e);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if publish.topic == self.force_topic {
                        self.dispatch(&publish.payload);
                    } else {
                        debug!("Ignoring message on unexpected topic {}", publish.topic);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    self.stats.connection_errors += 1;
                    self.set_state(ConnectionState::Reconnecting);
                    warn!("MQTT connection error ({} in a row): {}", consecutive_errors, e);

                    let backoff = RECONNECT_BACKOFF_STEP * consecutive_errors.min(MAX_BACKOFF_STEPS);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect request not queued: {}", e);
        }
        self.set_state(ConnectionState::Disconnected);
        info!(
            "Force dispatcher stopped: {} accepted, {} rejected, {} connection errors",
            self.stats.commands_accepted, self.stats.commands_rejected, self.stats.connection_errors
        );
        self.stats
    }

    fn dispatch(&mut self, payload: &[u8]) {
        match self.intake.handle_payload(payload) {
            Ok(seq) => {
                self.stats.commands_accepted += 1;
                debug!("Force command {} accepted", seq);
            }
            Err(e) => {
                self.stats.commands_rejected += 1;
                warn!("Force command rejected: {}", e);
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!("MQTT connection state: {:?} -> {:?}", current, state);
                *current = state;
                true
            }
        });
    }
}
