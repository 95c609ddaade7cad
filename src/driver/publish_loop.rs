use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::state::{DeviceSample, SharedState};
use crate::transport::{
    ButtonArray, Header, OutboundMessage, Publisher, TopicConfig, Vector3Stamped,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub cycles: u64,
    pub publish_failures: u64,
    pub decays: u64,
}

/// The three messages produced from one device sample
#[derive(Debug, Clone, PartialEq)]
pub struct StateMessages {
    pub position: Vector3Stamped,
    pub velocity: Vector3Stamped,
    pub buttons: ButtonArray,
}

/// Remaps a device sample into the message frame and stamps it
pub fn build_messages(sample: &DeviceSample, frame_id: &str, stamp: DateTime<Utc>) -> StateMessages {
    let header = Header {
        stamp,
        frame_id: frame_id.to_string(),
    };
    StateMessages {
        position: Vector3Stamped {
            header: header.clone(),
            vector: sample.position.device_to_message(),
        },
        velocity: Vector3Stamped {
            header,
            vector: sample.velocity.device_to_message(),
        },
        buttons: ButtonArray::from_switches(sample.buttons),
    }
}

/// Fixed-rate loop publishing the latest sample and decaying stale force
pub struct PublishLoop<P: Publisher> {
    publisher: P,
    shared: Arc<SharedState>,
    frame_id: String,
    topics: TopicConfig,
    period: Duration,
    stats: PublishStats,
    failing: bool,
}

impl<P: Publisher> PublishLoop<P> {
    pub fn new(
        publisher: P,
        shared: Arc<SharedState>,
        frame_id: String,
        topics: TopicConfig,
        period: Duration,
    ) -> Self {
        Self {
            publisher,
            shared,
            frame_id,
            topics,
            period,
            stats: PublishStats::default(),
            failing: false,
        }
    }

    pub fn stats(&self) -> &PublishStats {
        &self.stats
    }

    /// Runs cycles at the configured period until the run flag is cleared.
    ///
    /// A cycle that has started always completes before the loop returns.
    pub async fn run(mut self) -> PublishStats {
        info!("Starting publish loop with {:?} period", self.period);
        let run = self.shared.run_token();
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = run.cancelled() => break,
                _ = ticker.tick() => self.cycle().await,
            }
        }

        info!(
            "Publish loop stopped after {} cycles ({} publish failures, {} decays)",
            self.stats.cycles, self.stats.publish_failures, self.stats.decays
        );
        self.stats
    }

    /// Publishes the current sample once, then applies the decay rule
    pub async fn cycle(&mut self) {
        let sample = self.shared.sample();
        let messages = build_messages(&sample, &self.frame_id, Utc::now());

        let outbound = [
            (&self.topics.position, OutboundMessage::Stamped(messages.position)),
            (&self.topics.velocity, OutboundMessage::Stamped(messages.velocity)),
            (&self.topics.buttons, OutboundMessage::Buttons(messages.buttons)),
        ];

        let mut cycle_failed = false;
        for (topic, message) in &outbound {
            if let Err(e) = self.publisher.publish(topic, message).await {
                self.stats.publish_failures += 1;
                cycle_failed = true;
                // Only the first failure of a streak is worth a warning at this rate
                if self.failing {
                    debug!("Publish on {} failed: {}", topic, e);
                } else {
                    warn!("Publish on {} failed: {}", topic, e);
                    self.failing = true;
                }
            }
        }
        if !cycle_failed && self.failing {
            info!("Publishing recovered");
            self.failing = false;
        }

        if self.shared.decay_if_consumed() {
            self.stats.decays += 1;
        }
        self.stats.cycles += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Vector3;
    use crate::transport::TransportError;
    use std::sync::Mutex;

    #[derive(Default, Clone)]
    struct Recorder {
        sent: Arc<Mutex<Vec<(String, OutboundMessage)>>>,
    }

    impl Publisher for Recorder {
        async fn publish(&self, topic: &str, message: &OutboundMessage) -> Result<(), TransportError> {
            self.sent
                .lock()
                .unwrap()
                .push((topic.to_string(), message.clone()));
            Ok(())
        }
    }

    struct Refusing;

    impl Publisher for Refusing {
        async fn publish(&self, topic: &str, _message: &OutboundMessage) -> Result<(), TransportError> {
            Err(TransportError::Rejected {
                topic: topic.to_string(),
                reason: "offline".to_string(),
            })
        }
    }

    #[test]
    fn messages_use_message_frame_and_fixed_button_order() {
        let sample = DeviceSample {
            position: Vector3::new(1.0, 2.0, 3.0),
            velocity: Vector3::new(-1.0, -2.0, -3.0),
            buttons: [false, false, true, false],
        };
        let stamp = DateTime::from_timestamp(10, 0).unwrap();
        let messages = build_messages(&sample, "node", stamp);

        assert_eq!(messages.position.vector, Vector3::new(2.0, 3.0, 1.0));
        assert_eq!(messages.velocity.vector, Vector3::new(-2.0, -3.0, -1.0));
        assert_eq!(messages.position.header.frame_id, "node");
        assert_eq!(messages.velocity.header.stamp, stamp);
        assert_eq!(messages.buttons.data, [0, 0, 1, 0]);
    }

    #[tokio::test]
    async fn cycle_publishes_three_topics_and_decays() {
        let shared = Arc::new(SharedState::new());
        let recorder = Recorder::default();
        let mut publish_loop = PublishLoop::new(
            recorder.clone(),
            shared.clone(),
            "node".to_string(),
            TopicConfig::default(),
            Duration::from_millis(1),
        );

        shared.store_command(Vector3::new(1.0, 0.0, 0.0));
        shared.mark_applied(1);
        publish_loop.cycle().await;

        let sent = recorder.sent.lock().unwrap();
        let topics: Vec<&str> = sent.iter().map(|(topic, _)| topic.as_str()).collect();
        assert_eq!(topics, ["haptic/position", "haptic/velocity", "haptic/buttons"]);
        assert_eq!(shared.command().force, Vector3::ZERO);
        assert_eq!(publish_loop.stats().decays, 1);
    }

    #[tokio::test]
    async fn publish_failures_are_counted_and_do_not_block_decay() {
        let shared = Arc::new(SharedState::new());
        let mut publish_loop = PublishLoop::new(
            Refusing,
            shared.clone(),
            "node".to_string(),
            TopicConfig::default(),
            Duration::from_millis(1),
        );

        shared.store_command(Vector3::new(1.0, 0.0, 0.0));
        shared.mark_applied(1);
        publish_loop.cycle().await;

        assert_eq!(publish_loop.stats().publish_failures, 3);
        assert_eq!(publish_loop.stats().cycles, 1);
        assert_eq!(shared.command().force, Vector3::ZERO);
    }

    #[tokio::test]
    async fn run_returns_once_shutdown_is_requested() {
        let shared = Arc::new(SharedState::new());
        let publish_loop = PublishLoop::new(
            Recorder::default(),
            shared.clone(),
            "node".to_string(),
            TopicConfig::default(),
            Duration::from_millis(1),
        );

        let handle = tokio::spawn(publish_loop.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        shared.request_shutdown();

        let stats = tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("publish loop did not stop")
            .unwrap();
        assert!(stats.cycles > 0);
    }
}
