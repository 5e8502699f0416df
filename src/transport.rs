//! MQTT subscription loop.
//!
//! Polls the rumqttc event loop on a single task and hands each publish to
//! the dispatcher inline, so messages are handled one at a time in delivery
//! order. Stops when the shutdown channel fires, disconnects, and returns the
//! dispatcher (and with it the synthesis cache) to the caller.
//!
//! No pings are sent while a message is being handled. If synthesis plus
//! playback outlasts 1.5x the keep-alive, the broker drops the connection,
//! the loop reconnects and resubscribes, and QoS 0 messages published in the
//! gap are lost.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::dispatcher::MessageDispatcher;

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

pub struct MqttListener {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
    qos: QoS,
}

impl MqttListener {
    /// Build the client. The connection itself is made by the first poll.
    pub fn connect(config: &MqttConfig) -> Self {
        let (host, port) = config.broker_address();
        let mut options = MqttOptions::new(&config.client_id, host.clone(), port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        info!("MQTT client created for {host}:{port} (client id {})", config.client_id);

        Self {
            client,
            eventloop,
            topic: config.topic_name.clone(),
            qos: qos_from_level(config.qos),
        }
    }

    pub async fn run(
        mut self,
        mut dispatcher: MessageDispatcher,
        mut shutdown: watch::Receiver<bool>,
    ) -> MessageDispatcher {
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // Clean sessions drop subscriptions, so subscribe on every (re)connect.
                        info!("MQTT client connected! Subscribing to {} ...", self.topic);
                        if let Err(e) = self.client.try_subscribe(self.topic.clone(), self.qos) {
                            error!("Failed to subscribe to {}: {e}", self.topic);
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        info!("Started listening on {}", self.topic);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!("Message on {} ({} bytes)", publish.topic, publish.payload.len());
                        dispatcher.on_message(&publish.topic, &publish.payload).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection error: {e}, retrying in {}s", RECONNECT_DELAY.as_secs());
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        }
                    }
                },
            }
        }

        self.disconnect().await;
        info!("Listener stopped with {} cached messages", dispatcher.cache().len());
        dispatcher
    }

    /// Send DISCONNECT and drive the event loop until it is on the wire.
    async fn disconnect(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            warn!("Failed to queue MQTT disconnect: {e}");
            return;
        }

        let eventloop = &mut self.eventloop;
        let drained = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("Timed out waiting for MQTT disconnect");
        }
        info!("MQTT client disconnected");
    }
}

/// Map a configured level to a QoS. `Config::check` resets anything above 2.
fn qos_from_level(level: u8) -> QoS {
    match level {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}
