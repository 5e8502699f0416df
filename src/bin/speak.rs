//! speak: publish a single request to a running mqtt-speaker-rs.
//!
//! Builds the request JSON from the command line, publishes it with QoS 1
//! and disconnects once the broker has it.

use std::time::Duration;

use clap::Parser;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use serde::Serialize;

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "speak", about = "Ask mqtt-speaker-rs to say something")]
struct Args {
    /// Broker host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Broker port
    #[arg(long, default_value_t = 1883)]
    port: u16,

    /// Topic the speaker listens on
    #[arg(short, long, default_value = "speech")]
    topic: String,

    /// Text to synthesize and speak
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    text: Option<String>,

    /// Saved audio file to play, relative to the speaker's saved_audios_dir
    #[arg(long)]
    file: Option<String>,

    /// Voice override for text requests
    #[arg(long, requires = "text")]
    voice: Option<String>,
}

// --- Request JSON, as mqtt-speaker-rs decodes it ---

#[derive(Serialize)]
struct SpeakRequest {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    play_from_file: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_id: Option<String>,
}

impl From<Args> for SpeakRequest {
    fn from(args: Args) -> Self {
        Self {
            play_from_file: args.file.is_some(),
            file_location: args.file,
            text: args.text,
            voice_id: args.voice,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let host = args.host.clone();
    let port = args.port;
    let topic = args.topic.clone();
    let payload = serde_json::to_vec(&SpeakRequest::from(args))?;

    let mut options = MqttOptions::new(format!("speak-{}", std::process::id()), host, port);
    options.set_keep_alive(Duration::from_secs(5));
    let (client, mut eventloop) = AsyncClient::new(options, 10);

    client.publish(topic, QoS::AtLeastOnce, false, payload).await?;

    match tokio::time::timeout(PUBLISH_TIMEOUT, deliver(&client, &mut eventloop)).await {
        Ok(result) => result,
        Err(_) => Err("timed out waiting for the broker".into()),
    }
}

/// Drive the event loop until the publish is acknowledged and DISCONNECT is sent.
async fn deliver(
    client: &AsyncClient,
    eventloop: &mut EventLoop,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::PubAck(_)) => client.disconnect().await?,
            Event::Outgoing(Outgoing::Disconnect) => return Ok(()),
            _ => {}
        }
    }
}
