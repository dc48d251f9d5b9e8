//! CLI for LiveSub
//!
//! Subcommands:
//! - `server`: run the WebSocket server
//! - `listen`: subscribe to a selector and print every event
//! - `publish`: publish one JSON payload to a topic

use std::sync::Arc;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use livesub::broker::Broker;
use livesub::config::{Settings, load_config};
use livesub::session::{SelectorResolver, TopicMap};
use livesub::transport::{ServerMessage, start_websocket_server};
use livesub::utils::logging;
use serde_json::{Value, json};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "livesub")]
enum Command {
    /// Start the WebSocket server
    Server,
    /// Subscribe to a selector and print events until the server completes it
    Listen {
        /// WebSocket server URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:4000")]
        url: String,
        /// Subscription selector, e.g. `todoAdded`
        #[arg(long)]
        selector: String,
    },
    /// Publish a JSON payload to a topic
    Publish {
        #[arg(long, default_value = "ws://127.0.0.1:4000")]
        url: String,
        #[arg(long)]
        topic: String,
        /// JSON text; anything that does not parse is sent as a string
        #[arg(long)]
        payload: String,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&settings.logging.level);

    let result = match Command::parse() {
        Command::Server => run_server(settings).await,
        Command::Listen { url, selector } => run_listen(&url, &selector).await,
        Command::Publish {
            url,
            topic,
            payload,
        } => run_publish(&url, &topic, &payload).await,
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run_server(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let broker = Arc::new(Broker::<Value>::with_subscriber_limit(
        settings.broker.max_subscribers_per_topic,
    ));
    let resolver: Arc<dyn SelectorResolver> = Arc::new(TopicMap::from_settings(&settings));

    tokio::select! {
        result = start_websocket_server(&addr, broker, resolver, settings.clone()) => {
            result?;
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

async fn run_listen(url: &str, selector: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (mut ws_stream, _response) = connect_async(url).await?;

    let init = json!({ "type": "connection_init" });
    ws_stream.send(WsMessage::text(init.to_string())).await?;
    let start = json!({ "type": "start", "id": "1", "selector": selector });
    ws_stream.send(WsMessage::text(start.to_string())).await?;

    while let Some(frame) = ws_stream.next().await {
        let WsMessage::Text(text) = frame? else {
            continue;
        };
        match serde_json::from_str::<ServerMessage>(text.as_str())? {
            ServerMessage::Next { payload, .. } => println!("{payload}"),
            ServerMessage::Complete { .. } => break,
            ServerMessage::Error { message, .. } => return Err(message.into()),
            _ => {}
        }
    }

    Ok(())
}

async fn run_publish(
    url: &str,
    topic: &str,
    payload: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let payload: Value =
        serde_json::from_str(payload).unwrap_or_else(|_| Value::String(payload.to_string()));
    let (mut ws_stream, _response) = connect_async(url).await?;

    let publish = json!({ "type": "publish", "topic": topic, "payload": payload });
    ws_stream.send(WsMessage::text(publish.to_string())).await?;
    // The pong proves the publish was handled before we hang up.
    let ping = json!({ "type": "ping" });
    ws_stream.send(WsMessage::text(ping.to_string())).await?;

    while let Some(frame) = ws_stream.next().await {
        let WsMessage::Text(text) = frame? else {
            continue;
        };
        match serde_json::from_str::<ServerMessage>(text.as_str())? {
            ServerMessage::Pong { .. } => break,
            ServerMessage::Error { message, .. } => return Err(message.into()),
            _ => {}
        }
    }

    ws_stream.close(None).await?;
    info!(topic, "published");
    Ok(())
}
