use std::collections::HashMap;

use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub protocol: ProtocolSettings,
    pub logging: LoggingSettings,
    /// Subscription selector -> topic name.
    pub selectors: HashMap<String, String>,
}

/// Defines the host and port the server will bind to.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Seconds a new socket gets to finish the WebSocket handshake; 0 waits
    /// forever.
    pub handshake_timeout_secs: u64,
}

/// Controls broker-wide limits. A limit of 0 disables it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub max_connections: usize,
    pub max_subscribers_per_topic: usize,
}

/// Per-connection protocol behaviour.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ProtocolSettings {
    /// Reject every operation until `connection_init` was received.
    pub require_init: bool,
    pub max_subscriptions_per_connection: usize,
    /// Seconds between `ka` messages; 0 disables keep-alive.
    pub keep_alive_secs: u64,
    pub close_on_protocol_error: bool,
    pub allow_client_publish: bool,
    /// Selectors without a route resolve to themselves when they are valid
    /// topic names.
    pub passthrough_selectors: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub protocol: Option<PartialProtocolSettings>,
    pub logging: Option<PartialLoggingSettings>,
    pub selectors: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub handshake_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub max_connections: Option<usize>,
    pub max_subscribers_per_topic: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialProtocolSettings {
    pub require_init: Option<bool>,
    pub max_subscriptions_per_connection: Option<usize>,
    pub keep_alive_secs: Option<u64>,
    pub close_on_protocol_error: Option<bool>,
    pub allow_client_publish: Option<bool>,
    pub passthrough_selectors: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            require_init: false,
            max_subscriptions_per_connection: 100,
            keep_alive_secs: 30,
            close_on_protocol_error: true,
            allow_client_publish: true,
            passthrough_selectors: false,
        }
    }
}

/// The three subscription fields of the todo service.
pub fn default_selectors() -> HashMap<String, String> {
    [
        ("todoAdded", "TODO_ADDED"),
        ("todoUpdated", "TODO_UPDATED"),
        ("todoRemoved", "TODO_REMOVED"),
    ]
    .into_iter()
    .map(|(selector, topic)| (selector.to_string(), topic.to_string()))
    .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 4000,
                handshake_timeout_secs: 10,
            },
            broker: BrokerSettings {
                max_connections: 1000,
                max_subscribers_per_topic: 0,
            },
            protocol: ProtocolSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
            selectors: default_selectors(),
        }
    }
}

impl PartialSettings {
    /// Merges the loaded values over the defaults. Configured selectors are
    /// added to (and override) the default routes.
    pub fn merge(self) -> Settings {
        let default = Settings::default();
        let server = self.server.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let protocol = self.protocol.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        let mut selectors = default.selectors;
        selectors.extend(self.selectors.unwrap_or_default());

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
                handshake_timeout_secs: server
                    .handshake_timeout_secs
                    .unwrap_or(default.server.handshake_timeout_secs),
            },
            broker: BrokerSettings {
                max_connections: broker
                    .max_connections
                    .unwrap_or(default.broker.max_connections),
                max_subscribers_per_topic: broker
                    .max_subscribers_per_topic
                    .unwrap_or(default.broker.max_subscribers_per_topic),
            },
            protocol: ProtocolSettings {
                require_init: protocol
                    .require_init
                    .unwrap_or(default.protocol.require_init),
                max_subscriptions_per_connection: protocol
                    .max_subscriptions_per_connection
                    .unwrap_or(default.protocol.max_subscriptions_per_connection),
                keep_alive_secs: protocol
                    .keep_alive_secs
                    .unwrap_or(default.protocol.keep_alive_secs),
                close_on_protocol_error: protocol
                    .close_on_protocol_error
                    .unwrap_or(default.protocol.close_on_protocol_error),
                allow_client_publish: protocol
                    .allow_client_publish
                    .unwrap_or(default.protocol.allow_client_publish),
                passthrough_selectors: protocol
                    .passthrough_selectors
                    .unwrap_or(default.protocol.passthrough_selectors),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
            selectors,
        }
    }
}
