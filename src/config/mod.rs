mod settings;

use config::{Config, Environment, File};

pub use config::ConfigError;
pub use settings::{
    BrokerSettings, LoggingSettings, PartialSettings, ProtocolSettings, ServerSettings, Settings,
    default_selectors,
};

/// Environment variables override the file: `LIVESUB__SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "LIVESUB";

/// Loads the configuration from `config/default.*` (optional) and the
/// environment, merged over the defaults.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Selector routes from the environment: `LIVESUB__SELECTORS__todoAdded=TODOS`.
pub const SELECTOR_ENV_PREFIX: &str = "LIVESUB__SELECTORS__";

/// Same as [`load_config`] with an explicit file stem.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    // The environment source lowercases keys, but selectors are matched
    // case-sensitively, so selector variables are read here instead.
    let (selector_vars, env): (Vec<_>, Vec<_>) = std::env::vars()
        .partition(|(key, _)| key.to_ascii_uppercase().starts_with(SELECTOR_ENV_PREFIX));

    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .source(Some(env.into_iter().collect())),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    let mut settings = partial.merge();
    for (key, topic) in selector_vars {
        let selector = &key[SELECTOR_ENV_PREFIX.len()..];
        if !selector.is_empty() {
            settings.selectors.insert(selector.to_string(), topic);
        }
    }
    Ok(settings)
}
