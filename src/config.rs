use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};
use tracing::warn;

/// Comandos que nunca deberían saltarse el cooldown.
const SPAM_PRONE_COMMANDS: [&str; 4] = ["skip", "play", "remove", "search"];

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    // Discord
    #[serde(skip_serializing)]
    pub discord_token: String,
    pub prefix: String,

    // Audio
    pub default_volume: u8,
    pub max_queue_size: usize, // 0 = sin límite
    pub bitrate: u32,
    pub settle_delay_ms: u64,
    pub max_retries: u32,
    pub announce_new_track: bool,

    // Presencia
    /// Muestra la canción actual como actividad del bot
    pub music_presence: bool,
    /// Al terminar, borra la actividad en vez de mostrar "nada"
    pub clear_presence: bool,
    /// Actividad al terminar; tiene prioridad sobre `clear_presence`
    pub idle_presence: Option<String>,

    // Permisos
    pub dj_role: String,
    pub owner_id: Option<u64>,
    pub owner_over_member: bool,
    pub bot_admins: Vec<u64>,
    pub anyone_can_skip: bool,
    pub anyone_can_pause: bool,
    pub anyone_can_leave: bool,
    pub anyone_can_adjust: bool,

    // Canales
    pub channel_whitelist: Vec<u64>,
    pub channel_blacklist: Vec<u64>,

    // Interacción
    pub cancel_word: String,
    pub search_results: usize,
    /// Manda la ayuda por mensaje directo
    pub message_help: bool,
    /// Nombre y avatar de quien pidió la canción en los embeds
    pub requester_name: bool,
    pub cooldown: CooldownConfig,
    pub commands: HashMap<String, CommandOverride>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub enabled: bool,
    pub duration_ms: u64,
    pub exempt: Vec<String>,
}

/// Per-command overrides read from `[commands.<name>]`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CommandOverride {
    pub enabled: Option<bool>,
    pub aliases: Option<Vec<String>>,
    pub help: Option<String>,
    pub usage: Option<String>,
    pub hidden: Option<bool>,
}

impl Config {
    /// Loads configuration from `.env`, an optional TOML file and `MUSIC_*` variables.
    ///
    /// Sources are layered in this order, later ones winning:
    ///
    /// 1. Built-in defaults ([`Config::default`])
    /// 2. `music.toml` in the working directory, or the path in `MUSIC_CONFIG`
    /// 3. Environment variables prefixed with `MUSIC_`, using `__` for nested
    ///    keys (`MUSIC_COOLDOWN__DURATION_MS=5000`) and commas for lists
    ///    (`MUSIC_BOT_ADMINS=1,2`)
    ///
    /// The Discord token is always read from `DISCORD_TOKEN`.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = std::env::var("MUSIC_CONFIG").unwrap_or_else(|_| "music.toml".to_string());

        let settings = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(
                config::Environment::with_prefix("MUSIC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("bot_admins")
                    .with_list_parse_key("channel_whitelist")
                    .with_list_parse_key("channel_blacklist")
                    .with_list_parse_key("cooldown.exempt"),
            )
            .build()
            .context("No se pudo leer la configuración")?;

        let mut config: Config = settings
            .try_deserialize()
            .context("Configuración inválida")?;

        config.discord_token =
            std::env::var("DISCORD_TOKEN").context("Falta la variable DISCORD_TOKEN")?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Prefix must not be empty or contain whitespace
    /// - Default volume must be between 1 and 200
    /// - Bitrate must be between 8kbps and 510kbps (Discord limits)
    /// - Cooldown duration must be positive when the cooldown is enabled
    /// - Cancel word must not be empty
    ///
    /// Exempting spam-prone commands from the cooldown is allowed but logged.
    pub fn validate(&self) -> Result<()> {
        if self.prefix.is_empty() || self.prefix.chars().any(char::is_whitespace) {
            anyhow::bail!(
                "El prefijo no puede estar vacío ni contener espacios: {:?}",
                self.prefix
            );
        }

        if !(1..=200).contains(&self.default_volume) {
            anyhow::bail!("Default volume must be between 1 and 200, got: {}", self.default_volume);
        }

        if self.bitrate > 510_000 {
            anyhow::bail!("Bitrate cannot exceed 510kbps, got: {}", self.bitrate);
        }

        if self.bitrate < 8_000 {
            anyhow::bail!("Bitrate too low, minimum 8kbps, got: {}", self.bitrate);
        }

        if self.cooldown.enabled && self.cooldown.duration_ms == 0 {
            anyhow::bail!("Cooldown duration must be greater than 0 when enabled");
        }

        if self.cancel_word.trim().is_empty() {
            anyhow::bail!("La palabra de cancelación no puede estar vacía");
        }

        if self.search_results == 0 || self.search_results > 10 {
            anyhow::bail!("Search results must be between 1 and 10, got: {}", self.search_results);
        }

        for command in SPAM_PRONE_COMMANDS {
            if self.cooldown.exempt.iter().any(|c| c.eq_ignore_ascii_case(command)) {
                warn!("⚠️ '{}' está exento del cooldown, esto puede permitir spam", command);
            }
        }

        Ok(())
    }

    pub fn cooldown_duration(&self) -> Duration {
        Duration::from_millis(self.cooldown.duration_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The Discord token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Prefix: {}\n  \
            Audio: {}% vol, {}kbps, settle {}\n  \
            Limits: {} queue, {} retries\n  \
            Cooldown: {} ({}), exentos: {}\n  \
            DJ role: {}, admins: {}\n  \
            Presencia: {}, ayuda por DM: {}",
            self.prefix,
            self.default_volume,
            self.bitrate / 1000,
            humantime::format_duration(self.settle_delay()),
            if self.max_queue_size == 0 {
                "unlimited".to_string()
            } else {
                self.max_queue_size.to_string()
            },
            self.max_retries,
            if self.cooldown.enabled { "on" } else { "off" },
            humantime::format_duration(self.cooldown_duration()),
            self.cooldown.exempt.join(", "),
            self.dj_role,
            self.bot_admins.len(),
            if self.music_presence { "on" } else { "off" },
            if self.message_help { "on" } else { "off" },
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks for every key missing from the file and the environment.
impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            prefix: "!".to_string(),

            default_volume: 50,
            max_queue_size: 50,
            bitrate: 120_000,
            settle_delay_ms: 1250,
            max_retries: 1,
            announce_new_track: true,

            music_presence: false,
            clear_presence: false,
            idle_presence: None,

            dj_role: "DJ".to_string(),
            owner_id: None,
            owner_over_member: false,
            bot_admins: Vec::new(),
            anyone_can_skip: false,
            anyone_can_pause: false,
            anyone_can_leave: false,
            anyone_can_adjust: false,

            channel_whitelist: Vec::new(),
            channel_blacklist: Vec::new(),

            cancel_word: "cancelar".to_string(),
            search_results: 10,
            message_help: false,
            requester_name: true,
            cooldown: CooldownConfig::default(),
            commands: HashMap::new(),
        }
    }
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_ms: 10_000,
            exempt: ["volume", "queue", "pause", "resume", "np"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cooldown_duration(), Duration::from_secs(10));
        assert_eq!(config.settle_delay(), Duration::from_millis(1250));
    }

    #[test]
    fn rejects_out_of_range_volume() {
        let config = Config {
            default_volume: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            default_volume: 201,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_prefix_with_spaces() {
        let config = Config {
            prefix: "! ".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn summary_hides_token() {
        let config = Config {
            discord_token: "super-secreto".to_string(),
            ..Config::default()
        };
        assert!(!config.summary().contains("super-secreto"));
    }

    #[test]
    fn deserializes_partial_toml() {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                "prefix = \"?\"\nmax_queue_size = 0\n[cooldown]\nduration_ms = 3000\n[commands.skip]\naliases = [\"s\", \"next\"]\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: Config = settings.try_deserialize().unwrap();

        assert_eq!(config.prefix, "?");
        assert_eq!(config.max_queue_size, 0);
        assert_eq!(config.cooldown.duration_ms, 3000);
        assert!(config.cooldown.enabled);
        assert_eq!(
            config.commands["skip"].aliases.as_deref(),
            Some(&["s".to_string(), "next".to_string()][..])
        );
        assert_eq!(config.dj_role, "DJ");
    }
}
