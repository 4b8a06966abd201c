use anyhow::{bail, Result};
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, error, info, warn};

use super::{chat::ChatGateway, cooldown::CooldownGate, permissions::Privileges};
use crate::{config::Config, error::MusicResult, ui::notice::Notice};

/// Qué handler ejecuta cada comando.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Play,
    Search,
    Skip,
    Pause,
    Resume,
    Leave,
    Queue,
    NowPlaying,
    Loop,
    Clear,
    Volume,
    Remove,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    pub aliases: Vec<String>,
    pub enabled: bool,
    pub cooldown_exempt: bool,
    pub hidden: bool,
    pub help: String,
    /// Plantilla con `{{prefix}}`
    pub usage: String,
    pub kind: CommandKind,
}

impl CommandSpec {
    pub fn usage_for(&self, prefix: &str) -> String {
        self.usage.replace("{{prefix}}", prefix)
    }
}

/// Tabla por defecto: (kind, nombre, alias, ayuda, uso)
const DEFAULT_COMMANDS: [(CommandKind, &str, &[&str], &str, &str); 13] = [
    (
        CommandKind::Play,
        "play",
        &["p"],
        "Busca y agrega una canción o playlist a la cola",
        "{{prefix}}play <canción | url>",
    ),
    (
        CommandKind::Search,
        "search",
        &["buscar"],
        "Busca hasta 10 videos y te deja elegir uno",
        "{{prefix}}search <búsqueda>",
    ),
    (CommandKind::Skip, "skip", &["s", "next"], "Salta la canción actual", "{{prefix}}skip"),
    (CommandKind::Pause, "pause", &[], "Pausa la reproducción", "{{prefix}}pause"),
    (CommandKind::Resume, "resume", &["continue"], "Reanuda la reproducción", "{{prefix}}resume"),
    (
        CommandKind::Leave,
        "leave",
        &["stop", "disconnect"],
        "Limpia la cola y sale del canal de voz",
        "{{prefix}}leave",
    ),
    (
        CommandKind::Queue,
        "queue",
        &["q", "cola"],
        "Muestra la cola o los detalles de una posición",
        "{{prefix}}queue [posición]",
    ),
    (
        CommandKind::NowPlaying,
        "np",
        &["nowplaying", "current"],
        "Muestra la canción que está sonando",
        "{{prefix}}np",
    ),
    (
        CommandKind::Loop,
        "loop",
        &["repeat"],
        "Alterna repetición: nada → canción → cola",
        "{{prefix}}loop",
    ),
    (CommandKind::Clear, "clear", &["limpiar"], "Vacía la cola", "{{prefix}}clear"),
    (
        CommandKind::Volume,
        "volume",
        &["vol", "v"],
        "Muestra o cambia el volumen (1-200)",
        "{{prefix}}volume [1-200]",
    ),
    (
        CommandKind::Remove,
        "remove",
        &["rm"],
        "Quita una canción de la cola",
        "{{prefix}}remove <posición>",
    ),
    (
        CommandKind::Help,
        "help",
        &["h", "ayuda"],
        "Muestra los comandos o la ayuda de uno",
        "{{prefix}}help [comando]",
    ),
];

/// Tabla de comandos validada una vez al iniciar; inmutable después.
#[derive(Debug)]
pub struct CommandRegistry {
    specs: Vec<CommandSpec>,
    index: HashMap<String, usize>,
}

impl CommandRegistry {
    /// Builds the table from the defaults plus `[commands.<name>]` overrides.
    ///
    /// Fails on overrides for unknown commands and on names or aliases that
    /// collide across commands.
    pub fn build(config: &Config) -> Result<Self> {
        for name in config.commands.keys() {
            if !DEFAULT_COMMANDS.iter().any(|(_, n, ..)| n.eq_ignore_ascii_case(name)) {
                bail!("Override para un comando desconocido: {}", name);
            }
        }

        let specs = DEFAULT_COMMANDS
            .iter()
            .map(|(kind, name, aliases, help, usage)| {
                let over = config.commands.get(*name).cloned().unwrap_or_default();
                CommandSpec {
                    name: name.to_string(),
                    aliases: over
                        .aliases
                        .unwrap_or_else(|| aliases.iter().map(|a| a.to_string()).collect()),
                    enabled: over.enabled.unwrap_or(true),
                    cooldown_exempt: config
                        .cooldown
                        .exempt
                        .iter()
                        .any(|c| c.eq_ignore_ascii_case(name)),
                    hidden: over.hidden.unwrap_or(false),
                    help: over.help.unwrap_or_else(|| help.to_string()),
                    usage: over.usage.unwrap_or_else(|| usage.to_string()),
                    kind: *kind,
                }
            })
            .collect();

        Self::from_specs(specs)
    }

    pub fn from_specs(specs: Vec<CommandSpec>) -> Result<Self> {
        let mut index = HashMap::new();

        for (i, spec) in specs.iter().enumerate() {
            for key in std::iter::once(&spec.name).chain(spec.aliases.iter()) {
                let key = key.to_lowercase();
                if key.is_empty() || key.contains(char::is_whitespace) {
                    bail!("Nombre o alias inválido en '{}': {:?}", spec.name, key);
                }
                if let Some(previous) = index.insert(key.clone(), i) {
                    if previous != i {
                        bail!(
                            "'{}' está repetido entre '{}' y '{}'",
                            key,
                            specs[previous].name,
                            spec.name
                        );
                    }
                }
            }
        }

        info!("📝 {} comandos registrados", specs.len());
        Ok(Self { specs, index })
    }

    pub fn resolve(&self, name: &str) -> Option<&CommandSpec> {
        self.index.get(&name.to_lowercase()).map(|&i| &self.specs[i])
    }

    /// Comandos habilitados y no ocultos, para `help`.
    pub fn visible(&self) -> impl Iterator<Item = &CommandSpec> {
        self.specs.iter().filter(|s| s.enabled && !s.hidden)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub args: String,
    pub tokens: Vec<String>,
}

/// Separa `<prefix><nombre> <args>`; `None` si no empieza con el prefijo.
pub fn parse(text: &str, prefix: &str) -> Option<ParsedCommand> {
    let rest = text.trim_start().strip_prefix(prefix)?;
    let rest = rest.trim_start();
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    if name.is_empty() {
        return None;
    }

    Some(ParsedCommand {
        name: name.to_lowercase(),
        args: args.to_string(),
        tokens: args.split_whitespace().map(String::from).collect(),
    })
}

/// Mensaje entrante, ya extraído del gateway.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub author_is_bot: bool,
    /// Nombre visible y avatar del autor
    pub author_name: String,
    pub author_avatar: Option<String>,
    pub content: String,
    /// Canal de voz donde está el autor
    pub author_voice: Option<ChannelId>,
    pub privileges: Privileges,
}

/// Contexto de una ejecución de comando.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub author_name: String,
    pub author_avatar: Option<String>,
    pub author_voice: Option<ChannelId>,
    pub privileges: Privileges,
    pub args: String,
    pub tokens: Vec<String>,
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, kind: CommandKind, invocation: &Invocation) -> MusicResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No era un comando para nosotros
    Ignored,
    Unknown,
    Disabled,
    CoolingDown,
    Handled,
    Failed,
}

pub struct CommandRouter {
    prefix: String,
    registry: Arc<CommandRegistry>,
    cooldown: CooldownGate,
    handler: Arc<dyn CommandHandler>,
    chat: Arc<dyn ChatGateway>,
    whitelist: Vec<ChannelId>,
    blacklist: Vec<ChannelId>,
}

impl CommandRouter {
    pub fn new(
        config: &Config,
        registry: Arc<CommandRegistry>,
        handler: Arc<dyn CommandHandler>,
        chat: Arc<dyn ChatGateway>,
    ) -> Self {
        Self {
            prefix: config.prefix.clone(),
            registry,
            cooldown: CooldownGate::from_config(&config.cooldown),
            handler,
            chat,
            whitelist: config.channel_whitelist.iter().map(|&c| ChannelId::new(c)).collect(),
            blacklist: config.channel_blacklist.iter().map(|&c| ChannelId::new(c)).collect(),
        }
    }

    fn channel_allowed(&self, channel: ChannelId) -> bool {
        if self.blacklist.contains(&channel) {
            return false;
        }
        self.whitelist.is_empty() || self.whitelist.contains(&channel)
    }

    /// Ejecuta el comando del mensaje a lo sumo una vez.
    ///
    /// Handler errors become a failure notice here and never propagate.
    pub async fn dispatch(&self, message: InboundMessage) -> DispatchOutcome {
        if message.author_is_bot || !self.channel_allowed(message.channel_id) {
            return DispatchOutcome::Ignored;
        }

        let Some(parsed) = parse(&message.content, &self.prefix) else {
            return DispatchOutcome::Ignored;
        };

        let Some(spec) = self.registry.resolve(&parsed.name) else {
            debug!("Comando desconocido: {}", parsed.name);
            return DispatchOutcome::Unknown;
        };

        if !spec.enabled {
            debug!("Comando deshabilitado: {}", spec.name);
            return DispatchOutcome::Disabled;
        }

        let exempt = spec.cooldown_exempt || self.cooldown.is_exempt(&spec.name);
        let blocked = !exempt
            && (self.cooldown.is_blocked(message.author_id)
                || !self.cooldown.acquire(message.author_id));
        if blocked {
            let wait = self
                .cooldown
                .remaining(message.author_id)
                .map(|d| {
                    let whole = std::time::Duration::from_secs(d.as_secs().max(1));
                    humantime::format_duration(whole).to_string()
                })
                .unwrap_or_default();
            self.notify(
                message.channel_id,
                Notice::failure(format!(
                    "Tienes que esperar {} para volver a usar comandos de música",
                    wait
                )),
            )
            .await;
            return DispatchOutcome::CoolingDown;
        }

        info!(
            "🎛️ {} ejecutó '{}' en guild {}",
            message.author_id, spec.name, message.guild_id
        );

        let invocation = Invocation {
            guild_id: message.guild_id,
            channel_id: message.channel_id,
            author_id: message.author_id,
            author_name: message.author_name,
            author_avatar: message.author_avatar,
            author_voice: message.author_voice,
            privileges: message.privileges,
            args: parsed.args,
            tokens: parsed.tokens,
        };

        match self.handler.handle(spec.kind, &invocation).await {
            Ok(()) => DispatchOutcome::Handled,
            Err(e) => {
                if e.is_retryable() {
                    warn!("❌ '{}' falló en guild {}: {}", spec.name, message.guild_id, e);
                } else {
                    debug!(
                        "'{}' rechazado en guild {} ({:?}): {}",
                        spec.name,
                        message.guild_id,
                        e.class(),
                        e
                    );
                }
                self.notify(message.channel_id, Notice::failure(e.to_string())).await;
                DispatchOutcome::Failed
            }
        }
    }

    async fn notify(&self, channel: ChannelId, notice: Notice) {
        if let Err(e) = self.chat.send_notice(channel, notice).await {
            error!("Error al enviar aviso: {}", e);
        }
    }
}
