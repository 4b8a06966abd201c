//! # Bot Module
//!
//! Gateway-facing side of Guild Jukebox.
//!
//! [`MusicBot`] implements Serenity's [`EventHandler`] trait and turns raw
//! gateway events into calls on the owned services:
//!
//! - Text messages become an [`InboundMessage`] for the [`CommandRouter`]
//! - Voice state updates for the bot itself reach the [`PlaybackController`]
//! - `ready` binds the shard used by reply and reaction collectors
//!
//! Everything that decides *what* happens lives in [`router`], [`commands`]
//! and the audio module; this file only extracts facts from the cache.

use serenity::{
    all::{Context, EventHandler, GuildId, Message, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod chat;
pub mod commands;
pub mod cooldown;
pub mod events;
pub mod pagination;
pub mod permissions;
pub mod router;
pub mod search;

use self::{
    chat::SerenityChat,
    permissions::Privileges,
    router::{CommandRouter, DispatchOutcome, InboundMessage},
};
use crate::{audio::player::PlaybackController, config::Config};

/// Main Discord event handler.
///
/// ## Fields
///
/// - `config`: privilege rules are resolved against it on every message
/// - `router`: parses, gates and dispatches prefix commands
/// - `controller`: per-guild playback state machine
/// - `chat`: needs the shard messenger once the gateway is ready
pub struct MusicBot {
    config: Arc<Config>,
    router: Arc<CommandRouter>,
    controller: Arc<PlaybackController>,
    chat: Arc<SerenityChat>,
}

impl MusicBot {
    pub fn new(
        config: Arc<Config>,
        router: Arc<CommandRouter>,
        controller: Arc<PlaybackController>,
        chat: Arc<SerenityChat>,
    ) -> Self {
        Self {
            config,
            router,
            controller,
            chat,
        }
    }

    /// Builds the router input from the message and the guild cache.
    ///
    /// Returns `None` for direct messages. The cache guard is dropped before
    /// returning so nothing non-`Send` crosses an await point.
    fn inbound(&self, ctx: &Context, msg: &Message) -> Option<InboundMessage> {
        let guild_id = msg.guild_id?;

        let (role_names, is_administrator, author_voice) = match ctx.cache.guild(guild_id) {
            Some(guild) => {
                let member_roles = msg
                    .member
                    .as_ref()
                    .map(|m| m.roles.clone())
                    .unwrap_or_default();

                let role_names: Vec<String> = member_roles
                    .iter()
                    .filter_map(|id| guild.roles.get(id).map(|r| r.name.clone()))
                    .collect();

                let is_administrator = guild.owner_id == msg.author.id
                    || member_roles.iter().any(|id| {
                        guild
                            .roles
                            .get(id)
                            .is_some_and(|r| r.permissions.administrator())
                    });

                let author_voice = guild
                    .voice_states
                    .get(&msg.author.id)
                    .and_then(|state| state.channel_id);

                (role_names, is_administrator, author_voice)
            }
            None => (Vec::new(), false, None),
        };

        Some(InboundMessage {
            guild_id,
            channel_id: msg.channel_id,
            author_id: msg.author.id,
            author_is_bot: msg.author.bot,
            author_name: msg.author.display_name().to_string(),
            author_avatar: Some(msg.author.face()),
            content: msg.content.clone(),
            author_voice,
            privileges: Privileges::resolve(
                &self.config,
                msg.author.id,
                &role_names,
                is_administrator,
            ),
        })
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());
        if self.config.music_presence && ready.guilds.len() > 1 {
            warn!("⚠️ La presencia musical está activa con más de un servidor");
        }

        self.chat.bind_shard(ctx.shard.clone());
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let Some(inbound) = self.inbound(&ctx, &msg) else {
            return;
        };

        match self.router.dispatch(inbound).await {
            DispatchOutcome::Ignored => {}
            outcome => debug!("Mensaje {} en {}: {:?}", msg.id, msg.channel_id, outcome),
        }
    }

    /// Only the bot's own state matters: leaving a channel from outside
    /// (kick, move to nowhere, channel deleted) resets that guild.
    ///
    /// The controller only acts when the channel left is the one it is
    /// connected to, so a late leave from an earlier session is harmless.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        if new.user_id != ctx.cache.current_user().id {
            return;
        }

        if new.channel_id.is_some() {
            return;
        }

        let Some(old) = old else {
            debug!("Salida de voz sin estado previo en caché, ignorada");
            return;
        };
        let Some(left) = old.channel_id else {
            return;
        };

        let guild_id: Option<GuildId> = new.guild_id.or(old.guild_id);
        if let Some(guild_id) = guild_id {
            info!("🔌 Bot desconectado del canal {} en guild {}", left, guild_id);
            self.controller.voice_lost(guild_id, left).await;
        }
    }
}
