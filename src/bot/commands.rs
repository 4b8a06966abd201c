use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{
    chat::ChatGateway,
    pagination::PaginationSession,
    permissions::PermissionPolicy,
    router::{CommandHandler, CommandKind, CommandRegistry, Invocation},
    search::{DisambiguationSession, SessionOutcome},
};
use crate::{
    audio::{
        player::PlaybackController,
        queue::{LoopMode, QueueStore, RequesterTag, Track},
    },
    config::Config,
    error::{MusicError, MusicResult},
    sources::{PlayRequest, SearchCandidate, SearchProvider},
    ui::{embeds, notice::Notice},
};

/// Handlers de todos los comandos de música.
pub struct MusicCommands {
    prefix: String,
    cancel_word: String,
    search_results: usize,
    dj_role: String,
    message_help: bool,
    requester_name: bool,
    registry: Arc<CommandRegistry>,
    queues: Arc<QueueStore>,
    controller: Arc<PlaybackController>,
    search: Arc<dyn SearchProvider>,
    chat: Arc<dyn ChatGateway>,
    policy: PermissionPolicy,
}

impl MusicCommands {
    pub fn new(
        config: &Config,
        registry: Arc<CommandRegistry>,
        controller: Arc<PlaybackController>,
        search: Arc<dyn SearchProvider>,
        chat: Arc<dyn ChatGateway>,
    ) -> Self {
        Self {
            prefix: config.prefix.clone(),
            cancel_word: config.cancel_word.clone(),
            search_results: config.search_results,
            dj_role: config.dj_role.clone(),
            message_help: config.message_help,
            requester_name: config.requester_name,
            registry,
            queues: controller.queues().clone(),
            controller,
            search,
            chat,
            policy: PermissionPolicy::from_config(config),
        }
    }

    async fn say(&self, invocation: &Invocation, notice: Notice) -> MusicResult<()> {
        self.chat
            .send_notice(invocation.channel_id, notice)
            .await
            .map(|_| ())
    }

    fn author_voice(invocation: &Invocation) -> MusicResult<ChannelId> {
        invocation
            .author_voice
            .ok_or_else(|| MusicError::permission("Tienes que estar en un canal de voz"))
    }

    /// El autor tiene que estar en voz y, si el bot ya está conectado, en su mismo canal.
    async fn require_same_channel(&self, invocation: &Invocation) -> MusicResult<ChannelId> {
        let voice = Self::author_voice(invocation)?;
        match self.controller.voice_channel(invocation.guild_id).await {
            Some(bot) if bot != voice => Err(MusicError::permission(
                "Tenemos que estar en el mismo canal de voz",
            )),
            _ => Ok(voice),
        }
    }

    /// Como [`Self::require_same_channel`], pero el bot además tiene que estar conectado.
    async fn require_connected(&self, invocation: &Invocation) -> MusicResult<ChannelId> {
        let voice = Self::author_voice(invocation)?;
        match self.controller.voice_channel(invocation.guild_id).await {
            None => Err(MusicError::invalid("No estoy reproduciendo nada")),
            Some(bot) if bot != voice => Err(MusicError::permission(
                "Tenemos que estar en el mismo canal de voz",
            )),
            Some(_) => Ok(voice),
        }
    }

    /// Canción a nombre del autor, con su nombre visible si está habilitado.
    fn track_for(&self, candidate: SearchCandidate, invocation: &Invocation) -> Track {
        let mut track = candidate.into_track(invocation.author_id);
        if self.requester_name {
            track.requester_tag = Some(RequesterTag {
                name: invocation.author_name.clone(),
                avatar_url: invocation.author_avatar.clone(),
            });
        }
        track
    }

    fn ensure_capacity(&self, guild_id: GuildId) -> MusicResult<()> {
        let max = self.queues.max_size();
        if max != 0 && self.queues.len(guild_id) >= max {
            return Err(MusicError::QueueFull { max });
        }
        Ok(())
    }

    async fn play(&self, invocation: &Invocation) -> MusicResult<()> {
        let voice = self.require_same_channel(invocation).await?;
        let request = PlayRequest::parse(&invocation.args)?;
        self.ensure_capacity(invocation.guild_id)?;

        match request {
            PlayRequest::Playlist(id) => {
                self.say(invocation, Notice::search("Buscando la playlist...")).await?;
                let videos = self.search.resolve_playlist(&id).await?;
                let found = videos.len();
                let tracks = videos
                    .into_iter()
                    .map(|v| self.track_for(v, invocation))
                    .collect();
                let added = self
                    .controller
                    .enqueue_many(invocation.guild_id, tracks, voice, invocation.channel_id)
                    .await?;

                info!(
                    "📋 Playlist {} en guild {}: {} de {} canciones",
                    id, invocation.guild_id, added, found
                );
                self.chat
                    .send_embed(
                        invocation.channel_id,
                        embeds::create_playlist_added_embed(added, found),
                    )
                    .await?;
            }
            PlayRequest::Query(query) => {
                self.say(invocation, Notice::search(format!("Buscando: {}", query)))
                    .await?;
                let candidate = self
                    .search
                    .search(&query, 1)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        MusicError::resolution(format!("No encontré nada para: {}", query))
                    })?;

                let track = self
                    .controller
                    .enqueue(
                        invocation.guild_id,
                        self.track_for(candidate, invocation),
                        voice,
                        invocation.channel_id,
                    )
                    .await?;
                self.chat
                    .send_embed(invocation.channel_id, embeds::create_track_added_embed(&track))
                    .await?;
            }
        }

        Ok(())
    }

    async fn search(&self, invocation: &Invocation) -> MusicResult<()> {
        let voice = self.require_same_channel(invocation).await?;
        let query = invocation.args.trim();
        if query.is_empty() {
            return Err(MusicError::user_input("Dime qué quieres buscar"));
        }
        self.ensure_capacity(invocation.guild_id)?;

        let status = self
            .chat
            .send_notice(invocation.channel_id, Notice::search(format!("Buscando: {}", query)))
            .await?;

        let candidates = self.search.search(query, self.search_results).await?;
        if candidates.is_empty() {
            return self
                .chat
                .edit_notice(invocation.channel_id, status, Notice::failure("No encontré nada"))
                .await;
        }

        let listing = self
            .chat
            .send_embed(
                invocation.channel_id,
                embeds::create_search_results_embed(query, &candidates, &self.cancel_word),
            )
            .await?;

        let session = DisambiguationSession::new(
            invocation.author_id,
            candidates,
            self.cancel_word.clone(),
        );

        match session.run(self.chat.as_ref(), invocation.channel_id).await? {
            SessionOutcome::Selected(candidate) => {
                // Si otro comando conectó al bot mientras se elegía, `voice` no se usa
                let track = self
                    .controller
                    .enqueue(
                        invocation.guild_id,
                        self.track_for(candidate, invocation),
                        voice,
                        invocation.channel_id,
                    )
                    .await?;
                self.chat
                    .send_embed(invocation.channel_id, embeds::create_track_added_embed(&track))
                    .await?;
                Ok(())
            }
            SessionOutcome::Cancelled => {
                self.chat
                    .edit_notice(
                        invocation.channel_id,
                        listing,
                        Notice::info("Está bien, no elegiste nada"),
                    )
                    .await
            }
            SessionOutcome::TimedOut => {
                self.chat
                    .edit_notice(
                        invocation.channel_id,
                        listing,
                        Notice::info("Se acabó el tiempo, no se seleccionó nada"),
                    )
                    .await
            }
        }
    }

    async fn skip(&self, invocation: &Invocation) -> MusicResult<()> {
        self.require_connected(invocation).await?;

        let requester = self
            .queues
            .current(invocation.guild_id)
            .map(|t| t.requester_id);
        if !self
            .policy
            .can_skip(invocation.privileges, invocation.author_id, requester)
        {
            return Err(MusicError::permission("No puedes saltar esta canción"));
        }
        if self.queues.loop_mode(invocation.guild_id) == LoopMode::Track {
            return Err(MusicError::invalid(
                "No puedo saltar con la repetición de canción activada",
            ));
        }

        self.controller.stop_stream(invocation.guild_id).await?;
        self.say(invocation, Notice::info("Canción saltada :track_next:"))
            .await
    }

    async fn pause(&self, invocation: &Invocation) -> MusicResult<()> {
        self.require_connected(invocation).await?;
        if !self.policy.can_pause(invocation.privileges) {
            return Err(MusicError::permission("No tienes permiso para pausar"));
        }

        self.controller.pause(invocation.guild_id).await?;
        self.say(invocation, Notice::info("Pausado :pause_button:")).await
    }

    async fn resume(&self, invocation: &Invocation) -> MusicResult<()> {
        self.require_connected(invocation).await?;
        if !self.policy.can_pause(invocation.privileges) {
            return Err(MusicError::permission("No tienes permiso para reanudar"));
        }

        self.controller.resume(invocation.guild_id).await?;
        self.say(invocation, Notice::info("Continuando :arrow_forward:"))
            .await
    }

    async fn leave(&self, invocation: &Invocation) -> MusicResult<()> {
        if !self.policy.can_leave(invocation.privileges) {
            return Err(MusicError::permission("No tienes permiso para sacarme del canal"));
        }
        self.require_connected(invocation).await?;

        self.controller.leave(invocation.guild_id).await?;
        self.say(invocation, Notice::info("¡Nos vemos! :wave:")).await
    }

    async fn queue(&self, invocation: &Invocation) -> MusicResult<()> {
        self.require_connected(invocation).await?;

        let snapshot = self.queues.snapshot(invocation.guild_id);
        if snapshot.is_empty() {
            return Err(MusicError::invalid("La cola está vacía"));
        }

        if let Some(arg) = invocation.tokens.first() {
            let position: usize = arg
                .parse()
                .map_err(|_| MusicError::user_input("La posición tiene que ser un número"))?;
            let track = position
                .checked_sub(1)
                .and_then(|p| self.queues.track_at(invocation.guild_id, p))
                .ok_or(MusicError::NotFound { position })?;
            self.chat
                .send_embed(invocation.channel_id, embeds::create_track_detail_embed(&track))
                .await?;
            return Ok(());
        }

        let total = snapshot.len();
        let loop_mode = snapshot.loop_mode;

        let Some(session) =
            PaginationSession::new(invocation.author_id, &snapshot.tracks, Instant::now())
        else {
            self.chat
                .send_embed(
                    invocation.channel_id,
                    embeds::create_queue_embed(&snapshot.tracks, 0, 1, total, loop_mode),
                )
                .await?;
            return Ok(());
        };

        let message = self
            .chat
            .send_embed(
                invocation.channel_id,
                embeds::create_queue_embed(
                    session.page(),
                    0,
                    session.page_count(),
                    total,
                    loop_mode,
                ),
            )
            .await?;

        let chat = self.chat.clone();
        let channel = invocation.channel_id;
        tokio::spawn(async move {
            let result = session
                .drive(chat, channel, message, move |page, index, pages| {
                    embeds::create_queue_embed(page, index, pages, total, loop_mode)
                })
                .await;
            if let Err(e) = result {
                warn!("Error en la paginación de la cola: {}", e);
            }
        });

        Ok(())
    }

    async fn now_playing(&self, invocation: &Invocation) -> MusicResult<()> {
        let status = self.controller.status(invocation.guild_id).await;
        let current = self
            .queues
            .current(invocation.guild_id)
            .filter(|_| status.stream_id.is_some());

        let track = current.ok_or_else(|| MusicError::invalid("No hay nada sonando"))?;
        let embed =
            embeds::create_now_playing_embed(&track, self.queues.loop_mode(invocation.guild_id));
        self.chat.send_embed(invocation.channel_id, embed).await?;
        Ok(())
    }

    async fn cycle_loop(&self, invocation: &Invocation) -> MusicResult<()> {
        self.require_same_channel(invocation).await?;

        let text = match self.queues.cycle_loop_mode(invocation.guild_id) {
            LoopMode::Track => "Repitiendo la canción actual :repeat_one:",
            LoopMode::Queue => "Repitiendo toda la cola :repeat:",
            LoopMode::None => "Repetición desactivada :arrow_forward:",
        };
        self.say(invocation, Notice::info(text)).await
    }

    async fn clear(&self, invocation: &Invocation) -> MusicResult<()> {
        if !invocation.privileges.elevated {
            return Err(MusicError::permission(format!(
                "Solo los administradores o el rol {} pueden limpiar la cola",
                self.dj_role
            )));
        }
        if let Some(bot) = self.controller.voice_channel(invocation.guild_id).await {
            if invocation.author_voice != Some(bot) {
                return Err(MusicError::permission(
                    "Tenemos que estar en el mismo canal de voz",
                ));
            }
        }

        self.controller.clear_queue(invocation.guild_id).await;
        self.say(invocation, Notice::info("Cola limpiada :wastebasket:"))
            .await
    }

    async fn volume(&self, invocation: &Invocation) -> MusicResult<()> {
        self.require_connected(invocation).await?;

        let Some(arg) = invocation.tokens.first() else {
            let current = self.queues.volume(invocation.guild_id);
            return self
                .say(invocation, Notice::info(format!("Volumen actual: {}%", current)))
                .await;
        };

        let requester = self
            .queues
            .current(invocation.guild_id)
            .map(|t| t.requester_id);
        if !self
            .policy
            .can_adjust(invocation.privileges, invocation.author_id, requester)
        {
            return Err(MusicError::permission("No tienes permiso para cambiar el volumen"));
        }

        let volume = arg
            .parse::<u8>()
            .ok()
            .filter(|v| (1..=200).contains(v))
            .ok_or_else(|| MusicError::user_input("El volumen tiene que estar entre 1 y 200"))?;

        self.controller
            .set_volume(invocation.guild_id, volume)
            .await?;
        self.say(invocation, Notice::info(format!("Volumen cambiado a {}%", volume)))
            .await
    }

    async fn remove(&self, invocation: &Invocation) -> MusicResult<()> {
        self.require_same_channel(invocation).await?;

        let arg = invocation
            .tokens
            .first()
            .ok_or_else(|| MusicError::user_input("Dime la posición de la canción"))?;
        let position = arg
            .parse::<usize>()
            .ok()
            .and_then(|p| p.checked_sub(1))
            .ok_or_else(|| MusicError::user_input("La posición tiene que ser un número desde 1"))?;

        let removed = self.queues.remove_at(
            invocation.guild_id,
            position,
            invocation.author_id,
            invocation.privileges.elevated,
        )?;
        self.say(invocation, Notice::info(format!("Quitada: {}", removed.title)))
            .await
    }

    /// Canal para la lista de comandos: el DM del autor si está habilitado.
    async fn help_channel(&self, invocation: &Invocation) -> ChannelId {
        if !self.message_help {
            return invocation.channel_id;
        }
        match self.chat.direct_channel(invocation.author_id).await {
            Ok(dm) => dm,
            Err(e) => {
                debug!("Sin DM para {}, la ayuda va al canal: {}", invocation.author_id, e);
                invocation.channel_id
            }
        }
    }

    async fn help(&self, invocation: &Invocation) -> MusicResult<()> {
        let Some(name) = invocation.tokens.first() else {
            let embed = embeds::create_help_embed(self.registry.visible(), &self.prefix);
            let channel = self.help_channel(invocation).await;
            if let Err(e) = self.chat.send_embed(channel, embed.clone()).await {
                if channel == invocation.channel_id {
                    return Err(e);
                }
                debug!("No pude mandar la ayuda por DM a {}: {}", invocation.author_id, e);
                self.chat.send_embed(invocation.channel_id, embed).await?;
            }
            return Ok(());
        };

        let spec = self
            .registry
            .resolve(name)
            .filter(|s| s.enabled && !s.hidden)
            .ok_or_else(|| MusicError::user_input(format!("No conozco el comando {}", name)))?;

        let aliases = if spec.aliases.is_empty() {
            "ninguno".to_string()
        } else {
            spec.aliases.join(", ")
        };
        let text = format!(
            "= {} =\n{}\nAlias: {}\nUso: {}",
            spec.name,
            spec.help,
            aliases,
            spec.usage_for(&self.prefix)
        );
        self.say(invocation, Notice::escaped(text)).await
    }
}

#[async_trait]
impl CommandHandler for MusicCommands {
    async fn handle(&self, kind: CommandKind, invocation: &Invocation) -> MusicResult<()> {
        match kind {
            CommandKind::Play => self.play(invocation).await,
            CommandKind::Search => self.search(invocation).await,
            CommandKind::Skip => self.skip(invocation).await,
            CommandKind::Pause => self.pause(invocation).await,
            CommandKind::Resume => self.resume(invocation).await,
            CommandKind::Leave => self.leave(invocation).await,
            CommandKind::Queue => self.queue(invocation).await,
            CommandKind::NowPlaying => self.now_playing(invocation).await,
            CommandKind::Loop => self.cycle_loop(invocation).await,
            CommandKind::Clear => self.clear(invocation).await,
            CommandKind::Volume => self.volume(invocation).await,
            CommandKind::Remove => self.remove(invocation).await,
            CommandKind::Help => self.help(invocation).await,
        }
    }
}
