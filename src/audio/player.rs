use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use super::{
    queue::{QueueStore, Selection, Track},
    transport::{
        AudioResolver, StreamEvent, StreamEventKind, StreamEventSender, StreamEvents,
        StreamHandle, StreamOptions, VoiceConnection, VoiceTransport,
    },
};
use crate::{
    bot::chat::ChatGateway,
    config::Config,
    error::{MusicError, MusicResult},
    ui::{embeds, notice::Notice},
};

/// Estado de reproducción de un guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Connecting,
    Playing,
    Draining,
    Disconnecting,
}

#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    pub bitrate: u32,
    pub settle_delay: Duration,
    /// Reintentos consecutivos permitidos antes de vaciar la cola
    pub max_retries: u32,
    pub announce_new_track: bool,
    /// Mostrar la canción actual como actividad del bot
    pub music_presence: bool,
    /// Actividad al quedar en reposo; `None` la borra
    pub idle_activity: Option<String>,
}

impl PlaybackSettings {
    pub fn from_config(config: &Config) -> Self {
        let idle_activity = match (&config.idle_presence, config.clear_presence) {
            (Some(custom), _) => Some(custom.clone()),
            (None, true) => None,
            (None, false) => Some(IDLE_ACTIVITY.to_string()),
        };

        Self {
            bitrate: config.bitrate,
            settle_delay: config.settle_delay(),
            max_retries: config.max_retries,
            announce_new_track: config.announce_new_track,
            music_presence: config.music_presence,
            idle_activity,
        }
    }
}

const IDLE_ACTIVITY: &str = "🎵 | nada";

/// Vista de solo lectura para los comandos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    pub voice_channel: Option<ChannelId>,
    pub stream_id: Option<u64>,
    pub paused: bool,
}

struct ActiveStream {
    id: u64,
    handle: Box<dyn StreamHandle>,
    paused: bool,
}

struct GuildPlayback {
    state: PlaybackState,
    connection: Option<Arc<dyn VoiceConnection>>,
    stream: Option<ActiveStream>,
    text_channel: Option<ChannelId>,
    /// Stream cuyo final se está asentando
    draining: Option<u64>,
    /// Nunca se reinicia, así un evento viejo no coincide con un stream nuevo
    last_stream_id: u64,
    failures: u32,
}

impl GuildPlayback {
    fn new() -> Self {
        Self {
            state: PlaybackState::Idle,
            connection: None,
            stream: None,
            text_channel: None,
            draining: None,
            last_stream_id: 0,
            failures: 0,
        }
    }

    fn reset(&mut self) {
        self.state = PlaybackState::Idle;
        self.connection = None;
        self.stream = None;
        self.text_channel = None;
        self.draining = None;
        self.failures = 0;
    }

    fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            state: self.state,
            voice_channel: self.connection.as_ref().map(|c| c.channel_id()),
            stream_id: self.stream.as_ref().map(|s| s.id),
            paused: self.stream.as_ref().is_some_and(|s| s.paused),
        }
    }
}

/// Drives join → play → drain → advance → disconnect for every guild.
///
/// All transitions of one guild happen under that guild's mutex. Stream
/// end/error notifications arrive on an mpsc channel tagged with the stream
/// id that produced them, so a late event from a replaced stream is dropped
/// instead of advancing the queue twice.
pub struct PlaybackController {
    queues: Arc<QueueStore>,
    transport: Arc<dyn VoiceTransport>,
    resolver: Arc<dyn AudioResolver>,
    chat: Arc<dyn ChatGateway>,
    settings: PlaybackSettings,
    sessions: DashMap<GuildId, Arc<Mutex<GuildPlayback>>>,
    events: mpsc::UnboundedSender<StreamEvent>,
}

impl PlaybackController {
    pub fn new(
        queues: Arc<QueueStore>,
        transport: Arc<dyn VoiceTransport>,
        resolver: Arc<dyn AudioResolver>,
        chat: Arc<dyn ChatGateway>,
        settings: PlaybackSettings,
    ) -> (Arc<Self>, StreamEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = Arc::new(Self {
            queues,
            transport,
            resolver,
            chat,
            settings,
            sessions: DashMap::new(),
            events: tx,
        });
        (controller, rx)
    }

    /// Bombea los eventos de stream; cada uno se atiende en su propia tarea.
    pub async fn run(self: Arc<Self>, mut events: StreamEvents) {
        info!("🎧 Controlador de reproducción escuchando eventos");
        while let Some(event) = events.recv().await {
            let controller = self.clone();
            tokio::spawn(async move {
                controller.handle_stream_event(event).await;
            });
        }
        info!("🛑 Canal de eventos cerrado, controlador detenido");
    }

    pub fn queues(&self) -> &Arc<QueueStore> {
        &self.queues
    }

    fn session(&self, guild_id: GuildId) -> Arc<Mutex<GuildPlayback>> {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| Arc::new(Mutex::new(GuildPlayback::new())))
            .clone()
    }

    fn existing_session(&self, guild_id: GuildId) -> Option<Arc<Mutex<GuildPlayback>>> {
        self.sessions.get(&guild_id).map(|s| s.clone())
    }

    pub async fn status(&self, guild_id: GuildId) -> PlaybackStatus {
        match self.existing_session(guild_id) {
            Some(session) => session.lock().await.status(),
            None => PlaybackStatus::default(),
        }
    }

    pub async fn state(&self, guild_id: GuildId) -> PlaybackState {
        self.status(guild_id).await.state
    }

    /// Canal de voz donde está el bot en este guild, si está conectado.
    pub async fn voice_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.status(guild_id).await.voice_channel
    }

    /// Encola `track` y arranca la reproducción si el guild estaba en reposo.
    ///
    /// Both steps run under the guild's mutex. A teardown that is emptying
    /// the queue either finishes before the track lands, leaving the guild
    /// Idle so the track is started here, or runs after it.
    pub async fn enqueue(
        &self,
        guild_id: GuildId,
        mut track: Track,
        voice_channel: ChannelId,
        text_channel: ChannelId,
    ) -> MusicResult<Track> {
        let session = self.session(guild_id);
        let mut playback = session.lock().await;

        track.position = self.queues.enqueue(guild_id, track.clone())?;
        self.kick(guild_id, &mut playback, voice_channel, text_channel)
            .await?;
        Ok(track)
    }

    /// Como [`Self::enqueue`] para una playlist; devuelve cuántas entraron.
    pub async fn enqueue_many(
        &self,
        guild_id: GuildId,
        tracks: Vec<Track>,
        voice_channel: ChannelId,
        text_channel: ChannelId,
    ) -> MusicResult<usize> {
        let session = self.session(guild_id);
        let mut playback = session.lock().await;

        let added = self.queues.enqueue_many(guild_id, tracks);
        self.kick(guild_id, &mut playback, voice_channel, text_channel)
            .await?;
        Ok(added)
    }

    /// Vacía la cola y corta el stream; el drenaje termina la reproducción.
    pub async fn clear_queue(&self, guild_id: GuildId) {
        let session = self.session(guild_id);
        let playback = session.lock().await;

        self.queues.clear(guild_id);
        if let Some(stream) = &playback.stream {
            if let Err(e) = stream.handle.stop() {
                debug!("No pude detener el stream {}: {}", stream.id, e);
            }
        }
    }

    /// Idle → Connecting → Playing cuando hay algo en cola.
    ///
    /// Any other state is left alone: a guild that is connecting, playing or
    /// draining will pick up newly queued tracks on its own.
    async fn kick(
        &self,
        guild_id: GuildId,
        playback: &mut GuildPlayback,
        voice_channel: ChannelId,
        text_channel: ChannelId,
    ) -> MusicResult<()> {
        if playback.state != PlaybackState::Idle {
            debug!(
                "Guild {} ya está en {:?}, no se inicia otra reproducción",
                guild_id, playback.state
            );
            return Ok(());
        }
        if self.queues.len(guild_id) == 0 {
            return Ok(());
        }

        playback.state = PlaybackState::Connecting;
        playback.text_channel = Some(text_channel);
        info!("🔌 Conectando al canal {} en guild {}", voice_channel, guild_id);

        let connection = match self.transport.join(guild_id, voice_channel).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(
                    "❌ No pude unirme al canal {} en guild {}: {}",
                    voice_channel, guild_id, e
                );
                // Sin voz no hay forma de avanzar: se descarta la cola
                self.queues.clear(guild_id);
                playback.reset();
                return Err(e.into());
            }
        };
        playback.connection = Some(connection);

        let selection = self.queues.select_next(guild_id);
        self.start_selection(guild_id, playback, selection, false)
            .await;
        Ok(())
    }

    /// Atiende el fin o error de un stream.
    pub async fn handle_stream_event(&self, event: StreamEvent) {
        let Some(session) = self.existing_session(event.guild_id) else {
            debug!("Evento para guild {} sin sesión, ignorado", event.guild_id);
            return;
        };

        {
            let mut playback = session.lock().await;
            if playback.stream.as_ref().map(|s| s.id) != Some(event.stream_id) {
                debug!(
                    "Evento obsoleto del stream {} en guild {}, ignorado",
                    event.stream_id, event.guild_id
                );
                return;
            }

            playback.stream = None;
            playback.state = PlaybackState::Draining;
            playback.draining = Some(event.stream_id);

            match &event.kind {
                StreamEventKind::End => {
                    playback.failures = 0;
                    debug!(
                        "⏹️ Stream {} terminó en guild {}",
                        event.stream_id, event.guild_id
                    );
                }
                StreamEventKind::Error(reason) => {
                    playback.failures += 1;
                    warn!(
                        "⚠️ Stream {} falló en guild {} ({} seguidos): {}",
                        event.stream_id, event.guild_id, playback.failures, reason
                    );
                }
            }
        }

        tokio::time::sleep(self.settings.settle_delay).await;

        let mut playback = session.lock().await;
        if playback.draining != Some(event.stream_id) {
            debug!(
                "Drenaje del stream {} cancelado en guild {}",
                event.stream_id, event.guild_id
            );
            return;
        }
        playback.draining = None;

        self.advance(event.guild_id, &mut playback, &event.kind)
            .await;
    }

    async fn advance(
        &self,
        guild_id: GuildId,
        playback: &mut GuildPlayback,
        kind: &StreamEventKind,
    ) {
        let Some(connection) = playback.connection.clone() else {
            error!("💥 Guild {} drenando sin conexión de voz", guild_id);
            self.disconnect(guild_id, playback).await;
            return;
        };

        if connection.listener_count() == 0 {
            info!("🚪 Canal vacío en guild {}, desconectando", guild_id);
            self.notify(
                playback.text_channel,
                Notice::info("Me quedé solo en el canal, ¡nos vemos!"),
            )
            .await;
            self.disconnect(guild_id, playback).await;
            return;
        }

        match kind {
            StreamEventKind::End => {
                let selection = self.queues.select_next(guild_id);
                self.start_selection(guild_id, playback, selection, true)
                    .await;
            }
            StreamEventKind::Error(_) => {
                if playback.failures > self.settings.max_retries {
                    self.give_up(guild_id, playback).await;
                    return;
                }
                self.notify(
                    playback.text_channel,
                    Notice::failure("Hubo un problema con el stream, reintentando..."),
                )
                .await;
                let selection = self
                    .queues
                    .retry_target(guild_id)
                    .map_or(Selection::Exhausted, Selection::Replay);
                self.start_selection(guild_id, playback, selection, false)
                    .await;
            }
        }
    }

    /// Inicia la canción elegida, reintentando si el arranque falla.
    async fn start_selection(
        &self,
        guild_id: GuildId,
        playback: &mut GuildPlayback,
        selection: Selection,
        announce: bool,
    ) {
        match &selection {
            Selection::StaleCursor(t) => warn!(
                "⚠️ La última canción ya no está en la cola de guild {}, sigue '{}'",
                guild_id, t.title
            ),
            Selection::Wrapped(_) => {
                debug!("🔁 Cola completa en guild {}, volviendo al inicio", guild_id)
            }
            other => debug!(
                "Siguiente en guild {}: {:?}",
                guild_id,
                other.track().map(|t| t.title.as_str())
            ),
        }

        let replay = matches!(selection, Selection::Replay(_));
        let Some(mut track) = selection.into_track() else {
            self.notify(
                playback.text_channel,
                Notice::info("Reproducción terminada, la cola está vacía"),
            )
            .await;
            self.disconnect(guild_id, playback).await;
            return;
        };

        loop {
            match self.start_track(guild_id, playback, &track).await {
                Ok(()) => {
                    if announce && !replay && self.settings.announce_new_track {
                        let embed = embeds::create_now_playing_embed(
                            &track,
                            self.queues.loop_mode(guild_id),
                        );
                        if let Some(channel) = playback.text_channel {
                            if let Err(e) = self.chat.send_embed(channel, embed).await {
                                warn!("No pude anunciar la canción en guild {}: {}", guild_id, e);
                            }
                        }
                    }
                    return;
                }
                Err(e) => {
                    playback.failures += 1;
                    error!(
                        "❌ No pude iniciar '{}' en guild {} ({} seguidos): {}",
                        track.title, guild_id, playback.failures, e
                    );
                    if playback.failures > self.settings.max_retries {
                        self.give_up(guild_id, playback).await;
                        return;
                    }
                    self.notify(
                        playback.text_channel,
                        Notice::failure("Hubo un problema con el stream, reintentando..."),
                    )
                    .await;

                    playback.state = PlaybackState::Draining;
                    tokio::time::sleep(self.settings.settle_delay).await;

                    // La cola pudo cambiar mientras esperábamos
                    if !self.queues.contains(guild_id, track.serial) {
                        match self.queues.retry_target(guild_id) {
                            Some(next) => track = next,
                            None => {
                                self.notify(
                                    playback.text_channel,
                                    Notice::info("Reproducción terminada, la cola está vacía"),
                                )
                                .await;
                                self.disconnect(guild_id, playback).await;
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn start_track(
        &self,
        guild_id: GuildId,
        playback: &mut GuildPlayback,
        track: &Track,
    ) -> MusicResult<()> {
        let connection = playback
            .connection
            .clone()
            .ok_or_else(|| MusicError::transport("sin conexión de voz"))?;

        if let Some(previous) = playback.stream.take() {
            warn!(
                "⚠️ El stream {} seguía activo en guild {}, deteniéndolo",
                previous.id, guild_id
            );
            let _ = previous.handle.stop();
        }

        let source = self.resolver.resolve(&track.url).await?;

        playback.last_stream_id += 1;
        let stream_id = playback.last_stream_id;
        let events = StreamEventSender::new(guild_id, stream_id, self.events.clone());
        let options = StreamOptions {
            bitrate: self.settings.bitrate,
            volume: f32::from(self.queues.volume(guild_id)) / 100.0,
        };

        let handle = connection.play_stream(source, options, events).await?;

        self.queues.set_cursor(guild_id, track);
        playback.stream = Some(ActiveStream {
            id: stream_id,
            handle,
            paused: false,
        });
        playback.state = PlaybackState::Playing;

        info!(
            "▶️ Reproduciendo '{}' en guild {} (stream {})",
            track.title, guild_id, stream_id
        );
        if self.settings.music_presence {
            self.chat.set_activity(Some(format!("🎵 | {}", track.title)));
        }
        Ok(())
    }

    async fn give_up(&self, guild_id: GuildId, playback: &mut GuildPlayback) {
        error!(
            "💥 Reproducción atascada en guild {} tras {} fallos, vaciando la cola",
            guild_id, playback.failures
        );
        self.notify(
            playback.text_channel,
            Notice::failure("No pude reproducir la canción, la cola fue vaciada"),
        )
        .await;
        self.disconnect(guild_id, playback).await;
    }

    /// Disconnecting → Idle: suelta la voz y deja la cola vacía.
    async fn disconnect(&self, guild_id: GuildId, playback: &mut GuildPlayback) {
        playback.state = PlaybackState::Disconnecting;

        if let Some(stream) = playback.stream.take() {
            if let Err(e) = stream.handle.stop() {
                debug!("No pude detener el stream {}: {}", stream.id, e);
            }
        }
        if let Some(connection) = playback.connection.take() {
            if let Err(e) = connection.disconnect().await {
                warn!("Error al salir del canal de voz en guild {}: {}", guild_id, e);
            }
        }

        self.queues.clear(guild_id);
        playback.reset();
        if self.settings.music_presence {
            self.chat.set_activity(self.settings.idle_activity.clone());
        }
        info!("💤 Guild {} en reposo", guild_id);
    }

    async fn notify(&self, channel: Option<ChannelId>, notice: Notice) {
        let Some(channel) = channel else {
            return;
        };
        if let Err(e) = self.chat.send_notice(channel, notice).await {
            warn!("No pude enviar aviso al canal {}: {}", channel, e);
        }
    }

    /// Fuerza el final del stream activo; el drenaje decide qué sigue.
    pub async fn stop_stream(&self, guild_id: GuildId) -> MusicResult<()> {
        let session = self
            .existing_session(guild_id)
            .ok_or_else(|| MusicError::invalid("No hay nada sonando"))?;
        let playback = session.lock().await;

        match &playback.stream {
            Some(stream) => {
                debug!("⏭️ Deteniendo stream {} en guild {}", stream.id, guild_id);
                stream.handle.stop()
            }
            None => Err(MusicError::invalid("No hay nada sonando")),
        }
    }

    pub async fn pause(&self, guild_id: GuildId) -> MusicResult<()> {
        let session = self
            .existing_session(guild_id)
            .ok_or_else(|| MusicError::invalid("No hay nada sonando"))?;
        let mut playback = session.lock().await;

        let stream = playback
            .stream
            .as_mut()
            .ok_or_else(|| MusicError::invalid("No hay nada sonando"))?;
        if stream.paused {
            return Err(MusicError::invalid("La música ya está en pausa"));
        }

        stream.handle.pause()?;
        stream.paused = true;
        info!("⏸️ Pausado en guild {}", guild_id);
        Ok(())
    }

    pub async fn resume(&self, guild_id: GuildId) -> MusicResult<()> {
        let session = self
            .existing_session(guild_id)
            .ok_or_else(|| MusicError::invalid("No hay nada sonando"))?;
        let mut playback = session.lock().await;

        let stream = playback
            .stream
            .as_mut()
            .ok_or_else(|| MusicError::invalid("No hay nada sonando"))?;
        if !stream.paused {
            return Err(MusicError::invalid("La música no está en pausa"));
        }

        stream.handle.resume()?;
        stream.paused = false;
        info!("▶️ Reanudado en guild {}", guild_id);
        Ok(())
    }

    /// Volumen en porcentaje, de 1 a 200.
    pub async fn set_volume(&self, guild_id: GuildId, volume: u8) -> MusicResult<()> {
        if !(1..=200).contains(&volume) {
            return Err(MusicError::user_input("El volumen debe estar entre 1 y 200"));
        }

        self.queues.set_volume(guild_id, volume);

        if let Some(session) = self.existing_session(guild_id) {
            let playback = session.lock().await;
            if let Some(stream) = &playback.stream {
                stream.handle.set_volume(f32::from(volume) / 100.0)?;
            }
        }

        info!("🔊 Volumen en guild {}: {}%", guild_id, volume);
        Ok(())
    }

    /// Sale del canal de voz y vacía la cola.
    pub async fn leave(&self, guild_id: GuildId) -> MusicResult<()> {
        let session = self
            .existing_session(guild_id)
            .ok_or_else(|| MusicError::invalid("No estoy en ningún canal de voz"))?;
        let mut playback = session.lock().await;

        if playback.connection.is_none() {
            return Err(MusicError::invalid("No estoy en ningún canal de voz"));
        }

        info!("👋 Saliendo del canal de voz en guild {}", guild_id);
        self.disconnect(guild_id, &mut playback).await;
        Ok(())
    }

    /// El bot fue sacado de `channel` desde fuera.
    ///
    /// A leave for any channel other than the current connection's is a late
    /// echo of an earlier session and is ignored.
    pub async fn voice_lost(&self, guild_id: GuildId, channel: ChannelId) {
        let Some(session) = self.existing_session(guild_id) else {
            return;
        };
        let mut playback = session.lock().await;

        let current = playback.connection.as_ref().map(|c| c.channel_id());
        if current != Some(channel) {
            debug!(
                "Salida del canal {} en guild {} no corresponde a la conexión actual ({:?})",
                channel, guild_id, current
            );
            return;
        }

        warn!("🔇 Conexión de voz perdida en guild {}", guild_id);
        // La llamada ya no existe, no hay que cerrarla
        playback.connection = None;
        self.disconnect(guild_id, &mut playback).await;
    }
}
