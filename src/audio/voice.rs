use async_trait::async_trait;
use serenity::{
    cache::Cache,
    model::id::{ChannelId, GuildId},
};
use songbird::{
    driver::Bitrate,
    input::{Input, YoutubeDl},
    tracks::{Track, TrackHandle},
    Call, Event, Songbird, TrackEvent,
};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::transport::{
    AudioResolver, JoinError, StreamEventSender, StreamHandle, StreamOptions, VoiceConnection,
    VoiceTransport,
};
use crate::{
    bot::events::{TrackEndNotifier, TrackErrorNotifier},
    error::{MusicError, MusicResult},
};

/// Transporte de voz sobre songbird.
///
/// The serenity cache is attached once the client is built; until then join
/// pre-checks and listener counts are skipped.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    cache: OnceLock<Arc<Cache>>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self {
            manager,
            cache: OnceLock::new(),
        }
    }

    pub fn attach_cache(&self, cache: Arc<Cache>) {
        if self.cache.set(cache).is_err() {
            debug!("Caché de serenity ya asignada");
        }
    }

    fn check_joinable(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), JoinError> {
        let Some(cache) = self.cache.get() else {
            return Ok(());
        };
        let bot_id = cache.current_user().id;
        let Some(guild) = cache.guild(guild_id) else {
            return Ok(());
        };
        let Some(channel) = guild.channels.get(&channel_id) else {
            return Err(JoinError::Other(format!("canal {} desconocido", channel_id)));
        };

        let permissions = guild
            .members
            .get(&bot_id)
            .map(|member| guild.user_permissions_in(channel, member));

        if let Some(permissions) = permissions {
            if !permissions.connect() || !permissions.speak() {
                return Err(JoinError::Forbidden);
            }
        }

        if let Some(limit) = channel.user_limit.filter(|l| *l > 0) {
            let present = guild
                .voice_states
                .values()
                .filter(|vs| vs.channel_id == Some(channel_id))
                .count();
            let can_bypass = permissions.is_some_and(|p| p.move_members());
            if present >= limit as usize && !can_bypass {
                return Err(JoinError::Full);
            }
        }

        Ok(())
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>, JoinError> {
        self.check_joinable(guild_id, channel_id)?;

        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| JoinError::Other(e.to_string()))?;

        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);

        Ok(Arc::new(SongbirdConnection {
            call,
            manager: self.manager.clone(),
            cache: self.cache.get().cloned(),
            guild_id,
            channel_id,
        }))
    }
}

pub struct SongbirdConnection {
    call: Arc<Mutex<Call>>,
    manager: Arc<Songbird>,
    cache: Option<Arc<Cache>>,
    guild_id: GuildId,
    channel_id: ChannelId,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    async fn play_stream(
        &self,
        source: Input,
        options: StreamOptions,
        events: StreamEventSender,
    ) -> MusicResult<Box<dyn StreamHandle>> {
        let handle = {
            let mut call = self.call.lock().await;
            let bitrate = i32::try_from(options.bitrate).unwrap_or(i32::MAX);
            call.set_bitrate(Bitrate::BitsPerSecond(bitrate));
            // play_only detiene cualquier track anterior del driver
            call.play_only(Track::from(source).volume(options.volume))
        };

        handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackEndNotifier {
                    events: events.clone(),
                },
            )
            .map_err(MusicError::transport)?;
        handle
            .add_event(Event::Track(TrackEvent::Error), TrackErrorNotifier { events })
            .map_err(MusicError::transport)?;

        Ok(Box::new(SongbirdStream { handle }))
    }

    async fn disconnect(&self) -> MusicResult<()> {
        self.manager
            .remove(self.guild_id)
            .await
            .map_err(MusicError::transport)?;
        info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
        Ok(())
    }

    fn listener_count(&self) -> usize {
        let Some(cache) = &self.cache else {
            // Sin caché no podemos saberlo; asumir que hay alguien
            return 1;
        };
        let bot_id = cache.current_user().id;
        let Some(guild) = cache.guild(self.guild_id) else {
            warn!("⚠️ Guild {} no está en caché", self.guild_id);
            return 1;
        };

        guild
            .voice_states
            .values()
            .filter(|vs| vs.channel_id == Some(self.channel_id) && vs.user_id != bot_id)
            .count()
    }

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }
}

struct SongbirdStream {
    handle: TrackHandle,
}

impl StreamHandle for SongbirdStream {
    fn stop(&self) -> MusicResult<()> {
        self.handle.stop().map_err(MusicError::transport)
    }

    fn pause(&self) -> MusicResult<()> {
        self.handle.pause().map_err(MusicError::transport)
    }

    fn resume(&self) -> MusicResult<()> {
        self.handle.play().map_err(MusicError::transport)
    }

    fn set_volume(&self, volume: f32) -> MusicResult<()> {
        self.handle.set_volume(volume).map_err(MusicError::transport)
    }
}

/// Resuelve URLs con el `YoutubeDl` de songbird; la descarga es perezosa.
pub struct YtDlpResolver {
    http: reqwest::Client,
}

impl YtDlpResolver {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl AudioResolver for YtDlpResolver {
    async fn resolve(&self, url: &str) -> MusicResult<Input> {
        debug!("🎵 Preparando stream para: {}", url);
        Ok(YoutubeDl::new(self.http.clone(), url.to_string()).into())
    }
}
