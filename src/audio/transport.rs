use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::input::Input;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{MusicError, MusicResult};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("No tengo permiso para entrar a ese canal")]
    Forbidden,
    #[error("El canal de voz está lleno")]
    Full,
    #[error("No pude conectarme al canal de voz: {0}")]
    Other(String),
}

impl From<JoinError> for MusicError {
    fn from(e: JoinError) -> Self {
        MusicError::transport(e)
    }
}

/// Parámetros con los que arranca un stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamOptions {
    pub bitrate: u32,
    /// Escala lineal, 1.0 = 100%
    pub volume: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventKind {
    End,
    Error(String),
}

/// Fin o error de un stream concreto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub guild_id: GuildId,
    pub stream_id: u64,
    pub kind: StreamEventKind,
}

pub type StreamEvents = mpsc::UnboundedReceiver<StreamEvent>;

/// Sender scoped to one stream; the voice adapter fires it from track events.
#[derive(Debug, Clone)]
pub struct StreamEventSender {
    guild_id: GuildId,
    stream_id: u64,
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl StreamEventSender {
    pub fn new(guild_id: GuildId, stream_id: u64, tx: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self {
            guild_id,
            stream_id,
            tx,
        }
    }

    pub fn ended(&self) {
        self.send(StreamEventKind::End);
    }

    pub fn failed(&self, reason: impl Into<String>) {
        self.send(StreamEventKind::Error(reason.into()));
    }

    fn send(&self, kind: StreamEventKind) {
        let event = StreamEvent {
            guild_id: self.guild_id,
            stream_id: self.stream_id,
            kind,
        };
        // El receptor solo se cierra al apagar el bot
        if self.tx.send(event).is_err() {
            debug!("Evento de stream descartado, controlador detenido");
        }
    }
}

/// Une el bot a canales de voz.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>, JoinError>;
}

/// Una conexión de voz activa en un guild.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    async fn play_stream(
        &self,
        source: Input,
        options: StreamOptions,
        events: StreamEventSender,
    ) -> MusicResult<Box<dyn StreamHandle>>;

    async fn disconnect(&self) -> MusicResult<()>;

    /// Usuarios en el canal sin contar al bot.
    fn listener_count(&self) -> usize;

    fn channel_id(&self) -> ChannelId;
}

/// Control de un stream en reproducción.
pub trait StreamHandle: Send + Sync {
    /// Termina el stream; el adaptador emite `End` después.
    fn stop(&self) -> MusicResult<()>;
    fn pause(&self) -> MusicResult<()>;
    fn resume(&self) -> MusicResult<()>;
    fn set_volume(&self, volume: f32) -> MusicResult<()>;
}

/// Convierte una URL en audio decodificable.
#[async_trait]
pub trait AudioResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> MusicResult<Input>;
}
