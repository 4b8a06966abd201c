use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::RwLock;
use serenity::{
    all::{ActivityData, ReactionType, ShardMessenger},
    builder::{CreateAllowedMentions, CreateEmbed, CreateMessage, EditMessage},
    collector::{MessageCollector, ReactionCollector},
    http::Http,
    model::id::{ChannelId, MessageId, UserId},
};
use std::{sync::Arc, time::Duration};
use tracing::debug;

use crate::{
    error::{MusicError, MusicResult},
    ui::notice::{redact, Notice},
};

/// Acciones de navegación de una sesión paginada.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Back,
    Forward,
}

impl Navigation {
    pub const BACK_EMOJI: &'static str = "⏪";
    pub const FORWARD_EMOJI: &'static str = "⏩";

    pub fn from_emoji(emoji: &str) -> Option<Self> {
        match emoji {
            Self::BACK_EMOJI => Some(Self::Back),
            Self::FORWARD_EMOJI => Some(Self::Forward),
            _ => None,
        }
    }
}

pub type ReplyMatcher = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Everything the bot needs from the chat platform.
///
/// Handlers, sessions and the playback controller only talk to the chat
/// through this trait, so they can be exercised without a gateway.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn send_notice(&self, channel: ChannelId, notice: Notice) -> MusicResult<MessageId>;

    async fn send_embed(&self, channel: ChannelId, embed: CreateEmbed) -> MusicResult<MessageId>;

    async fn edit_notice(
        &self,
        channel: ChannelId,
        message: MessageId,
        notice: Notice,
    ) -> MusicResult<()>;

    async fn edit_embed(
        &self,
        channel: ChannelId,
        message: MessageId,
        embed: CreateEmbed,
    ) -> MusicResult<()>;

    async fn add_reactions(
        &self,
        channel: ChannelId,
        message: MessageId,
        emojis: &[&str],
    ) -> MusicResult<()>;

    /// Espera un solo mensaje de `author` que cumpla `accept`; `None` si vence el tiempo.
    async fn await_reply(
        &self,
        channel: ChannelId,
        author: UserId,
        timeout: Duration,
        accept: ReplyMatcher,
    ) -> MusicResult<Option<String>>;

    /// Reacciones de navegación sobre `message`, hasta que pase `lifetime`.
    async fn navigation_events(
        &self,
        channel: ChannelId,
        message: MessageId,
        owner: UserId,
        lifetime: Duration,
    ) -> MusicResult<BoxStream<'static, (UserId, Navigation)>>;

    /// Canal de mensajes directos con `user`.
    async fn direct_channel(&self, user: UserId) -> MusicResult<ChannelId>;

    /// Cambia la actividad del bot; `None` la borra.
    fn set_activity(&self, activity: Option<String>);
}

/// Gateway sobre la API HTTP y los collectors de serenity.
pub struct SerenityChat {
    http: Arc<Http>,
    shard: RwLock<Option<ShardMessenger>>,
    secret: String,
}

impl SerenityChat {
    /// `secret` se borra de cualquier texto saliente (el token del bot).
    pub fn new(http: Arc<Http>, secret: impl Into<String>) -> Self {
        Self {
            http,
            shard: RwLock::new(None),
            secret: secret.into(),
        }
    }

    /// Registra el shard usado por los collectors; se llama en `ready`.
    pub fn bind_shard(&self, shard: ShardMessenger) {
        *self.shard.write() = Some(shard);
    }

    fn shard(&self) -> MusicResult<ShardMessenger> {
        self.shard
            .read()
            .clone()
            .ok_or_else(|| MusicError::transport("el gateway todavía no está listo"))
    }

    fn render(&self, notice: &Notice) -> String {
        redact(&notice.render(), &self.secret)
    }
}

#[async_trait]
impl ChatGateway for SerenityChat {
    async fn send_notice(&self, channel: ChannelId, notice: Notice) -> MusicResult<MessageId> {
        let text = self.render(&notice);
        if notice.is_failure() {
            debug!("Aviso de error para {}: {}", channel, text);
        }
        let message = CreateMessage::new()
            .content(text)
            .allowed_mentions(CreateAllowedMentions::new());
        channel
            .send_message(&self.http, message)
            .await
            .map(|m| m.id)
            .map_err(MusicError::transport)
    }

    async fn send_embed(&self, channel: ChannelId, embed: CreateEmbed) -> MusicResult<MessageId> {
        channel
            .send_message(&self.http, CreateMessage::new().embed(embed))
            .await
            .map(|m| m.id)
            .map_err(MusicError::transport)
    }

    async fn edit_notice(
        &self,
        channel: ChannelId,
        message: MessageId,
        notice: Notice,
    ) -> MusicResult<()> {
        channel
            .edit_message(
                &self.http,
                message,
                EditMessage::new()
                    .content(self.render(&notice))
                    .embeds(Vec::new())
                    .allowed_mentions(CreateAllowedMentions::new()),
            )
            .await
            .map(|_| ())
            .map_err(MusicError::transport)
    }

    async fn edit_embed(
        &self,
        channel: ChannelId,
        message: MessageId,
        embed: CreateEmbed,
    ) -> MusicResult<()> {
        channel
            .edit_message(&self.http, message, EditMessage::new().embed(embed))
            .await
            .map(|_| ())
            .map_err(MusicError::transport)
    }

    async fn add_reactions(
        &self,
        channel: ChannelId,
        message: MessageId,
        emojis: &[&str],
    ) -> MusicResult<()> {
        // En orden, para que ⏪ quede antes que ⏩
        for emoji in emojis {
            channel
                .create_reaction(&self.http, message, ReactionType::Unicode(emoji.to_string()))
                .await
                .map_err(MusicError::transport)?;
        }
        Ok(())
    }

    async fn await_reply(
        &self,
        channel: ChannelId,
        author: UserId,
        timeout: Duration,
        accept: ReplyMatcher,
    ) -> MusicResult<Option<String>> {
        let reply = MessageCollector::new(self.shard()?)
            .channel_id(channel)
            .author_id(author)
            .timeout(timeout)
            .filter(move |m| accept(&m.content))
            .await;

        Ok(reply.map(|m| m.content))
    }

    async fn navigation_events(
        &self,
        _channel: ChannelId,
        message: MessageId,
        owner: UserId,
        lifetime: Duration,
    ) -> MusicResult<BoxStream<'static, (UserId, Navigation)>> {
        let stream = ReactionCollector::new(self.shard()?)
            .message_id(message)
            .author_id(owner)
            .timeout(lifetime)
            .stream()
            .filter_map(|reaction| async move {
                let user = reaction.user_id?;
                let navigation = match &reaction.emoji {
                    ReactionType::Unicode(emoji) => Navigation::from_emoji(emoji),
                    _ => None,
                };
                if navigation.is_none() {
                    debug!("Reacción ignorada: {}", reaction.emoji);
                }
                navigation.map(|n| (user, n))
            });

        Ok(stream.boxed())
    }

    async fn direct_channel(&self, user: UserId) -> MusicResult<ChannelId> {
        user.create_dm_channel(&*self.http)
            .await
            .map(|dm| dm.id)
            .map_err(MusicError::transport)
    }

    fn set_activity(&self, activity: Option<String>) {
        match self.shard.read().as_ref() {
            Some(shard) => shard.set_activity(activity.map(ActivityData::playing)),
            None => debug!("Presencia ignorada, el gateway todavía no está listo"),
        }
    }
}
