//! In-memory stand-ins for the chat, voice and audio collaborators.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use serenity::{
    builder::CreateEmbed,
    model::id::{ChannelId, GuildId, MessageId, UserId},
};
use songbird::input::{File, Input};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    audio::{
        queue::Track,
        transport::{
            AudioResolver, JoinError, StreamEventSender, StreamHandle, StreamOptions,
            VoiceConnection, VoiceTransport,
        },
    },
    bot::chat::{ChatGateway, Navigation, ReplyMatcher},
    error::{MusicError, MusicResult},
    sources::SearchCandidate,
    ui::notice::Notice,
};

const WATCH_PREFIX: &str = "https://www.youtube.com/watch?v=";

pub fn track(name: &str, requester: UserId) -> Track {
    Track::new(
        name.to_string(),
        name.to_string(),
        format!("{WATCH_PREFIX}{name}"),
        "Canal".to_string(),
        String::new(),
        requester,
    )
}

pub fn candidate(name: &str) -> SearchCandidate {
    SearchCandidate {
        id: name.to_string(),
        title: name.to_string(),
        url: format!("{WATCH_PREFIX}{name}"),
        channel_title: "Canal".to_string(),
        channel_url: String::new(),
        duration: Some(Duration::from_secs(180)),
        thumbnail: None,
    }
}

#[derive(Debug, Clone)]
pub enum Sent {
    Notice(ChannelId, Notice),
    Embed(ChannelId, serde_json::Value),
    EditedNotice(MessageId, Notice),
    EditedEmbed(MessageId, serde_json::Value),
    Reactions(MessageId, Vec<String>),
}

/// Chat que guarda todo lo enviado y responde con lo guionado.
#[derive(Default)]
pub struct FakeChat {
    sent: Mutex<Vec<Sent>>,
    replies: Mutex<VecDeque<(UserId, String)>>,
    navigation: Mutex<Vec<(UserId, Navigation)>>,
    activities: Mutex<Vec<Option<String>>>,
    closed_dms: AtomicBool,
    last_message: AtomicU64,
}

/// Canal directo que [`FakeChat`] abre para `user`.
pub fn dm_channel(user: UserId) -> ChannelId {
    ChannelId::new(1_000_000 + user.get())
}

impl FakeChat {
    pub fn script_reply(&self, author: UserId, text: &str) {
        self.replies.lock().push_back((author, text.to_string()));
    }

    pub fn script_navigation(&self, user: UserId, navigation: Navigation) {
        self.navigation.lock().push((user, navigation));
    }

    /// Los mensajes directos fallan a partir de ahora.
    pub fn close_dms(&self) {
        self.closed_dms.store(true, Ordering::SeqCst);
    }

    /// Actividades fijadas, en orden.
    pub fn activities(&self) -> Vec<Option<String>> {
        self.activities.lock().clone()
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    /// Avisos enviados o editados, en orden.
    pub fn notices(&self) -> Vec<Notice> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Notice(_, n) | Sent::EditedNotice(_, n) => Some(n.clone()),
                _ => None,
            })
            .collect()
    }

    /// Embeds enviados (no editados), como JSON.
    pub fn embeds(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Embed(_, e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn edited_embeds(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::EditedEmbed(_, e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn embed_titles(&self) -> Vec<String> {
        self.embeds()
            .iter()
            .filter_map(|e| e["title"].as_str().map(String::from))
            .collect()
    }

    fn next_message(&self) -> MessageId {
        MessageId::new(self.last_message.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn record(&self, sent: Sent) {
        self.sent.lock().push(sent);
    }
}

fn embed_json(embed: &CreateEmbed) -> serde_json::Value {
    serde_json::to_value(embed).unwrap_or_default()
}

#[async_trait]
impl ChatGateway for FakeChat {
    async fn send_notice(&self, channel: ChannelId, notice: Notice) -> MusicResult<MessageId> {
        self.record(Sent::Notice(channel, notice));
        Ok(self.next_message())
    }

    async fn send_embed(&self, channel: ChannelId, embed: CreateEmbed) -> MusicResult<MessageId> {
        self.record(Sent::Embed(channel, embed_json(&embed)));
        Ok(self.next_message())
    }

    async fn edit_notice(
        &self,
        _channel: ChannelId,
        message: MessageId,
        notice: Notice,
    ) -> MusicResult<()> {
        self.record(Sent::EditedNotice(message, notice));
        Ok(())
    }

    async fn edit_embed(
        &self,
        _channel: ChannelId,
        message: MessageId,
        embed: CreateEmbed,
    ) -> MusicResult<()> {
        self.record(Sent::EditedEmbed(message, embed_json(&embed)));
        Ok(())
    }

    async fn add_reactions(
        &self,
        _channel: ChannelId,
        message: MessageId,
        emojis: &[&str],
    ) -> MusicResult<()> {
        self.record(Sent::Reactions(
            message,
            emojis.iter().map(|e| e.to_string()).collect(),
        ));
        Ok(())
    }

    async fn await_reply(
        &self,
        _channel: ChannelId,
        author: UserId,
        timeout: Duration,
        accept: ReplyMatcher,
    ) -> MusicResult<Option<String>> {
        loop {
            let next = self.replies.lock().pop_front();
            match next {
                Some((user, text)) if user == author && accept(&text) => return Ok(Some(text)),
                Some(_) => continue,
                None => break,
            }
        }
        tokio::time::sleep(timeout).await;
        Ok(None)
    }

    async fn navigation_events(
        &self,
        _channel: ChannelId,
        _message: MessageId,
        _owner: UserId,
        _lifetime: Duration,
    ) -> MusicResult<BoxStream<'static, (UserId, Navigation)>> {
        let scripted = std::mem::take(&mut *self.navigation.lock());
        Ok(stream::iter(scripted).boxed())
    }

    async fn direct_channel(&self, user: UserId) -> MusicResult<ChannelId> {
        if self.closed_dms.load(Ordering::SeqCst) {
            return Err(MusicError::transport("mensajes directos cerrados"));
        }
        Ok(dm_channel(user))
    }

    fn set_activity(&self, activity: Option<String>) {
        self.activities.lock().push(activity);
    }
}

/// Transporte de voz que crea [`FakeConnection`]s.
#[derive(Default)]
pub struct FakeVoice {
    joins: AtomicUsize,
    fail_next: Mutex<Option<JoinError>>,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeVoice {
    pub fn fail_next_join(&self, error: JoinError) {
        *self.fail_next.lock() = Some(error);
    }

    pub fn joins(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    /// La conexión más reciente.
    pub fn connection(&self) -> Option<Arc<FakeConnection>> {
        self.connections.lock().last().cloned()
    }
}

#[async_trait]
impl VoiceTransport for FakeVoice {
    async fn join(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>, JoinError> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if let Some(error) = self.fail_next.lock().take() {
            return Err(error);
        }

        let connection = Arc::new(FakeConnection::new(channel_id));
        self.connections.lock().push(connection.clone());
        Ok(connection)
    }
}

struct FakeStreamState {
    events: StreamEventSender,
    options: StreamOptions,
    finished: AtomicBool,
    volume: Mutex<f32>,
}

pub struct FakeConnection {
    channel_id: ChannelId,
    listeners: AtomicUsize,
    disconnected: AtomicBool,
    disconnect_delay: Mutex<Duration>,
    streams: Mutex<Vec<Arc<FakeStreamState>>>,
}

impl FakeConnection {
    fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            listeners: AtomicUsize::new(1),
            disconnected: AtomicBool::new(false),
            disconnect_delay: Mutex::new(Duration::ZERO),
            streams: Mutex::new(Vec::new()),
        }
    }

    fn current(&self) -> Option<Arc<FakeStreamState>> {
        self.streams
            .lock()
            .iter()
            .rev()
            .find(|s| !s.finished.load(Ordering::SeqCst))
            .cloned()
    }

    /// El stream actual llega a su fin normal.
    pub fn finish_current(&self) {
        if let Some(stream) = self.current() {
            stream.finished.store(true, Ordering::SeqCst);
            stream.events.ended();
        }
    }

    pub fn fail_current(&self, reason: &str) {
        if let Some(stream) = self.current() {
            stream.finished.store(true, Ordering::SeqCst);
            stream.events.failed(reason);
        }
    }

    /// `disconnect` tarda `delay` en volver, como un gateway lento.
    pub fn set_disconnect_delay(&self, delay: Duration) {
        *self.disconnect_delay.lock() = delay;
    }

    pub fn set_listeners(&self, count: usize) {
        self.listeners.store(count, Ordering::SeqCst);
    }

    pub fn active_streams(&self) -> usize {
        self.streams
            .lock()
            .iter()
            .filter(|s| !s.finished.load(Ordering::SeqCst))
            .count()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<StreamOptions> {
        self.streams.lock().last().map(|s| s.options)
    }

    pub fn last_volume(&self) -> Option<f32> {
        self.streams.lock().last().map(|s| *s.volume.lock())
    }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    async fn play_stream(
        &self,
        _source: Input,
        options: StreamOptions,
        events: StreamEventSender,
    ) -> MusicResult<Box<dyn StreamHandle>> {
        let state = Arc::new(FakeStreamState {
            events,
            options,
            finished: AtomicBool::new(false),
            volume: Mutex::new(options.volume),
        });
        self.streams.lock().push(state.clone());
        Ok(Box::new(FakeStream { state }))
    }

    async fn disconnect(&self) -> MusicResult<()> {
        let delay = *self.disconnect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn listener_count(&self) -> usize {
        self.listeners.load(Ordering::SeqCst)
    }

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }
}

struct FakeStream {
    state: Arc<FakeStreamState>,
}

impl StreamHandle for FakeStream {
    /// Como songbird: detener emite `End` una sola vez.
    fn stop(&self) -> MusicResult<()> {
        if !self.state.finished.swap(true, Ordering::SeqCst) {
            self.state.events.ended();
        }
        Ok(())
    }

    fn pause(&self) -> MusicResult<()> {
        Ok(())
    }

    fn resume(&self) -> MusicResult<()> {
        Ok(())
    }

    fn set_volume(&self, volume: f32) -> MusicResult<()> {
        *self.state.volume.lock() = volume;
        Ok(())
    }
}

/// Resolver que registra cada intento y puede fallar a pedido.
#[derive(Default)]
pub struct FakeResolver {
    attempts: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, usize>>,
}

impl FakeResolver {
    /// Las próximas `times` resoluciones de `name` fallan.
    pub fn fail(&self, name: &str, times: usize) {
        self.failures.lock().insert(name.to_string(), times);
    }

    /// Nombres resueltos, en orden, incluidos los intentos fallidos.
    pub fn played(&self) -> Vec<String> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl AudioResolver for FakeResolver {
    async fn resolve(&self, url: &str) -> MusicResult<Input> {
        let name = url.strip_prefix(WATCH_PREFIX).unwrap_or(url).to_string();
        self.attempts.lock().push(name.clone());

        if let Some(remaining) = self.failures.lock().get_mut(&name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(MusicError::transport("fallo simulado"));
            }
        }

        Ok(Input::from(File::new("/dev/null")))
    }
}
