use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serenity::model::id::{GuildId, UserId};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::error::{MusicError, MusicResult};

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub url: String,
    pub channel_title: String,
    pub channel_url: String,
    pub requester_id: UserId,
    /// Nombre y avatar para el pie de los embeds, si están habilitados
    pub requester_tag: Option<RequesterTag>,
    pub queued_at: DateTime<Utc>,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
    /// Posición 0-based, igual al índice en la cola
    pub position: usize,
    /// Número de entrada único dentro de la cola, asignado al encolar
    pub serial: u64,
}

impl Track {
    pub fn new(
        id: String,
        title: String,
        url: String,
        channel_title: String,
        channel_url: String,
        requester_id: UserId,
    ) -> Self {
        Self {
            id,
            title,
            url,
            channel_title,
            channel_url,
            requester_id,
            requester_tag: None,
            queued_at: Utc::now(),
            duration: None,
            thumbnail: None,
            position: 0,
            serial: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequesterTag {
    pub name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    None,
    Track,
    Queue,
}

impl LoopMode {
    /// Orden del comando `loop`: None → Track → Queue → None
    pub fn next(self) -> Self {
        match self {
            Self::None => Self::Track,
            Self::Track => Self::Queue,
            Self::Queue => Self::None,
        }
    }
}

/// Resultado de elegir la siguiente canción tras un drenaje.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Sin cursor previo: empieza por el frente
    First(Track),
    /// Avance normal (Loop=None tras desencolar, o Loop=Queue hacia adelante)
    Next(Track),
    /// Loop=Queue llegó al final y vuelve al principio
    Wrapped(Track),
    /// Loop=Track repite el cursor
    Replay(Track),
    /// El cursor ya no está en la cola; se eligió un reemplazo
    StaleCursor(Track),
    /// No queda nada que reproducir
    Exhausted,
}

impl Selection {
    pub fn track(&self) -> Option<&Track> {
        match self {
            Self::First(t)
            | Self::Next(t)
            | Self::Wrapped(t)
            | Self::Replay(t)
            | Self::StaleCursor(t) => Some(t),
            Self::Exhausted => None,
        }
    }

    pub fn into_track(self) -> Option<Track> {
        match self {
            Self::First(t)
            | Self::Next(t)
            | Self::Wrapped(t)
            | Self::Replay(t)
            | Self::StaleCursor(t) => Some(t),
            Self::Exhausted => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Queue {
    pub guild_id: GuildId,
    pub tracks: Vec<Track>,
    /// Última canción iniciada
    pub cursor: Option<Track>,
    pub loop_mode: LoopMode,
    pub volume: u8,
    next_serial: u64,
}

impl Queue {
    pub fn new(guild_id: GuildId, volume: u8) -> Self {
        Self {
            guild_id,
            tracks: Vec::new(),
            cursor: None,
            loop_mode: LoopMode::None,
            volume,
            next_serial: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Reasigna `position = índice` para todas las canciones.
    fn renumber(&mut self) {
        for (index, track) in self.tracks.iter_mut().enumerate() {
            track.position = index;
        }
    }

    fn push(&mut self, mut track: Track) -> usize {
        track.position = self.tracks.len();
        track.serial = self.next_serial;
        self.next_serial += 1;
        let position = track.position;
        self.tracks.push(track);
        position
    }

    fn index_of(&self, serial: u64) -> Option<usize> {
        self.tracks.iter().position(|t| t.serial == serial)
    }

    /// Elige la siguiente canción según el modo de repetición.
    ///
    /// With `LoopMode::None` the previously played entry is dequeued and the
    /// queue renumbered before the front is taken. A cursor whose entry was
    /// removed meanwhile yields [`Selection::StaleCursor`] instead of being
    /// treated as a normal wrap.
    pub fn select_next(&mut self) -> Selection {
        let Some(cursor) = self.cursor.clone() else {
            return self
                .tracks
                .first()
                .cloned()
                .map_or(Selection::Exhausted, Selection::First);
        };

        let located = self.index_of(cursor.serial);

        match (self.loop_mode, located) {
            (LoopMode::Track, Some(index)) => Selection::Replay(self.tracks[index].clone()),
            (LoopMode::Queue, Some(index)) => match self.tracks.get(index + 1) {
                Some(next) => Selection::Next(next.clone()),
                None => self
                    .tracks
                    .first()
                    .cloned()
                    .map_or(Selection::Exhausted, Selection::Wrapped),
            },
            (LoopMode::None, located) => {
                match located {
                    Some(0) => {}
                    Some(index) => warn!(
                        "⚠️ La canción terminada no estaba al frente (posición {}) en guild {}",
                        index, self.guild_id
                    ),
                    None => debug!("Cursor ya retirado en guild {}", self.guild_id),
                }
                if let Some(index) = located {
                    self.tracks.remove(index);
                    self.renumber();
                }
                self.tracks
                    .first()
                    .cloned()
                    .map_or(Selection::Exhausted, Selection::Next)
            }
            (_, None) => {
                warn!(
                    "⚠️ El cursor (#{}) ya no está en la cola de guild {}, usando la posición {}",
                    cursor.serial, self.guild_id, cursor.position
                );
                self.tracks
                    .get(cursor.position)
                    .or_else(|| self.tracks.first())
                    .cloned()
                    .map_or(Selection::Exhausted, Selection::StaleCursor)
            }
        }
    }

    /// Canción a reintentar tras un error: el cursor, sin desencolarlo.
    pub fn retry_target(&self) -> Option<Track> {
        match &self.cursor {
            Some(cursor) => self
                .index_of(cursor.serial)
                .map(|i| self.tracks[i].clone())
                .or_else(|| self.tracks.first().cloned()),
            None => self.tracks.first().cloned(),
        }
    }
}

/// Colas por guild, creadas bajo demanda.
pub struct QueueStore {
    queues: DashMap<GuildId, Arc<RwLock<Queue>>>,
    max_size: usize,
    default_volume: u8,
}

impl QueueStore {
    /// `max_size == 0` significa sin límite.
    pub fn new(max_size: usize, default_volume: u8) -> Self {
        Self {
            queues: DashMap::new(),
            max_size,
            default_volume,
        }
    }

    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<RwLock<Queue>> {
        self.queues
            .entry(guild_id)
            .or_insert_with(|| Arc::new(RwLock::new(Queue::new(guild_id, self.default_volume))))
            .clone()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn is_full(&self, len: usize) -> bool {
        self.max_size != 0 && len >= self.max_size
    }

    /// Agrega una canción al final; devuelve su posición.
    pub fn enqueue(&self, guild_id: GuildId, track: Track) -> MusicResult<usize> {
        let queue = self.get_or_create(guild_id);
        let mut q = queue.write();

        if self.is_full(q.len()) {
            return Err(MusicError::QueueFull { max: self.max_size });
        }

        info!("➕ Agregado a la cola de guild {}: {}", guild_id, track.title);
        Ok(q.push(track))
    }

    /// Agrega varias canciones (playlist) hasta llenar la cola; devuelve cuántas entraron.
    pub fn enqueue_many(&self, guild_id: GuildId, tracks: Vec<Track>) -> usize {
        let queue = self.get_or_create(guild_id);
        let mut q = queue.write();

        let mut added = 0;
        for track in tracks {
            if self.is_full(q.len()) {
                break;
            }
            q.push(track);
            added += 1;
        }

        info!("➕ Agregadas {} canciones a la cola de guild {}", added, guild_id);
        added
    }

    /// Quita la canción en `position`.
    ///
    /// Position 0 is the one playing and can only leave the queue through a
    /// normal playback advance.
    pub fn remove_at(
        &self,
        guild_id: GuildId,
        position: usize,
        actor: UserId,
        privileged: bool,
    ) -> MusicResult<Track> {
        if position == 0 {
            return Err(MusicError::invalid(
                "No puedes quitar la canción que está sonando, usa skip",
            ));
        }

        let queue = self.get_or_create(guild_id);
        let mut q = queue.write();

        let index = q
            .tracks
            .iter()
            .position(|t| t.position == position)
            .ok_or(MusicError::NotFound { position: position + 1 })?;

        if q.tracks[index].requester_id != actor && !privileged {
            return Err(MusicError::Forbidden);
        }

        let removed = q.tracks.remove(index);
        q.renumber();

        debug!("❌ Track eliminado en posición {} de guild {}", position, guild_id);
        Ok(removed)
    }

    pub fn set_loop_mode(&self, guild_id: GuildId, mode: LoopMode) {
        let queue = self.get_or_create(guild_id);
        let mut q = queue.write();
        let previous = q.loop_mode;
        q.loop_mode = mode;

        // Al salir de Loop=Queue lo anterior al cursor ya se escuchó
        if previous == LoopMode::Queue && mode != LoopMode::Queue {
            if let Some(index) = q.cursor.as_ref().and_then(|c| q.index_of(c.serial)) {
                q.tracks.drain(..index);
                q.renumber();
            }
        }

        match mode {
            LoopMode::None => info!("➡️ Repetición desactivada en guild {}", guild_id),
            LoopMode::Track => info!("🔂 Repetir canción activado en guild {}", guild_id),
            LoopMode::Queue => info!("🔁 Repetir cola activado en guild {}", guild_id),
        }
    }

    /// Avanza el modo de repetición y devuelve el nuevo.
    pub fn cycle_loop_mode(&self, guild_id: GuildId) -> LoopMode {
        let next = self.loop_mode(guild_id).next();
        self.set_loop_mode(guild_id, next);
        next
    }

    pub fn loop_mode(&self, guild_id: GuildId) -> LoopMode {
        self.queues
            .get(&guild_id)
            .map(|q| q.read().loop_mode)
            .unwrap_or_default()
    }

    pub fn set_volume(&self, guild_id: GuildId, volume: u8) {
        self.get_or_create(guild_id).write().volume = volume;
    }

    pub fn volume(&self, guild_id: GuildId) -> u8 {
        self.queues
            .get(&guild_id)
            .map(|q| q.read().volume)
            .unwrap_or(self.default_volume)
    }

    /// Reemplaza la cola por una vacía; no detiene el stream activo.
    pub fn clear(&self, guild_id: GuildId) {
        self.queues.insert(
            guild_id,
            Arc::new(RwLock::new(Queue::new(guild_id, self.default_volume))),
        );
        info!("🗑️ Cola limpiada en guild {}", guild_id);
    }

    pub fn len(&self, guild_id: GuildId) -> usize {
        self.queues.get(&guild_id).map(|q| q.read().len()).unwrap_or(0)
    }

    pub fn snapshot(&self, guild_id: GuildId) -> Queue {
        self.get_or_create(guild_id).read().clone()
    }

    pub fn track_at(&self, guild_id: GuildId, position: usize) -> Option<Track> {
        self.queues
            .get(&guild_id)
            .and_then(|q| q.read().tracks.get(position).cloned())
    }

    /// Canción que está sonando (el cursor).
    pub fn current(&self, guild_id: GuildId) -> Option<Track> {
        self.queues
            .get(&guild_id)
            .and_then(|q| q.read().cursor.clone())
    }

    /// `true` si la entrada `serial` sigue en la cola.
    pub fn contains(&self, guild_id: GuildId, serial: u64) -> bool {
        self.queues
            .get(&guild_id)
            .is_some_and(|q| q.read().index_of(serial).is_some())
    }

    pub fn set_cursor(&self, guild_id: GuildId, track: &Track) {
        self.get_or_create(guild_id).write().cursor = Some(track.clone());
    }

    pub fn select_next(&self, guild_id: GuildId) -> Selection {
        self.get_or_create(guild_id).write().select_next()
    }

    pub fn retry_target(&self, guild_id: GuildId) -> Option<Track> {
        self.get_or_create(guild_id).read().retry_target()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const GUILD: GuildId = GuildId::new(1);
    const ALICE: UserId = UserId::new(10);
    const BOB: UserId = UserId::new(20);

    fn track(name: &str, requester: UserId) -> Track {
        Track::new(
            name.to_string(),
            name.to_string(),
            format!("https://www.youtube.com/watch?v={name}"),
            "Canal".to_string(),
            String::new(),
            requester,
        )
    }

    fn assert_contiguous(store: &QueueStore) {
        let queue = store.snapshot(GUILD);
        for (i, t) in queue.tracks.iter().enumerate() {
            assert_eq!(t.position, i, "posición rota en {:?}", t.title);
        }
    }

    fn titles(store: &QueueStore) -> Vec<String> {
        store
            .snapshot(GUILD)
            .tracks
            .into_iter()
            .map(|t| t.title)
            .collect()
    }

    /// Simula el inicio de la canción elegida, como hace el controlador.
    fn play(store: &QueueStore, selection: &Selection) {
        if let Some(t) = selection.track() {
            store.set_cursor(GUILD, t);
        }
    }

    #[test]
    fn enqueue_assigns_positions() {
        let store = QueueStore::new(0, 50);
        assert_eq!(store.enqueue(GUILD, track("a", ALICE)).unwrap(), 0);
        assert_eq!(store.enqueue(GUILD, track("b", ALICE)).unwrap(), 1);
        assert_eq!(store.enqueue(GUILD, track("c", BOB)).unwrap(), 2);
        assert_contiguous(&store);
    }

    #[test]
    fn capacity_is_a_hard_bound() {
        let store = QueueStore::new(2, 50);
        store.enqueue(GUILD, track("a", ALICE)).unwrap();
        store.enqueue(GUILD, track("b", ALICE)).unwrap();

        let err = store.enqueue(GUILD, track("c", ALICE)).unwrap_err();
        assert_eq!(err, MusicError::QueueFull { max: 2 });
        assert_eq!(store.len(GUILD), 2);
    }

    #[test]
    fn enqueue_many_stops_at_capacity() {
        let store = QueueStore::new(3, 50);
        store.enqueue(GUILD, track("a", ALICE)).unwrap();
        let added = store.enqueue_many(
            GUILD,
            vec![track("b", ALICE), track("c", ALICE), track("d", ALICE)],
        );
        assert_eq!(added, 2);
        assert_eq!(titles(&store), vec!["a", "b", "c"]);
    }

    #[test]
    fn remove_at_zero_is_rejected_and_queue_unchanged() {
        let store = QueueStore::new(0, 50);
        store.enqueue(GUILD, track("a", ALICE)).unwrap();
        store.enqueue(GUILD, track("b", ALICE)).unwrap();

        let err = store.remove_at(GUILD, 0, ALICE, true).unwrap_err();
        assert!(matches!(err, MusicError::InvalidOperation(_)));
        assert_eq!(titles(&store), vec!["a", "b"]);

        // También con la cola vacía
        let empty = QueueStore::new(0, 50);
        assert!(matches!(
            empty.remove_at(GUILD, 0, ALICE, false),
            Err(MusicError::InvalidOperation(_))
        ));
    }

    #[test]
    fn remove_checks_requester_and_position() {
        let store = QueueStore::new(0, 50);
        store.enqueue(GUILD, track("a", ALICE)).unwrap();
        store.enqueue(GUILD, track("b", ALICE)).unwrap();
        store.enqueue(GUILD, track("c", BOB)).unwrap();

        assert_eq!(
            store.remove_at(GUILD, 5, ALICE, false).unwrap_err(),
            MusicError::NotFound { position: 6 }
        );
        assert_eq!(
            store.remove_at(GUILD, 1, BOB, false).unwrap_err(),
            MusicError::Forbidden
        );

        let removed = store.remove_at(GUILD, 1, BOB, true).unwrap();
        assert_eq!(removed.title, "b");
        assert_eq!(titles(&store), vec!["a", "c"]);
        assert_contiguous(&store);

        store.remove_at(GUILD, 1, BOB, false).unwrap();
        assert_eq!(titles(&store), vec!["a"]);
    }

    #[test]
    fn positions_stay_contiguous_across_mixed_operations() {
        let store = QueueStore::new(0, 50);
        for name in ["a", "b", "c", "d", "e", "f"] {
            store.enqueue(GUILD, track(name, ALICE)).unwrap();
        }
        store.remove_at(GUILD, 3, ALICE, false).unwrap();
        assert_contiguous(&store);

        store.set_loop_mode(GUILD, LoopMode::Queue);
        let first = store.select_next(GUILD);
        play(&store, &first);
        let second = store.select_next(GUILD);
        play(&store, &second);
        let third = store.select_next(GUILD);
        play(&store, &third);
        store.set_loop_mode(GUILD, LoopMode::None);
        assert_contiguous(&store);

        store.enqueue(GUILD, track("g", ALICE)).unwrap();
        store.remove_at(GUILD, 1, ALICE, false).unwrap();
        assert_contiguous(&store);
    }

    #[test]
    fn loop_none_drains_fifo() {
        let store = QueueStore::new(0, 50);
        for name in ["a", "b", "c"] {
            store.enqueue(GUILD, track(name, ALICE)).unwrap();
        }

        let mut played = Vec::new();
        loop {
            let selection = store.select_next(GUILD);
            play(&store, &selection);
            match selection.into_track() {
                Some(t) => played.push(t.title),
                None => break,
            }
        }

        assert_eq!(played, vec!["a", "b", "c"]);
        assert_eq!(store.len(GUILD), 0);
    }

    #[test]
    fn loop_track_replays_cursor() {
        let store = QueueStore::new(0, 50);
        store.enqueue(GUILD, track("a", ALICE)).unwrap();
        let first = store.select_next(GUILD);
        play(&store, &first);
        store.set_loop_mode(GUILD, LoopMode::Track);

        for _ in 0..3 {
            let selection = store.select_next(GUILD);
            assert!(matches!(&selection, Selection::Replay(t) if t.title == "a"));
            play(&store, &selection);
        }
        assert_eq!(store.len(GUILD), 1);
    }

    #[test]
    fn loop_queue_wraps_around() {
        let store = QueueStore::new(0, 50);
        store.enqueue(GUILD, track("a", ALICE)).unwrap();
        store.enqueue(GUILD, track("b", ALICE)).unwrap();
        store.set_loop_mode(GUILD, LoopMode::Queue);

        let first = store.select_next(GUILD);
        assert!(matches!(&first, Selection::First(t) if t.title == "a"));
        play(&store, &first);

        let second = store.select_next(GUILD);
        assert!(matches!(&second, Selection::Next(t) if t.title == "b"));
        play(&store, &second);

        let third = store.select_next(GUILD);
        assert!(matches!(&third, Selection::Wrapped(t) if t.title == "a"));
        assert_eq!(store.len(GUILD), 2);
    }

    #[test]
    fn removed_cursor_is_reported_as_stale() {
        let store = QueueStore::new(0, 50);
        for name in ["a", "b", "c"] {
            store.enqueue(GUILD, track(name, ALICE)).unwrap();
        }
        store.set_loop_mode(GUILD, LoopMode::Queue);
        let first = store.select_next(GUILD);
        play(&store, &first);
        let second = store.select_next(GUILD);
        play(&store, &second);

        // "b" suena en la posición 1 y alguien la quita
        store.remove_at(GUILD, 1, ALICE, false).unwrap();

        let next = store.select_next(GUILD);
        assert!(matches!(&next, Selection::StaleCursor(t) if t.title == "c"));
    }

    #[test]
    fn leaving_queue_loop_trims_before_cursor() {
        let store = QueueStore::new(0, 50);
        for name in ["a", "b", "c"] {
            store.enqueue(GUILD, track(name, ALICE)).unwrap();
        }
        store.set_loop_mode(GUILD, LoopMode::Queue);
        let first = store.select_next(GUILD);
        play(&store, &first);
        let second = store.select_next(GUILD);
        play(&store, &second);

        assert_eq!(store.cycle_loop_mode(GUILD), LoopMode::None);
        assert_eq!(titles(&store), vec!["b", "c"]);
        assert_contiguous(&store);

        // Y el avance normal continúa desde ahí
        let next = store.select_next(GUILD);
        assert!(matches!(&next, Selection::Next(t) if t.title == "c"));
    }

    #[test]
    fn retry_target_keeps_failed_track() {
        let store = QueueStore::new(0, 50);
        store.enqueue(GUILD, track("a", ALICE)).unwrap();
        store.enqueue(GUILD, track("b", ALICE)).unwrap();
        let first = store.select_next(GUILD);
        play(&store, &first);

        assert_eq!(store.retry_target(GUILD).unwrap().title, "a");
        assert_eq!(store.len(GUILD), 2);
    }

    #[test]
    fn clear_resets_queue_but_keeps_default_volume() {
        let store = QueueStore::new(0, 70);
        store.enqueue(GUILD, track("a", ALICE)).unwrap();
        store.set_volume(GUILD, 150);
        store.set_loop_mode(GUILD, LoopMode::Track);
        let first = store.select_next(GUILD);
        play(&store, &first);

        store.clear(GUILD);

        let queue = store.snapshot(GUILD);
        assert!(queue.is_empty());
        assert!(queue.cursor.is_none());
        assert_eq!(queue.loop_mode, LoopMode::None);
        assert_eq!(queue.volume, 70);
    }

    #[test]
    fn loop_mode_cycles_in_order() {
        let store = QueueStore::new(0, 50);
        assert_eq!(store.cycle_loop_mode(GUILD), LoopMode::Track);
        assert_eq!(store.cycle_loop_mode(GUILD), LoopMode::Queue);
        assert_eq!(store.cycle_loop_mode(GUILD), LoopMode::None);
    }
}
