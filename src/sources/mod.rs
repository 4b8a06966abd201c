pub mod youtube;

use async_trait::async_trait;
use serenity::model::id::UserId;
use std::time::Duration;
use url::Url;

use crate::{audio::queue::Track, error::MusicResult};

pub use youtube::YtDlpSearch;

/// Máximo de videos aceptados de una playlist.
pub const PLAYLIST_LIMIT: usize = 50;

/// Trait común para resolver búsquedas y playlists
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Busca videos, devolviendo como máximo `limit` candidatos ordenados por relevancia
    async fn search(&self, query: &str, limit: usize) -> MusicResult<Vec<SearchCandidate>>;

    /// Obtiene los videos de una playlist en orden
    async fn resolve_playlist(&self, playlist_id: &str) -> MusicResult<Vec<SearchCandidate>>;
}

/// Resultado de búsqueda todavía sin encolar
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCandidate {
    pub id: String,
    pub title: String,
    pub url: String,
    pub channel_title: String,
    pub channel_url: String,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
}

impl SearchCandidate {
    pub fn into_track(self, requester: UserId) -> Track {
        let mut track = Track::new(
            self.id,
            self.title,
            self.url,
            self.channel_title,
            self.channel_url,
            requester,
        );
        track.duration = self.duration;
        track.thumbnail = self.thumbnail;
        track
    }
}

/// Lo que el usuario pidió con `play`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayRequest {
    Playlist(String),
    Query(String),
}

impl PlayRequest {
    /// Clasifica el argumento de `play`.
    ///
    /// Anything containing `list=` is a playlist; its id is the text after
    /// `list=` up to the first `?` or `&`. Other input is normalized with
    /// [`clean_query`].
    pub fn parse(input: &str) -> MusicResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(crate::error::MusicError::user_input("Dime qué canción quieres escuchar"));
        }

        match playlist_id(input) {
            Some(id) => Ok(Self::Playlist(id)),
            None => Ok(Self::Query(clean_query(input))),
        }
    }
}

/// Extrae el id de playlist de una URL con `list=`.
pub fn playlist_id(input: &str) -> Option<String> {
    let (_, rest) = input.split_once("list=")?;
    let id = rest
        .split(['?', '&'])
        .next()
        .unwrap_or_default()
        .trim();

    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Quita parámetros extra de enlaces de YouTube (`&t=`, `&feature=`...).
pub fn clean_query(input: &str) -> String {
    let is_youtube = Url::parse(input)
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
        .map(|host| host == "youtu.be" || host.ends_with("youtube.com"))
        .unwrap_or(false);

    if is_youtube {
        input.split('&').next().unwrap_or(input).to_string()
    } else {
        input.to_string()
    }
}
