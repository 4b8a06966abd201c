use async_process::Command;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::{sync::LazyLock, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{SearchCandidate, SearchProvider, PLAYLIST_LIMIT};
use crate::error::{MusicError, MusicResult};

static VIDEO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("regex de id válida"));

/// Cliente de búsqueda basado en yt-dlp
pub struct YtDlpSearch {
    binary: String,
    // Limitar procesos concurrentes para evitar rate limiting
    permits: Semaphore,
}

/// Entrada de `--dump-json --flat-playlist`
#[derive(Debug, Deserialize)]
struct YtDlpEntry {
    id: String,
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    channel: Option<String>,
    uploader: Option<String>,
    channel_url: Option<String>,
    uploader_url: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
}

impl YtDlpSearch {
    pub fn new() -> Self {
        Self::with_binary("yt-dlp")
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            permits: Semaphore::new(3),
        }
    }

    async fn run(&self, args: &[&str]) -> MusicResult<String> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| MusicError::resolution(format!("yt-dlp no disponible: {e}")))?;

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| MusicError::resolution(format!("Error al ejecutar yt-dlp: {e}")))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            warn!("❌ yt-dlp falló: {}", error.trim());
            return Err(MusicError::resolution("No pude obtener resultados, intenta de nuevo"));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for YtDlpSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for YtDlpSearch {
    async fn search(&self, query: &str, limit: usize) -> MusicResult<Vec<SearchCandidate>> {
        info!("🔍 Buscando en YouTube: {}", query);

        // Un enlace directo se resuelve igual que una búsqueda de un resultado
        let target = if query.starts_with("http://") || query.starts_with("https://") {
            query.to_string()
        } else {
            format!("ytsearch{}:{}", limit, query)
        };

        let stdout = self
            .run(&[
                "--no-playlist",
                "--dump-json",
                "--flat-playlist",
                "--skip-download",
                "--no-warnings",
                &target,
            ])
            .await?;

        let mut results = parse_entries(&stdout);
        results.truncate(limit);
        debug!("🔍 {} resultados para '{}'", results.len(), query);

        Ok(results)
    }

    async fn resolve_playlist(&self, playlist_id: &str) -> MusicResult<Vec<SearchCandidate>> {
        info!("📋 Obteniendo playlist: {}", playlist_id);

        let url = format!("https://www.youtube.com/playlist?list={}", playlist_id);
        // Uno más del límite para detectar playlists demasiado grandes
        let end = (PLAYLIST_LIMIT + 1).to_string();

        let stdout = self
            .run(&[
                "--flat-playlist",
                "--dump-json",
                "--playlist-end",
                &end,
                "--no-warnings",
                &url,
            ])
            .await?;

        check_playlist_bounds(parse_entries(&stdout))
    }
}

/// Rechaza playlists vacías o con más de [`PLAYLIST_LIMIT`] videos.
pub fn check_playlist_bounds(entries: Vec<SearchCandidate>) -> MusicResult<Vec<SearchCandidate>> {
    if entries.is_empty() {
        return Err(MusicError::resolution("No pude obtener ningún video de la playlist"));
    }
    if entries.len() > PLAYLIST_LIMIT {
        return Err(MusicError::PlaylistTooLarge { max: PLAYLIST_LIMIT });
    }
    Ok(entries)
}

fn parse_entries(stdout: &str) -> Vec<SearchCandidate> {
    stdout
        .lines()
        .filter_map(|line| match serde_json::from_str::<YtDlpEntry>(line) {
            Ok(entry) => Some(entry.into_candidate()),
            Err(e) => {
                debug!("Línea de yt-dlp ignorada: {}", e);
                None
            }
        })
        .collect()
}

impl YtDlpEntry {
    fn into_candidate(self) -> SearchCandidate {
        let url = self
            .webpage_url
            .or(self.url.filter(|u| u.starts_with("http")))
            .unwrap_or_else(|| watch_url(&self.id));

        SearchCandidate {
            title: self.title.unwrap_or_else(|| "Sin título".to_string()),
            channel_title: self
                .channel
                .or(self.uploader)
                .unwrap_or_else(|| "Desconocido".to_string()),
            channel_url: self.channel_url.or(self.uploader_url).unwrap_or_default(),
            duration: self
                .duration
                .filter(|d| d.is_finite() && *d > 0.0)
                .map(Duration::from_secs_f64),
            thumbnail: self.thumbnail.or_else(|| {
                VIDEO_ID
                    .is_match(&self.id)
                    .then(|| format!("https://img.youtube.com/vi/{}/hqdefault.jpg", self.id))
            }),
            url,
            id: self.id,
        }
    }
}

fn watch_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", id)
}
