use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use super::notice::escape_markdown;
use crate::{
    audio::queue::{LoopMode, Track},
    bot::router::CommandSpec,
    sources::SearchCandidate,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Guild Jukebox";

fn track_link(track: &Track) -> String {
    let channel = if track.channel_url.is_empty() {
        escape_markdown(&track.channel_title)
    } else {
        format!("[{}]({})", escape_markdown(&track.channel_title), track.channel_url)
    };
    format!("[{}]({}) de {}", escape_markdown(&track.title), track.url, channel)
}

/// Pie con quien pidió la canción cuando se conoce su nombre, o `fallback`.
fn requester_footer(track: &Track, fallback: &str) -> CreateEmbedFooter {
    let Some(tag) = &track.requester_tag else {
        return CreateEmbedFooter::new(fallback);
    };
    let footer = CreateEmbedFooter::new(format!("Pedido por {}", tag.name));
    match &tag.avatar_url {
        Some(url) => footer.icon_url(url),
        None => footer,
    }
}

fn duration_label(duration: Option<Duration>) -> String {
    duration.map_or_else(|| "🔴 En vivo".to_string(), format_duration)
}

/// Crea un embed para mostrar la canción actual
pub fn create_now_playing_embed(track: &Track, loop_mode: LoopMode) -> CreateEmbed {
    let status = match loop_mode {
        LoopMode::Track => "🔂 Reproduciendo Ahora",
        LoopMode::Queue => "🔁 Reproduciendo Ahora",
        LoopMode::None => "🎵 Reproduciendo Ahora",
    };

    let mut embed = CreateEmbed::default()
        .title(status)
        .description(track_link(track))
        .color(colors::SUCCESS_GREEN)
        .field("⏱️ Duración", duration_label(track.duration), true)
        .field("👤 Solicitado por", format!("<@{}>", track.requester_id), true);

    if let Some(thumbnail) = &track.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(requester_footer(track, STANDARD_FOOTER))
}

/// Crea un embed para mostrar que se agregó una canción
pub fn create_track_added_embed(track: &Track) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("✅ Canción Agregada")
        .description(track_link(track))
        .color(colors::SUCCESS_GREEN)
        .field("📍 Posición", format!("{}", track.position + 1), true)
        .field("⏱️ Duración", duration_label(track.duration), true)
        .field("👤 Solicitado por", format!("<@{}>", track.requester_id), true);

    if let Some(thumbnail) = &track.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(requester_footer(
            track,
            "🎵 Se reproducirá automáticamente si no hay música sonando",
        ))
}

/// Detalle de una posición de la cola (`queue <n>`)
pub fn create_track_detail_embed(track: &Track) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title(format!("📍 Posición {}", track.position + 1))
        .description(track_link(track))
        .color(colors::INFO_BLUE)
        .field("⏱️ Duración", duration_label(track.duration), true)
        .field("👤 Solicitado por", format!("<@{}>", track.requester_id), true)
        .field(
            "🕒 Agregada",
            format!("<t:{}:R>", track.queued_at.timestamp()),
            true,
        );

    if let Some(thumbnail) = &track.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }

    embed.footer(requester_footer(track, STANDARD_FOOTER))
}

/// Una página de la cola. `page` es 0-based.
pub fn create_queue_embed(
    tracks: &[Track],
    page: usize,
    total_pages: usize,
    total_items: usize,
    loop_mode: LoopMode,
) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    if total_items == 0 {
        return embed
            .description("😴 **La cola está vacía**")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER));
    }

    let mut description = String::new();
    for track in tracks {
        let marker = if track.position == 0 { "▶️ " } else { "" };
        description.push_str(&format!(
            "{}**{}**. {} `[{}]`\n",
            marker,
            track.position + 1,
            escape_markdown(&track.title),
            track.duration.map_or_else(|| "--:--".to_string(), format_duration),
        ));
    }
    embed = embed.description(description);

    let loop_label = match loop_mode {
        LoopMode::None => "➡️ Sin repetición",
        LoopMode::Track => "🔂 Repitiendo canción",
        LoopMode::Queue => "🔁 Repitiendo cola",
    };
    embed = embed.field(
        "Información",
        format!("**Total:** {} canciones • {}", total_items, loop_label),
        false,
    );

    if total_pages > 1 {
        embed = embed.footer(CreateEmbedFooter::new(format!(
            "Página {} de {} • Guild Jukebox",
            page + 1,
            total_pages
        )));
    } else {
        embed = embed.footer(CreateEmbedFooter::new(STANDARD_FOOTER));
    }

    embed.timestamp(Timestamp::now())
}

/// Lista numerada de candidatos para `search`
pub fn create_search_results_embed(
    query: &str,
    candidates: &[SearchCandidate],
    cancel_word: &str,
) -> CreateEmbed {
    let description = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            format!(
                "**{}**. [{}]({}) `[{}]`",
                i + 1,
                escape_markdown(&c.title),
                c.url,
                c.duration.map_or_else(|| "--:--".to_string(), format_duration)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    CreateEmbed::default()
        .title(format!("🔍 Resultados para: {}", escape_markdown(query)))
        .description(description)
        .color(colors::MUSIC_PURPLE)
        .footer(CreateEmbedFooter::new(format!(
            "Escribe un número del 1 al {} o '{}' • 60 segundos",
            candidates.len(),
            cancel_word
        )))
}

/// Crea un embed para mostrar que una playlist fue agregada
pub fn create_playlist_added_embed(added: usize, found: usize) -> CreateEmbed {
    let description = if added == found {
        format!("Se agregaron **{}** canciones de la playlist", added)
    } else {
        format!(
            "Se agregaron **{}** de **{}** canciones, la cola se llenó",
            added, found
        )
    };

    CreateEmbed::default()
        .title("📋 Playlist Agregada")
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de ayuda general
pub fn create_help_embed<'a>(
    commands: impl Iterator<Item = &'a CommandSpec>,
    prefix: &str,
) -> CreateEmbed {
    let listing = commands
        .map(|spec| format!("• `{}` - {}", spec.usage_for(prefix), spec.help))
        .collect::<Vec<_>>()
        .join("\n");

    CreateEmbed::default()
        .title("🎵 Comandos de Música")
        .description(listing)
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new(format!(
            "Usa {}help <comando> para ayuda específica",
            prefix
        )))
}

fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
