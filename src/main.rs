use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod sources;
#[cfg(test)]
mod testing;
mod ui;

use crate::audio::{
    player::{PlaybackController, PlaybackSettings},
    queue::QueueStore,
    voice::{SongbirdTransport, YtDlpResolver},
};
use crate::bot::{
    chat::SerenityChat,
    commands::MusicCommands,
    router::{CommandRegistry, CommandRouter},
    MusicBot,
};
use crate::config::Config;
use crate::sources::youtube::YtDlpSearch;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Jukebox v{}", env!("CARGO_PKG_VERSION"));

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("⚙️ {}", config.summary());

    // Colaboradores de voz y chat
    let songbird = Songbird::serenity();
    let transport = Arc::new(SongbirdTransport::new(songbird.clone()));
    let resolver = Arc::new(YtDlpResolver::new(reqwest::Client::new()));
    let chat = Arc::new(SerenityChat::new(
        Arc::new(Http::new(&config.discord_token)),
        config.discord_token.clone(),
    ));

    // Colas y máquina de estados de reproducción
    let queues = Arc::new(QueueStore::new(config.max_queue_size, config.default_volume));
    let (controller, stream_events) = PlaybackController::new(
        queues,
        transport.clone(),
        resolver,
        chat.clone(),
        PlaybackSettings::from_config(&config),
    );

    // Tabla de comandos, validada una sola vez
    let registry = Arc::new(CommandRegistry::build(&config)?);
    let commands = Arc::new(MusicCommands::new(
        &config,
        registry.clone(),
        controller.clone(),
        Arc::new(YtDlpSearch::new()),
        chat.clone(),
    ));
    let router = Arc::new(CommandRouter::new(&config, registry, commands, chat.clone()));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = MusicBot::new(config.clone(), router, controller.clone(), chat);

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    transport.attach_cache(client.cache.clone());

    tokio::spawn(controller.run(stream_events));

    // Manejar shutdown graceful
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Error al registrar Ctrl+C");
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        std::process::exit(0);
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check() -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = async_process::Command::new("yt-dlp")
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
