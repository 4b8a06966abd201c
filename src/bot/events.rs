use serenity::async_trait;
use songbird::{Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler};
use tracing::{debug, error};

use crate::audio::transport::StreamEventSender;

/// Handler para cuando un track termina (también al detenerlo con skip)
pub struct TrackEndNotifier {
    pub events: StreamEventSender,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        debug!("🎵 Track terminado");
        self.events.ended();
        None
    }
}

/// Handler para errores de tracks
pub struct TrackErrorNotifier {
    pub events: StreamEventSender,
}

#[async_trait]
impl VoiceEventHandler for TrackErrorNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        let mut reason = String::from("error desconocido");

        if let EventContext::Track(track_list) = ctx {
            for (state, _handle) in *track_list {
                error!("❌ Error en track: {:?}", state.playing);
                reason = format!("{:?}", state.playing);
            }
        }

        self.events.failed(reason);
        None
    }
}
