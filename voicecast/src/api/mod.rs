//! Control plane: HTTP REST surface, WebSocket streaming, and the
//! bearer-token auth middleware guarding them.

pub mod auth;
pub mod http;
pub mod ws;

use actix_web::web;

use crate::tts::AudioStream;

/// Read chunk size used when adapting an [`AudioStream`] into an HTTP
/// streaming body.
const STREAM_CHUNK: usize = 8 * 1024;

/// Registers every control-plane route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/status", web::get().to(http::status))
        .route("/api/guilds", web::get().to(http::guilds))
        .route("/api/voices", web::get().to(http::voices))
        .route("/api/voices/preview", web::get().to(http::voices_preview))
        .route("/api/settings", web::get().to(http::get_settings))
        .route("/api/settings", web::post().to(http::update_settings))
        .route("/api/logs", web::get().to(http::logs_tail))
        .route("/api/logs/stream", web::get().to(http::logs_stream))
        .route("/api/tts", web::post().to(http::post_tts))
        .route("/api/radio-presenter", web::post().to(http::radio_presenter))
        .route(
            "/api/song-suggestions",
            web::post().to(http::song_suggestions),
        )
        .route("/ws/tts", web::get().to(ws::tts_ws));
}

/// Adapts an [`AudioStream`]'s `read` contract into a [`futures::Stream`]
/// suitable for [`actix_web::HttpResponse::streaming`].
pub fn stream_audio(
    audio: AudioStream,
) -> impl futures::Stream<Item = Result<web::Bytes, actix_web::Error>> {
    futures::stream::unfold(audio, |mut audio| async move {
        let chunk = audio.read(STREAM_CHUNK).await;
        if chunk.is_empty() {
            None
        } else {
            Some((Ok(web::Bytes::from(chunk)), audio))
        }
    })
}
