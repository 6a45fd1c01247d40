//! REST handlers for the control plane.

use std::{collections::HashMap, convert::TryFrom as _};

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    catalog,
    cli::DropPolicy,
    context::AppContext,
    error::ApiError,
    external,
    queue::QueueItem,
    router,
    session::DisconnectReason,
};

/// `GET /api/status`
pub async fn status(ctx: web::Data<AppContext>) -> Result<HttpResponse, ApiError> {
    #[derive(Serialize)]
    struct Status {
        uptime_seconds: u64,
        guild_count: usize,
    }
    Ok(HttpResponse::Ok().json(Status {
        uptime_seconds: ctx.started_at.elapsed().as_secs(),
        guild_count: ctx.platform.guilds().len(),
    }))
}

/// `GET /api/guilds`
pub async fn guilds(ctx: web::Data<AppContext>) -> Result<HttpResponse, ApiError> {
    #[derive(Serialize)]
    struct Guild {
        id: u64,
        name: String,
    }
    let guilds: Vec<_> = ctx
        .platform
        .guilds()
        .into_iter()
        .map(|(id, name)| Guild { id, name })
        .collect();
    Ok(HttpResponse::Ok().json(guilds))
}

/// `GET /api/voices`
pub async fn voices() -> HttpResponse {
    HttpResponse::Ok().json(catalog::all())
}

#[derive(Deserialize)]
pub struct PreviewQuery {
    voice_id: String,
    text: String,
}

/// `GET /api/voices/preview?voice_id&text`
pub async fn voices_preview(
    ctx: web::Data<AppContext>,
    query: web::Query<PreviewQuery>,
) -> Result<HttpResponse, ApiError> {
    let (stream, _producer) = ctx.tts.get_tts_stream(
        query.text.clone(),
        query.voice_id.clone(),
        catalog::FALLBACK_PROVIDER_PREFIX.to_owned() + "en",
    );
    Ok(HttpResponse::Ok()
        .content_type("audio/mpeg")
        .streaming(super::stream_audio(stream)))
}

#[derive(Deserialize)]
pub struct GuildPath {
    guild_id: u64,
}

/// `GET /api/settings?guild_id`
pub async fn get_settings(
    ctx: web::Data<AppContext>,
    query: web::Query<GuildPath>,
) -> Result<HttpResponse, ApiError> {
    let settings = ctx.settings.get(query.guild_id).await?;
    Ok(HttpResponse::Ok().json(settings))
}

/// `POST /api/settings?guild_id`
pub async fn update_settings(
    ctx: web::Data<AppContext>,
    query: web::Query<GuildPath>,
    patch: web::Json<HashMap<String, Value>>,
) -> Result<HttpResponse, ApiError> {
    let guild_id = query.guild_id;
    let before = ctx.settings.get(guild_id).await?;
    let after = ctx.settings.update(guild_id, &patch).await?;

    if before.default_voice_id != after.default_voice_id {
        let _ = ctx
            .userprefs
            .migrate_default_voice(
                guild_id,
                &before.default_voice_id,
                &crate::userprefs::user_default_voice(
                    &after.fallback_voice,
                    &after.default_voice_id,
                ),
            )
            .await;
    }

    Ok(HttpResponse::Ok().json(after))
}

#[derive(Deserialize)]
pub struct TailQuery {
    #[serde(default = "default_tail")]
    tail: usize,
}

fn default_tail() -> usize {
    100
}

/// `GET /api/logs?tail=N`
pub async fn logs_tail(
    ctx: web::Data<AppContext>,
    query: web::Query<TailQuery>,
) -> HttpResponse {
    HttpResponse::Ok().json(ctx.logs.tail(query.tail))
}

/// `GET /api/logs/stream`
pub async fn logs_stream(ctx: web::Data<AppContext>) -> HttpResponse {
    let (id, rx) = ctx.logs.subscribe();
    let logs = ctx.logs.clone();
    let stream = futures::stream::unfold((rx, logs, id), |(mut rx, logs, id)| async move {
        match rx.recv().await {
            Some(line) => {
                let frame = format!("data: {}\n\n", line);
                Some((Ok::<_, actix_web::Error>(web::Bytes::from(frame)), (rx, logs, id)))
            }
            None => {
                logs.unsubscribe(id);
                None
            }
        }
    });
    HttpResponse::Ok()
        .content_type("text/event-stream")
        .streaming(stream)
}

#[derive(Deserialize)]
pub struct TtsRequest {
    guild_id: u64,
    text: String,
    voice_id: Option<String>,
    channel_id: Option<u64>,
}

#[derive(Serialize)]
struct EnqueueResponse {
    accepted: bool,
    dropped: u32,
}

/// `POST /api/tts`
pub async fn post_tts(
    ctx: web::Data<AppContext>,
    body: web::Json<TtsRequest>,
) -> Result<HttpResponse, ApiError> {
    let settings = ctx.settings.get(body.guild_id).await?;

    let target_channel = body
        .channel_id
        .or_else(|| {
            ctx.sessions
                .get(body.guild_id)
                .and_then(|s| s.attached_channel())
        })
        .or_else(|| ctx.platform.first_occupied_voice_channel(body.guild_id));

    let target_channel = match target_channel {
        Some(c) => c,
        None => {
            return Ok(HttpResponse::BadRequest().json(serde_json::json!({
                "error": { "code": "NO_CHANNEL", "message": "no voice channel to join" },
            })))
        }
    };

    let session = ctx.sessions.get_or_create(
        body.guild_id,
        queue_capacity(&ctx),
        drop_policy(&ctx),
    );
    session.ensure_connected(&ctx, target_channel).await?;

    let voice = router::effective_voice(&settings, body.voice_id.as_deref(), true);
    let text = crate::textutil::truncate_chars(
        body.text.trim(),
        usize::try_from(settings.max_tts_chars).unwrap_or(usize::MAX),
    );

    let outcome = session.queue.enqueue(QueueItem {
        text,
        voice_id: voice,
        volume: None,
    });
    Ok(HttpResponse::Ok().json(EnqueueResponse {
        accepted: outcome.accepted,
        dropped: outcome.dropped,
    }))
}

#[derive(Deserialize)]
pub struct RadioPresenterRequest {
    guild_id: u64,
    prompt: String,
}

/// `POST /api/radio-presenter`
pub async fn radio_presenter(
    ctx: web::Data<AppContext>,
    body: web::Json<RadioPresenterRequest>,
) -> Result<HttpResponse, ApiError> {
    let settings = ctx.settings.get(body.guild_id).await?;
    let text = external::generate_with_fallback(
        ctx.dj_intro.as_deref(),
        &body.prompt,
        "And now, back to the music.",
    )
    .await;

    let target_channel = ctx
        .sessions
        .get(body.guild_id)
        .and_then(|s| s.attached_channel())
        .or_else(|| ctx.platform.first_occupied_voice_channel(body.guild_id));

    if let Some(target_channel) = target_channel {
        let session = ctx.sessions.get_or_create(
            body.guild_id,
            queue_capacity(&ctx),
            drop_policy(&ctx),
        );
        session.ensure_connected(&ctx, target_channel).await?;
        session.queue.enqueue(QueueItem {
            text: text.clone(),
            voice_id: settings.default_voice_id,
            volume: Some(0.5),
        });
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({ "text": text })))
}

#[derive(Deserialize)]
pub struct SongSuggestionsRequest {
    prompt: String,
}

/// `POST /api/song-suggestions`
pub async fn song_suggestions(
    ctx: web::Data<AppContext>,
    body: web::Json<SongSuggestionsRequest>,
) -> HttpResponse {
    let text = external::generate_with_fallback(
        ctx.song_suggestions.as_deref(),
        &body.prompt,
        "No suggestions available right now.",
    )
    .await;
    HttpResponse::Ok().json(serde_json::json!({ "suggestions": text }))
}

fn queue_capacity(ctx: &AppContext) -> usize {
    ctx.config.queue_maxsize
}

fn drop_policy(ctx: &AppContext) -> DropPolicy {
    ctx.config.drop_policy
}
