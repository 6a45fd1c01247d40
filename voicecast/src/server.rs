//! Composition root: builds the [`AppContext`] and runs the control
//! plane's HTTP/WS server alongside the background health loop.

use std::{sync::Arc, time::{Duration, Instant}};

use actix_web::{middleware, web, App, HttpServer};
use async_trait::async_trait;
use voicecast_log::log;

use crate::{
    api,
    cli::{Failure, Opts},
    context::{AppContext, RuntimeConfig},
    error::CoreError,
    logbuf::LogBuffer,
    platform::{Member, Platform, VoiceSink},
    session::{self, SessionRegistry},
    settings::SettingsStore,
    tts::TtsClient,
    userprefs::UserPrefStore,
};

/// Runs the application: loads durable state, wires the [`AppContext`],
/// and serves the control plane until the process is terminated.
///
/// # Errors
///
/// If any durable store fails to load or the HTTP server cannot bind.
/// The actual error is logged.
#[actix_web::main]
pub async fn run(cfg: Opts) -> Result<(), Failure> {
    let settings = SettingsStore::load(cfg.settings_path.clone())
        .await
        .map_err(|e| log::error!("Failed to load settings store: {}", e))?;
    let userprefs = UserPrefStore::load(cfg.db_path.clone())
        .await
        .map_err(|e| log::error!("Failed to load user preference store: {}", e))?;

    let tts = TtsClient::new(
        cfg.primary_tts_url.clone(),
        cfg.fallback_tts_url.clone(),
        Duration::from_secs(cfg.tts_http_timeout),
        cfg.max_retries,
    );

    let ctx = AppContext {
        platform: Arc::new(NullPlatform::new(cfg.platform_token.clone())),
        settings: Arc::new(settings),
        userprefs: Arc::new(userprefs),
        tts: Arc::new(tts),
        sessions: Arc::new(SessionRegistry::new()),
        logs: Arc::new(LogBuffer::new(cfg.web_log_max_lines)),
        config: Arc::new(RuntimeConfig::from(&cfg)),
        started_at: Instant::now(),
        dj_intro: None,
        song_suggestions: None,
    };

    if cfg.platform_token.is_none() {
        log::warn!(
            "No platform token configured; running with a no-op platform \
             adapter"
        );
    }

    tokio::spawn(session::run_health_loop(ctx.clone()));

    if !cfg.web_ui_enabled {
        log::info!("Control plane disabled; idling");
        futures::future::pending::<()>().await;
        return Ok(());
    }

    let token = cfg.web_ui_token.clone();
    let bind_addr = (cfg.web_host, cfg.web_port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(ctx.clone()))
            .wrap(middleware::Logger::default())
            .wrap(api::auth::Auth::new(token.clone()))
            .configure(api::configure)
    })
    .bind(bind_addr)
    .map_err(|e| log::error!("Failed to bind control plane on {:?}: {}", bind_addr, e))?
    .run()
    .await
    .map_err(|e| log::error!("Control plane server failed: {}", e))?;

    Ok(())
}

/// Placeholder [`Platform`] used until a real chat/voice SDK binding is
/// wired in; reports no guilds and fails every connect attempt.
#[derive(Debug)]
struct NullPlatform {
    token_configured: bool,
}

impl NullPlatform {
    fn new(token: Option<String>) -> Self {
        Self {
            token_configured: token.is_some(),
        }
    }
}

#[async_trait]
impl Platform for NullPlatform {
    async fn connect(&self, _guild_id: u64, _channel_id: u64) -> Result<Box<dyn VoiceSink>, CoreError> {
        Err(CoreError::ConnectFailed(if self.token_configured {
            "platform adapter not implemented".to_owned()
        } else {
            "no platform token configured".to_owned()
        }))
    }

    async fn disconnect(&self, _guild_id: u64) {}

    async fn move_to(&self, _guild_id: u64, _channel_id: u64) -> Result<(), CoreError> {
        Err(CoreError::ConnectFailed("platform adapter not implemented".to_owned()))
    }

    fn reported_channel(&self, _guild_id: u64) -> Option<u64> {
        None
    }

    fn channel_members(&self, _channel_id: u64) -> Vec<Member> {
        Vec::new()
    }

    fn display_name(&self, user_id: u64) -> String {
        format!("user-{}", user_id)
    }

    fn guilds(&self) -> Vec<(u64, String)> {
        Vec::new()
    }

    fn first_occupied_voice_channel(&self, _guild_id: u64) -> Option<u64> {
        None
    }
}
