//! Realtime (live) session management.
//!
//! Sessions can run in two modes: request/response HTTP and
//! bidirectional live streaming. A directive parser on the trailing
//! user message picks the mode; live sessions hold one provider
//! connection per session key, serialized by a per-session mutex, with
//! an idle janitor evicting stale connections. Live failures fall back
//! to HTTP at the router with a `[realtime-fallback] ` prefix.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use tether_domain::config::RealtimeConfig;
use tether_domain::error::{Error, Result};
use tether_providers::{RealtimeFactory, RealtimeProvider, RealtimeSettings};
use tether_sessions::ProviderType;

/// Overall budget for one live turn.
const TURN_DEADLINE: Duration = Duration::from_secs(20);
/// A turn is complete when output exists and has been quiet this long.
const QUIET_COMPLETION: Duration = Duration::from_millis(800);
/// Poll cadence while waiting for live output.
const POLL_INTERVAL: Duration = Duration::from_millis(120);

const DEFAULT_LIVE_MODEL: &str = "gemini-2.0-flash-live-001";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Directive parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Http,
    Live,
}

/// Decide HTTP vs live for one message.
///
/// An empty session key always routes to HTTP — realtime requires an
/// explicit session. Explicit `/text` / `/http` directives force HTTP;
/// live directives, audio-looking payloads, `live:` / `realtime:` key
/// prefixes, and a persisted live provider type force live.
pub fn choose_route(session_key: &str, message: &str, persisted: Option<ProviderType>) -> Route {
    if session_key.is_empty() {
        return Route::Http;
    }

    let trimmed = message.trim_start();
    for directive in ["/text", "/http"] {
        if has_directive(trimmed, directive) {
            return Route::Http;
        }
    }
    for directive in ["/live-audio-file", "/live", "/voice", "/audio"] {
        if has_directive(trimmed, directive) {
            return Route::Live;
        }
    }
    if looks_like_audio(message) {
        return Route::Live;
    }
    if session_key.starts_with("live:") || session_key.starts_with("realtime:") {
        return Route::Live;
    }
    if persisted == Some(ProviderType::Live) {
        return Route::Live;
    }
    Route::Http
}

fn has_directive(message: &str, directive: &str) -> bool {
    message
        .strip_prefix(directive)
        .map(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
        .unwrap_or(false)
}

fn looks_like_audio(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("data:audio/")
        || lower.contains("[audio]")
        || lower.contains("mime:audio/")
        || lower.contains("voice message")
}

/// What a live turn sends: text and/or an audio file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LivePayload {
    pub text: Option<String>,
    pub audio_path: Option<String>,
}

/// Strip the directive prefix and split the remainder into text and
/// audio parts.
pub fn parse_payload(message: &str) -> LivePayload {
    let trimmed = message.trim();

    if let Some(rest) = trimmed.strip_prefix("/live-audio-file") {
        let rest = rest.trim_start();
        let (path, text) = match rest.split_once(char::is_whitespace) {
            Some((p, t)) => (p, t.trim()),
            None => (rest, ""),
        };
        return LivePayload {
            text: (!text.is_empty()).then(|| text.to_string()),
            audio_path: (!path.is_empty()).then(|| path.to_string()),
        };
    }

    for directive in ["/live", "/voice", "/audio", "/text", "/http"] {
        if let Some(rest) = trimmed.strip_prefix(directive) {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                let text = rest.trim();
                return LivePayload {
                    text: (!text.is_empty()).then(|| text.to_string()),
                    audio_path: None,
                };
            }
        }
    }

    LivePayload {
        text: (!trimmed.is_empty()).then(|| trimmed.to_string()),
        audio_path: None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Live session cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct LiveSession {
    provider: Arc<dyn RealtimeProvider>,
    /// Serializes sends on the underlying connection.
    gate: tokio::sync::Mutex<()>,
    last_used: Mutex<Instant>,
    buffer: Arc<Mutex<String>>,
    last_update: Arc<Mutex<Instant>>,
    error: Arc<Mutex<Option<String>>>,
}

pub struct RealtimeManager {
    factory: Arc<dyn RealtimeFactory>,
    cfg: RealtimeConfig,
    sessions: Mutex<HashMap<String, Arc<LiveSession>>>,
}

impl RealtimeManager {
    pub fn new(factory: Arc<dyn RealtimeFactory>, cfg: RealtimeConfig) -> Self {
        Self {
            factory,
            cfg,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the live API key: environment first, then config.
    fn resolve_api_key(&self) -> Result<String> {
        for var in ["GEMINI_API_KEY", "GOOGLE_API_KEY"] {
            if let Ok(key) = std::env::var(var) {
                if !key.is_empty() {
                    return Ok(key);
                }
            }
        }
        self.cfg.api_key.clone().ok_or_else(|| {
            Error::Config(
                "no realtime API key: set GEMINI_API_KEY, GOOGLE_API_KEY, or realtime.api_key"
                    .into(),
            )
        })
    }

    async fn get_or_connect(&self, session_key: &str) -> Result<Arc<LiveSession>> {
        if let Some(existing) = self.sessions.lock().get(session_key).cloned() {
            if existing.provider.is_connected() {
                return Ok(existing);
            }
        }

        let settings = RealtimeSettings {
            api_key: self.resolve_api_key()?,
            model: self
                .cfg
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_LIVE_MODEL.to_string()),
        };
        let provider = self.factory.open(settings)?;
        provider.connect().await?;

        let session = Arc::new(LiveSession {
            provider,
            gate: tokio::sync::Mutex::new(()),
            last_used: Mutex::new(Instant::now()),
            buffer: Arc::new(Mutex::new(String::new())),
            last_update: Arc::new(Mutex::new(Instant::now())),
            error: Arc::new(Mutex::new(None)),
        });
        self.sessions
            .lock()
            .insert(session_key.to_owned(), session.clone());
        tracing::info!(session_key, "live session connected");
        Ok(session)
    }

    /// Run one live turn: send audio and/or text, then poll the shared
    /// buffer until output settles.
    pub async fn turn(&self, session_key: &str, payload: &LivePayload) -> Result<String> {
        let session = self.get_or_connect(session_key).await?;
        let _gate = session.gate.lock().await;

        session.buffer.lock().clear();
        *session.error.lock() = None;
        *session.last_update.lock() = Instant::now();

        // (Re-)register the output callbacks for this turn.
        {
            let buffer = session.buffer.clone();
            let last_update = session.last_update.clone();
            session.provider.on_text(Arc::new(move |text: String| {
                buffer.lock().push_str(&text);
                *last_update.lock() = Instant::now();
            }));
            let error = session.error.clone();
            session.provider.on_error(Arc::new(move |message: String| {
                *error.lock() = Some(message);
            }));
        }

        if let Some(ref path) = payload.audio_path {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| Error::Other(format!("audio file {path}: {e}")))?;
            session.provider.send_audio(&bytes).await?;
            session.provider.end_audio().await?;
        }
        if let Some(ref text) = payload.text {
            session.provider.send_text(text).await?;
        }

        let reply = self.poll_reply(&session).await?;
        *session.last_used.lock() = Instant::now();
        Ok(reply)
    }

    async fn poll_reply(&self, session: &LiveSession) -> Result<String> {
        let deadline = Instant::now() + TURN_DEADLINE;
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            if let Some(message) = session.error.lock().take() {
                return Err(Error::Provider {
                    provider: "realtime".into(),
                    message,
                });
            }

            let has_output = !session.buffer.lock().is_empty();
            let quiet = session.last_update.lock().elapsed() >= QUIET_COMPLETION;
            if has_output && quiet {
                return Ok(session.buffer.lock().clone());
            }

            if Instant::now() >= deadline {
                let partial = session.buffer.lock().clone();
                if partial.is_empty() {
                    return Err(Error::Timeout("no live output within deadline".into()));
                }
                return Ok(partial);
            }
        }
    }

    /// Evict sessions idle beyond the threshold, closing connections.
    pub async fn evict_idle(&self) -> usize {
        let idle = Duration::from_secs(self.cfg.idle_secs);
        let stale: Vec<(String, Arc<LiveSession>)> = {
            let sessions = self.sessions.lock();
            sessions
                .iter()
                .filter(|(_, s)| s.last_used.lock().elapsed() > idle)
                .map(|(k, s)| (k.clone(), s.clone()))
                .collect()
        };

        for (key, session) in &stale {
            if let Err(e) = session.provider.disconnect().await {
                tracing::warn!(session_key = %key, error = %e, "live disconnect failed");
            }
            self.sessions.lock().remove(key);
            tracing::info!(session_key = %key, "idle live session evicted");
        }
        stale.len()
    }

    /// Background janitor loop; exits on shutdown.
    pub fn start_janitor(self: &Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(
                manager.cfg.janitor_interval_secs.max(1),
            ));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                manager.evict_idle().await;
            }
        })
    }

    /// Diagnostics for `/debug live`.
    pub fn debug_info(&self, session_key: &str) -> String {
        let sessions = self.sessions.lock();
        match sessions.get(session_key) {
            Some(s) => format!(
                "live session '{}': connected={}, idle={}s",
                session_key,
                s.provider.is_connected(),
                s.last_used.lock().elapsed().as_secs()
            ),
            None => format!("live session '{session_key}': none"),
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tether_providers::traits::{DisconnectCallback, TextCallback};

    #[test]
    fn empty_session_key_short_circuits_to_http() {
        assert_eq!(choose_route("", "/live hello", None), Route::Http);
    }

    #[test]
    fn text_directives_force_http() {
        assert_eq!(
            choose_route("live:room", "/text plain please", Some(ProviderType::Live)),
            Route::Http
        );
        assert_eq!(choose_route("s1", "/http now", Some(ProviderType::Live)), Route::Http);
    }

    #[test]
    fn live_directives_force_live() {
        for msg in ["/live hi", "/voice hi", "/audio hi", "/live-audio-file /tmp/a.wav"] {
            assert_eq!(choose_route("s1", msg, None), Route::Live, "{msg}");
        }
    }

    #[test]
    fn directive_must_be_whole_word() {
        // "/liverpool" is not a live directive.
        assert_eq!(choose_route("s1", "/liverpool fans", None), Route::Http);
    }

    #[test]
    fn audio_payloads_force_live() {
        for msg in [
            "data:audio/ogg;base64,xyz",
            "here is a [audio] clip",
            "mime:audio/wav attached",
            "forwarded voice message from earlier",
        ] {
            assert_eq!(choose_route("s1", msg, None), Route::Live, "{msg}");
        }
    }

    #[test]
    fn key_prefixes_and_persisted_type_default_live() {
        assert_eq!(choose_route("live:room", "hello", None), Route::Live);
        assert_eq!(choose_route("realtime:x", "hello", None), Route::Live);
        assert_eq!(
            choose_route("plain", "hello", Some(ProviderType::Live)),
            Route::Live
        );
        assert_eq!(
            choose_route("plain", "hello", Some(ProviderType::Http)),
            Route::Http
        );
    }

    #[test]
    fn payload_parsing() {
        assert_eq!(
            parse_payload("/live hello there"),
            LivePayload {
                text: Some("hello there".into()),
                audio_path: None,
            }
        );
        assert_eq!(
            parse_payload("/live-audio-file /tmp/clip.wav and a caption"),
            LivePayload {
                text: Some("and a caption".into()),
                audio_path: Some("/tmp/clip.wav".into()),
            }
        );
        assert_eq!(
            parse_payload("/live-audio-file /tmp/clip.wav"),
            LivePayload {
                text: None,
                audio_path: Some("/tmp/clip.wav".into()),
            }
        );
        assert_eq!(
            parse_payload("plain words"),
            LivePayload {
                text: Some("plain words".into()),
                audio_path: None,
            }
        );
    }

    // ── Manager with a scripted provider ──────────────────────────

    struct ScriptedRealtime {
        connected: AtomicBool,
        /// Reply text pushed through on_text after send_text.
        reply: Option<String>,
        /// When set, send_text fails.
        fail_send: bool,
        on_text: Mutex<Option<TextCallback>>,
    }

    impl ScriptedRealtime {
        fn new(reply: Option<&str>, fail_send: bool) -> Self {
            Self {
                connected: AtomicBool::new(false),
                reply: reply.map(String::from),
                fail_send,
                on_text: Mutex::new(None),
            }
        }
    }

    #[async_trait::async_trait]
    impl RealtimeProvider for ScriptedRealtime {
        async fn connect(&self) -> Result<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        async fn send_text(&self, _text: &str) -> Result<()> {
            if self.fail_send {
                return Err(Error::Provider {
                    provider: "realtime".into(),
                    message: "send failed".into(),
                });
            }
            if let (Some(reply), Some(cb)) = (&self.reply, self.on_text.lock().clone()) {
                cb(reply.clone());
            }
            Ok(())
        }
        async fn send_audio(&self, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn end_audio(&self) -> Result<()> {
            Ok(())
        }
        fn on_text(&self, cb: TextCallback) {
            *self.on_text.lock() = Some(cb);
        }
        fn on_error(&self, _cb: TextCallback) {}
        fn on_disconnect(&self, _cb: DisconnectCallback) {}
    }

    struct ScriptedFactory {
        reply: Option<String>,
        fail_send: bool,
    }

    impl RealtimeFactory for ScriptedFactory {
        fn open(&self, _settings: RealtimeSettings) -> Result<Arc<dyn RealtimeProvider>> {
            Ok(Arc::new(ScriptedRealtime::new(
                self.reply.as_deref(),
                self.fail_send,
            )))
        }
    }

    fn manager(reply: Option<&str>, fail_send: bool) -> RealtimeManager {
        let mut cfg = RealtimeConfig::default();
        cfg.api_key = Some("test-key".into());
        RealtimeManager::new(
            Arc::new(ScriptedFactory {
                reply: reply.map(String::from),
                fail_send,
            }),
            cfg,
        )
    }

    #[tokio::test]
    async fn live_turn_round_trip() {
        let mgr = manager(Some("live reply"), false);
        let reply = mgr
            .turn(
                "live:room",
                &LivePayload {
                    text: Some("hello".into()),
                    audio_path: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(reply, "live reply");
        assert_eq!(mgr.active_count(), 1);
    }

    #[tokio::test]
    async fn send_failure_surfaces_for_fallback() {
        let mgr = manager(None, true);
        let err = mgr
            .turn(
                "live:room",
                &LivePayload {
                    text: Some("hello".into()),
                    audio_path: None,
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("send failed"));
    }

    #[tokio::test]
    async fn eviction_closes_idle_sessions() {
        let mut cfg = RealtimeConfig::default();
        cfg.api_key = Some("k".into());
        cfg.idle_secs = 0;
        let mgr = RealtimeManager::new(
            Arc::new(ScriptedFactory {
                reply: Some("hi".into()),
                fail_send: false,
            }),
            cfg,
        );
        mgr.turn(
            "live:room",
            &LivePayload {
                text: Some("x".into()),
                audio_path: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(mgr.active_count(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let evicted = mgr.evict_idle().await;
        assert_eq!(evicted, 1);
        assert_eq!(mgr.active_count(), 0);
    }
}
