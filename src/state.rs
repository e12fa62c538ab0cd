//! Application state.
//!
//! All process singletons (KV store, session store, semantic cache, provider
//! managers, metrics, decode helper) are built here with explicit init and
//! shutdown phases and passed into the handlers as one owned resource; no
//! ambient globals.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use tracing::info;

use crate::auth::AuthKeys;
use crate::cache::{SemanticCache, warm_cache};
use crate::config::ServerConfig;
use crate::core::audio::FfmpegDecoder;
use crate::core::llm::{GroqLlm, LlmProvider, OpenAiLlm};
use crate::core::provider::ProviderKind;
use crate::core::provider::manager::ProviderManager;
use crate::core::search::{SearchProvider, TavilySearch};
use crate::core::stt::{DeepgramStt, GroqWhisperStt, SttProvider};
use crate::core::tts::{CartesiaTts, OpenAiTts, TtsProvider};
use crate::metrics::MetricsCollector;
use crate::session::memory::NoopMemory;
use crate::session::orchestrator::TurnServices;
use crate::store::{KvStore, SessionStore};
use crate::tasks::BackgroundTasks;

/// Shared application state handed to every handler.
pub struct AppState {
    pub config: ServerConfig,
    pub kv: Arc<KvStore>,
    pub sessions: Arc<SessionStore>,
    pub cache: Arc<SemanticCache>,
    pub auth: AuthKeys,
    pub metrics: Arc<MetricsCollector>,
    pub turn_services: Arc<TurnServices>,
    pub active_connections: AtomicUsize,
    pub tasks: BackgroundTasks,
}

impl AppState {
    /// Connect stores, register the configured providers and warm the cache.
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        let kv = Arc::new(KvStore::connect(&config.redis_url).await);
        let sessions = Arc::new(SessionStore::new(
            Arc::clone(&kv),
            config.session_timeout_seconds,
        ));
        let cache = Arc::new(SemanticCache::new(
            Arc::clone(&kv),
            config.cache_similarity_threshold,
            config.cache_ttl_default,
        ));
        let metrics = Arc::new(MetricsCollector::default());
        let decoder = Arc::new(FfmpegDecoder::probe(config.sample_rate));

        // Provider pools, priority 0 first.
        let mut stt: ProviderManager<dyn SttProvider> = ProviderManager::new(ProviderKind::Stt);
        if let Some(key) = &config.deepgram_api_key {
            stt.register(Arc::new(DeepgramStt::new(key.clone(), 0)));
        }
        if let Some(key) = &config.groq_api_key {
            stt.register(Arc::new(GroqWhisperStt::new(key.clone(), 1)));
        }

        let mut llm: ProviderManager<dyn LlmProvider> = ProviderManager::new(ProviderKind::Llm);
        if let Some(key) = &config.groq_api_key {
            llm.register(Arc::new(GroqLlm::new(key.clone(), 0)));
        }
        if let Some(key) = &config.openai_api_key {
            llm.register(Arc::new(OpenAiLlm::new(key.clone(), 1)));
        }

        let mut tts: ProviderManager<dyn TtsProvider> = ProviderManager::new(ProviderKind::Tts);
        if let Some(key) = &config.cartesia_api_key {
            tts.register(Arc::new(CartesiaTts::new(key.clone(), 0)));
        }
        if let Some(key) = &config.openai_api_key {
            tts.register(Arc::new(OpenAiTts::new(key.clone(), 1)));
        }

        let search: Option<Arc<dyn SearchProvider>> = config
            .tavily_api_key
            .as_ref()
            .map(|key| Arc::new(TavilySearch::new(key.clone(), 0)) as Arc<dyn SearchProvider>);

        let warmed = warm_cache(&cache).await;
        info!(warmed, "startup cache warming complete");

        let turn_services = Arc::new(TurnServices {
            stt: Arc::new(stt),
            llm: Arc::new(llm),
            tts: Arc::new(tts),
            search,
            cache: Arc::clone(&cache),
            sessions: Arc::clone(&sessions),
            metrics: Arc::clone(&metrics),
            decoder,
            memory: Arc::new(NoopMemory),
        });

        let auth = AuthKeys::new(&config.jwt_secret_key);

        Arc::new(Self {
            config,
            kv,
            sessions,
            cache,
            auth,
            metrics,
            turn_services,
            active_connections: AtomicUsize::new(0),
            tasks: BackgroundTasks::new(),
        })
    }

    /// Start the background maintenance tasks.
    pub fn start_background_tasks(&self) {
        self.tasks.start(Arc::clone(&self.sessions));
    }

    /// Stop background work; called on graceful shutdown.
    pub fn shutdown(&self) {
        self.tasks.stop();
    }
}
