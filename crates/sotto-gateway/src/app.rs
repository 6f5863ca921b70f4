use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use sotto_auth::ApnsSigner;
use sotto_broker::{Broker, LoopbackBroker, TokenMinter, WsBroker};
use sotto_core::config::SottoConfig;
use sotto_push::PushClient;
use sotto_registry::{AuthzCache, ClientRegistry, ConversationRegistry, ProfileRegistry};
use sotto_store::Store;
use sotto_transcribe::TranscriptionEngine;

use crate::error::ApiResult;
use crate::session::SessionSigner;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
/// Everything externally observable lives in the store; these are typed
/// views plus the process-local transcription engine.
pub struct AppState {
    pub config: SottoConfig,
    pub store: Arc<Store>,
    pub clients: ClientRegistry,
    pub profiles: ProfileRegistry,
    pub conversations: ConversationRegistry,
    pub authz: AuthzCache,
    pub minter: TokenMinter,
    pub push: PushClient,
    pub engine: Arc<TranscriptionEngine>,
    pub sessions: SessionSigner,
}

impl AppState {
    pub fn new(config: SottoConfig) -> ApiResult<Self> {
        let store = Arc::new(Store::open(&config.store.url, &config.store.key_prefix)?);

        let signer = Arc::new(
            ApnsSigner::new(
                &config.apns.cred_secret_pkcs8,
                &config.apns.cred_id,
                &config.apns.team_id,
            )
            .map_err(|e| crate::error::ApiError::Internal(e.to_string()))?,
        );
        let push = PushClient::new(&config.apns, signer, Arc::clone(&store));

        let minter = TokenMinter::from_key(&config.broker.publish_key, config.broker.token_ttl_ms)
            .map_err(|e| crate::error::ApiError::Internal(e.to_string()))?;

        // No endpoint means a single-node development run: workers talk to
        // an in-process loopback broker instead of the real service.
        let broker: Arc<dyn Broker> = match &config.broker.endpoint {
            Some(endpoint) => Arc::new(WsBroker::new(endpoint, &config.broker.publish_key)),
            None => Arc::new(LoopbackBroker::new()),
        };
        let engine = TranscriptionEngine::new(
            Arc::clone(&store),
            broker,
            config.transcription.clone(),
        );

        Ok(Self {
            clients: ClientRegistry::new(Arc::clone(&store)),
            profiles: ProfileRegistry::new(Arc::clone(&store)),
            conversations: ConversationRegistry::new(Arc::clone(&store)),
            authz: AuthzCache::new(Arc::clone(&store)),
            sessions: SessionSigner::new(Arc::clone(&store))?,
            minter,
            push,
            engine,
            store,
            config,
        })
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::diag::health_handler))
        .route("/api/v2/apnsToken", post(crate::http::apns::apns_token))
        .route(
            "/api/v2/apnsReceivedNotification",
            post(crate::http::apns::apns_received_notification),
        )
        .route(
            "/api/v2/pubSubTokenRequest",
            post(crate::http::token::pub_sub_token_request),
        )
        .route(
            "/api/v2/listenTokenRequest",
            get(crate::http::token::listen_token_request),
        )
        .route(
            "/api/v2/userProfile",
            post(crate::http::profile::user_profile_post),
        )
        .route(
            "/api/v2/userProfile/{profile_id}",
            get(crate::http::profile::user_profile_get).put(crate::http::profile::user_profile_put),
        )
        .route(
            "/api/v2/whisperProfile/{profile_id}",
            get(crate::http::profile::section_get)
                .post(crate::http::profile::section_put)
                .put(crate::http::profile::section_put),
        )
        .route(
            "/api/v2/listenProfile/{profile_id}",
            get(crate::http::profile::section_get)
                .post(crate::http::profile::section_put)
                .put(crate::http::profile::section_put),
        )
        .route(
            "/api/v2/favoritesProfile/{profile_id}",
            get(crate::http::profile::section_get)
                .post(crate::http::profile::section_put)
                .put(crate::http::profile::section_put),
        )
        .route(
            "/api/v2/settingsProfile/{profile_id}",
            get(crate::http::profile::settings_get)
                .post(crate::http::profile::settings_put)
                .put(crate::http::profile::settings_put),
        )
        .route(
            "/api/v2/conversation",
            post(crate::http::conversation::conversation_post),
        )
        .route(
            "/api/v2/username",
            post(crate::http::conversation::username_post),
        )
        .route(
            "/api/v2/listTranscripts/{client_id}/{conversation_id}",
            get(crate::http::transcripts::list_transcripts),
        )
        .route(
            "/listen/{conversation_id}",
            get(crate::http::transcripts::listen_page),
        )
        .route(
            "/listen/{conversation_id}/{*rest}",
            get(crate::http::transcripts::listen_page),
        )
        .route(
            "/transcript/{conversation_id}/{transcript_id}",
            get(crate::http::transcripts::transcript_page),
        )
        .route(
            "/logPresenceChunk",
            post(crate::http::diag::log_presence_chunk),
        )
        .route("/logAnomaly", post(crate::http::diag::log_anomaly))
        .route("/logChannelEvent", post(crate::http::diag::log_channel_event))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
