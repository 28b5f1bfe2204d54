pub mod api;
pub mod auth;
pub mod cache;
pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod markdown;
pub mod models;
pub mod repl;
pub mod services;
pub mod storage;
pub mod stream;

use api::ApiClient;
use auth::{AuthGuard, Credentials, Navigator, RouteState, LOGIN_ROUTE};
use chat::{AiChatBackend, ChatSession, SessionOptions};
use cli::Args;
use config::ServicesConfig;
use log::{info, warn};
use models::chat::ChatMode;
use repl::{Repl, CHAT_ROUTE};
use services::{AiService, CatalogService, ConversationService};
use std::error::Error;
use std::sync::Arc;
use stream::StreamingChatClient;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Main Service URL: {}", args.api_base_url);
    info!("Main Service Timeout: {}s", args.api_timeout_secs);
    info!("AI Service URL: {}", args.ai_base_url);
    info!("AI Service Timeout: {}s", args.ai_timeout_secs);
    info!("Storage Type: {}", args.storage_type);
    info!("Default Chat Mode: {}", args.mode);
    info!("Chat Model: {}", args.model.as_deref().unwrap_or("(service default)"));
    info!("-------------------------");

    let services = ServicesConfig::from_args(&args)?;
    let store = storage::create_store(&args)?;

    let credentials = Credentials::new(store.clone());
    if let Some(token) = args.token.as_deref() {
        credentials.set(token, None, None);
    }
    let start_route = if credentials.is_logged_in() { CHAT_ROUTE } else { LOGIN_ROUTE };
    let navigator: Arc<dyn Navigator> = Arc::new(RouteState::new(start_route));
    let guard = AuthGuard::new(credentials, navigator.clone());

    let api = Arc::new(ApiClient::new(services.clone(), guard.clone())?);
    let ai = AiService::new(api.clone());
    let streaming = StreamingChatClient::new(&services.ai, guard.clone())?;
    let backend = Arc::new(AiChatBackend::new(streaming, ai.clone()));

    let default_mode = args.mode.parse::<ChatMode>().unwrap_or_else(|e| {
        warn!("{}, falling back to {}", e, ChatMode::default());
        ChatMode::default()
    });
    let options = SessionOptions {
        default_mode,
        model: args.model.clone(),
    };
    let session = Arc::new(ChatSession::new(backend, store.clone(), options));

    let repl = Repl::new(
        session,
        ai,
        ConversationService::new(api.clone()),
        CatalogService::new(api, store),
        guard,
        navigator
    );
    repl.run().await?;

    Ok(())
}
