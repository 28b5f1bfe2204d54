use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Backend Service Args ---
    /// Base URL of the main content service (categories, tags, posts).
    #[arg(long, env = "API_BASE_URL", default_value = "http://127.0.0.1:8080")]
    pub api_base_url: String,

    /// Request timeout for the main service, in seconds.
    #[arg(long, env = "API_TIMEOUT_SECS", default_value = "30")]
    pub api_timeout_secs: u64,

    /// Base URL of the AI chat service (e.g., http://127.0.0.1:8081/ai)
    #[arg(long, env = "AI_BASE_URL", default_value = "http://127.0.0.1:8081/ai")]
    pub ai_base_url: String,

    /// Request timeout for non-streaming AI calls, in seconds. Streaming calls only bound the connect phase.
    #[arg(long, env = "AI_TIMEOUT_SECS", default_value = "60")]
    pub ai_timeout_secs: u64,

    // --- Local Storage Args ---
    /// Local storage backend (file, memory)
    #[arg(long, env = "STORAGE_TYPE", default_value = "file")]
    pub storage_type: String,

    /// Path of the JSON file used when storage type is 'file'.
    #[arg(long, env = "STORAGE_PATH", default_value = ".liutech/storage.json")]
    pub storage_path: String,

    // --- Auth Args ---
    /// Bearer token to store before starting. Without it the token saved by a previous run is used.
    #[arg(long, env = "AUTH_TOKEN")]
    pub token: Option<String>,

    // --- Chat Args ---
    /// Chat mode used when no mode was saved (stream, normal)
    #[arg(long, env = "CHAT_MODE", default_value = "stream")]
    pub mode: String,

    /// Model name passed to the AI service. The service picks its default if not set.
    #[arg(long, env = "CHAT_MODEL")]
    pub model: Option<String>,

    // --- General App Args ---
    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}
