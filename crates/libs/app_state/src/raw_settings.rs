use serde::Deserialize;

/// Settings exactly as they appear in `settings.yaml` and the environment.
#[derive(Debug, Deserialize, Clone)]
pub struct RawSettings {
    pub llm: RawLlmSettings,
    pub image: RawImageSettings,
    pub batch: RawBatchSettings,
    pub conversation: RawConversationSettings,
    pub prompt: PromptSettings,
    pub logging: LoggingSettings,
    pub secrets: SecretSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawLlmSettings {
    /// OpenAI-compatible base URL, `/chat/completions` is appended.
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub json_response: bool,
    pub timeout_seconds: u64,
    /// Extra attempts after the first one for retryable failures.
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawImageSettings {
    pub max_width: u32,
    pub max_height: u32,
    /// JPEG quality 1..=100.
    pub jpeg_quality: u8,
    pub fetch_timeout_seconds: u64,
    pub recompress: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawBatchSettings {
    pub chunk_size: usize,
    pub inter_chunk_delay_ms: u64,
    /// Name of the field the evaluation result is written to.
    pub output_field: String,
    /// Which input file extensions are picked up from the input folder.
    pub input_extensions: Vec<String>,
    pub output_suffix: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Unbounded,
    SlidingWindow,
    FreezeAfter,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawConversationSettings {
    pub policy: PolicyKind,
    pub turns: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptSettings {
    pub template: String,
    pub system: String,
}

/// Logging configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

#[derive(Deserialize, Clone, Default)]
pub struct SecretSettings {
    pub api_key: Option<String>,
}

impl std::fmt::Debug for SecretSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
