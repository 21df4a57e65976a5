use crate::{LoggingSettings, PolicyKind, PromptSettings, RawSettings, SecretSettings};
use color_eyre::eyre::{Report, bail, ensure};
use language_model::MemoryPolicy;
use std::path::Path;
use std::time::Duration;

/// Environment variables consulted for the API key when the settings do not carry one.
pub const API_KEY_ENV_FALLBACKS: [&str; 2] = ["API_KEY", "GEMINI_API_KEY"];

#[derive(Debug, Clone)]
pub struct AppSettings {
    pub llm: LlmSettings,
    pub image: ImageSettings,
    pub batch: BatchSettings,
    pub conversation: ConversationSettings,
    pub prompt: PromptSettings,
    pub logging: LoggingSettings,
    pub secrets: SecretSettings,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub json_response: bool,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSettings {
    pub max_width: u32,
    pub max_height: u32,
    pub jpeg_quality: u8,
    pub fetch_timeout: Duration,
    /// Decode, shrink and re-encode as JPEG. When false the original bytes are sent.
    pub recompress: bool,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            max_width: 2400,
            max_height: 1600,
            jpeg_quality: 85,
            fetch_timeout: Duration::from_secs(10),
            recompress: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub chunk_size: usize,
    pub inter_chunk_delay: Duration,
    pub output_field: String,
    /// Lowercase, without the leading dot.
    pub input_extensions: Vec<String>,
    pub output_suffix: String,
}

impl BatchSettings {
    #[must_use]
    pub fn is_input_file(&self, file: &Path) -> bool {
        let Some(extension) = file.extension().map(|e| e.to_string_lossy().to_lowercase()) else {
            return false;
        };
        self.input_extensions.contains(&extension)
    }

    /// `<stem><output_suffix>.jsonl`
    #[must_use]
    pub fn output_file_name(&self, input: &Path) -> String {
        let stem = input
            .file_stem()
            .map_or_else(|| "output".into(), |s| s.to_string_lossy());
        format!("{stem}{}.jsonl", self.output_suffix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationSettings {
    pub policy: MemoryPolicy,
}

impl TryFrom<RawSettings> for AppSettings {
    type Error = Report;

    fn try_from(raw: RawSettings) -> Result<Self, Self::Error> {
        ensure!(!raw.llm.base_url.trim().is_empty(), "llm.base_url is empty");
        ensure!(raw.batch.chunk_size > 0, "batch.chunk_size must be at least 1");
        ensure!(
            (1..=100).contains(&raw.image.jpeg_quality),
            "image.jpeg_quality must be within 1..=100, got {}",
            raw.image.jpeg_quality
        );
        ensure!(
            raw.image.max_width > 0 && raw.image.max_height > 0,
            "image.max_width and image.max_height must be positive"
        );
        ensure!(
            !raw.batch.output_field.trim().is_empty(),
            "batch.output_field is empty"
        );
        let policy = match raw.conversation.policy {
            PolicyKind::Unbounded => MemoryPolicy::Unbounded,
            PolicyKind::SlidingWindow if raw.conversation.turns == 0 => {
                bail!("conversation.turns must be at least 1 for sliding_window")
            }
            PolicyKind::SlidingWindow => MemoryPolicy::SlidingWindow {
                turns: raw.conversation.turns,
            },
            PolicyKind::FreezeAfter => MemoryPolicy::FreezeAfter {
                turns: raw.conversation.turns,
            },
        };

        Ok(Self {
            llm: LlmSettings {
                base_url: raw.llm.base_url.trim().trim_end_matches('/').to_string(),
                model: raw.llm.model,
                temperature: raw.llm.temperature,
                top_p: raw.llm.top_p,
                max_tokens: raw.llm.max_tokens,
                json_response: raw.llm.json_response,
                timeout: Duration::from_secs(raw.llm.timeout_seconds),
                max_retries: raw.llm.max_retries,
                retry_base_delay: Duration::from_millis(raw.llm.retry_base_delay_ms),
            },
            image: ImageSettings {
                max_width: raw.image.max_width,
                max_height: raw.image.max_height,
                jpeg_quality: raw.image.jpeg_quality,
                fetch_timeout: Duration::from_secs(raw.image.fetch_timeout_seconds),
                recompress: raw.image.recompress,
            },
            batch: BatchSettings {
                chunk_size: raw.batch.chunk_size,
                inter_chunk_delay: Duration::from_millis(raw.batch.inter_chunk_delay_ms),
                output_field: raw.batch.output_field,
                input_extensions: raw
                    .batch
                    .input_extensions
                    .iter()
                    .map(|e| e.trim_start_matches('.').to_lowercase())
                    .collect(),
                output_suffix: raw.batch.output_suffix,
            },
            conversation: ConversationSettings { policy },
            prompt: raw.prompt,
            logging: raw.logging,
            secrets: raw.secrets,
        })
    }
}

impl AppSettings {
    /// The configured API key, falling back to [`API_KEY_ENV_FALLBACKS`]. Blank values count as unset.
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        self.secrets
            .api_key
            .clone()
            .into_iter()
            .chain(
                API_KEY_ENV_FALLBACKS
                    .iter()
                    .filter_map(|name| std::env::var(name).ok()),
            )
            .map(|key| key.trim().to_string())
            .find(|key| !key.is_empty())
    }
}
