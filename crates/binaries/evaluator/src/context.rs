use crate::cli::RunArgs;
use app_state::AppSettings;
use color_eyre::eyre::{Result, WrapErr, bail, eyre};
use evaluation::{PromptTemplate, RecordEvaluator, RetryPolicy, builtin_system_prompt};
use image_codec::ImageCodec;
use language_model::LlmClient;
use std::time::Duration;
use tracing::{error, info};

/// Everything an evaluation run shares: settings with CLI overrides applied, one HTTP
/// client for the model and one image codec.
pub struct EvalContext {
    pub settings: AppSettings,
    pub client: LlmClient,
    pub codec: ImageCodec,
}

impl EvalContext {
    /// Applies the run flags to `settings` and builds the shared clients.
    ///
    /// # Errors
    ///
    /// Fails when no API key is configured or a flag holds an invalid value.
    pub fn new(mut settings: AppSettings, args: &RunArgs) -> Result<Self> {
        apply_overrides(&mut settings, args)?;
        let Some(api_key) = settings.api_key() else {
            error!("No API key configured, nothing was evaluated");
            bail!(
                "no API key configured: pass --api-key or set APP__SECRETS__API_KEY, API_KEY or GEMINI_API_KEY"
            );
        };

        let llm = &settings.llm;
        let client = LlmClient::with_base_url(&llm.base_url)
            .api_key(api_key)
            .model(llm.model.clone())
            .temperature(llm.temperature)
            .maybe_top_p(llm.top_p)
            .maybe_max_tokens(llm.max_tokens)
            .json_response(llm.json_response)
            .timeout(llm.timeout)
            .build();
        let codec = ImageCodec::new(settings.image);
        let image = codec.settings();
        info!(
            base_url = %llm.base_url,
            model = client.model(),
            chunk_size = settings.batch.chunk_size,
            max_image = %format!("{}x{}", image.max_width, image.max_height),
            recompress = image.recompress,
            "Model client ready"
        );

        Ok(Self {
            settings,
            client,
            codec,
        })
    }

    /// A single-shot evaluator using the template and system prompt picked by `args` or the settings.
    ///
    /// # Errors
    ///
    /// Fails on an unknown template or system prompt name, or an unreadable template file.
    pub fn record_evaluator(&self, args: &RunArgs) -> Result<RecordEvaluator<LlmClient>> {
        let template = match &args.template_file {
            Some(path) => PromptTemplate::from_file(path)?,
            None => {
                let name = args
                    .template
                    .as_deref()
                    .unwrap_or(&self.settings.prompt.template);
                PromptTemplate::builtin(name)?
            }
        };
        let system_name = args
            .system
            .as_deref()
            .unwrap_or(&self.settings.prompt.system);
        let system = builtin_system_prompt(system_name)?;
        info!(template = template.name(), system = system_name, "Prompt selected");

        Ok(RecordEvaluator::builder()
            .client(self.client.clone())
            .codec(self.codec.clone())
            .template(template)
            .maybe_system(system)
            .retry(RetryPolicy::from(&self.settings.llm))
            .build())
    }
}

fn apply_overrides(settings: &mut AppSettings, args: &RunArgs) -> Result<()> {
    if let Some(key) = &args.api_key {
        settings.secrets.api_key = Some(key.clone());
    }
    if let Some(base_url) = &args.base_url {
        settings.llm.base_url = base_url.trim().trim_end_matches('/').to_string();
    }
    if let Some(model) = &args.model {
        settings.llm.model.clone_from(model);
    }
    if let Some(chunk_size) = args.chunk_size {
        if chunk_size == 0 {
            return Err(eyre!("--chunk-size must be at least 1"));
        }
        settings.batch.chunk_size = chunk_size;
    }
    if let Some(delay) = args.delay {
        settings.batch.inter_chunk_delay = Duration::try_from_secs_f64(delay)
            .wrap_err_with(|| format!("invalid --delay {delay}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use app_state::default_settings;
    use clap::Parser;

    fn defaults() -> AppSettings {
        default_settings().expect("valid defaults")
    }

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["cabin-eval", "evaluate", "-i", "in", "-o", "out"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).expect("arguments").command {
            Command::Evaluate(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn flags_override_settings() -> Result<()> {
        let mut settings = defaults();
        let args = run_args(&["-u", "http://example.test/v1/", "-m", "m", "-b", "3", "-d", "0.5"]);
        apply_overrides(&mut settings, &args)?;
        assert_eq!(settings.llm.base_url, "http://example.test/v1");
        assert_eq!(settings.llm.model, "m");
        assert_eq!(settings.batch.chunk_size, 3);
        assert_eq!(settings.batch.inter_chunk_delay, Duration::from_millis(500));
        Ok(())
    }

    #[test]
    fn rejects_bad_flag_values() {
        let mut settings = defaults();
        assert!(apply_overrides(&mut settings, &run_args(&["-b", "0"])).is_err());
        assert!(apply_overrides(&mut settings, &run_args(&["-d=-1"])).is_err());
    }

    #[test]
    fn key_flag_is_used() -> Result<()> {
        let context = EvalContext::new(defaults(), &run_args(&["-k", "test-key", "-m", "vision-x"]))?;
        assert_eq!(context.settings.api_key().as_deref(), Some("test-key"));
        assert_eq!(context.client.model(), "vision-x");
        assert_eq!(context.codec.settings(), &context.settings.image);
        assert!(context.record_evaluator(&run_args(&["--template", "translation"])).is_ok());
        assert!(context.record_evaluator(&run_args(&["--template", "nope"])).is_err());
        Ok(())
    }
}
