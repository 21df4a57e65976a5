#![allow(clippy::missing_errors_doc)]

use color_eyre::eyre::{Result, WrapErr};
use language_model::{
    ChatCompletion, ContentPart, ConversationState, LlmClient, MemoryPolicy, parse_json_response,
};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

pub async fn run() -> Result<()> {
    let base_url = std::env::var("LLM_BASE_URL").wrap_err("LLM_BASE_URL is not set")?;
    let api_key = std::env::var("API_KEY").wrap_err("API_KEY is not set")?;
    let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".into());
    let client = LlmClient::with_base_url(&base_url)
        .api_key(api_key)
        .model(model)
        .json_response(true)
        .build();

    let now = Instant::now();
    // One-off prompt (no history)
    let raw = client
        .chat("Reply with a JSON object {\"seats\": <number of seats in a sedan>}.")
        .system("You answer with strict JSON only.")
        .call()
        .await?;
    info!("Parsed: {}", parse_json_response(&raw)?);

    // Conversation that stops remembering after the first exchange
    let mut state = ConversationState::new(
        Some("You answer with strict JSON only.".into()),
        MemoryPolicy::FreezeAfter { turns: 1 },
    );
    for question in [
        "Remember the word 'armrest'. Reply {\"ok\": true}.",
        "Which word did I ask you to remember? Reply {\"word\": ...}.",
        "Repeat the word again as {\"word\": ...}.",
    ] {
        let reply = state.turn(&client, vec![ContentPart::text(question)]).await?;
        info!(frozen = state.is_frozen(), "Reply: {reply}");
    }

    let single = client
        .complete(None, vec![ContentPart::text("Reply {\"pong\": true}.")])
        .await?;
    info!("Single: {single}");
    info!("Total time for [API]: {:?}", now.elapsed());

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    color_eyre::install()?;

    run().await?;

    Ok(())
}
