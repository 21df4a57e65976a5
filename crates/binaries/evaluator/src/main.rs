use clap::Parser;
use color_eyre::Result;
use evaluator::cli::{Cli, Command};
use evaluator::context::EvalContext;
use evaluator::handlers::{compare, converse, evaluate, map, merge};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let settings = app_state::load_app_settings(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&settings.logging.level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &cli.command {
        Command::Evaluate(args) => {
            let context = EvalContext::new(settings, args)?;
            let summary = evaluate::handle(&context, args).await?;
            info!("Evaluation complete: {summary}");
        }
        Command::Converse(args) => {
            let context = EvalContext::new(settings, &args.run)?;
            let summary = converse::handle(&context, args).await?;
            info!("Conversation run complete: {summary}");
        }
        Command::Map(args) => {
            map::handle(args).await?;
        }
        Command::Merge(args) => {
            merge::handle(&settings, args).await?;
        }
        Command::Compare(args) => {
            compare::handle(args).await?;
        }
    }
    Ok(())
}
