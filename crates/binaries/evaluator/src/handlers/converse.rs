use crate::cli::ConverseArgs;
use crate::context::EvalContext;
use crate::handlers::folder::run_folder;
use color_eyre::eyre::Result;
use evaluation::{BatchSummary, ConversationEvaluator};
use tracing::info;

/// Multi-turn evaluation. Records are sent one at a time as turns of a conversation that
/// starts over for every input file.
pub async fn handle(context: &EvalContext, args: &ConverseArgs) -> Result<BatchSummary> {
    let policy = args.memory_policy(context.settings.conversation.policy)?;
    info!(%policy, "Conversation memory");
    let evaluator = ConversationEvaluator::new(context.record_evaluator(&args.run)?, policy);
    run_folder(&context.settings.batch, &evaluator, &args.run).await
}
