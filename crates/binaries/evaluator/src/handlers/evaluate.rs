use crate::cli::RunArgs;
use crate::context::EvalContext;
use crate::handlers::folder::run_folder;
use color_eyre::eyre::Result;
use evaluation::BatchSummary;

/// Single-shot evaluation of every input file: each chunk's records are in flight together.
pub async fn handle(context: &EvalContext, args: &RunArgs) -> Result<BatchSummary> {
    let evaluator = context.record_evaluator(args)?;
    run_folder(&context.settings.batch, &evaluator, args).await
}
