use crate::cli::CompareArgs;
use crate::handlers::json_file::{read_json, write_json};
use crate::handlers::map::{entries, table};
use annotation::{Comparator, ComparisonReport, Vocabulary, sort_entities};
use color_eyre::eyre::Result;
use serde_json::Value;
use tracing::{info, warn};

/// Scores parsed answers against reference annotations, record by record.
///
/// Answers are sorted into seat order first so that persons pair up with the reference.
pub async fn handle(args: &CompareArgs) -> Result<ComparisonReport> {
    let (references, _) = entries(read_json(&args.reference).await?, &args.reference)?;
    let (mut parsed, _) = entries(read_json::<Value>(&args.input).await?, &args.input)?;
    if references.len() != parsed.len() {
        warn!(
            references = references.len(),
            answers = parsed.len(),
            "Record counts differ, comparing the common prefix"
        );
    }
    parsed.iter_mut().for_each(sort_entities);

    let comparator = Comparator::new(
        &table(args.positions.as_deref(), Vocabulary::positions).await?,
        table(args.genders.as_deref(), Vocabulary::genders).await?,
    );
    let report = comparator.compare(&references, &parsed);
    info!("Comparison finished: {report}");

    if let Some(output) = &args.output {
        write_json(output, &report).await?;
        info!(output = %output.display(), "Comparison report written");
    }
    Ok(report)
}
