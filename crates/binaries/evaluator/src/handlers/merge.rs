use crate::cli::MergeArgs;
use annotation::{MergedGroup, group_and_vote};
use app_state::AppSettings;
use color_eyre::eyre::{Result, WrapErr};
use evaluation::RecordSource;
use tracing::info;

/// Groups repeated evaluations and writes one majority-voted answer per group.
pub async fn handle(settings: &AppSettings, args: &MergeArgs) -> Result<Vec<MergedGroup>> {
    let field = args
        .field
        .as_deref()
        .unwrap_or(&settings.batch.output_field);
    let records = RecordSource::open(&args.input).await?.read_all().await?;
    let record_count = records.len();

    let groups = group_and_vote(
        records.into_iter().map(|record| record.fields),
        &args.group_by,
        field,
    );
    let disagreements: usize = groups
        .iter()
        .map(|g| g.outcome.disagreements.len())
        .sum();
    info!(
        records = record_count,
        groups = groups.len(),
        disagreements,
        "Merged repeated evaluations"
    );

    super::json_file::write_json(&args.output, &groups)
        .await
        .wrap_err_with(|| format!("Cannot write {}", args.output.display()))?;
    Ok(groups)
}
