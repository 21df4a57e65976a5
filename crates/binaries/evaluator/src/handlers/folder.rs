use crate::cli::RunArgs;
use app_state::BatchSettings;
use color_eyre::eyre::{Result, WrapErr, ensure};
use evaluation::{BatchRunner, BatchSummary, Evaluate, JsonlSink, RecordSource};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Input files under `input` in file-name order, or `input` itself when it is a file.
///
/// # Errors
///
/// * The input does not exist or a folder below it cannot be read.
pub fn input_files(input: &Path, batch: &BatchSettings) -> Result<Vec<PathBuf>> {
    let metadata = std::fs::metadata(input)
        .wrap_err_with(|| format!("Cannot read input {}", input.display()))?;
    if metadata.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(input).sort_by_file_name() {
        let entry = entry.wrap_err_with(|| format!("Cannot read input folder {}", input.display()))?;
        if entry.file_type().is_file() && batch.is_input_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Where the evaluated version of `file` goes. Subfolders of the input are mirrored.
#[must_use]
pub fn output_path(input: &Path, output: &Path, file: &Path, batch: &BatchSettings) -> PathBuf {
    let relative_dir = file
        .parent()
        .and_then(|parent| parent.strip_prefix(input).ok())
        .unwrap_or_else(|| Path::new(""));
    output
        .join(relative_dir)
        .join(batch.output_file_name(file))
}

/// Runs every input file through `evaluator`, one file after another.
///
/// A file that can not be read or written is logged and skipped; the run still fails at
/// the end so that the exit status reports it.
pub async fn run_folder<E>(batch: &BatchSettings, evaluator: &E, args: &RunArgs) -> Result<BatchSummary>
where
    E: Evaluate + ?Sized,
{
    let files = input_files(&args.input, batch)?;
    if files.is_empty() {
        warn!(input = %args.input.display(), extensions = ?batch.input_extensions, "No input files found");
    }
    let runner = BatchRunner::from_settings(batch);

    let mut total = BatchSummary::default();
    let mut failed_files = 0;
    for file in &files {
        let output = output_path(&args.input, &args.output, file, batch);
        info!(input = %file.display(), output = %output.display(), "Evaluating file");
        match evaluate_file(&runner, evaluator, file, &output).await {
            Ok(summary) => {
                info!(input = %file.display(), "File done: {summary}");
                total.merge(&summary);
            }
            Err(e) => {
                error!(input = %file.display(), "File aborted: {e:#}");
                failed_files += 1;
            }
        }
    }

    info!(files = files.len(), "Run finished: {total}");
    ensure!(
        failed_files == 0,
        "{failed_files} of {} input files could not be processed",
        files.len()
    );
    Ok(total)
}

async fn evaluate_file<E>(
    runner: &BatchRunner,
    evaluator: &E,
    input: &Path,
    output: &Path,
) -> Result<BatchSummary>
where
    E: Evaluate + ?Sized,
{
    let mut source = RecordSource::open(input).await?;
    let mut sink = JsonlSink::create(output)
        .await
        .wrap_err_with(|| format!("Cannot create {}", output.display()))?;
    let summary = runner.run(evaluator, &mut source, &mut sink).await?;
    debug!(output = %output.display(), lines = sink.written(), "Output written");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use app_state::default_settings;
    use std::fs;

    #[test]
    fn finds_input_files_recursively_in_order() -> Result<()> {
        let batch = default_settings()?.batch;
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("nested"))?;
        for name in ["b.jsonl", "a.JSON", "notes.txt", "nested/c.jsonl"] {
            fs::write(dir.path().join(name), "")?;
        }

        let files = input_files(dir.path(), &batch)?;
        let names: Vec<_> = files
            .iter()
            .map(|f| f.strip_prefix(dir.path()).map(|p| p.display().to_string()))
            .collect::<Result<_, _>>()?;
        assert_eq!(names, ["a.JSON", "b.jsonl", "nested/c.jsonl"]);

        assert_eq!(
            output_path(dir.path(), Path::new("out"), &files[2], &batch),
            Path::new("out/nested/c_evaluated.jsonl")
        );
        Ok(())
    }

    #[test]
    fn missing_input_is_fatal() -> Result<()> {
        let batch = default_settings()?.batch;
        assert!(input_files(Path::new("/definitely/not/here"), &batch).is_err());
        Ok(())
    }
}
