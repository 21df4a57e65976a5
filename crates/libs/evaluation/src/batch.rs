use app_state::BatchSettings;
use crate::{ChunkMode, Evaluate, InputError, JsonlSink, RecordSource};
use common_types::{AnswerSchema, EvaluationResult, FailureKind, Record};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWrite;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("cannot write output: {0}")]
    Output(#[from] std::io::Error),
}

/// Counts of what happened to the records of one or more runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub records: usize,
    pub successes: usize,
    pub failures: BTreeMap<FailureKind, usize>,
    /// Successful answers holding at least one value outside the answer catalog.
    pub off_schema: usize,
}

impl BatchSummary {
    pub fn record(&mut self, result: &EvaluationResult) {
        self.records += 1;
        match result.failure() {
            Some(failure) => *self.failures.entry(failure.kind).or_default() += 1,
            None => self.successes += 1,
        }
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures.values().sum()
    }

    pub fn merge(&mut self, other: &Self) {
        self.records += other.records;
        self.successes += other.successes;
        self.off_schema += other.off_schema;
        for (kind, count) in &other.failures {
            *self.failures.entry(*kind).or_default() += count;
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records, {} succeeded, {} failed",
            self.records,
            self.successes,
            self.failed()
        )?;
        if !self.failures.is_empty() {
            let kinds: Vec<String> = self
                .failures
                .iter()
                .map(|(kind, count)| format!("{kind}: {count}"))
                .collect();
            write!(f, " ({})", kinds.join(", "))?;
        }
        if self.off_schema > 0 {
            write!(f, ", {} with answers outside the allowed values", self.off_schema)?;
        }
        Ok(())
    }
}

/// Evaluates records chunk by chunk and writes them back in input order.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    chunk_size: usize,
    inter_chunk_delay: Duration,
    output_field: String,
}

impl BatchRunner {
    /// `chunk_size` is clamped to at least one.
    pub fn new(chunk_size: usize, inter_chunk_delay: Duration, output_field: impl Into<String>) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            inter_chunk_delay,
            output_field: output_field.into(),
        }
    }

    #[must_use]
    pub fn from_settings(settings: &BatchSettings) -> Self {
        Self::new(
            settings.chunk_size,
            settings.inter_chunk_delay,
            settings.output_field.clone(),
        )
    }

    /// Runs every record of `source` through `evaluator` and writes it to `sink`.
    ///
    /// Chunks are strictly sequential: chunk k+1 starts only after chunk k has been written
    /// and flushed and the inter-chunk delay has elapsed. There is no delay after the last
    /// chunk. Per-record failures are written inline; only input and output errors abort.
    pub async fn run<E, W>(
        &self,
        evaluator: &E,
        source: &mut RecordSource,
        sink: &mut JsonlSink<W>,
    ) -> Result<BatchSummary, BatchError>
    where
        E: Evaluate + ?Sized,
        W: AsyncWrite + Unpin,
    {
        evaluator.begin_input().await;
        let schema = evaluator.answer_schema();
        let mut summary = BatchSummary::default();
        let mut chunk_no = 0;
        loop {
            let chunk = source.next_chunk(self.chunk_size).await?;
            if chunk.is_empty() {
                break;
            }
            if chunk_no > 0 && !self.inter_chunk_delay.is_zero() {
                tokio::time::sleep(self.inter_chunk_delay).await;
            }
            chunk_no += 1;

            let results = match evaluator.chunk_mode() {
                ChunkMode::Concurrent => join_all(chunk.iter().map(|r| evaluator.evaluate(r))).await,
                ChunkMode::Sequential => {
                    let mut results = Vec::with_capacity(chunk.len());
                    for record in &chunk {
                        results.push(evaluator.evaluate(record).await);
                    }
                    results
                }
            };

            let mut chunk_summary = BatchSummary::default();
            for (record, result) in chunk.into_iter().zip(results) {
                chunk_summary.record(&result);
                if let (Some(schema), EvaluationResult::Success(answer)) = (&schema, &result)
                    && !check_answer(schema, &record, answer)
                {
                    chunk_summary.off_schema += 1;
                }
                sink.write_record(&record.into_output(&self.output_field, &result))
                    .await?;
            }
            sink.flush().await?;
            info!(chunk = chunk_no, "Chunk written: {chunk_summary}");
            summary.merge(&chunk_summary);
        }
        Ok(summary)
    }
}

/// Logs every value of `answer` outside `schema`; true when there is none.
fn check_answer(schema: &AnswerSchema, record: &Record, answer: &serde_json::Value) -> bool {
    let violations = schema.violations(answer);
    for violation in &violations {
        warn!(
            index = record.index,
            path = %violation.path,
            value = %violation.value,
            "Answer outside the allowed values"
        );
    }
    violations.is_empty()
}
