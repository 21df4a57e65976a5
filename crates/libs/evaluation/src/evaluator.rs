use crate::{PromptTemplate, RetryPolicy};
use async_trait::async_trait;
use bon::Builder;
use common_types::{AnswerSchema, EvaluationFailure, EvaluationResult, Record};
use image_codec::ImageCodec;
use language_model::{
    ChatCompletion, ContentPart, ConversationMessage, ConversationState, parse_json_response,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// How the records of one chunk are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    /// Every record of the chunk is in flight at once.
    Concurrent,
    /// One record after another, for evaluators that carry state between records.
    Sequential,
}

/// Turns one record into an [`EvaluationResult`]. Failures are returned as data, never raised.
#[async_trait]
pub trait Evaluate: Send + Sync {
    async fn evaluate(&self, record: &Record) -> EvaluationResult;

    fn chunk_mode(&self) -> ChunkMode {
        ChunkMode::Concurrent
    }

    /// Called once before the first record of every input.
    async fn begin_input(&self) {}

    /// The answer catalog successful results are checked against, if any.
    fn answer_schema(&self) -> Option<AnswerSchema> {
        None
    }
}

/// Single-shot evaluation: prompt (+ image) in, parsed JSON out.
#[derive(Builder)]
pub struct RecordEvaluator<C> {
    client: C,
    codec: ImageCodec,
    template: PromptTemplate,
    system: Option<String>,
    #[builder(default)]
    retry: RetryPolicy,
}

impl<C: ChatCompletion> RecordEvaluator<C> {
    /// Rendered prompt followed by the encoded image, if the record has one.
    pub async fn user_parts(&self, record: &Record) -> Result<Vec<ContentPart>, EvaluationFailure> {
        let mut parts = vec![ContentPart::Text(self.template.render_record(record))];
        if let Some(reference) = record.image_path() {
            let image = self.codec.encode(reference).await?;
            debug!(
                index = record.index,
                base64_len = image.base64.len(),
                "Image encoded"
            );
            parts.push(ContentPart::Image(image));
        }
        Ok(parts)
    }

    async fn try_evaluate(&self, record: &Record) -> Result<serde_json::Value, EvaluationFailure> {
        let parts = self.user_parts(record).await?;
        let system = self.system.as_deref();
        let raw = self
            .retry
            .run(|| {
                let parts = parts.clone();
                async move {
                    self.client
                        .complete(system, parts)
                        .await
                        .map_err(EvaluationFailure::from)
                }
            })
            .await?;
        Ok(parse_json_response(&raw)?)
    }
}

#[async_trait]
impl<C: ChatCompletion> Evaluate for RecordEvaluator<C> {
    async fn evaluate(&self, record: &Record) -> EvaluationResult {
        match self.try_evaluate(record).await {
            Ok(parsed) => EvaluationResult::Success(parsed),
            Err(failure) => {
                log_failure(record, &failure);
                EvaluationResult::Failure(failure)
            }
        }
    }

    fn answer_schema(&self) -> Option<AnswerSchema> {
        self.template.answer_schema()
    }
}

/// Multi-turn evaluation where each record is the next human turn of one conversation.
pub struct ConversationEvaluator<C> {
    inner: RecordEvaluator<C>,
    state: Mutex<ConversationState>,
}

impl<C: ChatCompletion> ConversationEvaluator<C> {
    /// The system prompt of `inner` becomes the conversation's system message.
    #[must_use]
    pub fn new(inner: RecordEvaluator<C>, policy: language_model::MemoryPolicy) -> Self {
        let state = ConversationState::new(inner.system.clone(), policy);
        Self {
            inner,
            state: Mutex::new(state),
        }
    }

    /// Starts a fresh context, e.g. before the next input file.
    pub async fn reset(&self) {
        self.state.lock().await.reset();
    }

    pub async fn state(&self) -> ConversationState {
        self.state.lock().await.clone()
    }

    async fn try_evaluate(&self, record: &Record) -> Result<serde_json::Value, EvaluationFailure> {
        let human = ConversationMessage::Human(self.inner.user_parts(record).await?);
        let mut state = self.state.lock().await;
        let raw = match self.send_turn(&state, &human).await {
            Ok(raw) => {
                state.commit(human, ConversationMessage::assistant_text(raw.clone()));
                raw
            }
            Err(failure) if failure.requires_fresh_context() && state.committed_turns() > 0 => {
                warn!(
                    index = record.index,
                    status = ?failure.status_code,
                    "Conversation payload rejected, retrying in a fresh context"
                );
                // The remembered context is only replaced once the fresh one has an answer.
                let mut fresh = ConversationState::new(self.inner.system.clone(), state.policy());
                let raw = self.send_turn(&fresh, &human).await?;
                fresh.commit(human, ConversationMessage::assistant_text(raw.clone()));
                *state = fresh;
                raw
            }
            Err(failure) => return Err(failure),
        };
        Ok(parse_json_response(&raw)?)
    }

    async fn send_turn(
        &self,
        state: &ConversationState,
        human: &ConversationMessage,
    ) -> Result<String, EvaluationFailure> {
        let context = state.context_for(human);
        debug!(context_len = context.len(), frozen = state.is_frozen(), "Sending conversation turn");
        let (client, context) = (&self.inner.client, &context);
        self.inner
            .retry
            .run(move || async move { client.call(context).await.map_err(EvaluationFailure::from) })
            .await
    }
}

#[async_trait]
impl<C: ChatCompletion> Evaluate for ConversationEvaluator<C> {
    async fn evaluate(&self, record: &Record) -> EvaluationResult {
        match self.try_evaluate(record).await {
            Ok(parsed) => EvaluationResult::Success(parsed),
            Err(failure) => {
                log_failure(record, &failure);
                EvaluationResult::Failure(failure)
            }
        }
    }

    fn chunk_mode(&self) -> ChunkMode {
        ChunkMode::Sequential
    }

    /// Every input file gets its own conversation.
    async fn begin_input(&self) {
        self.reset().await;
    }

    fn answer_schema(&self) -> Option<AnswerSchema> {
        self.inner.answer_schema()
    }
}

fn log_failure(record: &Record, failure: &EvaluationFailure) {
    warn!(
        index = record.index,
        kind = %failure.kind,
        status = ?failure.status_code,
        details = failure.details.as_deref().unwrap_or_default(),
        "Record evaluation failed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use app_state::ImageSettings;
    use common_types::FailureKind;
    use language_model::{ConversationMessage, LlmError, LlmResult, MemoryPolicy};
    use serde_json::json;
    use std::sync::{Arc, Mutex as StdMutex};

    /// Replays scripted replies and remembers every request it saw.
    #[derive(Default)]
    struct Scripted {
        replies: StdMutex<Vec<LlmResult<String>>>,
        requests: StdMutex<Vec<Vec<ConversationMessage>>>,
    }

    impl Scripted {
        fn new(replies: Vec<LlmResult<String>>) -> Self {
            Self {
                replies: StdMutex::new(replies),
                requests: StdMutex::default(),
            }
        }

        fn request_lengths(&self) -> Vec<usize> {
            self.requests
                .lock()
                .expect("lock")
                .iter()
                .map(Vec::len)
                .collect()
        }
    }

    #[async_trait]
    impl ChatCompletion for Scripted {
        async fn call(&self, messages: &[ConversationMessage]) -> LlmResult<String> {
            self.requests.lock().expect("lock").push(messages.to_vec());
            self.replies.lock().expect("lock").remove(0)
        }
    }

    fn evaluator(client: &Arc<Scripted>, retry: RetryPolicy) -> RecordEvaluator<Arc<Scripted>> {
        RecordEvaluator::builder()
            .client(Arc::clone(client))
            .codec(ImageCodec::new(ImageSettings::default()))
            .template(PromptTemplate::new("t", "Q: {source_text}"))
            .system("sys".to_string())
            .retry(retry)
            .build()
    }

    fn record(index: usize, text: &str) -> Record {
        Record::from_value(index, index + 1, json!({ "source_text": text })).expect("object")
    }

    fn api_error(status: u16) -> LlmResult<String> {
        Err(LlmError::Api {
            status,
            body: "rejected".into(),
        })
    }

    #[tokio::test]
    async fn parses_fenced_success() {
        let client = Arc::new(Scripted::new(vec![Ok("```json\n{\"ok\": true}\n```".into())]));
        let result = evaluator(&client, RetryPolicy::none())
            .evaluate(&record(0, "hi"))
            .await;
        assert_eq!(result, EvaluationResult::Success(json!({"ok": true})));

        let requests = client.requests.lock().expect("lock");
        assert_eq!(requests[0][0], ConversationMessage::System("sys".into()));
        assert_eq!(
            requests[0][1],
            ConversationMessage::Human(vec![ContentPart::text("Q: hi")])
        );
    }

    #[tokio::test]
    async fn invalid_json_keeps_raw_text() {
        let client = Arc::new(Scripted::new(vec![Ok("sorry, no json".into())]));
        let result = evaluator(&client, RetryPolicy::none())
            .evaluate(&record(0, "hi"))
            .await;
        let failure = result.failure().expect("failure");
        assert_eq!(failure.kind, FailureKind::ParseError);
        assert_eq!(failure.raw_text.as_deref(), Some("sorry, no json"));
    }

    #[tokio::test]
    async fn missing_image_fails_without_calling_the_model() {
        let client = Arc::new(Scripted::new(Vec::new()));
        let record = Record::from_value(
            0,
            1,
            json!({"source_text": "x", "image_path": "/definitely/not/here.jpg"}),
        )
        .expect("object");
        let result = evaluator(&client, RetryPolicy::none()).evaluate(&record).await;
        assert_eq!(
            result.failure().map(|f| f.kind),
            Some(FailureKind::ImageReadError)
        );
        assert!(client.request_lengths().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let client = Arc::new(Scripted::new(vec![
            Err(LlmError::Timeout("slow".into())),
            api_error(503),
            Ok("{}".into()),
        ]));
        let result = evaluator(&client, RetryPolicy::default())
            .evaluate(&record(0, "hi"))
            .await;
        assert!(result.is_success());
        assert_eq!(client.request_lengths().len(), 3);
    }

    #[tokio::test]
    async fn conversation_grows_then_freezes() {
        let client = Arc::new(Scripted::new((0..4).map(|i| Ok(format!("{{\"n\": {i}}}"))).collect()));
        let conversation = ConversationEvaluator::new(
            evaluator(&client, RetryPolicy::none()),
            MemoryPolicy::FreezeAfter { turns: 2 },
        );
        assert_eq!(conversation.chunk_mode(), ChunkMode::Sequential);
        for i in 0..4 {
            let result = conversation.evaluate(&record(i, "q")).await;
            assert_eq!(result, EvaluationResult::Success(json!({ "n": i })));
        }
        assert_eq!(client.request_lengths(), [2, 4, 6, 6]);
        assert!(conversation.state().await.is_frozen());
    }

    #[tokio::test]
    async fn rejected_context_is_retried_fresh_once() {
        let client = Arc::new(Scripted::new(vec![
            Ok("{}".into()),
            api_error(400),
            Ok("{\"fresh\": true}".into()),
            api_error(400),
        ]));
        let conversation = ConversationEvaluator::new(
            evaluator(&client, RetryPolicy::default()),
            MemoryPolicy::Unbounded,
        );

        assert!(conversation.evaluate(&record(0, "a")).await.is_success());
        let second = conversation.evaluate(&record(1, "b")).await;
        assert_eq!(second, EvaluationResult::Success(json!({"fresh": true})));
        // After the reset only the successful retry is remembered.
        assert_eq!(conversation.state().await.committed_turns(), 1);
        assert_eq!(client.request_lengths(), [2, 4, 2]);

        conversation.begin_input().await;
        let third = conversation.evaluate(&record(2, "c")).await;
        let failure = third.failure().expect("failure");
        assert_eq!(failure.status_code, Some(400));
        assert_eq!(client.request_lengths(), [2, 4, 2, 2]);
    }

    #[tokio::test]
    async fn frozen_prefix_survives_a_rejected_record() {
        let client = Arc::new(Scripted::new(vec![
            Ok("{}".into()),
            api_error(400),
            api_error(400),
            Ok("{\"n\": 2}".into()),
        ]));
        let conversation = ConversationEvaluator::new(
            evaluator(&client, RetryPolicy::default()),
            MemoryPolicy::FreezeAfter { turns: 1 },
        );

        assert!(conversation.evaluate(&record(0, "a")).await.is_success());
        let prefix = conversation.state().await.frozen_prefix().to_vec();
        assert_eq!(prefix.len(), 2);

        let second = conversation.evaluate(&record(1, "b")).await;
        assert_eq!(second.failure().and_then(|f| f.status_code), Some(400));
        let state = conversation.state().await;
        assert!(state.is_frozen());
        assert_eq!(state.frozen_prefix(), prefix.as_slice());

        let third = conversation.evaluate(&record(2, "c")).await;
        assert_eq!(third, EvaluationResult::Success(json!({"n": 2})));
        // The third record is still sent after the remembered first exchange.
        assert_eq!(client.request_lengths(), [2, 4, 2, 4]);
        assert_eq!(client.requests.lock().expect("lock")[3][1..3], prefix[..]);
    }

    #[test]
    fn cabin_template_carries_its_answer_schema() -> Result<(), crate::PromptError> {
        let client = Arc::new(Scripted::new(Vec::new()));
        assert_eq!(evaluator(&client, RetryPolicy::none()).answer_schema(), None);

        let cabin = RecordEvaluator::builder()
            .client(Arc::clone(&client))
            .codec(ImageCodec::new(ImageSettings::default()))
            .template(PromptTemplate::builtin("cabin")?)
            .build();
        let conversation = ConversationEvaluator::new(cabin, MemoryPolicy::Unbounded);
        assert_eq!(conversation.answer_schema(), Some(AnswerSchema::cabin()));
        Ok(())
    }
}
