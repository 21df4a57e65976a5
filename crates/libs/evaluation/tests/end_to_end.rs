use app_state::ImageSettings;
use common_types::FailureKind;
use evaluation::{BatchRunner, JsonlSink, PromptTemplate, RecordEvaluator, RecordSource, RetryPolicy};
use image::{Rgb, RgbImage};
use image_codec::ImageCodec;
use language_model::LlmClient;
use mockito::{Matcher, Server};
use serde_json::{Value, json};
use std::time::Duration;
use tempfile::TempDir;

fn completion(content: &str) -> String {
    json!({"choices": [{"message": {"role": "assistant", "content": content}}]}).to_string()
}

#[tokio::test]
async fn five_records_in_chunks_of_two_with_one_missing_image() -> color_eyre::Result<()> {
    let dir = TempDir::new()?;
    let image_path = dir.path().join("cabin.png");
    RgbImage::from_pixel(64, 48, Rgb([10, 20, 30])).save(&image_path)?;
    let image = image_path.to_string_lossy().into_owned();
    let missing = dir.path().join("missing.jpg").to_string_lossy().into_owned();

    let input = dir.path().join("input.jsonl");
    let rows = [
        json!({"id": "a", "source_text": "one", "image_path": image}),
        json!({"id": "b", "source_text": "two"}),
        json!({"id": "c", "source_text": "three", "image_path": missing}),
        json!({"id": "d", "source_text": "four", "image_path": image}),
        json!({"id": "e", "source_text": "five", "image_path": ""}),
    ];
    let text: String = rows.iter().map(|r| format!("{r}\n")).collect();
    std::fs::write(&input, text)?;

    let mut server = Server::new_async().await;
    let with_image = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("data:image/jpeg;base64,".into()))
        .with_status(200)
        .with_body(completion("```json\n{\"kind\": \"image\"}\n```"))
        .expect(2)
        .create_async()
        .await;
    // Text-only turns are sent as a plain string instead of a parts array.
    let text_only = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex(r#""content":"Describe: "#.into()))
        .with_status(200)
        .with_body(completion("{\"kind\": \"text\"}"))
        .expect(2)
        .create_async()
        .await;

    let client = LlmClient::with_base_url(&server.url())
        .api_key("test-key")
        .model("vision")
        .timeout(Duration::from_secs(5))
        .build();
    let evaluator = RecordEvaluator::builder()
        .client(client)
        .codec(ImageCodec::new(ImageSettings::default()))
        .template(PromptTemplate::new("t", "Describe: {source_text}"))
        .retry(RetryPolicy::none())
        .build();

    let output = dir.path().join("out").join("input_evaluated.jsonl");
    let mut source = RecordSource::open(&input).await?;
    let mut sink = JsonlSink::create(&output).await?;
    let summary = BatchRunner::new(2, Duration::from_millis(10), "gemini_response")
        .run(&evaluator, &mut source, &mut sink)
        .await?;

    assert_eq!(summary.records, 5);
    assert_eq!(summary.successes, 4);
    assert_eq!(summary.failures[&FailureKind::ImageReadError], 1);

    let written: Vec<Value> = std::fs::read_to_string(&output)?
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    let ids: Vec<&str> = written.iter().filter_map(|v| v["id"].as_str()).collect();
    assert_eq!(ids, ["a", "b", "c", "d", "e"]);
    assert_eq!(written[0]["gemini_response"], json!({"kind": "image"}));
    assert_eq!(written[1]["gemini_response"], json!({"kind": "text"}));
    assert_eq!(written[2]["gemini_response"]["error"], "image_read_error");
    assert_eq!(written[2]["image_path"], rows[2]["image_path"]);
    assert_eq!(written[3]["gemini_response"], json!({"kind": "image"}));
    assert_eq!(written[4]["gemini_response"], json!({"kind": "text"}));

    with_image.assert_async().await;
    text_only.assert_async().await;
    Ok(())
}
