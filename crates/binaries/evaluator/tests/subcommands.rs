use app_state::default_settings;
use clap::Parser;
use color_eyre::Result;
use evaluator::cli::{Cli, Command, MapArgs, MergeArgs};
use evaluator::context::EvalContext;
use evaluator::handlers::{compare, converse, evaluate, map, merge};
use mockito::Server;
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn completion(content: &str) -> String {
    json!({"choices": [{"message": {"role": "assistant", "content": content}}]}).to_string()
}

fn write_jsonl(path: &Path, rows: &[Value]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, rows.iter().map(|r| format!("{r}\n")).collect::<String>())
}

fn read_jsonl(path: &Path) -> Result<Vec<Value>> {
    fs::read_to_string(path)?
        .lines()
        .map(|line| Ok(serde_json::from_str(line)?))
        .collect()
}

fn parse(args: &[&str]) -> Command {
    let mut argv = vec!["cabin-eval"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).expect("valid arguments").command
}

#[tokio::test]
async fn evaluate_writes_one_output_per_input_file() -> Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    write_jsonl(
        &input.join("a.jsonl"),
        &[
            json!({"id": 1, "source_text": "hello", "target_text": "สวัสดี"}),
            json!({"id": 2, "source_text": "bye", "target_text": "ลาก่อน"}),
        ],
    )?;
    fs::create_dir_all(input.join("nested"))?;
    fs::write(
        input.join("nested/b.json"),
        json!([{"id": 3, "source_text": "thanks"}]).to_string(),
    )?;

    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer test-key")
        .with_status(200)
        .with_body(completion("{\"score\": 5}"))
        .expect(3)
        .create_async()
        .await;

    let url = server.url();
    let in_arg = input.display().to_string();
    let out_arg = output.display().to_string();
    let Command::Evaluate(args) = parse(&[
        "evaluate", "-i", &in_arg, "-o", &out_arg, "-k", "test-key", "-u", &url, "-d", "0",
        "--template", "translation", "--system", "none",
    ]) else {
        panic!("expected evaluate");
    };
    let context = EvalContext::new(default_settings()?, &args)?;
    let summary = evaluate::handle(&context, &args).await?;

    mock.assert_async().await;
    assert_eq!(summary.records, 3);
    assert_eq!(summary.successes, 3);

    let a = read_jsonl(&output.join("a_evaluated.jsonl"))?;
    assert_eq!(a.len(), 2);
    assert_eq!(a[0]["id"], 1);
    assert_eq!(a[0]["target_text"], "สวัสดี");
    assert_eq!(a[1]["gemini_response"], json!({"score": 5}));
    let b = read_jsonl(&output.join("nested/b_evaluated.jsonl"))?;
    assert_eq!(b[0]["id"], 3);
    Ok(())
}

#[tokio::test]
async fn converse_reports_failed_records_inline() -> Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("turns.jsonl");
    write_jsonl(
        &input,
        &[
            json!({"source_text": "first"}),
            json!({"source_text": "second"}),
        ],
    )?;

    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(completion("not json at all"))
        .expect(2)
        .create_async()
        .await;

    let url = server.url();
    let in_arg = input.display().to_string();
    let out_arg = dir.path().join("out").display().to_string();
    let Command::Converse(args) = parse(&[
        "converse", "-i", &in_arg, "-o", &out_arg, "-k", "k", "-u", &url, "--policy",
        "sliding-window", "--turns", "1",
    ]) else {
        panic!("expected converse");
    };
    let context = EvalContext::new(default_settings()?, &args.run)?;
    let summary = converse::handle(&context, &args).await?;

    mock.assert_async().await;
    assert_eq!(summary.records, 2);
    assert_eq!(summary.failed(), 2);
    let rows = read_jsonl(&dir.path().join("out/turns_evaluated.jsonl"))?;
    assert_eq!(rows[1]["gemini_response"]["error"], "parse_error");
    assert_eq!(rows[1]["gemini_response"]["raw_response"], "not json at all");
    Ok(())
}

#[tokio::test]
async fn unreadable_input_folder_is_fatal() -> Result<()> {
    let dir = TempDir::new()?;
    let Command::Evaluate(args) = parse(&[
        "evaluate", "-i", "/definitely/not/here", "-o", &dir.path().display().to_string(), "-k",
        "k",
    ]) else {
        panic!("expected evaluate");
    };
    let context = EvalContext::new(default_settings()?, &args)?;
    assert!(evaluate::handle(&context, &args).await.is_err());
    Ok(())
}

#[tokio::test]
async fn merge_then_map_fills_the_annotation_template() -> Result<()> {
    let dir = TempDir::new()?;
    let evaluated = dir.path().join("evaluated.jsonl");
    let answer = |gender: &str| {
        json!({
            "是否为黑夜": "否",
            "是否有中央扶手箱": "是",
            "人": {"人数": "2", "具体信息": [
                {"位置": "后排右", "性别": "女"},
                {"位置": "前排右", "性别": gender}
            ]},
            "物品": {"物品数": "0", "具体信息": []},
            "宠物": {"宠物数": "0", "具体信息": []}
        })
    };
    write_jsonl(
        &evaluated,
        &[
            json!({"image_path": "p/1.jpg", "gemini_response": answer("男")}),
            json!({"image_path": "p/1.jpg", "gemini_response": answer("女")}),
            json!({"image_path": "p/1.jpg", "gemini_response": answer("男")}),
            json!({"image_path": "p/2.jpg", "gemini_response": {"error": "timeout"}}),
        ],
    )?;

    let merged_path = dir.path().join("merged.json");
    let groups = merge::handle(
        &default_settings()?,
        &MergeArgs {
            input: evaluated,
            output: merged_path.clone(),
            group_by: "image_path".into(),
            field: None,
        },
    )
    .await?;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].responses, 3);
    assert_eq!(groups[0].outcome.disagreements.len(), 1);

    let template = dir.path().join("template.json");
    let tag = |key: &str| json!({"tag_key": key, "value": ""});
    fs::write(
        &template,
        json!({"label_result": {"global": {"100000": [{"tag_list": [
            tag("是否抛弃"), tag("车内人数"), tag("摄像头位置"),
            tag("person1-位置"), tag("person1-性别"), tag("person2-位置")
        ]}]}}})
        .to_string(),
    )?;
    let output = dir.path().join("filled.json");
    let count = map::handle(&MapArgs {
        input: merged_path,
        template,
        output: output.clone(),
        positions: None,
        genders: None,
    })
    .await?;
    assert_eq!(count, 1);

    let filled: Value = serde_json::from_str(&fs::read_to_string(&output)?)?;
    let documents = filled.as_array().expect("one document per group");
    let values: Vec<&Value> = documents[0]["label_result"]["global"]["100000"][0]["tag_list"]
        .as_array()
        .expect("tag list")
        .iter()
        .map(|t| &t["value"])
        .collect();
    assert_eq!(
        values,
        [
            &json!("可用"),
            &json!("2"),
            &json!("一排"),
            &json!(["主驾"]),
            &json!("男性"),
            &json!(["三排左"]),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn compare_scores_answers_against_the_reference() -> Result<()> {
    let dir = TempDir::new()?;
    let reference = dir.path().join("reference.json");
    fs::write(
        &reference,
        json!([{
            "general_info": {"车内人数": "2", "车内物品数": "0", "车内宠物数": "0", "晚上": "否"},
            "persons": [
                {"年龄": "成人", "性别": "男性", "位置": "主驾"},
                {"年龄": "成人", "性别": "女性", "位置": "三排左"}
            ],
            "objects": []
        }])
        .to_string(),
    )?;
    // Persons arrive out of seat order and are sorted before pairing.
    let answers = dir.path().join("answers.json");
    fs::write(
        &answers,
        json!([{"key": "p/1.jpg", "merged": {
            "是否为黑夜": "否",
            "人": {"人数": "2", "具体信息": [
                {"年龄": "成人", "性别": "女", "位置": "后排右"},
                {"年龄": "成人", "性别": "男", "位置": "前排右"}
            ]},
            "物品": {"物品数": "1", "具体信息": [{"种类": "包", "位置": "前排左"}]}
        }}])
        .to_string(),
    )?;

    let output = dir.path().join("report.json");
    let Command::Compare(args) = parse(&[
        "compare",
        "-r",
        &reference.display().to_string(),
        "-i",
        &answers.display().to_string(),
        "-o",
        &output.display().to_string(),
    ]) else {
        panic!("expected compare");
    };
    let report = compare::handle(&args).await?;

    assert_eq!(report.records, 1);
    let written: Value = serde_json::from_str(&fs::read_to_string(&output)?)?;
    assert_eq!(written["fields"]["位置"], json!({"matched": 2, "total": 2}));
    assert_eq!(written["fields"]["性别"], json!({"matched": 2, "total": 2}));
    assert_eq!(written["fields"]["人数"], json!({"matched": 1, "total": 1}));
    assert_eq!(written["fields"]["物品数"], json!({"matched": 0, "total": 1}));
    assert_eq!(written["fields"]["宠物数"], json!({"matched": 0, "total": 1}));
    assert_eq!(written["fields"]["物品种类"], json!({"matched": 0, "total": 0}));
    Ok(())
}
