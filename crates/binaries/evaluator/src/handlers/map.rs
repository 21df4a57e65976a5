use crate::cli::MapArgs;
use crate::handlers::json_file::{read_json, write_json};
use annotation::{SchemaMapper, Vocabulary, fill_template, keep_observed_behaviors, sort_entities};
use color_eyre::eyre::{Result, WrapErr, bail};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

/// Fills one copy of the annotation template per parsed answer.
///
/// A single answer object produces a single document, an array produces an array. Entries of
/// `merge` output are unwrapped to their merged answer. Only behaviours answered `是` are
/// carried into the documents.
pub async fn handle(args: &MapArgs) -> Result<usize> {
    let input: Value = read_json(&args.input).await?;
    let template: Value = read_json(&args.template).await?;
    let mapper = SchemaMapper::new(
        table(args.positions.as_deref(), Vocabulary::positions).await?,
        table(args.genders.as_deref(), Vocabulary::genders).await?,
    );

    let (answers, single) = entries(input, &args.input)?;

    let mut documents = Vec::with_capacity(answers.len());
    for (i, mut answer) in answers.into_iter().enumerate() {
        sort_entities(&mut answer);
        let dropped = keep_observed_behaviors(&mut answer);
        let tags = mapper.project(&answer);
        let mut document = template.clone();
        let filled = fill_template(&mut document, &tags)
            .wrap_err_with(|| format!("Unusable template {}", args.template.display()))?;
        debug!(answer = i, tags = tags.len(), filled, dropped, "Template filled");
        documents.push(document);
    }

    let count = documents.len();
    let output = if single {
        documents.into_iter().next().unwrap_or(Value::Null)
    } else {
        Value::Array(documents)
    };
    write_json(&args.output, &output).await?;
    info!(documents = count, output = %args.output.display(), "Annotation documents written");
    Ok(count)
}

/// Parsed answers held by `input`, and whether it was a single object.
pub(crate) fn entries(input: Value, path: &Path) -> Result<(Vec<Value>, bool)> {
    Ok(match input {
        Value::Array(items) => (items.into_iter().map(unwrap_merged).collect(), false),
        object @ Value::Object(_) => (vec![unwrap_merged(object)], true),
        other => bail!(
            "{} must hold a JSON object or array, found {other}",
            path.display()
        ),
    })
}

pub(crate) async fn table(path: Option<&Path>, default: fn() -> Vocabulary) -> Result<Vocabulary> {
    match path {
        Some(path) => read_json(path).await,
        None => Ok(default()),
    }
}

fn unwrap_merged(entry: Value) -> Value {
    match entry {
        Value::Object(mut map) if map.contains_key("key") && map.contains_key("merged") => {
            map.remove("merged").unwrap_or(Value::Null)
        }
        other => other,
    }
}
