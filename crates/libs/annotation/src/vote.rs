use common_types::EvaluationResult;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

/// A leaf where the responses did not all agree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Disagreement {
    /// JSON Pointer into the merged answer.
    pub path: String,
    pub chosen: Value,
    /// The losing values in first-seen order.
    pub alternatives: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteOutcome {
    pub merged: Value,
    pub disagreements: Vec<Disagreement>,
}

/// Merges repeated answers to the same question leaf by leaf.
///
/// Leaf paths come from the first response. A response missing a leaf votes `null` for it.
/// The most frequent value wins and ties go to the value seen first.
/// Returns `None` when there is nothing to vote on.
#[must_use]
pub fn majority_vote(responses: &[Value]) -> Option<VoteOutcome> {
    let first = responses.first()?;
    let mut paths = Vec::new();
    collect_leaves(first, String::new(), &mut paths);

    let mut merged = first.clone();
    let mut disagreements = Vec::new();
    for path in paths {
        let ballots = responses
            .iter()
            .map(|r| r.pointer(&path).cloned().unwrap_or(Value::Null));
        let mut tally: Vec<(Value, usize)> = Vec::new();
        for ballot in ballots {
            match tally.iter_mut().find(|(v, _)| *v == ballot) {
                Some((_, n)) => *n += 1,
                None => tally.push((ballot, 1)),
            }
        }
        if tally.len() < 2 {
            continue;
        }
        let winner = tally
            .iter()
            .enumerate()
            .fold(0, |best, (i, (_, n))| if *n > tally[best].1 { i } else { best });
        let (chosen, _) = tally.remove(winner);
        if let Some(slot) = merged.pointer_mut(&path) {
            slot.clone_from(&chosen);
        }
        disagreements.push(Disagreement {
            path,
            chosen,
            alternatives: tally.into_iter().map(|(v, _)| v).collect(),
        });
    }
    Some(VoteOutcome {
        merged,
        disagreements,
    })
}

/// Objects and arrays of objects are descended, everything else is a leaf.
fn collect_leaves(value: &Value, path: String, out: &mut Vec<String>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                collect_leaves(child, format!("{path}/{}", escape(key)), out);
            }
        }
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
            for (i, child) in items.iter().enumerate() {
                collect_leaves(child, format!("{path}/{i}"), out);
            }
        }
        _ => out.push(path),
    }
}

fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// The vote over every response sharing one group key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedGroup {
    pub key: String,
    pub responses: usize,
    #[serde(flatten)]
    pub outcome: VoteOutcome,
}

/// Groups evaluated records by `group_by` and votes over their successful `field` values.
///
/// Groups keep first-seen order. Records without the key, without the field, or holding a
/// failure are left out; a group with no successful responses produces nothing.
pub fn group_and_vote(
    records: impl IntoIterator<Item = Map<String, Value>>,
    group_by: &str,
    field: &str,
) -> Vec<MergedGroup> {
    let mut order: Vec<(String, Vec<Value>)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for mut record in records {
        let Some(key) = record.get(group_by).and_then(group_key) else {
            debug!(group_by, "Record has no group key, skipping");
            continue;
        };
        let Some(response) = record.remove(field) else {
            debug!(%key, field, "Record has no response field, skipping");
            continue;
        };
        match serde_json::from_value::<EvaluationResult>(response) {
            Ok(EvaluationResult::Success(answer)) => {
                let at = *positions.entry(key.clone()).or_insert_with(|| {
                    order.push((key, Vec::new()));
                    order.len() - 1
                });
                order[at].1.push(answer);
            }
            Ok(EvaluationResult::Failure(failure)) => {
                debug!(%key, kind = %failure.kind, "Skipping failed evaluation");
            }
            Err(e) => debug!(%key, "Unreadable response, skipping: {e}"),
        }
    }

    order
        .into_iter()
        .filter_map(|(key, responses)| {
            let outcome = majority_vote(&responses)?;
            Some(MergedGroup {
                key,
                responses: responses.len(),
                outcome,
            })
        })
        .collect()
}

fn group_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
