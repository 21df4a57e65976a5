use crate::{UNKNOWN_TAG, Vocabulary};
use common_types::{EntitySpec, ITEMS, PERSONS, PETS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Key of a person's yes/no behaviour list.
pub const BEHAVIOR_LIST: &str = "行为";
/// The answer marking a behaviour as observed.
pub const OBSERVED: &str = "是";

/// Where the tag list lives inside an annotation-tool document.
pub const TAG_LIST_POINTER: &str = "/label_result/global/100000/0/tag_list";

#[derive(Error, Debug)]
pub enum MappingError {
    #[error("annotation template has no tag list at {TAG_LIST_POINTER}")]
    MissingTagList,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Text(String),
    List(Vec<String>),
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<String>> for TagValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub tag_key: String,
    pub value: TagValue,
}

impl Tag {
    pub fn new(tag_key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        Self {
            tag_key: tag_key.into(),
            value: value.into(),
        }
    }
}

/// Projects parsed cabin answers into the annotation tool's flat tag vocabulary.
#[derive(Debug, Clone)]
pub struct SchemaMapper {
    positions: Vocabulary,
    genders: Vocabulary,
}

impl Default for SchemaMapper {
    fn default() -> Self {
        Self::new(Vocabulary::positions(), Vocabulary::genders())
    }
}

impl SchemaMapper {
    #[must_use]
    pub const fn new(positions: Vocabulary, genders: Vocabulary) -> Self {
        Self { positions, genders }
    }

    /// Flat tag list for one answer. Never fails: anything missing becomes `UNKNOWN`.
    #[must_use]
    pub fn project(&self, answer: &Value) -> Vec<Tag> {
        let mut tags = vec![
            Tag::new("是否抛弃", "可用"),
            Tag::new("车内人数", count_text(answer, &PERSONS)),
            Tag::new("车内物品数", count_text(answer, &ITEMS)),
            Tag::new("车内宠物数", count_text(answer, &PETS)),
            Tag::new(
                "晚上",
                if str_at(answer, "是否为黑夜") == Some("是") {
                    "晚上"
                } else {
                    "否"
                },
            ),
            Tag::new(
                "摄像头位置",
                if str_at(answer, "是否有中央扶手箱") == Some("是") {
                    "一排"
                } else {
                    "二排"
                },
            ),
        ];

        for (i, person) in Self::entities(answer, &PERSONS).into_iter().enumerate() {
            let prefix = format!("person{}", i + 1);
            let top = [str_at(person, "上衣样式")]
                .into_iter()
                .flatten()
                .map(normalise)
                .chain(split_list(str_at(person, "配饰")))
                .collect::<Vec<_>>();
            tags.extend([
                Tag::new(format!("{prefix}-年龄"), plain(str_at(person, "年龄"))),
                Tag::new(
                    format!("{prefix}-性别"),
                    self.genders.translate(str_at(person, "性别")),
                ),
                Tag::new(format!("{prefix}-位置"), self.position(person)),
                Tag::new(format!("{prefix}-行为"), observed_behaviors(person)),
                Tag::new(format!("{prefix}-衣裤-着装1类型"), top),
                Tag::new(
                    format!("{prefix}-衣裤-着装1颜色"),
                    split_list(str_at(person, "上衣颜色")),
                ),
                Tag::new(
                    format!("{prefix}-衣裤-着装2类型"),
                    split_list(str_at(person, "下装样式")),
                ),
                Tag::new(
                    format!("{prefix}-衣裤-着装2颜色"),
                    split_list(str_at(person, "下装颜色")),
                ),
            ]);
        }

        for (prefix, kind) in [("good", &ITEMS), ("pet", &PETS)] {
            for (i, entity) in Self::entities(answer, kind).into_iter().enumerate() {
                let key = format!("{prefix}{}", i + 1);
                tags.push(Tag::new(format!("{key}-种类"), plain(str_at(entity, "种类"))));
                tags.push(Tag::new(format!("{key}-位置"), self.position(entity)));
            }
        }
        tags
    }

    /// The entities to emit: the reported count (or the list length when the count is not a
    /// number), capped at the schema maximum. Entities the list lacks are empty objects.
    fn entities<'a>(answer: &'a Value, kind: &EntitySpec) -> Vec<&'a Value> {
        static EMPTY: Value = Value::Null;
        let group = answer.get(kind.group);
        let list: &[Value] = group
            .and_then(|g| g.get(kind.list_field))
            .and_then(Value::as_array)
            .map_or(&[], Vec::as_slice);
        let reported = group
            .and_then(|g| g.get(kind.count_field))
            .and_then(count_value);
        let count = reported.unwrap_or(list.len()).min(kind.max_entities);
        (0..count).map(|i| list.get(i).unwrap_or(&EMPTY)).collect()
    }

    fn position(&self, entity: &Value) -> Vec<String> {
        vec![self.positions.translate(str_at(entity, "位置"))]
    }
}

/// Writes each tag's value into the matching `tag_key` entry of an annotation document.
///
/// Tags the document does not define are skipped. Returns how many entries were filled.
pub fn fill_template(document: &mut Value, tags: &[Tag]) -> Result<usize, MappingError> {
    let tag_list = document
        .pointer_mut(TAG_LIST_POINTER)
        .and_then(Value::as_array_mut)
        .ok_or(MappingError::MissingTagList)?;

    let mut filled = 0;
    for tag in tags {
        let entry = tag_list.iter_mut().find(|entry| {
            entry.get("tag_key").and_then(Value::as_str) == Some(tag.tag_key.as_str())
        });
        let Some(Value::Object(entry)) = entry else {
            debug!(tag_key = %tag.tag_key, "Tag not defined by template, skipping");
            continue;
        };
        entry.insert(
            "value".to_string(),
            serde_json::to_value(&tag.value).unwrap_or(Value::Null),
        );
        filled += 1;
    }
    Ok(filled)
}

/// Drops every behaviour not answered `是` from each person of `answer`.
///
/// Returns how many behaviour answers were removed.
pub fn keep_observed_behaviors(answer: &mut Value) -> usize {
    let Some(persons) = answer
        .get_mut(PERSONS.group)
        .and_then(|group| group.get_mut(PERSONS.list_field))
        .and_then(Value::as_array_mut)
    else {
        return 0;
    };
    let mut removed = 0;
    for behaviors in persons
        .iter_mut()
        .filter_map(|person| person.get_mut(BEHAVIOR_LIST))
        .filter_map(Value::as_array_mut)
    {
        let before = behaviors.len();
        behaviors.retain(|question| {
            question
                .as_object()
                .and_then(|q| q.values().next())
                .and_then(Value::as_str)
                .is_some_and(|a| a.trim() == OBSERVED)
        });
        removed += before - behaviors.len();
    }
    removed
}

fn str_at<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn count_value(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn count_text(answer: &Value, kind: &EntitySpec) -> String {
    match answer.get(kind.group).and_then(|g| g.get(kind.count_field)) {
        Some(Value::String(s)) if !s.trim().is_empty() => normalise(s.trim()),
        Some(Value::Number(n)) => n.to_string(),
        _ => UNKNOWN_TAG.to_string(),
    }
}

/// Any spelling of "unknown" becomes the sentinel; everything else is kept.
pub(crate) fn normalise(value: &str) -> String {
    if value.eq_ignore_ascii_case(UNKNOWN_TAG) {
        UNKNOWN_TAG.to_string()
    } else {
        value.to_string()
    }
}

/// A free-text answer; missing is the sentinel.
fn plain(value: Option<&str>) -> String {
    value.map_or_else(|| UNKNOWN_TAG.to_string(), normalise)
}

/// A multi-choice answer split on ASCII or full-width commas.
pub(crate) fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .into_iter()
        .flat_map(|v| v.split([',', '，']))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(normalise)
        .collect()
}

/// Behaviour questions answered `是`, in answer order.
fn observed_behaviors(person: &Value) -> Vec<String> {
    person
        .get(BEHAVIOR_LIST)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .flat_map(|question| question.iter())
        .filter(|(_, answer)| answer.as_str().map(str::trim) == Some(OBSERVED))
        .map(|(question, _)| question.clone())
        .collect()
}
