use crate::mapper::{normalise, split_list};
use crate::ordering::OPTIONAL_SUFFIX;
use crate::{UNKNOWN_TAG, Vocabulary};
use common_types::{ITEMS, PERSONS, PETS};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Keys of a reference annotation record as exported from the annotation tool.
const GENERAL_INFO: &str = "general_info";
const REFERENCE_PERSONS: &str = "persons";
const REFERENCE_OBJECTS: &str = "objects";
const CLOTHING: &str = "衣裤";

const NIGHT_ANSWERS: &[&str] = &["是", "晚上", "true", "yes", "1"];

/// A label scored against the reference annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Field {
    #[serde(rename = "人数")]
    PersonCount,
    #[serde(rename = "物品数")]
    ItemCount,
    #[serde(rename = "宠物数")]
    PetCount,
    #[serde(rename = "晚上")]
    Night,
    #[serde(rename = "年龄")]
    Age,
    #[serde(rename = "性别")]
    Gender,
    #[serde(rename = "位置")]
    Position,
    #[serde(rename = "上衣样式")]
    TopStyle,
    #[serde(rename = "上衣颜色")]
    TopColor,
    #[serde(rename = "下装样式")]
    BottomStyle,
    #[serde(rename = "下装颜色")]
    BottomColor,
    #[serde(rename = "物品种类")]
    ItemKind,
    #[serde(rename = "物品位置")]
    ItemPosition,
}

impl Field {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::PersonCount => "人数",
            Self::ItemCount => "物品数",
            Self::PetCount => "宠物数",
            Self::Night => "晚上",
            Self::Age => "年龄",
            Self::Gender => "性别",
            Self::Position => "位置",
            Self::TopStyle => "上衣样式",
            Self::TopColor => "上衣颜色",
            Self::BottomStyle => "下装样式",
            Self::BottomColor => "下装颜色",
            Self::ItemKind => "物品种类",
            Self::ItemPosition => "物品位置",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchCount {
    pub matched: usize,
    pub total: usize,
}

impl MatchCount {
    /// Percentage of matches, `None` when nothing was compared.
    #[must_use]
    pub fn rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.matched as f64 * 100.0 / self.total as f64)
    }
}

impl fmt::Display for MatchCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rate() {
            Some(rate) => write!(f, "{rate:.2}% ({}/{})", self.matched, self.total),
            None => write!(f, "n/a (0/0)"),
        }
    }
}

/// Per-label agreement between model answers and reference annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComparisonReport {
    pub records: usize,
    pub fields: BTreeMap<Field, MatchCount>,
}

impl ComparisonReport {
    #[must_use]
    pub fn get(&self, field: Field) -> MatchCount {
        self.fields.get(&field).copied().unwrap_or_default()
    }

    fn tally(&mut self, field: Field, hit: bool) {
        let count = self.fields.entry(field).or_default();
        count.total += 1;
        count.matched += usize::from(hit);
    }

    fn miss(&mut self, field: Field, n: usize) {
        self.fields.entry(field).or_default().total += n;
    }
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} records compared", self.records)?;
        for (field, count) in &self.fields {
            write!(f, "\n  {}: {count}", field.label())?;
        }
        Ok(())
    }
}

/// Scores parsed answers against reference annotations in the annotation tool's vocabulary.
///
/// Records are paired by position. Persons are paired in order, so answers should be sorted
/// with [`crate::sort_entities`] first; items are paired greedily, kind and position first.
#[derive(Debug, Clone)]
pub struct Comparator {
    /// Annotation position back to answer position.
    positions: Vocabulary,
    genders: Vocabulary,
}

impl Default for Comparator {
    fn default() -> Self {
        Self::new(&Vocabulary::positions(), Vocabulary::genders())
    }
}

impl Comparator {
    /// `positions` and `genders` are the answer-to-annotation tables used for mapping.
    #[must_use]
    pub fn new(positions: &Vocabulary, genders: Vocabulary) -> Self {
        Self {
            positions: positions.inverse(),
            genders,
        }
    }

    /// Compares the first `min(references, answers)` pairs.
    #[must_use]
    pub fn compare(&self, references: &[Value], answers: &[Value]) -> ComparisonReport {
        let mut report = ComparisonReport::default();
        for (reference, answer) in references.iter().zip(answers) {
            self.compare_record(reference, answer, &mut report);
        }
        report
    }

    pub fn compare_record(&self, reference: &Value, answer: &Value, report: &mut ComparisonReport) {
        report.records += 1;
        let general = reference.get(GENERAL_INFO);
        for (field, key, kind) in [
            (Field::PersonCount, "车内人数", &PERSONS),
            (Field::ItemCount, "车内物品数", &ITEMS),
            (Field::PetCount, "车内宠物数", &PETS),
        ] {
            let expected = text(general.and_then(|g| g.get(key)));
            let actual = text(answer.get(kind.group).and_then(|g| g.get(kind.count_field)));
            report.tally(field, same(expected.as_deref(), actual.as_deref()));
        }
        let night = |value: Option<String>| {
            value.is_some_and(|v| NIGHT_ANSWERS.iter().any(|n| n.eq_ignore_ascii_case(&v)))
        };
        report.tally(
            Field::Night,
            night(text(general.and_then(|g| g.get("晚上")))) == night(text(answer.get("是否为黑夜"))),
        );

        let expected_persons = list(reference, REFERENCE_PERSONS);
        let answered_persons = answer
            .get(PERSONS.group)
            .map_or(&[][..], |group| list(group, PERSONS.list_field));
        for (expected, actual) in expected_persons.iter().zip(answered_persons) {
            self.compare_person(expected, actual, report);
        }
        let unpaired = expected_persons.len().saturating_sub(answered_persons.len());
        for field in [
            Field::Age,
            Field::Gender,
            Field::Position,
            Field::TopStyle,
            Field::TopColor,
            Field::BottomStyle,
            Field::BottomColor,
        ] {
            report.miss(field, unpaired);
        }

        let answered_items = answer
            .get(ITEMS.group)
            .map_or(&[][..], |group| list(group, ITEMS.list_field));
        self.compare_items(list(reference, REFERENCE_OBJECTS), answered_items, report);
    }

    fn compare_person(&self, expected: &Value, actual: &Value, report: &mut ComparisonReport) {
        let age = |v: &Value| text(v.get("年龄")).map(|a| normalise(&a));
        report.tally(Field::Age, same(age(expected).as_deref(), age(actual).as_deref()));

        let gender = |v: &Value| self.genders.translate(text(v.get("性别")).as_deref());
        report.tally(Field::Gender, gender(expected) == gender(actual));

        let position = text(actual.get("位置"));
        let position = position
            .as_deref()
            .map(|p| p.strip_suffix(OPTIONAL_SUFFIX).unwrap_or(p));
        report.tally(
            Field::Position,
            same(self.position(expected).as_deref(), position),
        );

        let clothing = expected.get(CLOTHING);
        let clothes = |key: &str| items(clothing.and_then(|c| c.get(key)));

        // The reference top type also carries the accessories.
        let top_types = clothes("着装1类型");
        let top_style = text(actual.get("上衣样式")).map(|s| normalise(&s));
        let top_hit = match top_style.as_deref() {
            None | Some(UNKNOWN_TAG) => top_types.iter().all(|t| t == UNKNOWN_TAG),
            Some(style) => top_types.iter().any(|t| t == style),
        };
        report.tally(Field::TopStyle, top_hit);

        for (field, reference_key, answer_key) in [
            (Field::TopColor, "着装1颜色", "上衣颜色"),
            (Field::BottomStyle, "着装2类型", "下装样式"),
            (Field::BottomColor, "着装2颜色", "下装颜色"),
        ] {
            let mut expected = clothes(reference_key);
            let mut actual = items(actual.get(answer_key));
            expected.sort();
            actual.sort();
            report.tally(field, expected == actual);
        }
    }

    /// Pairs items by kind and position first, then by kind alone among the rest.
    fn compare_items(&self, expected: &[Value], actual: &[Value], report: &mut ComparisonReport) {
        let expected: Vec<(Option<String>, Option<String>)> = expected
            .iter()
            .map(|o| (kind(o.get("物品")), self.position(o)))
            .collect();
        let actual: Vec<(Option<String>, Option<String>)> = actual
            .iter()
            .map(|o| (kind(o.get("种类")), text(o.get("位置"))))
            .collect();
        let mut expected_used = vec![false; expected.len()];
        let mut actual_used = vec![false; actual.len()];
        let mut kinds = 0;
        let mut positions = 0;

        for (a, (answered_kind, answered_position)) in actual.iter().enumerate() {
            let found = expected.iter().enumerate().position(|(e, (k, p))| {
                !expected_used[e]
                    && same(k.as_deref(), answered_kind.as_deref())
                    && same(p.as_deref(), answered_position.as_deref())
            });
            if let Some(e) = found {
                expected_used[e] = true;
                actual_used[a] = true;
                kinds += 1;
                positions += 1;
            }
        }
        for (a, (answered_kind, _)) in actual.iter().enumerate() {
            if actual_used[a] {
                continue;
            }
            let found = expected.iter().enumerate().position(|(e, (k, _))| {
                !expected_used[e] && same(k.as_deref(), answered_kind.as_deref())
            });
            if let Some(e) = found {
                expected_used[e] = true;
                kinds += 1;
            }
        }

        for (field, matched) in [(Field::ItemKind, kinds), (Field::ItemPosition, positions)] {
            let count = report.fields.entry(field).or_default();
            count.total += expected.len();
            count.matched += matched;
        }
    }

    /// A reference position in the answer vocabulary; unknown names pass through.
    fn position(&self, reference: &Value) -> Option<String> {
        let position = text(reference.get("位置"))?;
        Some(self.positions.get(&position).map_or(position, str::to_string))
    }
}

fn list<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

/// A scalar as trimmed text. Single-element lists, as written by list-valued tags, count as
/// their element.
fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(values) if values.len() == 1 => text(values.first()),
        _ => None,
    }
}

fn kind(value: Option<&Value>) -> Option<String> {
    text(value).map(|k| normalise(&k))
}

/// A multi-choice value, comma separated or already a list.
fn items(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|v| v.as_str())
            .flat_map(|v| split_list(Some(v)))
            .collect(),
        Some(Value::String(s)) => split_list(Some(s)),
        _ => Vec::new(),
    }
}

/// Both present and equal, ignoring ASCII case.
fn same(expected: Option<&str>, actual: Option<&str>) -> bool {
    matches!((expected, actual), (Some(e), Some(a)) if e.eq_ignore_ascii_case(a))
}
