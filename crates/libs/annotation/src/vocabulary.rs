use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sentinel written for anything missing or untranslatable.
pub const UNKNOWN_TAG: &str = "UNKNOWN";

/// Translation table from the answer vocabulary to the annotation tool's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vocabulary(BTreeMap<String, String>);

impl Vocabulary {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
        )
    }

    /// Seat and object positions. Left and right swap because the camera faces the cabin.
    #[must_use]
    pub fn positions() -> Self {
        Self::from_pairs([
            ("前排左", "副驾"),
            ("前排右", "主驾"),
            ("中排左（若有）", "二排右"),
            ("中排右（若有）", "二排左"),
            ("中排左", "二排右"),
            ("中排右", "二排左"),
            ("后排左", "三排右"),
            ("后排右", "三排左"),
            ("中央扶手箱", "前排扶手箱"),
            ("中央扶手箱-杯槽", "前排扶手箱-杯槽"),
        ])
    }

    #[must_use]
    pub fn genders() -> Self {
        Self::from_pairs([
            ("男", "男性"),
            ("男性", "男性"),
            ("女", "女性"),
            ("女性", "女性"),
        ])
    }

    /// The annotation-side table read backwards. When several answers share a translation the
    /// first one in key order wins, so `二排右` reads back as `中排左`.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let mut inverse = BTreeMap::new();
        for (from, to) in &self.0 {
            inverse.entry(to.clone()).or_insert_with(|| from.clone());
        }
        Self(inverse)
    }

    #[must_use]
    pub fn get(&self, value: &str) -> Option<&str> {
        self.0.get(value.trim()).map(String::as_str)
    }

    /// The translation of `value`, or [`UNKNOWN_TAG`] when it is missing or not in the table.
    #[must_use]
    pub fn translate(&self, value: Option<&str>) -> String {
        value
            .map(str::trim)
            .and_then(|v| self.0.get(v))
            .map_or_else(|| UNKNOWN_TAG.to_string(), Clone::clone)
    }
}
