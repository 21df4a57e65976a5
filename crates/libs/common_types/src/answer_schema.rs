use serde_json::Value;

pub const UNKNOWN: &str = "unknown";

const YES_NO: &[&str] = &["是", "否"];

pub const PERSON_POSITIONS: &[&str] = &[
    "前排左",
    "前排右",
    "中排左（若有）",
    "中排右（若有）",
    "后排左",
    "后排右",
    "过道",
    UNKNOWN,
];

pub const OBJECT_POSITIONS: &[&str] = &[
    "前排左",
    "前排右",
    "中排左（若有）",
    "中排右（若有）",
    "后排左",
    "后排右",
    "过道",
    "中央扶手箱",
    "中央扶手箱-杯槽",
    UNKNOWN,
];

const COLORS: &[&str] = &[
    "黑", "白", "灰", "红", "橙", "黄", "绿", "蓝", "紫", "粉", "棕", UNKNOWN,
];

pub const BEHAVIORS: &[&str] = &[
    "是否在阅读",
    "是否在化妆",
    "是否在吃东西",
    "是否在托腮思考",
    "是否在玩手机",
    "是否在打电话",
    "是否在吸烟",
    "是否在点烟",
    "是否在睡觉",
    "是否在抱猫",
    "是否在抱狗",
    "是否头或手伸出窗外",
    "是否在哭闹",
    "是否未系安全带",
    "是否食指指向前",
    "是否食指指向上",
    "是否食指指向下",
    "是否食指指向左",
    "是否食指指向右",
    "是否手触碰车顶屏幕",
    "是否在站立",
];

/// One answer field and the closed set of values the model may choose from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub values: &'static [&'static str],
    /// Several values may be given, comma separated.
    pub multi: bool,
}

impl FieldSpec {
    const fn one(name: &'static str, values: &'static [&'static str]) -> Self {
        Self {
            name,
            values,
            multi: false,
        }
    }

    const fn many(name: &'static str, values: &'static [&'static str]) -> Self {
        Self {
            name,
            values,
            multi: true,
        }
    }

    /// Returns the offending parts of `value`, empty when it is legal.
    #[must_use]
    pub fn illegal_parts<'a>(&self, value: &'a str) -> Vec<&'a str> {
        let parts: Vec<&str> = if self.multi {
            value.split([',', '，']).map(str::trim).collect()
        } else {
            vec![value.trim()]
        };
        parts
            .into_iter()
            .filter(|p| !self.values.iter().any(|v| v.eq_ignore_ascii_case(p)))
            .collect()
    }
}

/// A group of per-entity fields repeated up to the group's reported count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitySpec {
    /// Top-level key of the group, e.g. `人`.
    pub group: &'static str,
    /// Key inside the group holding the reported count, e.g. `人数`.
    pub count_field: &'static str,
    /// Key inside the group holding the per-entity list.
    pub list_field: &'static str,
    pub max_entities: usize,
    pub fields: &'static [FieldSpec],
    /// Yes/no questions answered per entity as a list of single-key objects.
    pub behaviors: &'static [&'static str],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// JSON Pointer to the offending value.
    pub path: String,
    pub value: String,
}

/// Catalog of the answer fields and their legal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerSchema {
    pub fields: &'static [FieldSpec],
    pub entities: &'static [EntitySpec],
}

pub const PERSONS: EntitySpec = EntitySpec {
    group: "人",
    count_field: "人数",
    list_field: "具体信息",
    max_entities: 6,
    fields: &[
        FieldSpec::one("年龄", &["成人", "儿童", UNKNOWN]),
        FieldSpec::one("性别", &["男", "女", UNKNOWN]),
        FieldSpec::one("位置", PERSON_POSITIONS),
        FieldSpec::many(
            "配饰",
            &[
                "眼镜",
                "围巾",
                "帽子",
                "耳机",
                "手表",
                "墨镜",
                "口罩",
                "耳坠（非耳钉）",
                "靴子",
                UNKNOWN,
            ],
        ),
        FieldSpec::one(
            "上衣样式",
            &["T恤", "衬衫", "外套", "卫衣", "毛衣", "连衣裙", "背心", UNKNOWN],
        ),
        FieldSpec::many("上衣颜色", COLORS),
        FieldSpec::one("下装样式", &["长裤", "短裤", "长裙", "短裙", UNKNOWN]),
        FieldSpec::many("下装颜色", COLORS),
    ],
    behaviors: BEHAVIORS,
};

pub const ITEMS: EntitySpec = EntitySpec {
    group: "物品",
    count_field: "物品数",
    list_field: "具体信息",
    max_entities: 10,
    fields: &[
        FieldSpec::one(
            "种类",
            &["手机", "水杯", "包", "纸巾", "书", "雨伞", "钥匙", "眼镜", UNKNOWN],
        ),
        FieldSpec::one("位置", OBJECT_POSITIONS),
    ],
    behaviors: &[],
};

pub const PETS: EntitySpec = EntitySpec {
    group: "宠物",
    count_field: "宠物数",
    list_field: "具体信息",
    max_entities: 3,
    fields: &[
        FieldSpec::one("种类", &["猫", "狗", UNKNOWN]),
        FieldSpec::one("位置", OBJECT_POSITIONS),
    ],
    behaviors: &[],
};

const CABIN_FIELDS: &[FieldSpec] = &[
    FieldSpec::one("是否为黑夜", YES_NO),
    FieldSpec::one("是否有中央扶手箱", YES_NO),
];

const CABIN_ENTITIES: &[EntitySpec] = &[PERSONS, ITEMS, PETS];

impl AnswerSchema {
    /// The cabin occupancy schema answered by the `cabin` prompt template.
    #[must_use]
    pub const fn cabin() -> Self {
        Self {
            fields: CABIN_FIELDS,
            entities: CABIN_ENTITIES,
        }
    }

    /// Every value in `answer` that falls outside the schema's vocabulary.
    ///
    /// Only reports; nothing is changed. Missing fields are not violations.
    #[must_use]
    pub fn violations(&self, answer: &Value) -> Vec<Violation> {
        let mut out = Vec::new();
        for field in self.fields {
            check_field(field, answer, "", &mut out);
        }
        for entity in self.entities {
            let Some(group) = answer.get(entity.group) else {
                continue;
            };
            let group_path = format!("/{}", entity.group);
            if let Some(count) = group.get(entity.count_field) {
                let count_str = scalar_to_string(count);
                let legal = count_str
                    .parse::<usize>()
                    .is_ok_and(|n| n <= entity.max_entities);
                if !legal {
                    out.push(Violation {
                        path: format!("{group_path}/{}", entity.count_field),
                        value: count_str,
                    });
                }
            }
            let Some(list) = group.get(entity.list_field).and_then(Value::as_array) else {
                continue;
            };
            for (i, item) in list.iter().enumerate() {
                let item_path = format!("{group_path}/{}/{i}", entity.list_field);
                for field in entity.fields {
                    check_field(field, item, &item_path, &mut out);
                }
                check_behaviors(entity.behaviors, item, &item_path, &mut out);
            }
        }
        out
    }
}

fn check_field(field: &FieldSpec, parent: &Value, parent_path: &str, out: &mut Vec<Violation>) {
    let Some(value) = parent.get(field.name) else {
        return;
    };
    let value = scalar_to_string(value);
    if !field.illegal_parts(&value).is_empty() {
        out.push(Violation {
            path: format!("{parent_path}/{}", field.name),
            value,
        });
    }
}

fn check_behaviors(
    behaviors: &[&str],
    entity: &Value,
    entity_path: &str,
    out: &mut Vec<Violation>,
) {
    let Some(list) = entity.get("行为").and_then(Value::as_array) else {
        return;
    };
    for (i, answer) in list.iter().enumerate() {
        let Some(obj) = answer.as_object() else {
            continue;
        };
        for (question, value) in obj {
            let value = scalar_to_string(value);
            if !behaviors.contains(&question.as_str()) || !YES_NO.contains(&value.as_str()) {
                out.push(Violation {
                    path: format!("{entity_path}/行为/{i}/{question}"),
                    value,
                });
            }
        }
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legal_answer_has_no_violations() {
        let answer = json!({
            "是否为黑夜": "否",
            "人": {"人数": "1", "具体信息": [
                {"性别": "男", "位置": "前排右", "配饰": "眼镜,手表", "上衣颜色": "黑，白",
                 "行为": [{"是否在阅读": "否"}, {"是否在站立": "否"}]}
            ]},
            "物品": {"物品数": 0, "具体信息": []}
        });
        assert!(AnswerSchema::cabin().violations(&answer).is_empty());
    }

    #[test]
    fn reports_out_of_vocabulary_values_with_paths() {
        let answer = json!({
            "是否为黑夜": "不确定",
            "人": {"人数": "一", "具体信息": [
                {"性别": "未知", "位置": "车上", "配饰": "太阳镜,帽子",
                 "行为": [{"是否在吃东西": "不清楚"}]}
            ]}
        });
        let paths: Vec<String> = AnswerSchema::cabin()
            .violations(&answer)
            .into_iter()
            .map(|v| v.path)
            .collect();
        assert_eq!(
            paths,
            [
                "/是否为黑夜",
                "/人/人数",
                "/人/具体信息/0/性别",
                "/人/具体信息/0/位置",
                "/人/具体信息/0/配饰",
                "/人/具体信息/0/行为/0/是否在吃东西",
            ]
        );
    }

    #[test]
    fn unknown_is_case_insensitive() {
        let field = FieldSpec::one("性别", &["男", "女", UNKNOWN]);
        assert!(field.illegal_parts("UNKNOWN").is_empty());
        assert_eq!(field.illegal_parts("男性"), ["男性"]);
    }
}
