use common_types::{AnswerSchema, EntitySpec, FieldSpec, Record, SOURCE_TEXT_FIELD};
use serde_json::{Map, Value, json};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("unknown prompt template '{0}' (expected one of: cabin, translation, scene)")]
    UnknownTemplate(String),
    #[error("unknown system prompt '{0}' (expected one of: multimodal, cabin, none)")]
    UnknownSystemPrompt(String),
    #[error("cannot read template file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub const MULTIMODAL_SYSTEM_PROMPT: &str = "你是一个能够同时理解图片和文字的智能助手。请根据用户提供的图片和文字内容作答，只输出严格合法的 JSON，不要输出任何解释。";

pub const CABIN_SYSTEM_PROMPT: &str = "你是一位车内识别助手，负责根据车内摄像头图片回答关于乘员、物品和宠物的选择题。答案只能从给出的备选项中选取，只输出 JSON。";

const CABIN_TEMPLATE: &str = r#"{source_text}
角色: 你是一位车内识别助手。
任务: 严格按照 json 格式给出答案, 每个答案只能从备选项中选取, 不要给出备选项中未出现的答案。下面是带有全部备选项的模版:
{answer_options}

背景:
- 目标: 根据图片, 为 json 模版中的每个选择题选出最合适的答案
输出要求:
- 逐个分析每个问题, 行为列表中的每一项都要单独判断后再作答
- 答案必须是该问题的备选项之一, 否则重新从备选项中选择
- 以图片左侧为左, 右侧为右
- 有多个人时按照 前排左、前排右、中排左（若有）、中排右（若有）、后排左、后排右 的顺序展开
- 两排座位用 前排、后排 称呼; 三排座位用 前排、中排、后排 称呼
- 具体信息列表的项数必须与人数、物品数、宠物数一致
- 配饰、上衣颜色、下装颜色可以多选, 用英文逗号分隔; 其余问题只选一个
- 结合常识判断行为是否可能同时出现, 例如一般不会在阅读的同时化妆
- 14 岁以下视为儿童, 能在车内站立的也视为儿童
- 两排座位之间为过道
- 所有表示不确定的词语 (未知、可能、不明) 一律用 unknown 代替
格式: 只输出替换答案后的 json, 不要输出其他内容

好的输出:
{"是否为黑夜": "否", "是否有中央扶手箱": "是",
 "人": {"人数": "1", "具体信息": [{"年龄": "成人", "性别": "男", "位置": "前排右", "配饰": "眼镜,手表",
   "上衣样式": "T恤", "上衣颜色": "黑", "下装样式": "长裤", "下装颜色": "蓝",
   "行为": [{"是否在阅读": "否"}, {"是否在玩手机": "是"}, {"是否未系安全带": "否"}]}]},
 "物品": {"物品数": "1", "具体信息": [{"种类": "水杯", "位置": "中央扶手箱-杯槽"}]},
 "宠物": {"宠物数": "0", "具体信息": []}}

避免的输出:
{"人": {"人数": "一", "具体信息": [{"性别": "未知", "位置": "车上", "配饰": "太阳镜,高跟靴子",
   "行为": [{"是否在吃东西": "不清楚"}, {"是否头或手伸出窗外": "不确定"}]}]}}
"#;

const TRANSLATION_TEMPLATE: &str = r#"As an expert linguistic evaluator for English/Chinese into Thai/Lao, assess the quality of the target translation against its source text.

Evaluation criteria:
1. Accuracy: does the target convey the meaning, nuance and intent of the source completely? Note omissions, additions and mistranslations.
2. Fluency and grammar: is the target grammatical and natural to a native speaker?
3. Machine translation artifacts: does it read like raw, unedited machine output (overly literal phrasing, unnatural word choice, source-language structure)?

Write the analysis in Simplified Chinese.

Source text:
"{source_text}"

Target text:
"{target_text}"

Respond with a single valid JSON object and nothing else, containing exactly these keys:
- "evaluation_summary": one sentence summarising the translation quality.
- "accuracy_critique": a detailed critique of accuracy.
- "fluency_critique": a detailed critique of fluency and grammar.
- "mt_suspicion_critique": whether it reads like machine translation, and why.
- "quality_score": an integer from 1 (unusable) to 10 (perfect, human quality).
"#;

const SCENE_TEMPLATE: &str = r#"{source_text}
请描述图片中的车内场景, 只输出如下结构的 json:
{"座位排数": "<2 或 3>", "乘员": [{"位置": "<座位>", "描述": "<外貌、衣着与正在做的事>"}], "物品": ["<可见物品及其位置>"], "整体描述": "<一到两句话>"}
"#;

/// An instruction template with `{name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    name: String,
    text: String,
    schema: Option<AnswerSchema>,
}

impl PromptTemplate {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            schema: None,
        }
    }

    pub fn builtin(name: &str) -> Result<Self, PromptError> {
        let template = match name {
            "cabin" => {
                let schema = AnswerSchema::cabin();
                let text = render_template(
                    CABIN_TEMPLATE,
                    &[("answer_options", &answer_options(&schema))],
                );
                Self {
                    schema: Some(schema),
                    ..Self::new(name, text)
                }
            }
            "translation" => Self::new(name, TRANSLATION_TEMPLATE),
            "scene" => Self::new(name, SCENE_TEMPLATE),
            other => return Err(PromptError::UnknownTemplate(other.to_string())),
        };
        Ok(template)
    }

    pub fn from_file(path: &Path) -> Result<Self, PromptError> {
        let text = std::fs::read_to_string(path).map_err(|source| PromptError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_stem()
            .map_or_else(|| "custom".to_string(), |s| s.to_string_lossy().into_owned());
        Ok(Self::new(name, text))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Catalog the answers to this template must stay within; only the cabin template has one.
    #[must_use]
    pub const fn answer_schema(&self) -> Option<AnswerSchema> {
        self.schema
    }

    #[must_use]
    pub fn render_with(&self, vars: &[(&str, &str)]) -> String {
        render_template(&self.text, vars)
    }

    /// Renders with every scalar field of `record` available as a variable.
    ///
    /// `source_text` is always defined (trimmed, empty when missing).
    #[must_use]
    pub fn render_record(&self, record: &Record) -> String {
        let scalars: Vec<(&str, String)> = record
            .fields
            .iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) => Some((k.as_str(), s.trim().to_string())),
                Value::Number(n) => Some((k.as_str(), n.to_string())),
                Value::Bool(b) => Some((k.as_str(), b.to_string())),
                _ => None,
            })
            .filter(|(k, _)| *k != SOURCE_TEXT_FIELD)
            .collect();
        let mut vars: Vec<(&str, &str)> = vec![(SOURCE_TEXT_FIELD, record.source_text())];
        vars.extend(scalars.iter().map(|(k, v)| (*k, v.as_str())));
        self.render_with(&vars)
    }
}

/// Resolves a built-in system prompt by name; `none` (or empty) means no system message.
pub fn builtin_system_prompt(name: &str) -> Result<Option<String>, PromptError> {
    match name.trim() {
        "" | "none" => Ok(None),
        "multimodal" => Ok(Some(MULTIMODAL_SYSTEM_PROMPT.to_string())),
        "cabin" => Ok(Some(CABIN_SYSTEM_PROMPT.to_string())),
        other => Err(PromptError::UnknownSystemPrompt(other.to_string())),
    }
}

/// Single-pass `{name}` substitution.
///
/// Only braces around an identifier count as placeholders, so JSON examples in a template are
/// left alone. Placeholders without a matching variable are kept verbatim, and substituted
/// values are never scanned again.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let name_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let name = &after[..name_len];
        let value = (!name.is_empty() && after[name_len..].starts_with('}'))
            .then(|| vars.iter().find(|(k, _)| *k == name).map(|(_, v)| *v))
            .flatten();
        match value {
            Some(value) => {
                out.push_str(value);
                rest = &after[name_len + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Pretty JSON skeleton listing every legal value for every answer field.
fn answer_options(schema: &AnswerSchema) -> String {
    let mut root = Map::new();
    for field in schema.fields {
        root.insert(field.name.to_string(), options(field));
    }
    for entity in schema.entities {
        root.insert(entity.group.to_string(), entity_options(entity));
    }
    serde_json::to_string_pretty(&Value::Object(root)).unwrap_or_default()
}

fn options(field: &FieldSpec) -> Value {
    Value::String(field.values.join(","))
}

fn entity_options(entity: &EntitySpec) -> Value {
    let mut item = Map::new();
    for field in entity.fields {
        item.insert(field.name.to_string(), options(field));
    }
    if !entity.behaviors.is_empty() {
        let behaviors = entity
            .behaviors
            .iter()
            .map(|q| json!({ (*q): "是,否" }))
            .collect();
        item.insert("行为".to_string(), Value::Array(behaviors));
    }
    let counts: Vec<String> = (0..=entity.max_entities).map(|n| n.to_string()).collect();
    json!({
        (entity.count_field): counts.join(","),
        (entity.list_field): [Value::Object(item)],
    })
}
