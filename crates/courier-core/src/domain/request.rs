//! Task request normalization.
//!
//! Producers send several JSON shapes (`message` or `task`, flat or nested
//! metadata, snake_case or camelCase). Everything goes through
//! [`TaskRequest::from_message`], which produces one canonical shape. Payloads
//! that are not a recognizable JSON request are treated as plain task text.

use serde::Serialize;
use serde_json::{Map, Value};

use super::message::TaskMessage;
use super::subject::SubjectParts;

/// Keys accepted for the task text, in lookup order.
const MESSAGE_KEYS: &[&str] = &["message", "task"];

/// Key of the nested metadata object.
const METADATA_KEY: &str = "metadata";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    TaskId,
    Domain,
    ReplySubject,
    Knight,
    Skill,
    SkillContent,
}

/// Every accepted spelling of every metadata field.
///
/// Lookup order: nested `metadata` object first, then the top level; within
/// one object, aliases are tried left to right.
const FIELD_ALIASES: &[(Field, &[&str])] = &[
    (Field::TaskId, &["taskId", "task_id"]),
    (Field::Domain, &["domain"]),
    (Field::ReplySubject, &["replySubject", "reply_subject"]),
    (Field::Knight, &["knight"]),
    (Field::Skill, &["skill"]),
    (Field::SkillContent, &["skillContent", "skill_content"]),
];

/// Which input shape produced a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestShape {
    Json,
    PlainText,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetadata {
    pub task_id: String,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knight: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill_content: Option<String>,
}

/// Canonical task request. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRequest {
    pub message: String,
    pub metadata: TaskMetadata,
    #[serde(skip)]
    pub shape: RequestShape,
}

impl TaskRequest {
    /// Normalize a raw message. Never fails: unrecognized payloads become
    /// plain-text requests whose ids come from the subject.
    pub fn from_message(message: &TaskMessage) -> Self {
        let text = message.text();
        let defaults = SubjectParts::parse(&message.subject);

        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(obj)) => match Self::from_object(&obj, &defaults) {
                Some(request) => request,
                None => Self::plain_text(text, defaults),
            },
            _ => Self::plain_text(text, defaults),
        }
    }

    fn from_object(obj: &Map<String, Value>, defaults: &SubjectParts) -> Option<Self> {
        let message = MESSAGE_KEYS
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_str))?
            .to_string();

        let nested = obj.get(METADATA_KEY).and_then(Value::as_object);
        let field = |f: Field| lookup(f, nested, obj);

        Some(Self {
            message,
            metadata: TaskMetadata {
                task_id: field(Field::TaskId).unwrap_or_else(|| defaults.task_id.clone()),
                domain: field(Field::Domain).unwrap_or_else(|| defaults.domain.clone()),
                reply_subject: field(Field::ReplySubject),
                knight: field(Field::Knight),
                skill: field(Field::Skill),
                skill_content: field(Field::SkillContent),
            },
            shape: RequestShape::Json,
        })
    }

    fn plain_text(text: String, defaults: SubjectParts) -> Self {
        Self {
            message: text,
            metadata: TaskMetadata {
                task_id: defaults.task_id,
                domain: defaults.domain,
                reply_subject: None,
                knight: None,
                skill: None,
                skill_content: None,
            },
            shape: RequestShape::PlainText,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.metadata.task_id
    }

    pub fn domain(&self) -> &str {
        &self.metadata.domain
    }

    pub fn reply_subject(&self) -> Option<&str> {
        self.metadata.reply_subject.as_deref()
    }

    pub fn skill(&self) -> Option<&str> {
        self.metadata.skill.as_deref()
    }
}

fn lookup(
    field: Field,
    nested: Option<&Map<String, Value>>,
    top: &Map<String, Value>,
) -> Option<String> {
    let aliases = FIELD_ALIASES
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, aliases)| *aliases)
        .unwrap_or(&[]);

    nested
        .into_iter()
        .chain(std::iter::once(top))
        .flat_map(|obj| aliases.iter().filter_map(move |key| obj.get(*key)))
        .find_map(scalar_to_string)
}

/// Strings are taken as-is, numbers are stringified (numeric task ids are
/// common); empty strings and other types count as absent.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(subject: &str, payload: &str) -> TaskRequest {
        TaskRequest::from_message(&TaskMessage::new(subject, payload))
    }

    #[rstest]
    #[case(r#"{"message":"m","metadata":{"taskId":"abc"}}"#)]
    #[case(r#"{"message":"m","metadata":{"task_id":"abc"}}"#)]
    #[case(r#"{"message":"m","taskId":"abc"}"#)]
    #[case(r#"{"message":"m","task_id":"abc"}"#)]
    #[case(r#"{"task":"m","metadata":{"taskId":"abc"}}"#)]
    fn task_id_is_found_in_every_accepted_shape(#[case] payload: &str) {
        let req = parse("fleet-a.tasks.ops.zzz", payload);
        assert_eq!(req.task_id(), "abc");
        assert_eq!(req.message, "m");
        assert_eq!(req.shape, RequestShape::Json);
    }

    #[test]
    fn nested_metadata_takes_precedence_over_top_level() {
        let req = parse(
            "fleet-a.tasks.ops.zzz",
            r#"{"message":"m","taskId":"flat","metadata":{"taskId":"nested"}}"#,
        );
        assert_eq!(req.task_id(), "nested");
    }

    #[test]
    fn all_metadata_fields_are_normalized() {
        let req = parse(
            "fleet-a.tasks.ops.zzz",
            r#"{
                "task": "review this",
                "reply_subject": "r.1",
                "knight": "galahad",
                "metadata": {
                    "task_id": "t-9",
                    "domain": "security",
                    "skill": "code-review",
                    "skill_content": "inline"
                }
            }"#,
        );
        assert_eq!(req.message, "review this");
        assert_eq!(req.task_id(), "t-9");
        assert_eq!(req.domain(), "security");
        assert_eq!(req.reply_subject(), Some("r.1"));
        assert_eq!(req.metadata.knight.as_deref(), Some("galahad"));
        assert_eq!(req.skill(), Some("code-review"));
        assert_eq!(req.metadata.skill_content.as_deref(), Some("inline"));
    }

    #[test]
    fn plain_text_takes_ids_from_subject() {
        let req = parse("fleet-a.tasks.security.t1", "scan the repo");
        assert_eq!(req.message, "scan the repo");
        assert_eq!(req.domain(), "security");
        assert_eq!(req.task_id(), "t1");
        assert_eq!(req.shape, RequestShape::PlainText);
    }

    #[rstest]
    #[case(r#"{"metadata":{"taskId":"abc"}}"#)]
    #[case(r#"["message"]"#)]
    #[case(r#""just a string""#)]
    #[case(r#"{"message": 42}"#)]
    fn unrecognized_json_falls_back_to_plain_text(#[case] payload: &str) {
        let req = parse("fleet-a.tasks.ops.t2", payload);
        assert_eq!(req.shape, RequestShape::PlainText);
        assert_eq!(req.message, payload);
        assert_eq!(req.task_id(), "t2");
    }

    #[test]
    fn json_without_ids_uses_subject_defaults() {
        let req = parse("fleet-a.tasks.infra.t3", r#"{"message":"m"}"#);
        assert_eq!(req.task_id(), "t3");
        assert_eq!(req.domain(), "infra");
    }

    #[test]
    fn numeric_task_id_is_stringified() {
        let req = parse("x", r#"{"message":"m","taskId":17}"#);
        assert_eq!(req.task_id(), "17");
    }
}
