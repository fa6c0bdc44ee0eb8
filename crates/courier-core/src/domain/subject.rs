//! Subject conventions: positional task subjects, reply subjects, and the
//! stream / durable names derived from fleet and agent identifiers.

/// Fallback task id when neither the payload nor the subject carries one.
pub const UNKNOWN_TASK_ID: &str = "unknown";

/// Fallback domain when the subject is too short to carry one.
pub const DEFAULT_DOMAIN: &str = "general";

/// Position of the domain segment in `prefix.tasks.<domain>....<taskId>`.
const DOMAIN_SEGMENT: usize = 2;

/// Values derived purely from a task subject.
///
/// Subjects follow `prefix.tasks.<domain>....<taskId>`. Shorter subjects are
/// not rejected; missing positions fall back to [`DEFAULT_DOMAIN`] and
/// [`UNKNOWN_TASK_ID`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectParts {
    pub domain: String,
    pub task_id: String,
}

impl SubjectParts {
    pub fn parse(subject: &str) -> Self {
        let segments: Vec<&str> = subject.split('.').collect();

        let domain = segments
            .get(DOMAIN_SEGMENT)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| DEFAULT_DOMAIN.to_string());

        let task_id = segments
            .last()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| UNKNOWN_TASK_ID.to_string());

        Self { domain, task_id }
    }
}

/// Default subject filter for a fleet when none is configured.
pub fn default_task_subject(fleet_id: &str) -> String {
    format!("{fleet_id}.tasks.>")
}

/// `{fleetId}.results.{taskId}`, used when a request has no explicit reply subject.
pub fn default_reply_subject(fleet_id: &str, task_id: Option<&str>) -> String {
    let task_id = task_id.filter(|s| !s.is_empty()).unwrap_or(UNKNOWN_TASK_ID);
    format!("{fleet_id}.results.{task_id}")
}

/// Explicit reply subject wins; otherwise the fleet's result subject.
pub fn reply_subject(fleet_id: &str, explicit: Option<&str>, task_id: Option<&str>) -> String {
    match explicit.map(str::trim).filter(|s| !s.is_empty()) {
        Some(subject) => subject.to_string(),
        None => default_reply_subject(fleet_id, task_id),
    }
}

/// Stream that carries a fleet's tasks: `fleet-a` -> `FLEET_A_TASKS`.
pub fn stream_name(fleet_id: &str) -> String {
    let base: String = fleet_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{base}_TASKS")
}

/// Subjects bound to the fleet's task stream.
pub fn stream_subjects(fleet_id: &str) -> Vec<String> {
    vec![default_task_subject(fleet_id)]
}

/// Durable consumer name for one subject filter.
///
/// An override is used verbatim when it is the only subscription; otherwise
/// every durable gets a subject suffix so that filters never share a cursor.
pub fn durable_name(
    agent_id: &str,
    override_name: Option<&str>,
    subject: &str,
    subject_count: usize,
) -> String {
    match override_name.filter(|s| !s.is_empty()) {
        Some(name) if subject_count <= 1 => name.to_string(),
        Some(name) => format!("{name}-{}", subject_token(subject)),
        None => format!("{agent_id}-{}", subject_token(subject)),
    }
}

/// JetStream names may not contain `.`, `*` or `>`.
fn subject_token(subject: &str) -> String {
    subject
        .split('.')
        .map(|segment| match segment {
            "*" => "any",
            ">" => "all",
            other => other,
        })
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("fleet-a.tasks.security.t1", "security", "t1")]
    #[case("fleet-a.tasks.ops.batch.abc", "ops", "abc")]
    #[case("fleet-a.tasks", DEFAULT_DOMAIN, "tasks")]
    #[case("single", DEFAULT_DOMAIN, "single")]
    #[case("", DEFAULT_DOMAIN, UNKNOWN_TASK_ID)]
    #[case("fleet-a.tasks.ops.", "ops", UNKNOWN_TASK_ID)]
    fn parses_positional_segments(
        #[case] subject: &str,
        #[case] domain: &str,
        #[case] task_id: &str,
    ) {
        let parts = SubjectParts::parse(subject);
        assert_eq!(parts.domain, domain);
        assert_eq!(parts.task_id, task_id);
    }

    #[test]
    fn explicit_reply_subject_wins() {
        assert_eq!(reply_subject("fleet-a", Some("r.abc"), Some("abc")), "r.abc");
        assert_eq!(
            reply_subject("fleet-a", Some("  "), Some("abc")),
            "fleet-a.results.abc"
        );
        assert_eq!(reply_subject("fleet-a", None, None), "fleet-a.results.unknown");
    }

    #[test]
    fn stream_name_is_sanitized() {
        assert_eq!(stream_name("fleet-a"), "FLEET_A_TASKS");
        assert_eq!(stream_name("prod.eu"), "PROD_EU_TASKS");
    }

    #[test]
    fn durable_names_are_deterministic() {
        assert_eq!(
            durable_name("knight-1", None, "fleet-a.tasks.>", 1),
            "knight-1-fleet-a_tasks_all"
        );
        assert_eq!(
            durable_name("knight-1", Some("custom"), "fleet-a.tasks.>", 1),
            "custom"
        );
        assert_eq!(
            durable_name("knight-1", Some("custom"), "fleet-a.tasks.*.ops", 2),
            "custom-fleet-a_tasks_any_ops"
        );
    }
}
