//! Pure `{{var}}` placeholder expansion against task/execution metadata and
//! the current wall clock. Used on handler file paths, notification and
//! webhook messages/URLs, and shell command text (§4.2).

use crate::execution::Execution;
use crate::model::Task;
use chrono::Utc;

/// Expands every recognized `{{placeholder}}` in `template`. Unknown
/// placeholders are left literal.
#[must_use]
pub fn expand(template: &str, task: Option<&Task>, execution: Option<&Execution>) -> String {
    let now = Utc::now();
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();

    let mut i = 0;
    while i < bytes.len() {
        if template[i..].starts_with("{{") {
            if let Some(rel_end) = template[i..].find("}}") {
                let name = &template[i + 2..i + rel_end];
                match resolve(name, task, execution, now) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("{{");
                        out.push_str(name);
                        out.push_str("}}");
                    }
                }
                i += rel_end + 2;
                continue;
            }
        }
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn resolve(
    name: &str,
    task: Option<&Task>,
    execution: Option<&Execution>,
    now: chrono::DateTime<Utc>,
) -> Option<String> {
    use chrono::Datelike;
    use chrono::Timelike;

    Some(match name {
        "date" => now.format("%Y-%m-%d").to_string(),
        "year" => format!("{:04}", now.year()),
        "month" => format!("{:02}", now.month()),
        "day" => format!("{:02}", now.day()),
        "hour" => format!("{:02}", now.hour()),
        "minute" => format!("{:02}", now.minute()),
        "second" => format!("{:02}", now.second()),
        "timestamp" => now.timestamp().to_string(),
        "week_number" => now.iso_week().week().to_string(),
        "datetime" => now.format("%Y-%m-%d_%H-%M-%S").to_string(),
        "date_hour" => now.format("%Y-%m-%d_%H").to_string(),
        "task_id" => task.map_or_else(|| "unknown".to_string(), |t| t.id.to_string()),
        "task_name" => task.map_or_else(|| "unknown".to_string(), |t| t.name.clone()),
        "task_type" => task.map_or_else(|| "unknown".to_string(), |t| t.kind().to_string()),
        "execution_id" => execution.map_or_else(|| "unknown".to_string(), |e| e.id.to_string()),
        "status" => execution.map_or_else(|| "unknown".to_string(), |e| e.status.to_string()),
        "trigger_type" => {
            execution.map_or_else(|| "unknown".to_string(), |e| e.trigger_type.clone())
        }
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_placeholder_left_literal() {
        let out = expand("hello {{nonexistent}} world", None, None);
        assert_eq!(out, "hello {{nonexistent}} world");
    }

    #[test]
    fn task_fields_fall_back_to_unknown() {
        let out = expand("{{task_id}}/{{task_name}}", None, None);
        assert_eq!(out, "unknown/unknown");
    }

    #[test]
    fn date_placeholder_has_expected_shape() {
        let out = expand("{{date}}", None, None);
        assert_eq!(out.len(), 10);
        assert_eq!(out.chars().nth(4), Some('-'));
    }

    #[test]
    fn multiple_placeholders_in_one_template() {
        let out = expand("{{datetime}} / {{date_hour}}", None, None);
        let parts: Vec<&str> = out.split(" / ").collect();
        assert_eq!(parts.len(), 2);
    }
}
