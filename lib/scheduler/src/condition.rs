//! Pre-execution gate, evaluated in the fixed order documented on
//! [`ConditionEvaluator::evaluate`] (§4.8): time window, holiday calendar,
//! file presence/absence, working-tree dirtiness, then a custom shell
//! comparison. The first gate to fail short-circuits the rest.

use crate::cron::resolve_tz_offset;
use crate::model::{ComparisonOperator, Conditions, CustomCondition};
use chrono::{Timelike, Utc};
use tokio::process::Command;

/// Why a task's conditions caused it to be skipped, surfaced in logs; the
/// engine itself only needs the yes/no.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    TimeWindow,
    Holiday,
    FileMustExist,
    FileMustNotExist,
    GitClean,
    CustomSkipIf,
    CustomOnlyIf,
}

/// Stateless evaluator for a task's [`Conditions`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Runs every configured gate in spec order. Returns `None` to proceed,
    /// `Some(reason)` to skip.
    pub async fn evaluate(&self, conditions: &Conditions) -> Option<SkipReason> {
        if let Some(reason) = self.check_time_window(conditions) {
            return Some(reason);
        }
        if let Some(reason) = self.check_holiday(conditions) {
            return Some(reason);
        }
        if let Some(reason) = self.check_file_presence(conditions) {
            return Some(reason);
        }
        if let Some(reason) = self.check_git_dirty(conditions).await {
            return Some(reason);
        }
        if let Some(reason) = self.check_custom(conditions).await {
            return Some(reason);
        }
        None
    }

    fn check_time_window(&self, conditions: &Conditions) -> Option<SkipReason> {
        let (Some(start), Some(end)) =
            (&conditions.time_window_start, &conditions.time_window_end)
        else {
            return None;
        };
        let start_minutes = parse_hhmm(start)?;
        let end_minutes = parse_hhmm(end)?;

        let offset = resolve_tz_offset(
            conditions.time_window_tz.as_deref().unwrap_or("UTC"),
        );
        let now = Utc::now().with_timezone(&offset);
        let current_minutes = now.hour() * 60 + now.minute();

        let in_window = if start_minutes <= end_minutes {
            (start_minutes..=end_minutes).contains(&current_minutes)
        } else {
            current_minutes >= start_minutes || current_minutes <= end_minutes
        };

        if in_window {
            None
        } else {
            Some(SkipReason::TimeWindow)
        }
    }

    fn check_holiday(&self, conditions: &Conditions) -> Option<SkipReason> {
        let region = conditions.holiday_region.as_deref()?;
        let today = Utc::now().date_naive();
        if is_holiday(region, today) {
            Some(SkipReason::Holiday)
        } else {
            None
        }
    }

    fn check_file_presence(&self, conditions: &Conditions) -> Option<SkipReason> {
        if let Some(path) = &conditions.only_if_file_exists {
            if !std::path::Path::new(path).exists() {
                return Some(SkipReason::FileMustExist);
            }
        }
        if let Some(path) = &conditions.skip_if_file_exists {
            if std::path::Path::new(path).exists() {
                return Some(SkipReason::FileMustNotExist);
            }
        }
        None
    }

    async fn check_git_dirty(&self, conditions: &Conditions) -> Option<SkipReason> {
        if !conditions.only_if_git_dirty {
            return None;
        }
        // A failed git check is treated as "clean" (§4.8 rule 4), so it
        // skips just like an actually-clean tree.
        let dirty = git_is_dirty().await.unwrap_or(false);
        if dirty {
            None
        } else {
            Some(SkipReason::GitClean)
        }
    }

    async fn check_custom(&self, conditions: &Conditions) -> Option<SkipReason> {
        if let Some(custom) = &conditions.skip_if {
            // A failed shell invocation is treated as "comparison false"
            // (§4.8 rule 5), so it does not skip.
            if evaluate_custom(custom).await.unwrap_or(false) {
                return Some(SkipReason::CustomSkipIf);
            }
        }
        if let Some(custom) = &conditions.only_if {
            if !evaluate_custom(custom).await.unwrap_or(false) {
                return Some(SkipReason::CustomOnlyIf);
            }
        }
        None
    }
}

fn parse_hhmm(value: &str) -> Option<u32> {
    let (h, m) = value.split_once(':')?;
    let hours: u32 = h.parse().ok()?;
    let minutes: u32 = m.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// A small, explicit holiday calendar. No holiday-calendar crate appears
/// anywhere in the source corpus this codebase was grown from, so this
/// covers a handful of fixed-date US federal holidays rather than a real
/// observed-holiday ruleset.
fn is_holiday(region: &str, date: chrono::NaiveDate) -> bool {
    use chrono::Datelike;
    if region != "US" {
        return false;
    }
    matches!((date.month(), date.day()), (1, 1) | (7, 4) | (12, 25))
}

async fn git_is_dirty() -> Result<bool, std::io::Error> {
    let output = Command::new("git")
        .args(["status", "--porcelain"])
        .output()
        .await?;
    if !output.status.success() {
        return Err(std::io::Error::other("git status failed"));
    }
    Ok(!output.stdout.is_empty())
}

async fn evaluate_custom(condition: &CustomCondition) -> Result<bool, std::io::Error> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(&condition.command)
        .output()
        .await?;
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(compare(&stdout, &condition.value, condition.operator))
}

fn compare(actual: &str, expected: &str, operator: ComparisonOperator) -> bool {
    match operator {
        ComparisonOperator::Eq => actual == expected,
        ComparisonOperator::Ne => actual != expected,
        ComparisonOperator::Lt | ComparisonOperator::Le | ComparisonOperator::Gt | ComparisonOperator::Ge => {
            let (Ok(a), Ok(b)) = (actual.parse::<f64>(), expected.parse::<f64>()) else {
                return false;
            };
            match operator {
                ComparisonOperator::Lt => a < b,
                ComparisonOperator::Le => a <= b,
                ComparisonOperator::Gt => a > b,
                ComparisonOperator::Ge => a >= b,
                _ => unreachable!(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_conditions_always_proceed() {
        let evaluator = ConditionEvaluator::new();
        assert_eq!(evaluator.evaluate(&Conditions::default()).await, None);
    }

    #[tokio::test]
    async fn only_if_file_exists_skips_when_missing() {
        let evaluator = ConditionEvaluator::new();
        let conditions = Conditions {
            only_if_file_exists: Some("/definitely/does/not/exist/xyz".into()),
            ..Default::default()
        };
        assert_eq!(
            evaluator.evaluate(&conditions).await,
            Some(SkipReason::FileMustExist)
        );
    }

    #[tokio::test]
    async fn skip_if_file_exists_skips_when_present() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let evaluator = ConditionEvaluator::new();
        let conditions = Conditions {
            skip_if_file_exists: Some(tmp.path().to_string_lossy().into_owned()),
            ..Default::default()
        };
        assert_eq!(
            evaluator.evaluate(&conditions).await,
            Some(SkipReason::FileMustNotExist)
        );
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        assert!(parse_hhmm("22:00").unwrap() > parse_hhmm("06:00").unwrap());
    }

    #[test]
    fn numeric_comparison_operators() {
        assert!(compare("5", "3", ComparisonOperator::Gt));
        assert!(!compare("2", "3", ComparisonOperator::Gt));
        assert!(compare("abc", "abc", ComparisonOperator::Eq));
    }

    #[tokio::test]
    async fn custom_skip_if_true_skips() {
        let evaluator = ConditionEvaluator::new();
        let conditions = Conditions {
            skip_if: Some(CustomCondition {
                command: "echo yes".into(),
                operator: ComparisonOperator::Eq,
                value: "yes".into(),
            }),
            ..Default::default()
        };
        assert_eq!(
            evaluator.evaluate(&conditions).await,
            Some(SkipReason::CustomSkipIf)
        );
    }

    #[test]
    fn is_holiday_matches_fixed_dates() {
        use chrono::NaiveDate;
        assert!(is_holiday("US", NaiveDate::from_ymd_opt(2024, 7, 4).unwrap()));
        assert!(!is_holiday("US", NaiveDate::from_ymd_opt(2024, 7, 5).unwrap()));
        assert!(!is_holiday("CA", NaiveDate::from_ymd_opt(2024, 7, 4).unwrap()));
    }
}
