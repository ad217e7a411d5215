//! Rule evaluation engine.
//!
//! Rule sets are evaluated top to bottom against each stored record; the
//! first rule set whose conditions hold is the one whose actions apply.
//! Condition evaluation never fails: anything that cannot be evaluated
//! (bad dates, bad thresholds, unknown predicates) simply does not match.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use crate::error::RuleError;
use crate::pipeline::decode::RECEIVED_AT_OFFSET_MINUTES;
use crate::pipeline::types::{EmailRecord, Field, RECEIVED_AT_FORMAT};

/// Days per month in age thresholds.
const DAYS_PER_MONTH: i64 = 30;

/// How a rule set combines its conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Aggregator {
    #[default]
    All,
    Any,
}

impl FromStr for Aggregator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "any" => Ok(Self::Any),
            other => Err(format!("unknown rule-set predicate '{other}'")),
        }
    }
}

/// Comparison a condition applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Contains,
    DoesNotContain,
    Equals,
    DoesNotEqual,
    /// Received more recently than `now - threshold`.
    LessThan,
    /// Received earlier than `now - threshold`.
    GreaterThan,
    /// Never matches.
    Unsupported(String),
}

impl From<&str> for Predicate {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "contains" => Self::Contains,
            "does_not_contain" => Self::DoesNotContain,
            "equals" => Self::Equals,
            "does_not_equal" => Self::DoesNotEqual,
            "less_than" => Self::LessThan,
            "greater_than" => Self::GreaterThan,
            other => Self::Unsupported(other.to_string()),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contains => f.write_str("contains"),
            Self::DoesNotContain => f.write_str("does_not_contain"),
            Self::Equals => f.write_str("equals"),
            Self::DoesNotEqual => f.write_str("does_not_equal"),
            Self::LessThan => f.write_str("less_than"),
            Self::GreaterThan => f.write_str("greater_than"),
            Self::Unsupported(name) => f.write_str(name),
        }
    }
}

/// One field/predicate/expected-value test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub field: Field,
    pub predicate: Predicate,
    pub expected: String,
}

impl Condition {
    pub fn new(field: Field, predicate: impl Into<Predicate>, expected: impl Into<String>) -> Self {
        Self {
            field,
            predicate: predicate.into(),
            expected: expected.into(),
        }
    }

    /// Whether `record` satisfies this condition; `now` anchors age checks.
    pub fn matches(&self, record: &EmailRecord, now: NaiveDateTime) -> bool {
        match_condition(record.field(self.field), &self.predicate, &self.expected, now)
    }
}

/// A provider-side mutation requested by a rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionSpec {
    MarkRead,
    MarkUnread,
    Star,
    MarkImportant,
    Trash,
    MoveToLabel(String),
}

impl FromStr for ActionSpec {
    type Err = String;

    /// `mark_as_read`, `mark_as_unread` or `move_to:<label>`; the
    /// `starred`, `important` and `trash` targets map to their own actions.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_lowercase().as_str() {
            "mark_as_read" => return Ok(Self::MarkRead),
            "mark_as_unread" => return Ok(Self::MarkUnread),
            _ => {}
        }

        let Some((verb, target)) = trimmed.split_once(':') else {
            return Err(format!("unknown action '{trimmed}'"));
        };
        if !verb.trim().eq_ignore_ascii_case("move_to") {
            return Err(format!("unknown action '{trimmed}'"));
        }

        let target = target.trim();
        match target.to_lowercase().as_str() {
            "" => Err(format!("action '{trimmed}' has no label")),
            "starred" => Ok(Self::Star),
            "important" => Ok(Self::MarkImportant),
            "trash" => Ok(Self::Trash),
            _ => Ok(Self::MoveToLabel(target.to_string())),
        }
    }
}

impl fmt::Display for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MarkRead => f.write_str("mark_as_read"),
            Self::MarkUnread => f.write_str("mark_as_unread"),
            Self::Star => f.write_str("move_to:starred"),
            Self::MarkImportant => f.write_str("move_to:important"),
            Self::Trash => f.write_str("move_to:trash"),
            Self::MoveToLabel(label) => write!(f, "move_to:{label}"),
        }
    }
}

/// Conditions, how to combine them, and what to do on a match.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleSet {
    pub name: Option<String>,
    pub aggregator: Aggregator,
    pub conditions: Vec<Condition>,
    pub actions: Vec<ActionSpec>,
}

impl RuleSet {
    /// Name for logs: the configured name, else the 1-based position.
    pub fn display_name(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("rule set #{}", index + 1))
    }
}

/// Test one value.
///
/// Text predicates compare case-insensitively (`equals` also trims).
/// `less_than`/`greater_than` read `value` as a stored `received_at` and
/// `expected` as `<amount>_days` or `<amount>_months`.
pub fn match_condition(
    value: &str,
    predicate: &Predicate,
    expected: &str,
    now: NaiveDateTime,
) -> bool {
    match predicate {
        Predicate::Contains => value.to_lowercase().contains(&expected.to_lowercase()),
        Predicate::DoesNotContain => !value.to_lowercase().contains(&expected.to_lowercase()),
        Predicate::Equals => value.trim().to_lowercase() == expected.trim().to_lowercase(),
        Predicate::DoesNotEqual => value.trim().to_lowercase() != expected.trim().to_lowercase(),
        Predicate::LessThan | Predicate::GreaterThan => {
            match age_matches(value, predicate == &Predicate::LessThan, expected, now) {
                Ok(matched) => matched,
                Err(e) => {
                    warn!("Condition '{predicate} {expected}' not evaluated: {e}");
                    false
                }
            }
        }
        Predicate::Unsupported(_) => false,
    }
}

/// `Ok(false)` for an unparseable record date; `Err` for a bad threshold.
fn age_matches(
    value: &str,
    newer_than_cutoff: bool,
    expected: &str,
    now: NaiveDateTime,
) -> Result<bool, RuleError> {
    let Ok(received) = NaiveDateTime::parse_from_str(value.trim(), RECEIVED_AT_FORMAT) else {
        debug!(value, "Stored date not comparable");
        return Ok(false);
    };
    let age = parse_age_threshold(expected)?;
    let Some(cutoff) = now.checked_sub_signed(age) else {
        return Ok(false);
    };

    Ok(if newer_than_cutoff {
        received > cutoff
    } else {
        received < cutoff
    })
}

/// Parse `<amount>_days` / `<amount>_months` (a month is 30 days).
pub fn parse_age_threshold(expected: &str) -> Result<TimeDelta, RuleError> {
    let lowered = expected.trim().to_lowercase();
    let invalid = || RuleError::InvalidThreshold(expected.to_string());

    let mut pieces = lowered.split('_');
    let (Some(amount), Some(unit), None) = (pieces.next(), pieces.next(), pieces.next()) else {
        return Err(invalid());
    };
    let amount: i64 = amount.trim().parse().map_err(|_| invalid())?;

    let days = match unit.trim() {
        "days" => amount,
        "months" => amount.checked_mul(DAYS_PER_MONTH).ok_or_else(invalid)?,
        other => return Err(RuleError::UnsupportedUnit(other.to_string())),
    };
    TimeDelta::try_days(days).ok_or_else(invalid)
}

/// Whether a record satisfies a rule set.
pub fn evaluate(record: &EmailRecord, rule_set: &RuleSet, now: NaiveDateTime) -> bool {
    let results: Vec<bool> = rule_set
        .conditions
        .iter()
        .map(|c| c.matches(record, now))
        .collect();

    match rule_set.aggregator {
        Aggregator::All => results.iter().all(|&r| r),
        Aggregator::Any => results.iter().any(|&r| r),
    }
}

/// Current wall time at the offset stored `received_at` values use.
pub fn now_at_record_offset() -> NaiveDateTime {
    Utc::now().naive_utc() + TimeDelta::minutes(RECEIVED_AT_OFFSET_MINUTES)
}

/// Ordered rule sets with first-match-wins lookup.
#[derive(Debug, Clone, Default)]
pub struct RulesEngine {
    rule_sets: Vec<RuleSet>,
}

impl RulesEngine {
    /// Rule sets keep their document order.
    pub fn new(rule_sets: Vec<RuleSet>) -> Self {
        Self { rule_sets }
    }

    pub fn rule_sets(&self) -> &[RuleSet] {
        &self.rule_sets
    }

    pub fn is_empty(&self) -> bool {
        self.rule_sets.is_empty()
    }

    /// The first rule set matching `record`, with its index. Later rule sets
    /// are not evaluated once one matches.
    pub fn first_match(&self, record: &EmailRecord, now: NaiveDateTime) -> Option<(usize, &RuleSet)> {
        self.rule_sets
            .iter()
            .enumerate()
            .find(|(_, rule_set)| evaluate(record, rule_set, now))
    }
}
