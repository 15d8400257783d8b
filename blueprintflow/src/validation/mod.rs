//! Validator contract and a small rule-set framework.
//!
//! Validators are deterministic and side-effect free. They look at a value
//! (usually a `SharedState` snapshot or a draft `Artifact`) and report
//! whether it passed, a score in `[0, 1]`, and a list of issues. Retry gates
//! consume the result; the orchestrator never looks at rule bodies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Issue severity. Only errors fail a validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Reported but does not fail the validation.
    Warning,
    /// Fails the validation.
    Error,
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Issue {
    /// Severity.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// Dotted path to the offending field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
    /// Work item the issue belongs to, used to pick the retry subset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_key: Option<String>,
}

impl Issue {
    /// Creates an error issue.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            field_path: None,
            item_key: None,
        }
    }

    /// Creates a warning issue.
    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            field_path: None,
            item_key: None,
        }
    }

    /// Sets the field path.
    #[must_use]
    pub fn at(mut self, field_path: impl Into<String>) -> Self {
        self.field_path = Some(field_path.into());
        self
    }

    /// Sets the work item key.
    #[must_use]
    pub fn for_item(mut self, key: impl Into<String>) -> Self {
        self.item_key = Some(key.into());
        self
    }

    /// Returns true for error severity.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field_path {
            Some(path) => write!(f, "{path}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Outcome of running a validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// True when there are no error issues.
    pub passed: bool,
    /// Quality score in `[0, 1]`.
    pub score: f64,
    /// Findings, errors and warnings mixed, in rule order.
    pub issues: Vec<Issue>,
}

impl ValidationResult {
    /// A clean pass.
    #[must_use]
    pub fn pass() -> Self {
        Self {
            passed: true,
            score: 1.0,
            issues: Vec::new(),
        }
    }

    /// Builds a result from issues; it passes iff none is an error.
    #[must_use]
    pub fn from_issues(issues: Vec<Issue>, score: f64) -> Self {
        Self {
            passed: !issues.iter().any(Issue::is_error),
            score: score.clamp(0.0, 1.0),
            issues,
        }
    }

    /// Builds a failing result from a single error.
    #[must_use]
    pub fn fail(issue: Issue) -> Self {
        Self::from_issues(vec![issue], 0.0)
    }

    /// Iterates over error issues.
    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.is_error())
    }

    /// Iterates over warning issues.
    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| !i.is_error())
    }

    /// Item keys named by error issues, sorted.
    #[must_use]
    pub fn failing_keys(&self) -> BTreeSet<String> {
        self.errors()
            .filter_map(|i| i.item_key.clone())
            .collect()
    }

    /// All issues rendered as strings.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::pass()
    }
}

/// A deterministic, side-effect free check over a value.
pub trait Validator<T>: Send + Sync {
    /// Validator name, used in logs.
    fn name(&self) -> &str;

    /// Validates the target.
    fn validate(&self, target: &T) -> ValidationResult;
}

/// A closure-backed validator.
pub struct FnValidator<F> {
    name: String,
    func: F,
}

impl<F> FnValidator<F> {
    /// Creates a new function-based validator.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> fmt::Debug for FnValidator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnValidator")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<T, F> Validator<T> for FnValidator<F>
where
    F: Fn(&T) -> ValidationResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, target: &T) -> ValidationResult {
        (self.func)(target)
    }
}

type RuleFn<T> = Arc<dyn Fn(&T) -> Vec<Issue> + Send + Sync>;

/// One named rule of a [`RuleSet`].
pub struct Rule<T> {
    name: String,
    check: RuleFn<T>,
}

impl<T> Clone for Rule<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            check: Arc::clone(&self.check),
        }
    }
}

impl<T> Rule<T> {
    /// Returns the rule name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An ordered list of rules evaluated as one validator.
///
/// The score is the fraction of rules that raised no error. Every rule runs,
/// so the issues list is complete.
pub struct RuleSet<T> {
    name: String,
    rules: Vec<Rule<T>>,
}

impl<T> Clone for RuleSet<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            rules: self.rules.clone(),
        }
    }
}

impl<T> fmt::Debug for RuleSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleSet")
            .field("name", &self.name)
            .field("rules", &self.rules.iter().map(Rule::name).collect::<Vec<_>>())
            .finish()
    }
}

impl<T> RuleSet<T> {
    /// Creates an empty rule set.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    /// Appends a rule.
    #[must_use]
    pub fn rule<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&T) -> Vec<Issue> + Send + Sync + 'static,
    {
        self.rules.push(Rule {
            name: name.into(),
            check: Arc::new(check),
        });
        self
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<T> Validator<T> for RuleSet<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, target: &T) -> ValidationResult {
        if self.rules.is_empty() {
            return ValidationResult::pass();
        }

        let mut issues = Vec::new();
        let mut clean = 0_usize;
        for rule in &self.rules {
            let found = (rule.check)(target);
            if !found.iter().any(Issue::is_error) {
                clean += 1;
            }
            issues.extend(found);
        }

        #[allow(clippy::cast_precision_loss)]
        let score = clean as f64 / self.rules.len() as f64;
        ValidationResult::from_issues(issues, score)
    }
}
