//! Setup matrices and changeover events.

use serde::{Deserialize, Serialize};

use crate::error::{PlanError, PlanResult};
use crate::time::Duration;

/// A changeover rule. An empty `from`/`to` matches any setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupRule {
    pub priority: i32,
    pub from: Option<String>,
    pub to: Option<String>,
    pub duration: Duration,
    pub cost: f64,
}

impl SetupRule {
    fn matches(&self, from: Option<&str>, to: Option<&str>) -> bool {
        let side = |rule: &Option<String>, actual: Option<&str>| match rule {
            None => true,
            Some(r) => actual == Some(r.as_str()),
        };
        side(&self.from, from) && side(&self.to, to)
    }
}

/// Outcome of a changeover lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Changeover<'a> {
    /// Same setup before and after.
    NotNeeded,
    Rule(&'a SetupRule),
    /// No rule covers the transition.
    Undefined,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetupMatrix {
    pub name: String,
    rules: Vec<SetupRule>,
}

impl SetupMatrix {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), rules: Vec::new() }
    }

    /// Add a rule, keeping rules ordered by priority.
    pub fn add_rule(&mut self, rule: SetupRule) -> PlanResult<()> {
        if rule.duration.is_negative() {
            return Err(PlanError::data(format!(
                "setup rule {} of matrix '{}' has a negative duration",
                rule.priority, self.name
            )));
        }
        match self.rules.binary_search_by_key(&rule.priority, |r| r.priority) {
            Ok(_) => Err(PlanError::data(format!(
                "setup matrix '{}' already has a rule with priority {}",
                self.name, rule.priority
            ))),
            Err(pos) => {
                self.rules.insert(pos, rule);
                Ok(())
            }
        }
    }

    pub fn remove_rule(&mut self, priority: i32) -> Option<SetupRule> {
        let pos = self.rules.iter().position(|r| r.priority == priority)?;
        Some(self.rules.remove(pos))
    }

    pub fn rules(&self) -> &[SetupRule] {
        &self.rules
    }

    /// First rule, in priority order, covering `from -> to`.
    pub fn calculate_setup(&self, from: Option<&str>, to: Option<&str>) -> Changeover<'_> {
        if from == to || to.is_none() {
            return Changeover::NotNeeded;
        }
        self.rules
            .iter()
            .find(|r| r.matches(from, to))
            .map_or(Changeover::Undefined, Changeover::Rule)
    }
}

/// The changeover in front of one operationplan on one resource.
///
/// Cloning copies the changeover value only: the clone is not linked into
/// any resource timeline and does not know its operationplan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupEvent {
    /// Setup the resource is in after the changeover.
    pub setup: Option<String>,
    /// Priority of the rule applied; `None` when no changeover was needed
    /// or no rule matched.
    pub rule: Option<i32>,
    pub duration: Duration,
    pub cost: f64,
    /// No rule covered the transition and a fallback was used.
    pub undefined: bool,
}

impl SetupEvent {
    pub fn none(setup: Option<String>) -> Self {
        Self { setup, rule: None, duration: Duration::ZERO, cost: 0.0, undefined: false }
    }
}
