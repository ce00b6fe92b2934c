//! Simulation rule grammar (spec §4.1 item 2, §6).
//!
//! Two YAML shapes are accepted:
//!
//! ```yaml
//! - command: "<literal or regex>"
//!   response: "<literal>" | "<expr>"
//! - command: "<regex>"
//!   action: set
//!   target: "<key>"
//!   value: "<expr>"
//!   response: "<expr>"   # optional
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A scalar value held in simulator state or a profile's initial state map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SimValue {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl SimValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SimValue::Number(n) => Some(*n),
            SimValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            SimValue::Text(s) => s.parse().ok(),
        }
    }

    pub fn to_response_string(&self) -> String {
        match self {
            SimValue::Number(n) => format_sim_number(*n),
            SimValue::Text(s) => s.clone(),
            SimValue::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
        }
    }
}

/// Canonical numeric formatting used both for simulator responses and for
/// the compliance envelope's canonical byte encoding (spec §4.7).
pub fn format_sim_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        format!("{n:.10}")
    }
}

/// Whether a rule's response (if any) is computed before or after an
/// update action mutates state (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseEvalOrder {
    Pre,
    Post,
}

impl Default for ResponseEvalOrder {
    fn default() -> Self {
        ResponseEvalOrder::Post
    }
}

/// The action a rule performs against simulator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Set,
}

/// One simulation rule: a command pattern bound to a response and/or a
/// state-mutating action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimRule {
    /// Literal command or regex pattern to match against the incoming SCPI
    /// command. Matched against the whole command string.
    pub command: String,
    /// Literal response string, or an expression evaluated against
    /// `state`/`groups` (spec §4.1, §4.6). Absent for pure update actions
    /// that only `write` and never respond.
    #[serde(default)]
    pub response: Option<String>,
    /// Present only for update-action rules.
    #[serde(default)]
    pub action: Option<ActionKind>,
    /// State key an update action assigns into.
    #[serde(default)]
    pub target: Option<String>,
    /// Value-expression an update action evaluates before assigning.
    #[serde(default)]
    pub value: Option<String>,
    /// Evaluation order when a rule both updates and responds.
    #[serde(default)]
    pub response_eval_order: ResponseEvalOrder,
}

impl SimRule {
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Compile this rule's `command` as a regex. Literal commands (those
    /// containing no regex metacharacters) compile trivially and match only
    /// themselves, matching spec §3's "exact command match or regex pattern".
    pub fn compile_pattern(&self) -> Result<Regex, regex::Error> {
        Regex::new(&format!("^{}$", self.command))
    }

    /// Whether this rule is a pure state update (no literal/computed response).
    pub fn is_update(&self) -> bool {
        self.action.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_command_matches_only_itself() {
        let rule = SimRule {
            command: r"\*IDN\?".into(),
            response: Some("unit,model,0,1.0".into()),
            action: None,
            target: None,
            value: None,
            response_eval_order: ResponseEvalOrder::Post,
        };
        let re = rule.compile_pattern().unwrap();
        assert!(re.is_match("*IDN?"));
        assert!(!re.is_match("*IDN? extra"));
    }

    #[test]
    fn sim_number_formats_integers_without_decimal() {
        assert_eq!(format_sim_number(5.0), "5");
        assert_eq!(format_sim_number(0.5), "0.5000000000");
    }
}
