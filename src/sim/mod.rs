//! `SimEngine` — evaluates a profile's simulation rules against per-instrument
//! state (spec §4.1 item 2, §4.6).

mod eval;

pub use eval::RestrictedEvaluator;

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::config::SimConfig;
use crate::error::{LabError, LabResult, TransportErrorKind};
use crate::profile::{ResponseEvalOrder, SimRule, SimValue};

/// Outcome of matching and applying one simulation rule.
#[derive(Debug, Clone, PartialEq)]
pub enum SimOutcome {
    /// `query` should return this string; `write` has no observable effect.
    Response(String),
    /// No response produced; used for `write` or unmatched `query`s in
    /// non-strict mode (spec §4.1 step 5).
    NoResponse,
}

struct SimState {
    values: HashMap<String, SimValue>,
}

/// Per-instrument simulator: holds the mutable state a profile's rules read
/// and write, and evaluates rules against an incoming SCPI command.
pub struct SimEngine {
    rules: Vec<SimRule>,
    state: Mutex<SimState>,
    evaluator: RestrictedEvaluator,
    strict_unmatched: bool,
}

impl SimEngine {
    pub fn new(initial_state: HashMap<String, SimValue>, rules: Vec<SimRule>, config: &SimConfig) -> Self {
        Self {
            rules,
            state: Mutex::new(SimState { values: initial_state }),
            evaluator: RestrictedEvaluator::seeded(config.rng_seed),
            strict_unmatched: config.strict_unmatched,
        }
    }

    /// Snapshot current state (for diagnostics / compliance config snapshots).
    pub async fn state_snapshot(&self) -> HashMap<String, SimValue> {
        self.state.lock().await.values.clone()
    }

    /// Handle one command. `is_query` distinguishes `query()` (a response is
    /// expected) from `write()` (no response is surfaced to the caller).
    pub async fn handle(&self, command: &str, is_query: bool) -> LabResult<SimOutcome> {
        // Rule matching and state mutation are serialized per instrument
        // (spec §4.1: "State mutation must be atomic per call; concurrent
        // calls on the same Simulator are serialized").
        let mut state = self.state.lock().await;

        for rule in &self.rules {
            let pattern = rule.compile_pattern().map_err(|e| {
                LabError::Transport(TransportErrorKind::Protocol(format!(
                    "simulation rule '{}' failed to compile: {e}",
                    rule.command()
                )))
            })?;

            let Some(captures) = pattern.captures(command) else {
                continue;
            };

            let groups = named_groups(&pattern, &captures);

            if rule.is_update() {
                let outcome = self.apply_update(rule, &mut state, &groups)?;
                return Ok(if is_query { outcome } else { SimOutcome::NoResponse });
            }

            if let Some(expr) = &rule.response {
                if !is_query {
                    return Ok(SimOutcome::NoResponse);
                }
                let value = self.evaluator.eval(expr, &state.values, &groups).unwrap_or_else(|_| {
                    // Not every response is an expression; literal strings
                    // that aren't valid rhai are returned verbatim.
                    SimValue::Text(expr.clone())
                });
                return Ok(SimOutcome::Response(value.to_response_string()));
            }

            return Ok(SimOutcome::NoResponse);
        }

        if is_query && self.strict_unmatched {
            return Err(LabError::Transport(TransportErrorKind::Protocol(format!(
                "no simulation rule matched query '{command}'"
            ))));
        }

        Ok(if is_query {
            SimOutcome::Response(String::new())
        } else {
            SimOutcome::NoResponse
        })
    }

    fn apply_update(
        &self,
        rule: &SimRule,
        state: &mut SimState,
        groups: &HashMap<String, String>,
    ) -> LabResult<SimOutcome> {
        let target = rule.target.as_ref().ok_or_else(|| {
            LabError::Profile(format!("update rule '{}' has no target", rule.command()))
        })?;
        let expr = rule.value.as_ref().ok_or_else(|| {
            LabError::Profile(format!("update rule '{}' has no value expression", rule.command()))
        })?;

        let pre_response = if rule.response_eval_order == ResponseEvalOrder::Pre {
            self.eval_response(rule, &state.values, groups)?
        } else {
            None
        };

        let new_value = self.evaluator.eval(expr, &state.values, groups)?;
        state.values.insert(target.clone(), new_value);

        let response = match rule.response_eval_order {
            ResponseEvalOrder::Pre => pre_response,
            ResponseEvalOrder::Post => self.eval_response(rule, &state.values, groups)?,
        };

        Ok(match response {
            Some(text) => SimOutcome::Response(text),
            None => SimOutcome::NoResponse,
        })
    }

    fn eval_response(
        &self,
        rule: &SimRule,
        state: &HashMap<String, SimValue>,
        groups: &HashMap<String, String>,
    ) -> LabResult<Option<String>> {
        let Some(expr) = &rule.response else {
            return Ok(None);
        };
        let value = self
            .evaluator
            .eval(expr, state, groups)
            .unwrap_or_else(|_| SimValue::Text(expr.clone()));
        Ok(Some(value.to_response_string()))
    }
}

fn named_groups(pattern: &regex::Regex, captures: &regex::Captures) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for name in pattern.capture_names().flatten() {
        if let Some(m) = captures.name(name) {
            out.insert(name.to_string(), m.as_str().to_string());
        }
    }
    out
}
