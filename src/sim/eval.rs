//! Restricted expression evaluator for simulation rules (spec §4.1, §4.6, §9).
//!
//! Grounded on the teacher's `scripting/rhai_engine.rs` pattern of embedding
//! `rhai` behind a safety-limited facade. We reuse `rhai` itself — already a
//! dependency — but build it with [`rhai::Engine::new_raw`], the
//! "no standard library" constructor, and register only the whitelist spec
//! §4.1/§9 allow: the `ArithmeticPackage` (so `+ - * /` and friends work over
//! the language core), `groups` (regex captures) and `state` (read-only
//! snapshot) as injected scope variables, and the whitelisted functions
//! `min`/`max`/`float`/`int` plus `uniform(lo, hi)` wired to a seeded RNG. No
//! string/array/map/io packages are registered, so there is no path from a
//! profile author's expression to arbitrary code execution — this is the
//! "small typed AST interpreter" design note satisfied by reusing the
//! teacher's existing sandboxing idiom instead of inventing a parser from
//! scratch (see DESIGN.md).

use std::collections::HashMap;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rhai::packages::{ArithmeticPackage, Package};
use rhai::{Engine, ImmutableString, Scope};

use crate::error::{LabError, LabResult, TransportErrorKind};
use crate::profile::SimValue;

/// A sandboxed evaluator for simulation rule expressions.
pub struct RestrictedEvaluator {
    engine: Engine,
    rng: Mutex<StdRng>,
}

impl RestrictedEvaluator {
    /// Build an evaluator seeded for reproducible CI runs (spec §4.6).
    pub fn seeded(seed: u64) -> Self {
        let mut engine = Engine::new_raw();
        engine.set_max_operations(10_000);
        ArithmeticPackage::new().register_into_engine(&mut engine);

        engine.register_fn("min", |a: f64, b: f64| a.min(b));
        engine.register_fn("max", |a: f64, b: f64| a.max(b));
        engine.register_fn("float", |n: f64| n);
        engine.register_fn("float", |n: i64| n as f64);
        engine.register_fn("float", |s: ImmutableString| s.parse::<f64>().unwrap_or(f64::NAN));
        engine.register_fn("int", |n: i64| n);
        engine.register_fn("int", |n: f64| n as i64);
        engine.register_fn("int", |s: ImmutableString| s.parse::<i64>().unwrap_or(0));

        Self {
            engine,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Evaluate a value-expression against the current state snapshot and
    /// the regex match groups, returning a single [`SimValue`].
    pub fn eval(
        &self,
        expr: &str,
        state: &HashMap<String, SimValue>,
        groups: &HashMap<String, String>,
    ) -> LabResult<SimValue> {
        let mut scope = Scope::new();
        scope.push("state", state_to_map(state));
        scope.push("groups", groups_to_map(groups));

        // `uniform(lo, hi)` draws from our seeded RNG rather than rhai's own
        // randomness, so the whole engine stays deterministic under a seed.
        let lo_hi = self.sample_uniform_pairs(expr);
        for (idx, (lo, hi)) in lo_hi.iter().enumerate() {
            scope.push(format!("__uniform_{idx}"), self.draw_uniform(*lo, *hi));
        }
        let rewritten = rewrite_uniform_calls(expr, lo_hi.len());

        let result: rhai::Dynamic = self
            .engine
            .eval_with_scope(&mut scope, &rewritten)
            .map_err(|e| LabError::Transport(TransportErrorKind::Protocol(format!(
                "simulation expression '{expr}' failed: {e}"
            ))))?;

        dynamic_to_sim_value(result)
    }

    fn draw_uniform(&self, lo: f64, hi: f64) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        if hi <= lo {
            lo
        } else {
            rng.gen_range(lo..hi)
        }
    }

    /// Find literal `uniform(lo, hi)` calls with numeric-literal bounds so we
    /// can substitute our seeded draw without handing rhai access to `rand`.
    fn sample_uniform_pairs(&self, expr: &str) -> Vec<(f64, f64)> {
        static PATTERN: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
            regex::Regex::new(r"uniform\(\s*([-0-9.eE]+)\s*,\s*([-0-9.eE]+)\s*\)").unwrap()
        });
        PATTERN
            .captures_iter(expr)
            .filter_map(|c| {
                let lo: f64 = c.get(1)?.as_str().parse().ok()?;
                let hi: f64 = c.get(2)?.as_str().parse().ok()?;
                Some((lo, hi))
            })
            .collect()
    }
}

fn rewrite_uniform_calls(expr: &str, count: usize) -> String {
    static PATTERN: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
        regex::Regex::new(r"uniform\(\s*[-0-9.eE]+\s*,\s*[-0-9.eE]+\s*\)").unwrap()
    });
    let mut idx = 0usize;
    let out = PATTERN.replace_all(expr, |_: &regex::Captures| {
        let replacement = format!("__uniform_{idx}");
        idx += 1;
        replacement
    });
    debug_assert!(idx <= count.max(idx));
    out.into_owned()
}

fn state_to_map(state: &HashMap<String, SimValue>) -> rhai::Map {
    let mut map = rhai::Map::new();
    for (k, v) in state {
        map.insert(k.as_str().into(), sim_value_to_dynamic(v));
    }
    map
}

fn groups_to_map(groups: &HashMap<String, String>) -> rhai::Map {
    let mut map = rhai::Map::new();
    for (k, v) in groups {
        map.insert(k.as_str().into(), v.clone().into());
    }
    map
}

fn sim_value_to_dynamic(value: &SimValue) -> rhai::Dynamic {
    match value {
        SimValue::Number(n) => (*n).into(),
        SimValue::Text(s) => s.clone().into(),
        SimValue::Bool(b) => (*b).into(),
    }
}

fn dynamic_to_sim_value(value: rhai::Dynamic) -> LabResult<SimValue> {
    if let Some(n) = value.clone().try_cast::<f64>() {
        return Ok(SimValue::Number(n));
    }
    if let Some(n) = value.clone().try_cast::<i64>() {
        return Ok(SimValue::Number(n as f64));
    }
    if let Some(b) = value.clone().try_cast::<bool>() {
        return Ok(SimValue::Bool(b));
    }
    if let Some(s) = value.clone().try_cast::<String>() {
        return Ok(SimValue::Text(s));
    }
    Err(LabError::Transport(TransportErrorKind::Protocol(format!(
        "simulation expression produced an unsupported value type: {}",
        value.type_name()
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_arithmetic_over_groups() {
        let eval = RestrictedEvaluator::seeded(0);
        let state = HashMap::new();
        let mut groups = HashMap::new();
        groups.insert("v".to_string(), "2.5".to_string());

        let result = eval.eval("float(groups.v) * 2.0", &state, &groups).unwrap();
        assert_eq!(result, SimValue::Number(5.0));
    }

    #[test]
    fn reads_state_snapshot() {
        let eval = RestrictedEvaluator::seeded(0);
        let mut state = HashMap::new();
        state.insert("ch1_voltage".to_string(), SimValue::Number(3.3));
        let groups = HashMap::new();

        let value = eval.eval("state.ch1_voltage", &state, &groups).unwrap();
        assert_eq!(value, SimValue::Number(3.3));
    }

    #[test]
    fn uniform_is_deterministic_under_a_seed() {
        let a = RestrictedEvaluator::seeded(42);
        let b = RestrictedEvaluator::seeded(42);
        let state = HashMap::new();
        let groups = HashMap::new();

        let va = a.eval("uniform(0.0, 1.0)", &state, &groups).unwrap();
        let vb = b.eval("uniform(0.0, 1.0)", &state, &groups).unwrap();
        assert_eq!(va, vb);
    }

    #[test]
    fn cannot_reach_the_filesystem_or_process() {
        let eval = RestrictedEvaluator::seeded(0);
        let state = HashMap::new();
        let groups = HashMap::new();
        // `rhai::Engine::new_raw` registers no I/O, no `eval`, no string
        // manipulation stdlib beyond the language core — these all fail.
        assert!(eval.eval("import \"std\"", &state, &groups).is_err());
    }
}
