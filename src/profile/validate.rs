//! Legacy simulation-rule shape detection and migration (spec §9 Open
//! Question: the source carries both a v1 and v2 simulation backend with
//! slightly different rule shapes).
//!
//! The legacy (v1) shape used `pattern`/`reply` instead of `command`/
//! `response`, and had no `action`/`target` update-rule form at all (every
//! v1 rule was response-only). We detect that shape structurally — a
//! mapping under `simulation.scpi` that has `pattern` or `reply` keys but no
//! `command` key — and rewrite it into the current grammar before
//! deserializing, rather than silently misinterpreting `pattern` as an
//! unrelated field.

use serde_yaml::Value;

/// Rewrite any legacy-shaped rules found under `simulation.scpi` in place.
/// Profiles already in the current shape pass through unchanged.
pub fn migrate_legacy_rules(mut doc: Value) -> Value {
    let Some(mapping) = doc.as_mapping_mut() else {
        return doc;
    };

    let Some(simulation) = mapping.get_mut(&Value::String("simulation".into())) else {
        return doc;
    };
    let Some(sim_mapping) = simulation.as_mapping_mut() else {
        return doc;
    };
    let Some(scpi) = sim_mapping.get_mut(&Value::String("scpi".into())) else {
        return doc;
    };
    let Some(rules) = scpi.as_sequence_mut() else {
        return doc;
    };

    for rule in rules.iter_mut() {
        migrate_one_rule(rule);
    }

    doc
}

fn migrate_one_rule(rule: &mut Value) {
    let Some(map) = rule.as_mapping_mut() else {
        return;
    };

    let has_command = map.contains_key(&Value::String("command".into()));
    if has_command {
        return;
    }

    let pattern = map.remove(&Value::String("pattern".into()));
    let reply = map.remove(&Value::String("reply".into()));

    if let Some(pattern) = pattern {
        map.insert(Value::String("command".into()), pattern);
        tracing::warn!("migrated legacy v1 simulation rule shape (pattern/reply) to command/response");
    }
    if let Some(reply) = reply {
        map.insert(Value::String("response".into()), reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrates_pattern_reply_shape() {
        let yaml = r#"
simulation:
  scpi:
    - pattern: "\\*IDN\\?"
      reply: "unit,model,0,1.0"
"#;
        let raw: Value = serde_yaml::from_str(yaml).unwrap();
        let migrated = migrate_legacy_rules(raw);
        let rule = &migrated["simulation"]["scpi"][0];
        assert_eq!(rule["command"].as_str().unwrap(), r"\*IDN\?");
        assert_eq!(rule["response"].as_str().unwrap(), "unit,model,0,1.0");
    }

    #[test]
    fn leaves_current_shape_untouched() {
        let yaml = r#"
simulation:
  scpi:
    - command: "\\*IDN\\?"
      response: "unit,model,0,1.0"
"#;
        let raw: Value = serde_yaml::from_str(yaml).unwrap();
        let migrated = migrate_legacy_rules(raw.clone());
        assert_eq!(migrated, raw);
    }
}
