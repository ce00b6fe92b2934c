//! Safety proxy: per-bench limit overlay enforced before any physical
//! quantity reaches the wire (spec §4.4, testable property 4).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{LabError, LabResult};
use crate::profile::{Bound, SafetySchema};

/// Bench-declared limits for one instrument, keyed by channel then
/// quantity name (spec §6: `safety_limits.channels.<i>.<quantity>`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SafetyLimits {
    #[serde(default)]
    pub channels: HashMap<u32, HashMap<String, Bound>>,
}

/// Intercepts every operation that sets a physical quantity and rejects
/// out-of-range values before the underlying transport call runs.
///
/// The overlay is merged on top of the profile's declared `safety_schema`
/// by tightening only: a bench can narrow a profile's bound but never
/// widen it (spec §4.4).
pub struct SafetyProxy {
    alias: String,
    effective: HashMap<u32, HashMap<String, Bound>>,
}

impl SafetyProxy {
    pub fn new(alias: impl Into<String>, schema: &SafetySchema, overlay: &SafetyLimits) -> Self {
        let mut effective = schema.channels.clone();

        for (channel, quantities) in &overlay.channels {
            let entry = effective.entry(*channel).or_default();
            for (quantity, bound) in quantities {
                let tightened = match entry.get(quantity) {
                    Some(existing) => tighten(*existing, *bound),
                    None => *bound,
                };
                entry.insert(quantity.clone(), tightened);
            }
        }

        Self {
            alias: alias.into(),
            effective,
        }
    }

    /// Validate `value` for `(channel, quantity)` against the effective
    /// bound. Unbounded (no schema/overlay entry) quantities always pass.
    pub fn check(&self, channel: u32, quantity: &str, value: f64) -> LabResult<()> {
        let Some(bound) = self.effective.get(&channel).and_then(|q| q.get(quantity)) else {
            return Ok(());
        };

        if let Some(max) = bound.max {
            if value > max {
                return Err(LabError::safety_max(self.alias.clone(), channel, quantity, value, max));
            }
        }
        if let Some(min) = bound.min {
            if value < min {
                return Err(LabError::safety_min(self.alias.clone(), channel, quantity, value, min));
            }
        }
        Ok(())
    }
}

/// Narrow `existing` by `overlay`: the tighter of each present bound wins,
/// and a bound absent on one side falls back to the other.
fn tighten(existing: Bound, overlay: Bound) -> Bound {
    let max = match (existing.max, overlay.max) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    };
    let min = match (existing.min, overlay.min) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    };
    Bound { max, min }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_with_voltage_max(max: f64) -> SafetySchema {
        let mut channels = HashMap::new();
        let mut quantities = HashMap::new();
        quantities.insert(
            "voltage".to_string(),
            Bound { max: Some(max), min: Some(0.0) },
        );
        channels.insert(1, quantities);
        SafetySchema { channels }
    }

    #[test]
    fn rejects_a_value_above_the_schema_max() {
        let proxy = SafetyProxy::new("psu", &schema_with_voltage_max(30.0), &SafetyLimits::default());
        let err = proxy.check(1, "voltage", 31.0).unwrap_err();
        assert!(matches!(err, LabError::SafetyLimit { .. }));
    }

    #[test]
    fn overlay_can_tighten_but_not_widen_the_schema() {
        let schema = schema_with_voltage_max(30.0);
        let mut overlay_quantities = HashMap::new();
        overlay_quantities.insert("voltage".to_string(), Bound { max: Some(60.0), min: None });
        let mut overlay_channels = HashMap::new();
        overlay_channels.insert(1, overlay_quantities);
        let overlay = SafetyLimits { channels: overlay_channels };

        let proxy = SafetyProxy::new("psu", &schema, &overlay);
        // overlay tried to widen to 60 V; the schema's 30 V still governs.
        assert!(proxy.check(1, "voltage", 31.0).is_err());
        assert!(proxy.check(1, "voltage", 29.0).is_ok());
    }

    #[test]
    fn overlay_tightens_below_the_schema_max() {
        let schema = schema_with_voltage_max(30.0);
        let mut overlay_quantities = HashMap::new();
        overlay_quantities.insert("voltage".to_string(), Bound { max: Some(6.0), min: None });
        let mut overlay_channels = HashMap::new();
        overlay_channels.insert(1, overlay_quantities);
        let overlay = SafetyLimits { channels: overlay_channels };

        let proxy = SafetyProxy::new("psu", &schema, &overlay);
        let err = proxy.check(1, "voltage", 7.0).unwrap_err();
        assert!(matches!(err, LabError::SafetyLimit { bound_max, .. } if bound_max == 6.0));
    }

    #[test]
    fn unbounded_quantity_always_passes() {
        let proxy = SafetyProxy::new("psu", &SafetySchema::default(), &SafetyLimits::default());
        assert!(proxy.check(1, "voltage", 1e9).is_ok());
    }
}
