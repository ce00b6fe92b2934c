//! RF power meter driver (spec §4.3: representative operations only).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{LabError, LabResult, TransportErrorKind};
use crate::profile::ProfileSpec;
use crate::safety::SafetyLimits;
use crate::transport::Transport;

use super::{format_command, ErrorSweep, InstrumentCore};

pub struct PowerMeter {
    core: InstrumentCore,
}

impl PowerMeter {
    pub fn new(
        profile: ProfileSpec,
        transport: Arc<dyn Transport>,
        alias: impl Into<String>,
        safety_limits: &SafetyLimits,
        error_sweep: ErrorSweep,
    ) -> Self {
        Self { core: InstrumentCore::new(profile, transport, alias, safety_limits, error_sweep) }
    }

    pub async fn connect(&self) -> LabResult<()> {
        self.core.connect(false).await
    }

    pub async fn close(&self) -> LabResult<()> {
        self.core.close().await
    }

    pub async fn idn(&self) -> Option<String> {
        self.core.idn().await
    }

    pub async fn set_frequency(&self, hz: f64) -> LabResult<()> {
        let mut vars = HashMap::new();
        vars.insert("hz".to_string(), hz.to_string());
        self.core.write(&format_command("SENS:FREQ {hz}", &vars)?).await
    }

    pub async fn measure_power_dbm(&self) -> LabResult<f64> {
        let reply = self.core.query("MEAS:POW?").await?;
        reply.trim().parse().map_err(|_| {
            LabError::Transport(TransportErrorKind::Protocol(format!(
                "expected a numeric power reading, got '{reply}'"
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::transport::SimulatorTransport;

    fn power_meter_profile() -> ProfileSpec {
        ProfileSpec::from_yaml_str(
            r#"
model_id: keysight/N1912A
device_type: power_meter
simulation:
  scpi:
    - command: "\\*IDN\\?"
      response: "Keysight,N1912A,0,1.0"
    - command: "MEAS:POW\\?"
      response: "0.0012"
    - command: ".*"
      response: ""
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn measure_power_dbm_returns_a_numeric_reading() {
        let profile = power_meter_profile();
        let transport = Arc::new(SimulatorTransport::new(&profile, &SimConfig::default()));
        let meter = PowerMeter::new(profile, transport, "pm", &SafetyLimits::default(), ErrorSweep::Off);
        meter.connect().await.unwrap();
        meter.set_frequency(2.4e9).await.unwrap();

        let reading = meter.measure_power_dbm().await.unwrap();
        assert!((reading - 0.0012).abs() < 1e-9);
    }
}
