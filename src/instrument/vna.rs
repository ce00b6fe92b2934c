//! Vector network analyzer driver (spec §4.3: representative operations
//! only — the spec keeps VNA support deliberately minimal).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::LabResult;
use crate::profile::ProfileSpec;
use crate::safety::SafetyLimits;
use crate::transport::Transport;

use super::{format_command, ErrorSweep, InstrumentCore};

pub struct Vna {
    core: InstrumentCore,
}

impl Vna {
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

    pub async fn set_frequency_range(&self, start_hz: f64, stop_hz: f64) -> LabResult<()> {
        let mut vars = HashMap::new();
        vars.insert("start".to_string(), start_hz.to_string());
        self.core.write(&format_command("SENS:FREQ:STAR {start}", &vars)?).await?;

        vars.insert("stop".to_string(), stop_hz.to_string());
        self.core.write(&format_command("SENS:FREQ:STOP {stop}", &vars)?).await
    }

    pub async fn trigger_sweep(&self) -> LabResult<()> {
        self.core.write("TRIG:SING").await
    }

    pub async fn read_s21_trace(&self) -> LabResult<String> {
        self.core.query("CALC:DATA:FDAT?").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::transport::SimulatorTransport;

    fn vna_profile() -> ProfileSpec {
        ProfileSpec::from_yaml_str(
            r#"
model_id: keysight/E5080B
device_type: vna
simulation:
  scpi:
    - command: "\\*IDN\\?"
      response: "Keysight,E5080B,0,1.0"
    - command: "CALC:DATA:FDAT\\?"
      response: "0.0,0.0,-3.1,0.2"
    - command: ".*"
      response: ""
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn read_s21_trace_returns_the_raw_reply() {
        let profile = vna_profile();
        let transport = Arc::new(SimulatorTransport::new(&profile, &SimConfig::default()));
        let vna = Vna::new(profile, transport, "vna", &SafetyLimits::default(), ErrorSweep::Off);
        vna.connect().await.unwrap();
        vna.set_frequency_range(1.0e9, 2.0e9).await.unwrap();
        vna.trigger_sweep().await.unwrap();

        let trace = vna.read_s21_trace().await.unwrap();
        assert_eq!(trace, "0.0,0.0,-3.1,0.2");
    }
}
