//! Spectrum analyzer driver (spec §4.3: representative operations only).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{LabError, LabResult, TransportErrorKind};
use crate::profile::ProfileSpec;
use crate::safety::SafetyLimits;
use crate::transport::Transport;

use super::{format_command, ErrorSweep, InstrumentCore};

pub struct SpectrumAnalyzer {
    core: InstrumentCore,
}

impl SpectrumAnalyzer {
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

    pub async fn set_center_frequency(&self, hz: f64) -> LabResult<()> {
        let mut vars = HashMap::new();
        vars.insert("hz".to_string(), hz.to_string());
        self.core.write(&format_command("FREQ:CENT {hz}", &vars)?).await
    }

    pub async fn set_span(&self, hz: f64) -> LabResult<()> {
        let mut vars = HashMap::new();
        vars.insert("hz".to_string(), hz.to_string());
        self.core.write(&format_command("FREQ:SPAN {hz}", &vars)?).await
    }

    pub async fn marker_peak_search(&self) -> LabResult<f64> {
        self.core.write("CALC:MARK1:MAX").await?;
        let reply = self.core.query("CALC:MARK1:Y?").await?;
        reply.trim().parse().map_err(|_| {
            LabError::Transport(TransportErrorKind::Protocol(format!(
                "expected a numeric marker reply, got '{reply}'"
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::transport::SimulatorTransport;

    fn sa_profile() -> ProfileSpec {
        ProfileSpec::from_yaml_str(
            r#"
model_id: keysight/N9010B
device_type: sa
simulation:
  scpi:
    - command: "\\*IDN\\?"
      response: "Keysight,N9010B,0,1.0"
    - command: "CALC:MARK1:Y\\?"
      response: "-42.5"
    - command: ".*"
      response: ""
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn marker_peak_search_returns_a_numeric_level() {
        let profile = sa_profile();
        let transport = Arc::new(SimulatorTransport::new(&profile, &SimConfig::default()));
        let sa = SpectrumAnalyzer::new(profile, transport, "sa", &SafetyLimits::default(), ErrorSweep::Off);
        sa.connect().await.unwrap();
        sa.set_center_frequency(1.0e9).await.unwrap();
        sa.set_span(1.0e6).await.unwrap();

        let level = sa.marker_peak_search().await.unwrap();
        assert!((level + 42.5).abs() < 1e-9);
    }
}
