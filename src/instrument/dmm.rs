//! Digital multimeter driver (spec §4.3).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{LabError, LabResult, TransportErrorKind};
use crate::measurement::{MeasurementResult, Provenance, ValueWithSigma};
use crate::profile::ProfileSpec;
use crate::safety::SafetyLimits;
use crate::transport::Transport;

use super::{format_command, ErrorSweep, InstrumentCore};

pub struct Dmm {
    core: InstrumentCore,
}

impl Dmm {
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

    /// Select the integration time, in power-line cycles (spec §4.3).
    pub async fn set_integration_time(&self, nplc: f64) -> LabResult<()> {
        let mut vars = HashMap::new();
        vars.insert("nplc".to_string(), nplc.to_string());
        self.core.write(&format_command("VOLT:DC:NPLC {nplc}", &vars)?).await
    }

    pub async fn measure_voltage_dc(&self) -> LabResult<MeasurementResult> {
        self.measure("MEAS:VOLT:DC?", "dc_voltage", "V").await
    }

    pub async fn measure_voltage_ac(&self) -> LabResult<MeasurementResult> {
        self.measure("MEAS:VOLT:AC?", "ac_voltage", "V").await
    }

    pub async fn measure_current_dc(&self) -> LabResult<MeasurementResult> {
        self.measure("MEAS:CURR:DC?", "dc_current", "A").await
    }

    /// Issue `query`, parse the numeric reading, and attach an uncertainty
    /// derived from the profile's accuracy table (spec §3, §4.3):
    /// `sigma = |value| * percent_reading / 100 + offset_value`.
    async fn measure(&self, query: &str, accuracy_key: &str, units: &str) -> LabResult<MeasurementResult> {
        let reply = self.core.query(query).await?;
        let value: f64 = reply.trim().parse().map_err(|_| {
            LabError::Transport(TransportErrorKind::Protocol(format!(
                "expected a numeric measurement reply to '{query}', got '{reply}'"
            )))
        })?;

        let sigma = self.core.profile.accuracy(accuracy_key).map(|acc| {
            value.abs() * acc.percent_reading / 100.0 + acc.offset_value
        });

        let with_sigma = match sigma {
            Some(s) => ValueWithSigma::with_sigma(value, s),
            None => ValueWithSigma::exact(value),
        };

        Ok(MeasurementResult::scalar(
            with_sigma,
            units,
            Provenance {
                instrument_idn: self.core.idn().await.unwrap_or_default(),
                ..Provenance::default()
            },
            0.0,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::transport::SimulatorTransport;

    fn dmm_profile() -> ProfileSpec {
        ProfileSpec::from_yaml_str(
            r#"
model_id: keysight/34461A
device_type: dmm
accuracy_table:
  dc_voltage:
    percent_reading: 0.1
    offset_value: 0.001
    unit: V
simulation:
  scpi:
    - command: "\\*IDN\\?"
      response: "Keysight,34461A,0,1.0"
    - command: "MEAS:VOLT:DC\\?"
      response: "5.0"
    - command: ".*"
      response: ""
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn measure_voltage_dc_attaches_accuracy_derived_sigma() {
        let profile = dmm_profile();
        let transport = Arc::new(SimulatorTransport::new(&profile, &SimConfig::default()));
        let dmm = Dmm::new(profile, transport, "dmm", &SafetyLimits::default(), ErrorSweep::Off);
        dmm.connect().await.unwrap();

        let result = dmm.measure_voltage_dc().await.unwrap();
        match result.values {
            crate::measurement::MeasurementValues::Scalar(v) => {
                assert!((v.value - 5.0).abs() < 1e-9);
                assert!((v.sigma.unwrap() - (5.0 * 0.1 / 100.0 + 0.001)).abs() < 1e-9);
            }
            _ => panic!("expected a scalar result"),
        }
    }
}
