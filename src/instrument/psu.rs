//! Power supply driver (spec §4.3).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::LabResult;
use crate::profile::ProfileSpec;
use crate::safety::SafetyLimits;
use crate::transport::Transport;

use super::{format_command, ErrorSweep, InstrumentCore};

pub struct PowerSupply {
    core: InstrumentCore,
}

impl PowerSupply {
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

    pub fn channel(&self, index: u32) -> ChannelFacade<'_> {
        ChannelFacade { core: &self.core, index }
    }
}

/// Selector for one output channel (spec §3, §4.3, §4.4).
pub struct ChannelFacade<'a> {
    core: &'a InstrumentCore,
    index: u32,
}

impl<'a> ChannelFacade<'a> {
    /// Program voltage and current limit. Checked against the effective
    /// safety overlay before either value reaches the wire (spec §4.4).
    pub async fn set(self, voltage: f64, current_limit: f64) -> LabResult<Self> {
        self.core.check_safety(self.index, "voltage", voltage)?;
        self.core.check_safety(self.index, "current", current_limit)?;

        let mut vars = HashMap::new();
        vars.insert("index".to_string(), self.index.to_string());
        vars.insert("voltage".to_string(), voltage.to_string());
        self.core.write(&format_command("VOLT {voltage},(@{index})", &vars)?).await?;

        vars.insert("current".to_string(), current_limit.to_string());
        self.core.write(&format_command("CURR {current},(@{index})", &vars)?).await?;

        Ok(self)
    }

    pub async fn on(self) -> LabResult<Self> {
        let mut vars = HashMap::new();
        vars.insert("index".to_string(), self.index.to_string());
        self.core.write(&format_command("OUTP ON,(@{index})", &vars)?).await?;
        Ok(self)
    }

    pub async fn off(self) -> LabResult<Self> {
        let mut vars = HashMap::new();
        vars.insert("index".to_string(), self.index.to_string());
        self.core.write(&format_command("OUTP OFF,(@{index})", &vars)?).await?;
        Ok(self)
    }

    pub async fn measure_voltage(&self) -> LabResult<f64> {
        let mut vars = HashMap::new();
        vars.insert("index".to_string(), self.index.to_string());
        let reply = self.core.query(&format_command("MEAS:VOLT? (@{index})", &vars)?).await?;
        parse_measurement(&reply)
    }

    pub async fn measure_current(&self) -> LabResult<f64> {
        let mut vars = HashMap::new();
        vars.insert("index".to_string(), self.index.to_string());
        let reply = self.core.query(&format_command("MEAS:CURR? (@{index})", &vars)?).await?;
        parse_measurement(&reply)
    }

    /// Settle delay only: waits `duration_s` without issuing any SCPI
    /// call, for callers pacing a sequence of `set()`s into a ramp
    /// (spec §4.3's `slew(duration_s)`).
    pub async fn slew(self, duration_s: f64) -> LabResult<Self> {
        tokio::time::sleep(Duration::from_secs_f64(duration_s.max(0.0))).await;
        Ok(self)
    }
}

fn parse_measurement(reply: &str) -> LabResult<f64> {
    reply.trim().parse().map_err(|_| {
        crate::error::LabError::Transport(crate::error::TransportErrorKind::Protocol(format!(
            "expected a numeric measurement reply, got '{reply}'"
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::transport::SimulatorTransport;

    fn psu_profile() -> ProfileSpec {
        ProfileSpec::from_yaml_str(
            r#"
model_id: keysight/EDU36311A
device_type: psu
channels:
  - index: 1
    role: output
safety_schema:
  channels:
    1:
      voltage: { max: 30.0, min: 0.0 }
simulation:
  state:
    ch1_voltage: 0.0
  scpi:
    - command: "\\*IDN\\?"
      response: "Keysight,EDU36311A,0,1.0"
    - command: "VOLT (?P<v>[0-9.]+),\\(@1\\)"
      action: set
      target: ch1_voltage
      value: "float(groups.v)"
    - command: "MEAS:VOLT\\? \\(@1\\)"
      response: "state.ch1_voltage"
    - command: ".*"
      response: ""
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn set_measure_round_trips_through_the_simulator() {
        let profile = psu_profile();
        let transport = Arc::new(SimulatorTransport::new(&profile, &SimConfig::default()));
        let psu = PowerSupply::new(profile, transport, "psu", &SafetyLimits::default(), ErrorSweep::Off);
        psu.connect().await.unwrap();

        let ch1 = psu.channel(1).set(5.0, 0.5).await.unwrap();
        let voltage = ch1.measure_voltage().await.unwrap();
        assert!((voltage - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn set_rejects_a_voltage_above_the_safety_limit() {
        let profile = psu_profile();
        let transport = Arc::new(SimulatorTransport::new(&profile, &SimConfig::default()));
        let psu = PowerSupply::new(profile, transport, "psu", &SafetyLimits::default(), ErrorSweep::Off);
        psu.connect().await.unwrap();

        let err = psu.channel(1).set(31.0, 0.5).await.unwrap_err();
        assert!(matches!(err, crate::error::LabError::SafetyLimit { .. }));
    }
}
