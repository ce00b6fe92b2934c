//! Arbitrary waveform generator driver (spec §4.3).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::LabResult;
use crate::profile::ProfileSpec;
use crate::safety::SafetyLimits;
use crate::transport::Transport;

use super::{format_command, ErrorSweep, InstrumentCore};

pub struct Awg {
    core: InstrumentCore,
}

impl Awg {
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

/// Selector for one generator channel (spec §3, §4.3).
pub struct ChannelFacade<'a> {
    core: &'a InstrumentCore,
    index: u32,
}

impl<'a> ChannelFacade<'a> {
    pub async fn setup_sine(self, freq: f64, amp: f64, offset: f64) -> LabResult<Self> {
        let mut vars = HashMap::new();
        vars.insert("index".to_string(), self.index.to_string());
        self.core.write(&format_command("SOUR{index}:FUNC SIN", &vars)?).await?;

        vars.insert("freq".to_string(), freq.to_string());
        self.core.write(&format_command("SOUR{index}:FREQ {freq}", &vars)?).await?;

        vars.insert("amp".to_string(), amp.to_string());
        self.core.write(&format_command("SOUR{index}:VOLT {amp}", &vars)?).await?;

        vars.insert("offset".to_string(), offset.to_string());
        self.core.write(&format_command("SOUR{index}:VOLT:OFFS {offset}", &vars)?).await?;

        Ok(self)
    }

    pub async fn enable(self) -> LabResult<Self> {
        let mut vars = HashMap::new();
        vars.insert("index".to_string(), self.index.to_string());
        self.core.write(&format_command("OUTP{index} ON", &vars)?).await?;
        Ok(self)
    }

    pub async fn disable(self) -> LabResult<Self> {
        let mut vars = HashMap::new();
        vars.insert("index".to_string(), self.index.to_string());
        self.core.write(&format_command("OUTP{index} OFF", &vars)?).await?;
        Ok(self)
    }

    /// Upload an arbitrary waveform as a named sample list (spec §4.3) and
    /// select it as the channel's active function. Samples are sent as a
    /// comma-separated ASCII list rather than a binary block — the
    /// transport's write path is command-string oriented, and most
    /// generators accept `DATA:ARB` in this form as well as framed binary.
    pub async fn upload_arbitrary(self, name: &str, samples: &[f64]) -> LabResult<Self> {
        let values = samples.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(",");
        self.core.write(&format!("SOUR{}:DATA:ARB {name},{values}", self.index)).await?;

        let mut vars = HashMap::new();
        vars.insert("index".to_string(), self.index.to_string());
        vars.insert("name".to_string(), name.to_string());
        self.core.write(&format_command("SOUR{index}:FUNC:ARB {name}", &vars)?).await?;
        self.core.write(&format_command("SOUR{index}:FUNC ARB", &vars)?).await?;

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::transport::SimulatorTransport;

    fn awg_profile() -> ProfileSpec {
        ProfileSpec::from_yaml_str(
            r#"
model_id: keysight/33622A
device_type: awg
channels:
  - index: 1
    role: output
simulation:
  scpi:
    - command: "\\*IDN\\?"
      response: "Keysight,33622A,0,1.0"
    - command: ".*"
      response: ""
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn setup_sine_and_enable_chain() {
        let profile = awg_profile();
        let transport = Arc::new(SimulatorTransport::new(&profile, &SimConfig::default()));
        let awg = Awg::new(profile, transport, "awg", &SafetyLimits::default(), ErrorSweep::Off);
        awg.connect().await.unwrap();

        awg.channel(1).setup_sine(1_000.0, 2.0, 0.0).await.unwrap().enable().await.unwrap();
    }

    #[tokio::test]
    async fn upload_arbitrary_chains_from_channel_selector() {
        let profile = awg_profile();
        let transport = Arc::new(SimulatorTransport::new(&profile, &SimConfig::default()));
        let awg = Awg::new(profile, transport, "awg", &SafetyLimits::default(), ErrorSweep::Off);
        awg.connect().await.unwrap();

        awg.channel(1).upload_arbitrary("ramp", &[0.0, 0.5, 1.0, 0.5]).await.unwrap();
    }
}
