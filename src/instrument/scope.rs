//! Oscilloscope driver (spec §4.3).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{LabError, LabResult, TransportErrorKind};
use crate::measurement::{Frame, MeasurementResult, Provenance};
use crate::profile::ProfileSpec;
use crate::safety::SafetyLimits;
use crate::transport::Transport;

use super::{format_command, ErrorSweep, InstrumentCore};

pub struct Oscilloscope {
    core: InstrumentCore,
}

impl Oscilloscope {
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

    pub fn trigger(&self) -> TriggerFacade<'_> {
        TriggerFacade { core: &self.core }
    }

    pub fn acquisition(&self) -> AcquisitionFacade<'_> {
        AcquisitionFacade { core: &self.core }
    }

    /// Capture one waveform frame for each requested channel (spec §4.3):
    /// select the source, read its preamble, then parse the binary data
    /// block into a reconstructed time/voltage sequence.
    pub async fn read_channels(&self, indices: &[u32]) -> LabResult<MeasurementResult> {
        let mut frame = Frame::new();
        let mut time_column: Option<usize> = None;

        for &index in indices {
            self.core.write(&format!(":WAVeform:SOURce CHANnel{index}")).await?;
            let preamble = self.core.query(":WAVeform:PREamble?").await?;
            let fields: Vec<&str> = preamble.split(',').map(str::trim).collect();
            if fields.len() < 8 {
                return Err(LabError::Transport(TransportErrorKind::Protocol(format!(
                    "waveform preamble for channel {index} has {} fields, expected 8 (format,type,points,xincrement,xorigin,yincrement,yorigin,yreference)",
                    fields.len()
                ))));
            }

            let parse = |field: &str, name: &str| -> LabResult<f64> {
                field.parse().map_err(|_| {
                    LabError::Transport(TransportErrorKind::Protocol(format!(
                        "waveform preamble field '{name}' is not numeric: '{field}'"
                    )))
                })
            };

            let points = parse(fields[2], "points")? as usize;
            let xincrement = parse(fields[3], "xincrement")?;
            let xorigin = parse(fields[4], "xorigin")?;
            let yincrement = parse(fields[5], "yincrement")?;
            let yorigin = parse(fields[6], "yorigin")?;
            let yreference = parse(fields[7], "yreference")?;

            self.core.write(":WAVeform:DATA?").await?;
            let raw = self.core.read_raw(None).await?;

            let time_idx = *time_column.get_or_insert_with(|| {
                let idx = frame.ensure_numeric_column("time", Some("s".into()));
                for sample in 0..points {
                    frame.pad_row();
                    frame.set_numeric(idx, sample, xorigin + sample as f64 * xincrement);
                }
                idx
            });
            let _ = time_idx;

            let voltage_idx = frame.ensure_numeric_column(&format!("ch{index}_voltage"), Some("V".into()));
            for (sample, code) in raw.iter().enumerate().take(points) {
                let voltage = (*code as f64 - yreference) * yincrement + yorigin;
                frame.set_numeric(voltage_idx, sample, voltage);
            }
        }

        Ok(MeasurementResult::waveform(
            frame,
            "V",
            Provenance {
                instrument_idn: self.core.idn().await.unwrap_or_default(),
                ..Provenance::default()
            },
            0.0,
        ))
    }
}

/// Selector for one scope channel (spec §3, §4.3).
pub struct ChannelFacade<'a> {
    core: &'a InstrumentCore,
    index: u32,
}

impl<'a> ChannelFacade<'a> {
    pub async fn setup(self, scale: f64, offset: f64, coupling: &str) -> LabResult<Self> {
        let mut vars = HashMap::new();
        vars.insert("index".to_string(), self.index.to_string());
        vars.insert("scale".to_string(), scale.to_string());
        self.core.write(&format_command(":CHANnel{index}:SCALe {scale}", &vars)?).await?;

        vars.insert("offset".to_string(), offset.to_string());
        self.core.write(&format_command(":CHANnel{index}:OFFSet {offset}", &vars)?).await?;

        vars.insert("coupling".to_string(), coupling.to_string());
        self.core.write(&format_command(":CHANnel{index}:COUPling {coupling}", &vars)?).await?;

        Ok(self)
    }

    pub async fn enable(self) -> LabResult<Self> {
        let mut vars = HashMap::new();
        vars.insert("index".to_string(), self.index.to_string());
        self.core.write(&format_command(":CHANnel{index}:DISPlay ON", &vars)?).await?;
        Ok(self)
    }

    pub async fn disable(self) -> LabResult<Self> {
        let mut vars = HashMap::new();
        vars.insert("index".to_string(), self.index.to_string());
        self.core.write(&format_command(":CHANnel{index}:DISPlay OFF", &vars)?).await?;
        Ok(self)
    }
}

/// Trigger selector (spec §3, §4.3).
pub struct TriggerFacade<'a> {
    core: &'a InstrumentCore,
}

impl<'a> TriggerFacade<'a> {
    pub async fn setup_edge(self, source: &str, level: f64, slope: &str) -> LabResult<Self> {
        let mut vars = HashMap::new();
        vars.insert("source".to_string(), source.to_string());
        self.core.write(&format_command(":TRIGger:EDGE:SOURce {source}", &vars)?).await?;

        vars.insert("level".to_string(), level.to_string());
        self.core.write(&format_command(":TRIGger:EDGE:LEVel {level}", &vars)?).await?;

        vars.insert("slope".to_string(), slope.to_string());
        self.core.write(&format_command(":TRIGger:EDGE:SLOPe {slope}", &vars)?).await?;

        Ok(self)
    }

    pub async fn single(self) -> LabResult<Self> {
        self.core.write(":TRIGger:SINGle").await?;
        Ok(self)
    }
}

/// Acquisition-mode selector (spec §3, §4.3).
pub struct AcquisitionFacade<'a> {
    core: &'a InstrumentCore,
}

impl<'a> AcquisitionFacade<'a> {
    pub async fn set_type(self, kind: &str) -> LabResult<Self> {
        let mut vars = HashMap::new();
        vars.insert("kind".to_string(), kind.to_string());
        self.core.write(&format_command(":ACQuire:TYPE {kind}", &vars)?).await?;
        Ok(self)
    }

    pub async fn set_mode(self, mode: &str) -> LabResult<Self> {
        let mut vars = HashMap::new();
        vars.insert("mode".to_string(), mode.to_string());
        self.core.write(&format_command(":ACQuire:MODE {mode}", &vars)?).await?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::transport::SimulatorTransport;

    fn scope_profile() -> ProfileSpec {
        ProfileSpec::from_yaml_str(
            r#"
model_id: keysight/DSOX1204G
device_type: oscilloscope
channels:
  - index: 1
    role: analog
simulation:
  scpi:
    - command: "\\*IDN\\?"
      response: "Keysight,DSOX1204G,0,1.0"
    - command: ".*"
      response: ""
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn channel_setup_and_enable_chain() {
        let profile = scope_profile();
        let transport = Arc::new(SimulatorTransport::new(&profile, &SimConfig::default()));
        let scope = Oscilloscope::new(profile, transport, "scope", &SafetyLimits::default(), ErrorSweep::Off);
        scope.connect().await.unwrap();

        scope
            .channel(1)
            .setup(0.5, 0.0, "DC")
            .await
            .unwrap()
            .enable()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn trigger_setup_edge_chain() {
        let profile = scope_profile();
        let transport = Arc::new(SimulatorTransport::new(&profile, &SimConfig::default()));
        let scope = Oscilloscope::new(profile, transport, "scope", &SafetyLimits::default(), ErrorSweep::Off);
        scope.connect().await.unwrap();

        scope.trigger().setup_edge("CH1", 0.25, "POSitive").await.unwrap();
    }

    fn waveform_profile() -> ProfileSpec {
        ProfileSpec::from_yaml_str(
            r#"
model_id: keysight/DSOX1204G
device_type: oscilloscope
channels:
  - index: 1
    role: analog
simulation:
  scpi:
    - command: "\\*IDN\\?"
      response: "Keysight,DSOX1204G,0,1.0"
    - command: ":WAVeform:PREamble\\?"
      response: "0,0,4,1.0,0.0,1.0,0.0,0.0"
    - command: ":WAVeform:DATA\\?"
      response: "#14ABCD"
    - command: ".*"
      response: ""
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn read_channels_parses_preamble_and_binary_block() {
        let profile = waveform_profile();
        let transport = Arc::new(SimulatorTransport::new(&profile, &SimConfig::default()));
        let scope = Oscilloscope::new(profile, transport, "scope", &SafetyLimits::default(), ErrorSweep::Off);
        scope.connect().await.unwrap();

        let result = scope.read_channels(&[1]).await.unwrap();
        let frame = match result.values {
            crate::measurement::MeasurementValues::Waveform { frame } => frame,
            other => panic!("expected a waveform result, got {other:?}"),
        };

        let time = frame.column("time").unwrap();
        assert_eq!(time.len(), 4);
        if let crate::measurement::ColumnValues::Numbers(values) = &time.values {
            assert_eq!(values, &vec![Some(0.0), Some(1.0), Some(2.0), Some(3.0)]);
        } else {
            panic!("time column should be numeric");
        }

        let voltage = frame.column("ch1_voltage").unwrap();
        if let crate::measurement::ColumnValues::Numbers(values) = &voltage.values {
            // "ABCD" decodes to byte codes 65..68, and with yreference/yorigin
            // 0.0 and yincrement 1.0 those codes pass through as volts.
            assert_eq!(values, &vec![Some(65.0), Some(66.0), Some(67.0), Some(68.0)]);
        } else {
            panic!("ch1_voltage column should be numeric");
        }
    }
}
