//! Electronic load driver (spec §4.3).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::LabResult;
use crate::profile::ProfileSpec;
use crate::safety::SafetyLimits;
use crate::transport::Transport;

use super::{format_command, ErrorSweep, InstrumentCore};

/// Load regulation mode (spec §4.3): constant current, voltage, resistance, power.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    ConstantCurrent,
    ConstantVoltage,
    ConstantResistance,
    ConstantPower,
}

impl LoadMode {
    fn scpi_keyword(self) -> &'static str {
        match self {
            LoadMode::ConstantCurrent => "CURR",
            LoadMode::ConstantVoltage => "VOLT",
            LoadMode::ConstantResistance => "RES",
            LoadMode::ConstantPower => "POW",
        }
    }
}

pub struct ElectronicLoad {
    core: InstrumentCore,
}

impl ElectronicLoad {
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

/// Selector for one load input (spec §3, §4.3).
pub struct ChannelFacade<'a> {
    core: &'a InstrumentCore,
    index: u32,
}

impl<'a> ChannelFacade<'a> {
    pub async fn set_mode(self, mode: LoadMode) -> LabResult<Self> {
        let mut vars = HashMap::new();
        vars.insert("index".to_string(), self.index.to_string());
        vars.insert("mode".to_string(), mode.scpi_keyword().to_string());
        self.core.write(&format_command("CHAN{index}:FUNC {mode}", &vars)?).await?;
        Ok(self)
    }

    /// Program the constant-current set point, checked against the
    /// effective safety overlay (spec §4.4).
    pub async fn set_current(self, current: f64) -> LabResult<Self> {
        self.core.check_safety(self.index, "current", current)?;

        let mut vars = HashMap::new();
        vars.insert("index".to_string(), self.index.to_string());
        vars.insert("current".to_string(), current.to_string());
        self.core.write(&format_command("CHAN{index}:CURR {current}", &vars)?).await?;
        Ok(self)
    }

    pub async fn enable_input(self) -> LabResult<Self> {
        let mut vars = HashMap::new();
        vars.insert("index".to_string(), self.index.to_string());
        self.core.write(&format_command("CHAN{index}:INP ON", &vars)?).await?;
        Ok(self)
    }

    pub async fn disable_input(self) -> LabResult<Self> {
        let mut vars = HashMap::new();
        vars.insert("index".to_string(), self.index.to_string());
        self.core.write(&format_command("CHAN{index}:INP OFF", &vars)?).await?;
        Ok(self)
    }
}
