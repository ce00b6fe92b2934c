//! Bench composition: resolves a [`BenchDescriptor`] into a live, connected
//! set of instruments (spec §4.4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::error::{LabError, LabResult};
use crate::instrument::{
    Awg, Dmm, ElectronicLoad, ErrorSweep, Oscilloscope, PowerMeter, PowerSupply, SpectrumAnalyzer, Vna,
};
use crate::metadata::ExperimentMetadata;
use crate::profile::{DeviceType, ProfileCatalog};
use crate::safety::SafetyLimits;
use crate::transport::{
    HardwareTransport, RecorderTransport, ReplayerTransport, SessionDocument, SimulatorTransport, Transport,
};

/// Transport variant an instrument entry resolves to (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Visa,
    Sim,
    Record,
    Replay,
}

/// `backend:`/`backend_defaults:` block (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub kind: BackendKind,
    #[serde(default, with = "humantime_serde::option")]
    pub timeout_ms: Option<Duration>,
}

/// One `instruments.<alias>` entry (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstrumentDescriptor {
    pub profile: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub simulate: Option<bool>,
    #[serde(default)]
    pub backend: Option<BackendConfig>,
    #[serde(default)]
    pub safety_limits: SafetyLimits,
}

/// Parsed bench YAML (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchDescriptor {
    pub bench_name: String,
    #[serde(default)]
    pub simulate: bool,
    #[serde(default)]
    pub backend_defaults: Option<BackendConfig>,
    pub instruments: HashMap<String, InstrumentDescriptor>,
    #[serde(default)]
    pub experiment: Option<ExperimentMetadata>,
}

impl BenchDescriptor {
    pub fn from_yaml_str(yaml: &str) -> LabResult<Self> {
        let descriptor: BenchDescriptor = serde_yaml::from_str(yaml)?;
        Ok(descriptor)
    }

    pub fn from_path(path: &std::path::Path) -> LabResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }
}

/// Resolve the transport variant for one instrument entry (spec §4.4):
/// an explicit per-instrument `backend` always wins; otherwise simulate
/// (per-instrument, falling back to the bench-global flag) forces `Sim`;
/// otherwise the bench's `backend_defaults` apply; otherwise presence of
/// an `address` implies `Visa`, and absence implies `Sim`.
fn resolve_backend(
    global_simulate: bool,
    descriptor: &InstrumentDescriptor,
    backend_defaults: &Option<BackendConfig>,
) -> BackendKind {
    if let Some(backend) = &descriptor.backend {
        return backend.kind;
    }
    if descriptor.simulate.unwrap_or(global_simulate) {
        return BackendKind::Sim;
    }
    if let Some(defaults) = backend_defaults {
        return defaults.kind;
    }
    if descriptor.address.is_some() {
        BackendKind::Visa
    } else {
        BackendKind::Sim
    }
}

/// One device-type driver, tagged rather than boxed behind a shared trait
/// (spec §9 REDESIGN FLAG: fixed per-device-type structs, not duck typing).
pub enum AnyInstrument {
    Oscilloscope(Oscilloscope),
    PowerSupply(PowerSupply),
    Dmm(Dmm),
    Awg(Awg),
    ElectronicLoad(ElectronicLoad),
    SpectrumAnalyzer(SpectrumAnalyzer),
    Vna(Vna),
    PowerMeter(PowerMeter),
}

impl AnyInstrument {
    async fn connect(&self) -> LabResult<()> {
        match self {
            AnyInstrument::Oscilloscope(i) => i.connect().await,
            AnyInstrument::PowerSupply(i) => i.connect().await,
            AnyInstrument::Dmm(i) => i.connect().await,
            AnyInstrument::Awg(i) => i.connect().await,
            AnyInstrument::ElectronicLoad(i) => i.connect().await,
            AnyInstrument::SpectrumAnalyzer(i) => i.connect().await,
            AnyInstrument::Vna(i) => i.connect().await,
            AnyInstrument::PowerMeter(i) => i.connect().await,
        }
    }

    async fn close(&self) -> LabResult<()> {
        match self {
            AnyInstrument::Oscilloscope(i) => i.close().await,
            AnyInstrument::PowerSupply(i) => i.close().await,
            AnyInstrument::Dmm(i) => i.close().await,
            AnyInstrument::Awg(i) => i.close().await,
            AnyInstrument::ElectronicLoad(i) => i.close().await,
            AnyInstrument::SpectrumAnalyzer(i) => i.close().await,
            AnyInstrument::Vna(i) => i.close().await,
            AnyInstrument::PowerMeter(i) => i.close().await,
        }
    }
}

/// A named, constructed, connected collection of instruments (spec §4.4).
///
/// Callers must call [`Bench::close`] explicitly; async `Drop` isn't
/// expressible in safe Rust, so a `Bench` dropped while still connected
/// only logs a warning (mirrors the teacher's `ShutdownFailed` pattern,
/// which likewise cannot run recovery I/O from `Drop`).
pub struct Bench {
    pub name: String,
    pub experiment: Option<ExperimentMetadata>,
    order: Vec<String>,
    instruments: HashMap<String, AnyInstrument>,
    recorders: HashMap<String, Arc<RecorderTransport>>,
    closed: AtomicBool,
}

impl Bench {
    /// Construct every instrument entry, in declared order, and connect
    /// each sequentially (spec §4.4). `replay_session` supplies the
    /// recorded log for any entry that resolves to the `Replay` backend.
    pub async fn open(
        descriptor: BenchDescriptor,
        config: &RuntimeConfig,
        catalog: &ProfileCatalog,
        replay_session: Option<&SessionDocument>,
    ) -> LabResult<Self> {
        let global_simulate = descriptor.simulate || config.force_simulate;
        let mut order = Vec::new();
        let mut instruments = HashMap::new();
        let mut recorders = HashMap::new();

        let mut aliases: Vec<&String> = descriptor.instruments.keys().collect();
        aliases.sort();

        for alias in aliases {
            let entry = &descriptor.instruments[alias];
            let profile = catalog.load(&entry.profile)?;
            let backend = resolve_backend(global_simulate, entry, &descriptor.backend_defaults);
            let timeout = entry
                .backend
                .as_ref()
                .and_then(|b| b.timeout_ms)
                .or_else(|| descriptor.backend_defaults.as_ref().and_then(|b| b.timeout_ms))
                .unwrap_or(config.timeouts.transport);

            let transport: Arc<dyn Transport> = match backend {
                BackendKind::Sim => Arc::new(SimulatorTransport::new(&profile, &config.sim)),
                BackendKind::Visa => {
                    let address = entry.address.clone().ok_or_else(|| {
                        LabError::Config(format!("instrument '{alias}' has no address; required for a visa backend"))
                    })?;
                    Arc::new(HardwareTransport::new(address, timeout))
                }
                BackendKind::Record => {
                    let base: Arc<dyn Transport> = if let Some(address) = &entry.address {
                        Arc::new(HardwareTransport::new(address.clone(), timeout))
                    } else {
                        Arc::new(SimulatorTransport::new(&profile, &config.sim))
                    };
                    let recorder = Arc::new(RecorderTransport::new(base, alias.clone(), entry.profile.clone()));
                    recorders.insert(alias.clone(), recorder.clone());
                    recorder
                }
                BackendKind::Replay => {
                    let session = replay_session.ok_or_else(|| {
                        LabError::Config(format!(
                            "instrument '{alias}' requests a replay backend but no session document was supplied"
                        ))
                    })?;
                    let alias_log = session.alias_log(alias).ok_or_else(|| {
                        LabError::Config(format!("session document has no recorded log for alias '{alias}'"))
                    })?;
                    Arc::new(ReplayerTransport::new(alias_log.log.clone(), config.replay.fatal_on_unconsumed))
                }
            };

            let instrument = build_instrument(profile, transport, alias.clone(), &entry.safety_limits)?;
            instrument.connect().await?;

            order.push(alias.clone());
            instruments.insert(alias.clone(), instrument);
        }

        Ok(Self {
            name: descriptor.bench_name,
            experiment: descriptor.experiment,
            order,
            instruments,
            recorders,
            closed: AtomicBool::new(false),
        })
    }

    pub fn oscilloscope(&self, alias: &str) -> Option<&Oscilloscope> {
        match self.instruments.get(alias) {
            Some(AnyInstrument::Oscilloscope(i)) => Some(i),
            _ => None,
        }
    }

    pub fn power_supply(&self, alias: &str) -> Option<&PowerSupply> {
        match self.instruments.get(alias) {
            Some(AnyInstrument::PowerSupply(i)) => Some(i),
            _ => None,
        }
    }

    pub fn dmm(&self, alias: &str) -> Option<&Dmm> {
        match self.instruments.get(alias) {
            Some(AnyInstrument::Dmm(i)) => Some(i),
            _ => None,
        }
    }

    pub fn awg(&self, alias: &str) -> Option<&Awg> {
        match self.instruments.get(alias) {
            Some(AnyInstrument::Awg(i)) => Some(i),
            _ => None,
        }
    }

    pub fn electronic_load(&self, alias: &str) -> Option<&ElectronicLoad> {
        match self.instruments.get(alias) {
            Some(AnyInstrument::ElectronicLoad(i)) => Some(i),
            _ => None,
        }
    }

    pub fn spectrum_analyzer(&self, alias: &str) -> Option<&SpectrumAnalyzer> {
        match self.instruments.get(alias) {
            Some(AnyInstrument::SpectrumAnalyzer(i)) => Some(i),
            _ => None,
        }
    }

    pub fn vna(&self, alias: &str) -> Option<&Vna> {
        match self.instruments.get(alias) {
            Some(AnyInstrument::Vna(i)) => Some(i),
            _ => None,
        }
    }

    pub fn power_meter(&self, alias: &str) -> Option<&PowerMeter> {
        match self.instruments.get(alias) {
            Some(AnyInstrument::PowerMeter(i)) => Some(i),
            _ => None,
        }
    }

    pub fn aliases(&self) -> &[String] {
        &self.order
    }

    /// Merge every `Record`-backed instrument's session fragment into one
    /// document, for the `replay record` CLI surface to persist.
    pub async fn session_document(&self) -> SessionDocument {
        let mut merged = SessionDocument::new();
        for recorder in self.recorders.values() {
            merged.extend(recorder.to_session_document().await);
        }
        merged
    }

    /// Close every instrument in reverse construction order, best-effort:
    /// every close is attempted regardless of earlier failures, and all
    /// failures are collected into one [`LabError::Shutdown`] (spec §4.4).
    pub async fn close(self) -> LabResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        let mut failures = Vec::new();
        for alias in self.order.iter().rev() {
            if let Some(instrument) = self.instruments.get(alias) {
                if let Err(err) = instrument.close().await {
                    failures.push(err);
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(LabError::Shutdown(failures))
        }
    }
}

impl Drop for Bench {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            tracing::warn!(
                bench = %self.name,
                "bench dropped without calling close(); instruments were not released cleanly"
            );
        }
    }
}

fn build_instrument(
    profile: crate::profile::ProfileSpec,
    transport: Arc<dyn Transport>,
    alias: String,
    safety_limits: &SafetyLimits,
) -> LabResult<AnyInstrument> {
    let error_sweep = ErrorSweep::default();
    Ok(match profile.device_type {
        DeviceType::Oscilloscope => {
            AnyInstrument::Oscilloscope(Oscilloscope::new(profile, transport, alias, safety_limits, error_sweep))
        }
        DeviceType::Psu => {
            AnyInstrument::PowerSupply(PowerSupply::new(profile, transport, alias, safety_limits, error_sweep))
        }
        DeviceType::Dmm => AnyInstrument::Dmm(Dmm::new(profile, transport, alias, safety_limits, error_sweep)),
        DeviceType::Awg => AnyInstrument::Awg(Awg::new(profile, transport, alias, safety_limits, error_sweep)),
        DeviceType::Load => {
            AnyInstrument::ElectronicLoad(ElectronicLoad::new(profile, transport, alias, safety_limits, error_sweep))
        }
        DeviceType::Sa => AnyInstrument::SpectrumAnalyzer(SpectrumAnalyzer::new(
            profile,
            transport,
            alias,
            safety_limits,
            error_sweep,
        )),
        DeviceType::Vna => AnyInstrument::Vna(Vna::new(profile, transport, alias, safety_limits, error_sweep)),
        DeviceType::PowerMeter => {
            AnyInstrument::PowerMeter(PowerMeter::new(profile, transport, alias, safety_limits, error_sweep))
        }
    })
}
