//! Simulator transport: a [`Transport`] backed entirely by a [`SimEngine`],
//! no network or VISA dependency at all (spec §4.1).

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::LabResult;
use crate::profile::ProfileSpec;
use crate::sim::SimEngine;

use super::{strip_binary_block_if_present, Transport, NO_ERROR_SENTINEL};

pub struct SimulatorTransport {
    engine: SimEngine,
    /// The last command handed to `write`, re-queried by `read_raw` (spec
    /// §4.1: binary-block reads follow a write of the query-style command
    /// rather than carrying the command themselves).
    pending: Mutex<Option<String>>,
}

impl SimulatorTransport {
    pub fn new(profile: &ProfileSpec, sim_config: &crate::config::SimConfig) -> Self {
        Self {
            engine: SimEngine::new(
                profile.simulation.state.clone(),
                profile.sim_rules().to_vec(),
                sim_config,
            ),
            pending: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for SimulatorTransport {
    async fn connect(&self) -> LabResult<()> {
        Ok(())
    }

    async fn write(&self, cmd: &str) -> LabResult<()> {
        self.engine.handle(cmd, false).await?;
        *self.pending.lock().await = Some(cmd.to_string());
        Ok(())
    }

    async fn query(&self, cmd: &str) -> LabResult<String> {
        match self.engine.handle(cmd, true).await? {
            crate::sim::SimOutcome::Response(text) => Ok(text),
            crate::sim::SimOutcome::NoResponse => Ok(String::new()),
        }
    }

    async fn read_raw(&self, _max_len: Option<usize>) -> LabResult<Vec<u8>> {
        let cmd = self.pending.lock().await.take().unwrap_or_default();
        let text = self.query(&cmd).await?;
        Ok(strip_binary_block_if_present(text.into_bytes()))
    }

    async fn clear_errors(&self) -> LabResult<Vec<String>> {
        let response = self.query(":SYSTem:ERRor?").await?;
        if response.is_empty() || response == NO_ERROR_SENTINEL {
            Ok(Vec::new())
        } else {
            Ok(vec![response])
        }
    }

    async fn close(&self) -> LabResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_with_idn() -> ProfileSpec {
        ProfileSpec::from_yaml_str(
            r#"
model_id: keysight/EDU36311A
device_type: psu
simulation:
  scpi:
    - command: "\\*IDN\\?"
      response: "Keysight,EDU36311A,0,1.0"
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn query_returns_the_matched_rule_response() {
        let profile = profile_with_idn();
        let transport = SimulatorTransport::new(&profile, &crate::config::SimConfig::default());
        transport.connect().await.unwrap();
        let idn = transport.query("*IDN?").await.unwrap();
        assert_eq!(idn, "Keysight,EDU36311A,0,1.0");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let profile = profile_with_idn();
        let transport = SimulatorTransport::new(&profile, &crate::config::SimConfig::default());
        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }
}
