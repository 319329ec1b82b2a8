//! Runtime settings shared by both binaries.
//!
//! Everything has a default, so a JSON file only needs the keys it changes.

use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fix::codec::DEFAULT_BEGIN_STRING;
use crate::session::state::SessionId;
use crate::simulator::error::{SimulatorError, SimulatorResult};
use crate::simulator::types::Instrument;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub begin_string: String,
    pub client_comp_id: String,
    pub market_maker_comp_id: String,
    pub host: String,
    pub port: u16,
    pub heartbeat_interval_secs: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            begin_string: DEFAULT_BEGIN_STRING.to_string(),
            client_comp_id: "CLIENT".to_string(),
            market_maker_comp_id: "MARKET_MAKER".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5001,
            heartbeat_interval_secs: 30,
        }
    }
}

impl SessionSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Identity of the initiating (client) side
    pub fn client_session_id(&self) -> SessionId {
        SessionId::new(
            self.begin_string.clone(),
            self.client_comp_id.clone(),
            self.market_maker_comp_id.clone(),
        )
    }

    /// Identity of the accepting (market maker) side
    pub fn market_maker_session_id(&self) -> SessionId {
        SessionId::new(
            self.begin_string.clone(),
            self.market_maker_comp_id.clone(),
            self.client_comp_id.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSettings {
    pub symbol: String,
    pub initial_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorSettings {
    pub session: SessionSettings,
    pub instruments: Vec<InstrumentSettings>,
    pub tick_interval_ms: u64,
    /// Prometheus listener for the market maker; disabled when absent
    pub metrics_addr: Option<String>,
    pub metrics_report_interval_secs: u64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            session: SessionSettings::default(),
            instruments: vec![
                InstrumentSettings {
                    symbol: "EUR/USD".to_string(),
                    initial_price: 150.0,
                },
                InstrumentSettings {
                    symbol: "GBP/USD".to_string(),
                    initial_price: 2800.0,
                },
                InstrumentSettings {
                    symbol: "USD/JPY".to_string(),
                    initial_price: 290.0,
                },
            ],
            tick_interval_ms: 1000,
            metrics_addr: None,
            metrics_report_interval_secs: 10,
        }
    }
}

impl SimulatorSettings {
    pub fn from_json_str(json: &str) -> SimulatorResult<Self> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|e| SimulatorError::Config(format!("invalid settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> SimulatorResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SimulatorError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> SimulatorResult<()> {
        if self.instruments.is_empty() {
            return Err(SimulatorError::Config("no instruments configured".to_string()));
        }
        if let Some(bad) = self
            .instruments
            .iter()
            .find(|i| i.symbol.is_empty() || !i.initial_price.is_finite())
        {
            return Err(SimulatorError::Config(format!(
                "invalid instrument {:?}",
                bad
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(SimulatorError::Config(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        if self.session.client_comp_id == self.session.market_maker_comp_id {
            return Err(SimulatorError::Config(
                "client and market maker CompIDs must differ".to_string(),
            ));
        }
        Ok(())
    }

    pub fn instruments(&self) -> Vec<Instrument> {
        self.instruments
            .iter()
            .map(|i| Instrument::new(i.symbol.clone(), i.initial_price))
            .collect()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn metrics_report_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_report_interval_secs.max(1))
    }
}

/// Command-line overrides shared by both binaries
#[derive(Args, Debug, Clone, Default)]
pub struct CliOverrides {
    /// JSON settings file; built-in defaults when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Market maker host
    #[arg(long)]
    pub host: Option<String>,

    /// Market maker port
    #[arg(long)]
    pub port: Option<u16>,

    /// Serve Prometheus metrics on this address (market maker only)
    #[arg(long)]
    pub metrics_addr: Option<String>,
}

impl CliOverrides {
    pub fn load(&self) -> SimulatorResult<SimulatorSettings> {
        let mut settings = match &self.config {
            Some(path) => SimulatorSettings::from_json_file(path)?,
            None => SimulatorSettings::default(),
        };
        if let Some(host) = &self.host {
            settings.session.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.session.port = port;
        }
        if self.metrics_addr.is_some() {
            settings.metrics_addr = self.metrics_addr.clone();
        }
        Ok(settings)
    }
}
