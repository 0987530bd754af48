//! Writer and deployment configuration.
//!
//! [`WriterConfig`] tunes the session itself. [`GliderConfig`] bundles the
//! JSON documents that describe one glider deployment:
//!
//! ```text
//! <config_dir>/global_attributes.json     institution-wide file attributes
//! <config_dir>/datatypes.json             key -> variable descriptor
//! <config_dir>/<glider>/deployment.json   glider, trajectory date, platform
//! <config_dir>/<glider>/instruments.json  [{ "name": ..., "attrs": {...} }]
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::VariableDescriptor;

pub type JsonMap = BTreeMap<String, serde_json::Value>;

/// Where a companion value is taken from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanionSource {
    /// The timestamp of the record that carried the trigger.
    Timestamp,
    /// Another key of the same record.
    Key(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Companion {
    pub target: String,
    pub source: CompanionSource,
}

/// When `trigger` is written as a scalar, every companion is written too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionRule {
    pub trigger: String,
    pub companions: Vec<Companion>,
}

impl CompanionRule {
    /// Depth-averaged current estimate: stamp its time and position.
    pub fn water_velocity() -> Self {
        Self {
            trigger: "m_water_vx-m/s".to_string(),
            companions: vec![
                Companion {
                    target: "time_uv".to_string(),
                    source: CompanionSource::Timestamp,
                },
                Companion {
                    target: "lat_uv".to_string(),
                    source: CompanionSource::Key("m_gps_lat-lat".to_string()),
                },
                Companion {
                    target: "lon_uv".to_string(),
                    source: CompanionSource::Key("m_gps_lon-lon".to_string()),
                },
            ],
        }
    }
}

/// Keys used by the profile summary pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileKeys {
    pub time: String,
    pub lat: String,
    pub lon: String,
    /// Series averaged into `lat`.
    pub lat_source: String,
    /// Series averaged into `lon`.
    pub lon_source: String,
}

impl Default for ProfileKeys {
    fn default() -> Self {
        Self {
            time: "profile_time".to_string(),
            lat: "profile_lat".to_string(),
            lon: "profile_lon".to_string(),
            lat_source: "lat".to_string(),
            lon_source: "lon".to_string(),
        }
    }
}

/// Configuration for a writer session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Record key holding the sample time in epoch seconds.
    /// Default: "timestamp"
    pub time_key: String,

    /// Name of the time variable and of the record dimension.
    /// Default: "time"
    pub time_variable: String,

    /// Identity written into each history line.
    /// Default: crate name and version
    pub program: String,

    /// Only declare descriptors in `register_all`; create containers on
    /// first use.
    /// Default: false
    pub lazy_materialize: bool,

    /// Scalar writes that fan out to companion scalars.
    /// Default: the water-velocity rule
    pub companion_rules: Vec<CompanionRule>,

    pub profile: ProfileKeys,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            time_key: "timestamp".to_string(),
            time_variable: "time".to_string(),
            program: concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION")).to_string(),
            lazy_materialize: false,
            companion_rules: vec![CompanionRule::water_velocity()],
            profile: ProfileKeys::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Deployment {
    pub glider: String,
    pub trajectory_date: String,
    pub global_attributes: JsonMap,
    pub platform: JsonMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentDescription {
    pub name: String,
    #[serde(default)]
    pub attrs: JsonMap,
}

/// Everything needed to describe one deployment's files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GliderConfig {
    pub global_attributes: JsonMap,
    pub datatypes: BTreeMap<String, VariableDescriptor>,
    pub deployment: Deployment,
    pub instruments: Vec<InstrumentDescription>,
}

impl GliderConfig {
    pub fn load(config_dir: &Path, glider: &str) -> Result<Self> {
        let glider_dir = config_dir.join(glider);
        let config = Self {
            global_attributes: read_json(&config_dir.join("global_attributes.json"))?,
            datatypes: read_json(&config_dir.join("datatypes.json"))?,
            deployment: read_json(&glider_dir.join("deployment.json"))?,
            instruments: read_json(&glider_dir.join("instruments.json"))?,
        };
        log::debug!(
            "loaded {} datatypes and {} instruments for {glider}",
            config.datatypes.len(),
            config.instruments.len()
        );
        Ok(config)
    }

    /// Institution attributes with the deployment's attributes laid over them.
    pub fn merged_global_attributes(&self) -> JsonMap {
        let mut merged = self.global_attributes.clone();
        merged.extend(
            self.deployment
                .global_attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        merged
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {e}", path.display()),
        ))
    })?;
    Ok(serde_json::from_str(&text)?)
}
