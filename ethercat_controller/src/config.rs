use std::{
    collections::{HashMap, HashSet},
    fmt, fs,
};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_cycle_hz() -> u32 {
    1000
}

/// Bus topology loaded from a YAML (or JSON) file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub iface: String,
    #[serde(default = "default_cycle_hz")]
    pub cycle_hz: u32,
    #[serde(default)]
    pub strict_pdo_size: bool,
    #[serde(default)]
    pub slaves: Vec<SlaveConfig>,
}

/// Device family selector of a configured slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaveKind {
    /// CiA 402 drive with the extended (gain + current feedback) PDO map
    Ds402,
    /// CiA 402 drive with the minimal position/velocity/torque PDO map
    Ds402Legacy,
}

impl SlaveKind {
    pub fn name(&self) -> &'static str {
        match *self {
            SlaveKind::Ds402 => "ds402",
            SlaveKind::Ds402Legacy => "ds402_legacy",
        }
    }
}

impl fmt::Display for SlaveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveConfig {
    pub name: String,
    pub position: u16,
    pub kind: SlaveKind,
    /// 0 matches any vendor
    #[serde(default)]
    pub vendor_id: u32,
    /// 0 matches any product
    #[serde(default)]
    pub product_code: u32,
    #[serde(default)]
    pub pdo_mapping: Vec<PdoMappingWrite>,
    #[serde(default)]
    pub scaling: HashMap<String, f64>,
}

/// One startup SDO write used to remap the slave's PDOs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdoMappingWrite {
    pub index: u16,
    pub subindex: u8,
    pub value: u64,
    #[serde(alias = "size")]
    pub size_bytes: u8,
}

impl PdoMappingWrite {
    /// Little-endian payload of exactly `size_bytes` bytes.
    pub fn payload(&self) -> Vec<u8> {
        self.value.to_le_bytes()[..self.size_bytes as usize].to_vec()
    }
}

impl Config {
    pub fn from_yaml(path: &str) -> Result<Self, ConfigError> {
        let yaml = fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked without touching the bus.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.iface.trim().is_empty() {
            return Err(ConfigError::MissingIface);
        }
        if self.slaves.is_empty() {
            return Err(ConfigError::NoSlaves);
        }
        if self.cycle_hz == 0 {
            return Err(ConfigError::InvalidCycleRate(self.cycle_hz));
        }

        let mut names = HashSet::new();
        for slave in &self.slaves {
            if !names.insert(slave.name.as_str()) {
                return Err(ConfigError::DuplicateSlave(slave.name.clone()));
            }
            for write in &slave.pdo_mapping {
                if !(1..=8).contains(&write.size_bytes) {
                    return Err(ConfigError::InvalidMappingSize {
                        slave: slave.name.clone(),
                        index: write.index,
                        subindex: write.subindex,
                        size: write.size_bytes,
                    });
                }
                if write.size_bytes < 8 && write.value >> (8 * write.size_bytes as u32) != 0 {
                    return Err(ConfigError::MappingValueOverflow {
                        slave: slave.name.clone(),
                        index: write.index,
                        subindex: write.subindex,
                        value: write.value,
                        size: write.size_bytes,
                    });
                }
            }
        }
        Ok(())
    }
}
