use std::{collections::HashMap, fmt};

use crate::{
    config::{SlaveConfig, SlaveKind},
    error::{ConfigError, PdoError},
};

/// Static identity and addressing of one configured slave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveIdentity {
    pub name: String,
    pub position: u16,
    pub vendor_id: Option<u32>,
    pub product_code: Option<u32>,
}

impl From<&SlaveConfig> for SlaveIdentity {
    fn from(config: &SlaveConfig) -> Self {
        SlaveIdentity {
            name: config.name.clone(),
            position: config.position,
            vendor_id: (config.vendor_id != 0).then_some(config.vendor_id),
            product_code: (config.product_code != 0).then_some(config.product_code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdoDirection {
    /// master to slave
    Rx,
    /// slave to master
    Tx,
}

impl fmt::Display for PdoDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PdoDirection::Rx => f.write_str("RX"),
            PdoDirection::Tx => f.write_str("TX"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdoDataType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    Bytes,
}

impl SdoDataType {
    /// Minimum payload length, `None` for raw bytes.
    pub fn size(&self) -> Option<usize> {
        match self {
            SdoDataType::U8 | SdoDataType::I8 => Some(1),
            SdoDataType::U16 | SdoDataType::I16 => Some(2),
            SdoDataType::U32 | SdoDataType::I32 | SdoDataType::F32 => Some(4),
            SdoDataType::Bytes => None,
        }
    }
}

impl fmt::Display for SdoDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SdoDataType::U8 => "u8",
            SdoDataType::I8 => "s8",
            SdoDataType::U16 => "u16",
            SdoDataType::I16 => "s16",
            SdoDataType::U32 => "u32",
            SdoDataType::I32 => "s32",
            SdoDataType::F32 => "f32",
            SdoDataType::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

/// Typed SDO object read, performed once at bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdoReadSpec {
    pub name: &'static str,
    pub index: u16,
    pub subindex: u8,
    pub data_type: SdoDataType,
}

impl SdoReadSpec {
    pub const fn new(name: &'static str, index: u16, subindex: u8, data_type: SdoDataType) -> Self {
        SdoReadSpec {
            name,
            index,
            subindex,
            data_type,
        }
    }
}

/// Timing of the cycle a status is decoded in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleMeta {
    pub seq: u64,
    /// end of cycle, ns since the loop was created
    pub stamp_ns: u64,
    pub cycle_time_ns: u64,
    /// elapsed minus nominal period
    pub deviation_ns: i64,
}

/// Contract each device family implements for the cyclic PDO exchange.
pub trait SlaveAdapter: Send {
    type Command;
    type Status;

    fn identity(&self) -> &SlaveIdentity;

    /// Byte size of the master to slave payload.
    fn rx_pdo_size(&self) -> usize;

    /// Byte size of the slave to master payload.
    fn tx_pdo_size(&self) -> usize;

    /// Encode a command into exactly `rx_pdo_size()` bytes.
    fn encode(&mut self, command: &Self::Command) -> Result<Vec<u8>, PdoError>;

    /// Decode at least `tx_pdo_size()` bytes into a status.
    fn decode(&mut self, input: &[u8], meta: &CycleMeta) -> Result<Self::Status, PdoError>;

    /// Named SDO objects read once during bring-up.
    fn startup_read_specs(&self) -> &'static [SdoReadSpec] {
        &[]
    }
}

pub type BoxedAdapter<C, S> = Box<dyn SlaveAdapter<Command = C, Status = S>>;

pub type AdapterFactory<C, S> = fn(&SlaveConfig) -> Result<BoxedAdapter<C, S>, ConfigError>;

/// Adapter constructors keyed by device family.
pub struct AdapterRegistry<C, S> {
    factories: HashMap<SlaveKind, AdapterFactory<C, S>>,
}

impl<C, S> Default for AdapterRegistry<C, S> {
    fn default() -> Self {
        AdapterRegistry {
            factories: HashMap::new(),
        }
    }
}

impl<C, S> AdapterRegistry<C, S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: SlaveKind, factory: AdapterFactory<C, S>) -> Self {
        self.factories.insert(kind, factory);
        self
    }

    pub fn supports(&self, kind: SlaveKind) -> bool {
        self.factories.contains_key(&kind)
    }

    pub fn build(&self, config: &SlaveConfig) -> Result<BoxedAdapter<C, S>, ConfigError> {
        let factory = self
            .factories
            .get(&config.kind)
            .ok_or_else(|| ConfigError::UnsupportedKind {
                slave: config.name.clone(),
                kind: config.kind,
            })?;
        factory(config)
    }
}
