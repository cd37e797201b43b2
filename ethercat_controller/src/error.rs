use std::{io, time::Duration};

use thiserror::Error;

use crate::{
    adapter::{PdoDirection, SdoDataType},
    config::SlaveKind,
    transport::AlState,
};

/// Invalid or incomplete topology, detected before any bus access.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Unable to read topology file: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid topology file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Topology config must include a non-empty 'iface'")]
    MissingIface,
    #[error("Topology config 'slaves' must be a non-empty list")]
    NoSlaves,
    #[error("Invalid cycle rate {0} Hz, it must be greater than 0")]
    InvalidCycleRate(u32),
    #[error("Slave name '{0}' is configured more than once")]
    DuplicateSlave(String),
    #[error("Unsupported slave kind '{kind}' for '{slave}'")]
    UnsupportedKind { slave: String, kind: SlaveKind },
    #[error("Invalid scaling factor '{factor}' for '{slave}': {reason}")]
    InvalidScaling {
        slave: String,
        factor: String,
        reason: String,
    },
    #[error(
        "PDO mapping write for '{slave}' at 0x{index:04X}:{subindex:02X} has size {size}, expected 1 to 8 bytes"
    )]
    InvalidMappingSize {
        slave: String,
        index: u16,
        subindex: u8,
        size: u8,
    },
    #[error(
        "PDO mapping write for '{slave}' at 0x{index:04X}:{subindex:02X} has value 0x{value:X} wider than {size} bytes"
    )]
    MappingValueOverflow {
        slave: String,
        index: u16,
        subindex: u8,
        value: u64,
        size: u8,
    },
}

/// Binary process data or SDO payload that does not fit its declared layout.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PdoError {
    #[error("Encoded payload size mismatch: expected={expected} got={actual}")]
    OutputSizeMismatch { expected: usize, actual: usize },
    #[error("TX PDO payload too small: got={actual} expected_at_least={expected}")]
    InputTooShort { expected: usize, actual: usize },
    #[error("Register '{register}' is not part of PDO map '{map}'")]
    MissingRegister {
        register: &'static str,
        map: &'static str,
    },
    #[error("SDO payload too short for {data_type}: got={actual} expected>={expected}")]
    SdoPayloadTooShort {
        data_type: SdoDataType,
        expected: usize,
        actual: usize,
    },
    #[error("Unsupported SDO data type {0} for a scalar payload")]
    UnsupportedSdoType(SdoDataType),
    #[error("SDO value {value} does not fit {data_type}")]
    SdoValueOutOfRange { data_type: SdoDataType, value: i64 },
}

/// Cause of a failed startup SDO read attempt.
#[derive(Error, Debug)]
pub enum SdoError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Decode(#[from] PdoError),
}

/// Fatal bring-up failure. Every variant carries enough context to diagnose
/// the bus without re-running it.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MasterError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Transport failure while {context}: {source}")]
    Transport {
        context: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("No EtherCAT slaves detected")]
    NoSlavesDetected,
    #[error("Configured position {position} of '{slave}' out of range; detected {detected} slaves")]
    PositionOutOfRange {
        slave: String,
        position: u16,
        detected: usize,
    },
    #[error("Slave '{slave}' {field} mismatch: expected=0x{expected:08X} got=0x{actual:08X}")]
    IdentityMismatch {
        slave: String,
        field: &'static str,
        expected: u32,
        actual: u32,
    },
    #[error("Bus did not reach {requested} within {timeout:?} (lowest state: {reached})")]
    StateTimeout {
        requested: AlState,
        reached: String,
        timeout: Duration,
    },
    #[error(
        "Startup SDO read failed for '{slave}' key='{key}' at 0x{index:04X}:{subindex:02X} type={data_type} after {attempts} attempts: {source}"
    )]
    SdoRead {
        slave: String,
        key: &'static str,
        index: u16,
        subindex: u8,
        data_type: SdoDataType,
        attempts: usize,
        #[source]
        source: SdoError,
    },
    #[error(
        "PDO mapping SDO write failed for '{slave}' at 0x{index:04X}:{subindex:02X} value={value} size={size} after {attempts} attempts: {source}"
    )]
    SdoWrite {
        slave: String,
        index: u16,
        subindex: u8,
        value: u64,
        size: u8,
        attempts: usize,
        #[source]
        source: io::Error,
    },
    #[error("{direction} PDO size mismatch for '{slave}': expected={expected} got={actual}")]
    PdoSizeMismatch {
        slave: String,
        direction: PdoDirection,
        expected: usize,
        actual: usize,
    },
    #[error("Failed to reach OP for all configured slaves.\n{table}")]
    OperationalTimeout { table: String },
}

impl MasterError {
    pub(crate) fn transport(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| MasterError::Transport { context, source }
    }
}

/// Failure of a single cyclic exchange. A degraded working counter is never
/// reported through this type.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LoopError {
    #[error("Invalid cycle rate {0} Hz, it must be greater than 0")]
    InvalidCycleRate(u32),
    #[error("Command submitted for unknown slave '{0}'")]
    UnknownSlave(String),
    #[error("Adapter of '{slave}' failed: {source}")]
    Adapter {
        slave: String,
        #[source]
        source: PdoError,
    },
    #[error("Process data access failed for '{slave}': {source}")]
    ProcessData {
        slave: String,
        #[source]
        source: io::Error,
    },
    #[error("Unable to spawn the cyclic driver thread: {0}")]
    Spawn(io::Error),
}
