pub mod config;
pub use config::{Config, PdoMappingWrite, SlaveConfig, SlaveKind};

pub mod error;
pub use error::{ConfigError, LoopError, MasterError, PdoError, SdoError};

pub mod adapter;
pub use adapter::{
    AdapterFactory, AdapterRegistry, BoxedAdapter, CycleMeta, PdoDirection, SdoDataType,
    SdoReadSpec, SlaveAdapter, SlaveIdentity,
};

pub mod transport;
pub use transport::{describe_al_state, AlState, SdoPayload, SlaveInfo, Transport};

pub mod sdo;
pub use sdo::SdoValue;

pub mod data;
pub use data::{LoopStats, SystemCommand, SystemStatus};

pub mod master;
pub use master::{
    ConfiguredSlave, EthercatMaster, MasterRuntime, ShutdownOutcome, SlaveNames, StartupParams,
};

pub mod cyclic_loop;
pub use cyclic_loop::{CyclicLoop, LoopHandle, LoopState, TickScheduler};

pub mod sim;

#[cfg(feature = "igh")]
pub mod igh;
#[cfg(feature = "igh")]
pub use igh::IghTransport;
