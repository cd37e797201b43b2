#[macro_use]
extern crate num_derive;

use ethercat_controller::{CyclicLoop, EthercatMaster, MasterRuntime};

pub mod state_machine;
pub use state_machine::{
    controlword, decode_state, parse_status_word, CiA402State, ControlWord, StatusBit, StatusBits,
    EXTENDED_STATE_TABLE, LEGACY_STATE_TABLE,
};

pub mod register;
pub use register::{FieldType, PdoRegister};

pub mod pdo;
pub use pdo::{PdoFrame, PdoLayout, PdoMap, PdoValue, PdoView, EXTENDED_MAP, LEGACY_MAP};

pub mod scaling;
pub use scaling::{Scale, Scaling};

pub mod data;
pub use data::{Command, DriveStatus, LoopGains, ModeOfOperation};

pub mod adapter;
pub use adapter::{registry, Ds402Adapter, EXTENDED_STARTUP_PARAMS};

pub mod sim;

pub type Ds402Master = EthercatMaster<Command, DriveStatus>;
pub type Ds402Runtime = MasterRuntime<Command, DriveStatus>;
pub type Ds402Loop = CyclicLoop<Command, DriveStatus>;

/// Master with every DS402 kind registered.
pub fn master(config: ethercat_controller::Config) -> Ds402Master {
    EthercatMaster::new(config, registry())
}
