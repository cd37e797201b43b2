use std::collections::BTreeMap;

use ethercat_controller::SdoValue;
use num_traits::FromPrimitive;

use crate::state_machine::{CiA402State, StatusBits};

/// Mode of operation (0x6060 / 0x6061).
#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i8)]
pub enum ModeOfOperation {
    #[default]
    NoMode = 0,
    ProfilePosition = 1,
    Velocity = 2,
    ProfileVelocity = 3,
    ProfileTorque = 4,
    Homing = 6,
    InterpolatedPosition = 7,
    CyclicSyncPosition = 8,
    CyclicSyncVelocity = 9,
    CyclicSyncTorque = 10,
}

impl ModeOfOperation {
    pub fn from_display(raw: i8) -> Option<Self> {
        Self::from_i8(raw)
    }
}

/// Drive control loop parameters carried by the extended RX map.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopGains {
    pub torque_kp: f32,
    pub torque_loop_max_output: f32,
    pub torque_loop_min_output: f32,
    pub velocity_loop_kp: f32,
    pub velocity_loop_ki: f32,
    pub velocity_loop_kd: f32,
    pub position_loop_kp: f32,
    pub position_loop_ki: f32,
    pub position_loop_kd: f32,
}

impl LoopGains {
    /// Gains matching what the drive reported at bring-up. The torque Kp is
    /// the inverse of the motor torque constant (0 when the constant is 0).
    pub fn from_startup_params(params: &BTreeMap<String, SdoValue>) -> Self {
        let get = |key: &str| {
            params
                .get(key)
                .and_then(SdoValue::as_f64)
                .unwrap_or(0.0) as f32
        };

        let kt = get("motor_kt");
        LoopGains {
            torque_kp: if kt.abs() > f32::EPSILON { 1.0 / kt } else { 0.0 },
            torque_loop_max_output: get("torque_loop_max_output"),
            torque_loop_min_output: get("torque_loop_min_output"),
            velocity_loop_kp: get("velocity_loop_kp"),
            velocity_loop_ki: get("velocity_loop_ki"),
            velocity_loop_kd: get("velocity_loop_kd"),
            position_loop_kp: get("position_loop_kp"),
            position_loop_ki: get("position_loop_ki"),
            position_loop_kd: get("position_loop_kd"),
        }
    }
}

/// Command for one DS402 drive, in engineering units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Command {
    pub mode_of_operation: ModeOfOperation,
    /// N.m
    pub target_torque: f64,
    /// rad/s
    pub target_velocity: f64,
    /// rad
    pub target_position: f64,
    /// written to the gain fields of maps that carry them; the last gains sent
    /// are repeated while `None`
    pub gains: Option<LoopGains>,
    pub enable_drive: bool,
    pub clear_fault: bool,
}

impl Command {
    pub fn enable(mode: ModeOfOperation) -> Self {
        Command {
            mode_of_operation: mode,
            enable_drive: true,
            ..Default::default()
        }
    }
}

/// Status of one DS402 drive, in engineering units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriveStatus {
    pub online: bool,
    pub operational: bool,
    pub faulted: bool,
    pub al_state_code: u8,

    pub status_word: u16,
    pub state: CiA402State,
    pub bits: StatusBits,
    pub mode_of_operation_display: i8,
    pub error_code: u16,

    pub measured_torque: f64,
    pub measured_velocity: f64,
    pub measured_position: f64,
    pub velocity_setpoint: f64,
    pub bus_voltage: f64,
    pub motor_temperature: f64,

    pub cycle_time_ns: u64,
    pub deviation_ns: i64,
    pub seq: u64,
    pub stamp_ns: u64,
}

impl DriveStatus {
    pub fn mode(&self) -> Option<ModeOfOperation> {
        ModeOfOperation::from_display(self.mode_of_operation_display)
    }
}
