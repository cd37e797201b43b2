/// Objects carried in the cyclic process data of a DS402 drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PdoRegister {
    ControlWord,
    ModeOfOperation,
    TargetPosition,
    TargetVelocity,
    TargetTorque,
    TorqueCommand,
    TorqueKp,
    TorqueLoopMaxOutput,
    TorqueLoopMinOutput,
    VelocityLoopKp,
    VelocityLoopKi,
    VelocityLoopKd,
    PositionLoopKp,
    PositionLoopKi,
    PositionLoopKd,

    StatusWord,
    ModeOfOperationDisplay,
    PositionActualValue,
    VelocityActualValue,
    TorqueActualValue,
    ErrorCode,
    BusVoltage,
    MotorTemperature,
    OutputEncoderPosition,
    PositionSetpoint,
    VelocitySetpoint,
    IqActual,
    IdActual,
    IdcActual,
    IqCommand,
    IdCommand,
    AlState,
}

impl PdoRegister {
    pub fn name(&self) -> &'static str {
        match *self {
            PdoRegister::ControlWord => "controlword",
            PdoRegister::ModeOfOperation => "mode_of_operation",
            PdoRegister::TargetPosition => "target_position",
            PdoRegister::TargetVelocity => "target_velocity",
            PdoRegister::TargetTorque => "target_torque",
            PdoRegister::TorqueCommand => "torque_command",
            PdoRegister::TorqueKp => "torque_kp",
            PdoRegister::TorqueLoopMaxOutput => "torque_loop_max_output",
            PdoRegister::TorqueLoopMinOutput => "torque_loop_min_output",
            PdoRegister::VelocityLoopKp => "velocity_loop_kp",
            PdoRegister::VelocityLoopKi => "velocity_loop_ki",
            PdoRegister::VelocityLoopKd => "velocity_loop_kd",
            PdoRegister::PositionLoopKp => "position_loop_kp",
            PdoRegister::PositionLoopKi => "position_loop_ki",
            PdoRegister::PositionLoopKd => "position_loop_kd",

            PdoRegister::StatusWord => "statusword",
            PdoRegister::ModeOfOperationDisplay => "mode_of_operation_display",
            PdoRegister::PositionActualValue => "actual_position",
            PdoRegister::VelocityActualValue => "actual_velocity",
            PdoRegister::TorqueActualValue => "actual_torque",
            PdoRegister::ErrorCode => "error_code",
            PdoRegister::BusVoltage => "bus_voltage",
            PdoRegister::MotorTemperature => "motor_temperature",
            PdoRegister::OutputEncoderPosition => "output_encoder_position",
            PdoRegister::PositionSetpoint => "position_setpoint",
            PdoRegister::VelocitySetpoint => "velocity_setpoint",
            PdoRegister::IqActual => "iq_actual",
            PdoRegister::IdActual => "id_actual",
            PdoRegister::IdcActual => "idc_actual",
            PdoRegister::IqCommand => "iq_command",
            PdoRegister::IdCommand => "id_command",
            PdoRegister::AlState => "al_state",
        }
    }

    /// Object dictionary index; the AL state byte is not an object.
    pub fn index(&self) -> Option<u16> {
        let index = match *self {
            PdoRegister::ControlWord => 0x6040,
            PdoRegister::ModeOfOperation => 0x6060,
            PdoRegister::TargetPosition => 0x607A,
            PdoRegister::TargetVelocity => 0x60FF,
            PdoRegister::TargetTorque => 0x6071,
            PdoRegister::TorqueCommand => 0x2022,
            PdoRegister::TorqueKp => 0x2523,
            PdoRegister::TorqueLoopMaxOutput => 0x2527,
            PdoRegister::TorqueLoopMinOutput => 0x2528,
            PdoRegister::VelocityLoopKp => 0x250A,
            PdoRegister::VelocityLoopKi => 0x250B,
            PdoRegister::VelocityLoopKd => 0x250C,
            PdoRegister::PositionLoopKp => 0x2511,
            PdoRegister::PositionLoopKi => 0x2512,
            PdoRegister::PositionLoopKd => 0x2513,

            PdoRegister::StatusWord => 0x6041,
            PdoRegister::ModeOfOperationDisplay => 0x6061,
            PdoRegister::PositionActualValue => 0x6064,
            PdoRegister::VelocityActualValue => 0x606C,
            PdoRegister::TorqueActualValue => 0x6077,
            PdoRegister::ErrorCode => 0x603F,
            PdoRegister::BusVoltage => 0x2060,
            PdoRegister::MotorTemperature => 0x2063,
            PdoRegister::OutputEncoderPosition => 0x204A,
            PdoRegister::PositionSetpoint => 0x2078,
            PdoRegister::VelocitySetpoint => 0x2079,
            PdoRegister::IqActual => 0x203B,
            PdoRegister::IdActual => 0x203C,
            PdoRegister::IdcActual => 0x2076,
            PdoRegister::IqCommand => 0x2072,
            PdoRegister::IdCommand => 0x2073,
            PdoRegister::AlState => return None,
        };
        Some(index)
    }
}

/// Little-endian wire type of a PDO field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
}

impl FieldType {
    pub const fn size(&self) -> usize {
        match self {
            FieldType::U8 | FieldType::I8 => 1,
            FieldType::U16 | FieldType::I16 => 2,
            FieldType::U32 | FieldType::I32 | FieldType::F32 => 4,
        }
    }

    /// Integer range, `None` for floats.
    pub fn range(&self) -> Option<(i64, i64)> {
        match self {
            FieldType::U8 => Some((0, u8::MAX as i64)),
            FieldType::I8 => Some((i8::MIN as i64, i8::MAX as i64)),
            FieldType::U16 => Some((0, u16::MAX as i64)),
            FieldType::I16 => Some((i16::MIN as i64, i16::MAX as i64)),
            FieldType::U32 => Some((0, u32::MAX as i64)),
            FieldType::I32 => Some((i32::MIN as i64, i32::MAX as i64)),
            FieldType::F32 => None,
        }
    }
}
