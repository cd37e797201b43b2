use ethercat_controller::{
    AdapterRegistry, AlState, BoxedAdapter, ConfigError, CycleMeta, PdoError, SdoDataType,
    SdoReadSpec, SlaveAdapter, SlaveConfig, SlaveIdentity, SlaveKind,
};

use crate::{
    data::{Command, DriveStatus, LoopGains},
    pdo::{PdoFrame, PdoMap, PdoValue, PdoView},
    register::PdoRegister,
    scaling::Scaling,
    state_machine::{controlword, decode_state, CiA402State, StatusBits},
};

/// Drive parameters read once at bring-up on drives of the extended map.
pub static EXTENDED_STARTUP_PARAMS: [SdoReadSpec; 9] = [
    SdoReadSpec::new("torque_loop_max_output", 0x2527, 0, SdoDataType::F32),
    SdoReadSpec::new("torque_loop_min_output", 0x2528, 0, SdoDataType::F32),
    SdoReadSpec::new("velocity_loop_kp", 0x250A, 0, SdoDataType::F32),
    SdoReadSpec::new("velocity_loop_ki", 0x250B, 0, SdoDataType::F32),
    SdoReadSpec::new("velocity_loop_kd", 0x250C, 0, SdoDataType::F32),
    SdoReadSpec::new("position_loop_kp", 0x2511, 0, SdoDataType::F32),
    SdoReadSpec::new("position_loop_ki", 0x2512, 0, SdoDataType::F32),
    SdoReadSpec::new("position_loop_kd", 0x2513, 0, SdoDataType::F32),
    SdoReadSpec::new("motor_kt", 0x243B, 0, SdoDataType::F32),
];

const GAIN_REGISTERS: [PdoRegister; 9] = [
    PdoRegister::TorqueKp,
    PdoRegister::TorqueLoopMaxOutput,
    PdoRegister::TorqueLoopMinOutput,
    PdoRegister::VelocityLoopKp,
    PdoRegister::VelocityLoopKi,
    PdoRegister::VelocityLoopKd,
    PdoRegister::PositionLoopKp,
    PdoRegister::PositionLoopKi,
    PdoRegister::PositionLoopKd,
];

fn gain_values(gains: &LoopGains) -> [f32; 9] {
    [
        gains.torque_kp,
        gains.torque_loop_max_output,
        gains.torque_loop_min_output,
        gains.velocity_loop_kp,
        gains.velocity_loop_ki,
        gains.velocity_loop_kd,
        gains.position_loop_kp,
        gains.position_loop_ki,
        gains.position_loop_kd,
    ]
}

/// CiA 402 drive adapter.
///
/// The controlword of each cycle is derived from the statusword decoded in
/// the previous one, so enabling a drive takes one cycle per transition.
#[derive(Debug)]
pub struct Ds402Adapter {
    identity: SlaveIdentity,
    map: &'static PdoMap,
    scaling: Scaling,
    last_status_word: u16,
    gains: LoopGains,
}

impl Ds402Adapter {
    pub fn new(identity: SlaveIdentity, map: &'static PdoMap, scaling: Scaling) -> Self {
        Ds402Adapter {
            identity,
            map,
            scaling,
            last_status_word: 0,
            gains: LoopGains::default(),
        }
    }

    pub fn from_config(config: &SlaveConfig) -> Result<Self, ConfigError> {
        let map = PdoMap::for_kind(config.kind);
        let scaling = Scaling::from_factors(&config.name, &config.scaling)?;
        log::debug!(
            "Slave '{}' at position {} uses PDO map '{}' ({:?})",
            config.name,
            config.position,
            map.name,
            scaling
        );
        Ok(Ds402Adapter::new(SlaveIdentity::from(config), map, scaling))
    }

    pub fn map(&self) -> &'static PdoMap {
        self.map
    }

    pub fn last_status_word(&self) -> u16 {
        self.last_status_word
    }

    pub fn current_state(&self) -> CiA402State {
        decode_state(self.last_status_word, self.map.states)
    }

    fn torque_register(&self) -> PdoRegister {
        if self.map.rx.contains(PdoRegister::TorqueCommand) {
            PdoRegister::TorqueCommand
        } else {
            PdoRegister::TargetTorque
        }
    }
}

impl SlaveAdapter for Ds402Adapter {
    type Command = Command;
    type Status = DriveStatus;

    fn identity(&self) -> &SlaveIdentity {
        &self.identity
    }

    fn rx_pdo_size(&self) -> usize {
        self.map.rx.size()
    }

    fn tx_pdo_size(&self) -> usize {
        self.map.tx.size()
    }

    fn encode(&mut self, command: &Command) -> Result<Vec<u8>, PdoError> {
        let state = self.current_state();
        let word = controlword(command.enable_drive, command.clear_fault, state);
        log::trace!("'{}' {:?} -> {:?}", self.identity.name, state, word);

        let mut frame = PdoFrame::new(self.map);
        frame.set(PdoRegister::ControlWord, PdoValue::Int(word.to_u16() as i64))?;
        frame.set(
            PdoRegister::ModeOfOperation,
            PdoValue::Int(command.mode_of_operation as i64),
        )?;
        frame.set(
            PdoRegister::TargetPosition,
            PdoValue::Float(self.scaling.position.to_raw(command.target_position)),
        )?;
        frame.set(
            PdoRegister::TargetVelocity,
            PdoValue::Float(self.scaling.velocity.to_raw(command.target_velocity)),
        )?;
        frame.set(
            self.torque_register(),
            PdoValue::Float(self.scaling.torque.to_raw(command.target_torque)),
        )?;

        if let Some(gains) = command.gains {
            self.gains = gains;
        }
        if self.map.rx.contains(PdoRegister::TorqueKp) {
            for (register, value) in GAIN_REGISTERS.iter().zip(gain_values(&self.gains)) {
                frame.set(*register, PdoValue::Float(value as f64))?;
            }
        }

        Ok(frame.into_bytes())
    }

    fn decode(&mut self, input: &[u8], meta: &CycleMeta) -> Result<DriveStatus, PdoError> {
        let view = PdoView::new(self.map, input)?;

        let status_word = view.get(PdoRegister::StatusWord)?.as_i64() as u16;
        self.last_status_word = status_word;
        let state = decode_state(status_word, self.map.states);
        let bits = StatusBits::from_status_word(status_word);

        let al_state_code = if self.map.tx.contains(PdoRegister::AlState) {
            view.get(PdoRegister::AlState)?.as_i64() as u8
        } else if status_word != 0 {
            AlState::Op.code()
        } else {
            0
        };

        let zero = PdoValue::Float(0.0);
        Ok(DriveStatus {
            online: al_state_code != 0,
            operational: AlState::from_code(al_state_code) == Some(AlState::Op),
            faulted: state.is_fault() || bits.fault,
            al_state_code,

            status_word,
            state,
            bits,
            mode_of_operation_display: view
                .get(PdoRegister::ModeOfOperationDisplay)?
                .as_i64() as i8,
            error_code: view.get(PdoRegister::ErrorCode)?.as_i64() as u16,

            measured_torque: self
                .scaling
                .torque
                .from_raw(view.get(PdoRegister::TorqueActualValue)?.as_f64()),
            measured_velocity: self
                .scaling
                .velocity
                .from_raw(view.get(PdoRegister::VelocityActualValue)?.as_f64()),
            measured_position: self
                .scaling
                .position
                .from_raw(view.get(PdoRegister::PositionActualValue)?.as_f64()),
            velocity_setpoint: self
                .scaling
                .velocity
                .from_raw(view.get_or(PdoRegister::VelocitySetpoint, zero).as_f64()),
            bus_voltage: view.get_or(PdoRegister::BusVoltage, zero).as_f64(),
            motor_temperature: view.get_or(PdoRegister::MotorTemperature, zero).as_f64(),

            cycle_time_ns: meta.cycle_time_ns,
            deviation_ns: meta.deviation_ns,
            seq: meta.seq,
            stamp_ns: meta.stamp_ns,
        })
    }

    fn startup_read_specs(&self) -> &'static [SdoReadSpec] {
        if self.map.rx.contains(PdoRegister::TorqueKp) {
            &EXTENDED_STARTUP_PARAMS
        } else {
            &[]
        }
    }
}

fn build(config: &SlaveConfig) -> Result<BoxedAdapter<Command, DriveStatus>, ConfigError> {
    Ok(Box::new(Ds402Adapter::from_config(config)?))
}

/// Registry with both DS402 kinds.
pub fn registry() -> AdapterRegistry<Command, DriveStatus> {
    AdapterRegistry::new()
        .register(SlaveKind::Ds402, build)
        .register(SlaveKind::Ds402Legacy, build)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::data::ModeOfOperation;
    use crate::pdo::{EXTENDED_MAP, LEGACY_MAP};
    use crate::scaling::{POSITION_FACTOR, TORQUE_FACTOR};

    fn config(kind: SlaveKind) -> SlaveConfig {
        SlaveConfig {
            name: "drive".into(),
            position: 0,
            kind,
            vendor_id: 0,
            product_code: 0,
            pdo_mapping: vec![],
            scaling: HashMap::new(),
        }
    }

    fn status_input(map: &PdoMap, status_word: u16) -> Vec<u8> {
        let mut input = vec![0u8; map.tx.size()];
        input[0..2].copy_from_slice(&status_word.to_le_bytes());
        input
    }

    fn control_word(bytes: &[u8]) -> u16 {
        u16::from_le_bytes([bytes[0], bytes[1]])
    }

    #[test]
    fn encodes_declared_size() {
        for (kind, size) in [(SlaveKind::Ds402, 51), (SlaveKind::Ds402Legacy, 13)] {
            let mut adapter = Ds402Adapter::from_config(&config(kind)).unwrap();
            assert_eq!(adapter.rx_pdo_size(), size);
            assert_eq!(adapter.encode(&Command::default()).unwrap().len(), size);
        }
    }

    #[test]
    fn extended_torque_goes_to_torque_command() {
        let mut cfg = config(SlaveKind::Ds402);
        cfg.scaling.insert(TORQUE_FACTOR.into(), 2.0);
        let mut adapter = Ds402Adapter::from_config(&cfg).unwrap();

        let command = Command {
            target_torque: 1.25,
            ..Command::enable(ModeOfOperation::CyclicSyncTorque)
        };
        let bytes = adapter.encode(&command).unwrap();
        assert_eq!(bytes[2] as i8, 10);
        assert_eq!(f32::from_le_bytes(bytes[11..15].try_into().unwrap()), 2.5);
    }

    #[test]
    fn legacy_scales_position_and_saturates_torque() {
        let mut cfg = config(SlaveKind::Ds402Legacy);
        cfg.scaling.insert(POSITION_FACTOR.into(), 1000.0);
        let mut adapter = Ds402Adapter::from_config(&cfg).unwrap();

        let command = Command {
            target_position: -0.5,
            target_torque: 1e9,
            ..Default::default()
        };
        let bytes = adapter.encode(&command).unwrap();
        assert_eq!(i32::from_le_bytes(bytes[3..7].try_into().unwrap()), -500);
        assert_eq!(i16::from_le_bytes([bytes[11], bytes[12]]), i16::MAX);
    }

    #[test]
    fn gains_are_held_until_replaced() {
        let mut adapter = Ds402Adapter::from_config(&config(SlaveKind::Ds402)).unwrap();
        let gains = LoopGains {
            velocity_loop_kp: 3.0,
            position_loop_kd: 0.5,
            ..Default::default()
        };

        let kp = |bytes: &[u8]| f32::from_le_bytes(bytes[27..31].try_into().unwrap());
        let kd = |bytes: &[u8]| f32::from_le_bytes(bytes[47..51].try_into().unwrap());

        let bytes = adapter.encode(&Command::default()).unwrap();
        assert_eq!(kp(&bytes), 0.0);

        let bytes = adapter
            .encode(&Command {
                gains: Some(gains),
                ..Default::default()
            })
            .unwrap();
        assert_eq!((kp(&bytes), kd(&bytes)), (3.0, 0.5));

        let bytes = adapter.encode(&Command::default()).unwrap();
        assert_eq!((kp(&bytes), kd(&bytes)), (3.0, 0.5));
    }

    #[test]
    fn controlword_follows_decoded_state() {
        let cases = [
            (0x0250, false, false, 0x0006),
            (0x0250, true, false, 0x0006),
            (0x0231, true, false, 0x0007),
            (0x0233, true, false, 0x000F),
            (0x0237, true, false, 0x000F),
            (0x0237, false, false, 0x0006),
            (0x0008, true, false, 0x0000),
            (0x0008, true, true, 0x0080),
            (0x0000, true, false, 0x0000),
        ];
        let mut adapter = Ds402Adapter::from_config(&config(SlaveKind::Ds402)).unwrap();
        for (status_word, enable_drive, clear_fault, expected) in cases {
            adapter
                .decode(&status_input(&EXTENDED_MAP, status_word), &CycleMeta::default())
                .unwrap();
            let command = Command {
                enable_drive,
                clear_fault,
                ..Default::default()
            };
            let bytes = adapter.encode(&command).unwrap();
            assert_eq!(
                control_word(&bytes),
                expected,
                "status=0x{:04X} enable={} clear={}",
                status_word,
                enable_drive,
                clear_fault
            );
        }
    }

    #[test]
    fn extended_status_is_synthesized() {
        let mut adapter = Ds402Adapter::from_config(&config(SlaveKind::Ds402)).unwrap();
        let meta = CycleMeta {
            seq: 7,
            stamp_ns: 1_000,
            cycle_time_ns: 990,
            deviation_ns: -10,
        };

        let mut input = status_input(&EXTENDED_MAP, 0x0237);
        input[7..11].copy_from_slice(&48.5f32.to_le_bytes());
        input[17..19].copy_from_slice(&0x3210u16.to_le_bytes());
        let status = adapter.decode(&input, &meta).unwrap();

        assert!(status.online && status.operational && !status.faulted);
        assert_eq!(status.al_state_code, 0x08);
        assert_eq!(status.state, CiA402State::OperationEnabled);
        assert_eq!(status.bus_voltage, 48.5);
        assert_eq!(status.error_code, 0x3210);
        assert_eq!((status.seq, status.deviation_ns), (7, -10));
        assert_eq!(adapter.last_status_word(), 0x0237);

        let status = adapter.decode(&status_input(&EXTENDED_MAP, 0), &meta).unwrap();
        assert!(!status.online && !status.operational);
    }

    #[test]
    fn legacy_reads_al_state_byte() {
        let mut adapter = Ds402Adapter::from_config(&config(SlaveKind::Ds402Legacy)).unwrap();
        let mut input = status_input(&LEGACY_MAP, 0x0008);
        input[5..7].copy_from_slice(&(-40i16).to_le_bytes());
        input[15] = 0x14;

        let status = adapter.decode(&input, &CycleMeta::default()).unwrap();
        assert!(status.online);
        assert!(!status.operational);
        assert!(status.faulted);
        assert_eq!(status.measured_torque, -40.0);
        assert_eq!(status.bus_voltage, 0.0);
        assert_eq!(status.velocity_setpoint, 0.0);
    }

    #[test]
    fn short_input_is_rejected() {
        let mut adapter = Ds402Adapter::from_config(&config(SlaveKind::Ds402Legacy)).unwrap();
        let err = adapter.decode(&[0u8; 15], &CycleMeta::default()).unwrap_err();
        assert!(matches!(err, PdoError::InputTooShort { expected: 16, actual: 15 }));
        assert_eq!(adapter.last_status_word(), 0);
    }

    #[test]
    fn startup_specs_per_kind() {
        let extended = Ds402Adapter::from_config(&config(SlaveKind::Ds402)).unwrap();
        let legacy = Ds402Adapter::from_config(&config(SlaveKind::Ds402Legacy)).unwrap();
        assert_eq!(extended.startup_read_specs().len(), 9);
        assert_eq!(extended.startup_read_specs()[8].index, 0x243B);
        assert!(legacy.startup_read_specs().is_empty());
    }

    #[test]
    fn registry_builds_both_kinds() {
        let registry = registry();
        assert!(registry.supports(SlaveKind::Ds402));
        assert!(registry.supports(SlaveKind::Ds402Legacy));

        let mut cfg = config(SlaveKind::Ds402);
        cfg.scaling.insert("bogus".into(), 1.0);
        assert!(matches!(
            registry.build(&cfg).err().unwrap(),
            ConfigError::InvalidScaling { .. }
        ));
    }
}
