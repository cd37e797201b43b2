use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use ethercat_controller::{
    sim::{SimSlave, SimulatedBus},
    AlState, Config, SlaveConfig, SlaveKind,
};

use crate::{
    adapter::EXTENDED_STARTUP_PARAMS,
    pdo::PdoMap,
    register::PdoRegister,
    state_machine::CiA402State,
};

/// Trips the simulated drive into FAULT on its next cycle.
#[derive(Debug, Clone, Default)]
pub struct FaultTrigger(Arc<AtomicBool>);

impl FaultTrigger {
    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Drive side of the CiA 402 state machine, one transition per frame.
#[derive(Debug)]
pub struct DriveModel {
    map: &'static PdoMap,
    state: CiA402State,
    fault: FaultTrigger,
}

impl DriveModel {
    pub fn new(map: &'static PdoMap) -> Self {
        DriveModel {
            map,
            state: CiA402State::SwitchOnDisabled,
            fault: FaultTrigger::default(),
        }
    }

    pub fn fault_trigger(&self) -> FaultTrigger {
        self.fault.clone()
    }

    pub fn state(&self) -> CiA402State {
        self.state
    }

    fn status_word(&self) -> u16 {
        // remote (bit 9) is always set
        0x0200
            | match self.state {
                CiA402State::NotReadyToSwitchOn => 0x0000,
                CiA402State::SwitchOnDisabled => 0x0250,
                CiA402State::ReadyToSwitchOn => 0x0031,
                CiA402State::SwitchedOn => 0x0033,
                CiA402State::OperationEnabled => 0x0437,
                CiA402State::QuickStopActive => 0x0017,
                CiA402State::FaultReactionActive => 0x001F,
                CiA402State::Fault => 0x0018,
            }
    }

    fn apply(&mut self, control_word: u16) {
        use CiA402State::*;

        if self.fault.take() {
            self.state = FaultReactionActive;
            return;
        }

        self.state = match self.state {
            FaultReactionActive => Fault,
            Fault if control_word & 0x0080 != 0 => SwitchOnDisabled,
            Fault => Fault,
            _ if control_word & 0x0002 == 0 => SwitchOnDisabled,
            SwitchOnDisabled | SwitchedOn | OperationEnabled if control_word & 0x0087 == 0x0006 => {
                ReadyToSwitchOn
            }
            ReadyToSwitchOn if control_word & 0x008F == 0x0007 => SwitchedOn,
            OperationEnabled if control_word & 0x008F == 0x0007 => SwitchedOn,
            SwitchedOn if control_word & 0x008F == 0x000F => OperationEnabled,
            state => state,
        };
    }

    /// Consume one RX frame and fill the TX frame. Targets are echoed back
    /// as measurements.
    pub fn step(&mut self, outputs: &[u8], inputs: &mut [u8]) {
        if outputs.len() < self.map.rx.size() || inputs.len() < self.map.tx.size() {
            return;
        }

        self.apply(u16::from_le_bytes([outputs[0], outputs[1]]));

        inputs.fill(0);
        inputs[0..2].copy_from_slice(&self.status_word().to_le_bytes());
        inputs[2] = outputs[2];

        let echo = [
            (PdoRegister::TargetPosition, PdoRegister::PositionActualValue),
            (PdoRegister::TargetVelocity, PdoRegister::VelocityActualValue),
        ];
        for (target, actual) in echo {
            if let (Some((from, _)), Some((to, _))) =
                (self.map.rx.locate(target), self.map.tx.locate(actual))
            {
                inputs[to..to + 4].copy_from_slice(&outputs[from..from + 4]);
            }
        }

        if let Some((offset, _)) = self.map.tx.locate(PdoRegister::AlState) {
            inputs[offset] = AlState::Op.code();
        }
        if let Some((offset, _)) = self.map.tx.locate(PdoRegister::BusVoltage) {
            inputs[offset..offset + 4].copy_from_slice(&48.0f32.to_le_bytes());
        }
    }
}

const MOTOR_KT: f32 = 0.05;

/// Simulated slave behaving like a DS402 drive of the configured kind.
pub fn simulated_drive(config: &SlaveConfig) -> (SimSlave, FaultTrigger) {
    let map = PdoMap::for_kind(config.kind);
    let mut model = DriveModel::new(map);
    let trigger = model.fault_trigger();

    let mut slave = SimSlave::new(map.rx.size(), map.tx.size())
        .identity(config.vendor_id, config.product_code)
        .responder(move |outputs, inputs| model.step(outputs, inputs));
    if config.kind == SlaveKind::Ds402 {
        for spec in &EXTENDED_STARTUP_PARAMS {
            let value = if spec.name == "motor_kt" { MOTOR_KT } else { 1.0 };
            slave = slave.sdo_f32(spec.index, spec.subindex, value);
        }
    }
    (slave, trigger)
}

/// Simulated bus holding one drive per configured slave. Unconfigured
/// positions below the highest configured one are filled with empty slaves.
pub fn simulated_bus(config: &Config) -> (SimulatedBus, Vec<(String, FaultTrigger)>) {
    let count = config
        .slaves
        .iter()
        .map(|s| s.position as usize + 1)
        .max()
        .unwrap_or(0);

    let mut bus = SimulatedBus::new();
    let mut triggers = Vec::new();
    for position in 0..count {
        match config.slaves.iter().find(|s| s.position as usize == position) {
            Some(slave) => {
                let (drive, trigger) = simulated_drive(slave);
                bus = bus.with_slave(drive);
                triggers.push((slave.name.clone(), trigger));
            }
            None => bus = bus.with_slave(SimSlave::new(0, 0)),
        }
    }
    (bus, triggers)
}
