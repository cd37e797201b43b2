use bitvec::prelude::*;
use num_traits::FromPrimitive;

/// Logical states of the CiA 402 drive state machine.
#[derive(FromPrimitive, PartialEq, Eq, Clone, Copy, Debug, Default, Hash)]
pub enum CiA402State {
    #[default]
    NotReadyToSwitchOn = 0, // initialisation and self test of the drive not yet completed
    SwitchOnDisabled = 1,   // init passed, high voltage may be applied
    ReadyToSwitchOn = 2,    // shutdown received
    SwitchedOn = 3,         // switch on received, power stage ready
    OperationEnabled = 4,   // enable operation received, drive follows the setpoints
    QuickStopActive = 5,    // quick stop ramp running
    FaultReactionActive = 6, // fault reaction running, going to Fault
    Fault = 7,
}

impl CiA402State {
    pub const ALL: [CiA402State; 8] = [
        CiA402State::NotReadyToSwitchOn,
        CiA402State::SwitchOnDisabled,
        CiA402State::ReadyToSwitchOn,
        CiA402State::SwitchedOn,
        CiA402State::OperationEnabled,
        CiA402State::QuickStopActive,
        CiA402State::FaultReactionActive,
        CiA402State::Fault,
    ];

    pub fn is_fault(&self) -> bool {
        matches!(self, CiA402State::Fault | CiA402State::FaultReactionActive)
    }
}

/// One row of a statusword decoding table: `word & mask == value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateMask {
    pub mask: u16,
    pub value: u16,
    pub state: CiA402State,
}

const fn row(mask: u16, value: u16, state: CiA402State) -> StateMask {
    StateMask { mask, value, state }
}

pub type StateTable = [StateMask; 8];

// drives of the extended map report the quick stop bit (5) in the enabled states
pub static EXTENDED_STATE_TABLE: StateTable = [
    row(0x004F, 0x0000, CiA402State::NotReadyToSwitchOn),
    row(0x004F, 0x0040, CiA402State::SwitchOnDisabled),
    row(0x006F, 0x0021, CiA402State::ReadyToSwitchOn),
    row(0x006F, 0x0023, CiA402State::SwitchedOn),
    row(0x006F, 0x0027, CiA402State::OperationEnabled),
    row(0x006F, 0x0007, CiA402State::QuickStopActive),
    row(0x004F, 0x000F, CiA402State::FaultReactionActive),
    row(0x004F, 0x0008, CiA402State::Fault),
];

// the legacy map ignores bit 5, so an enabled drive always reads as
// OperationEnabled and QuickStopActive is never reported
pub static LEGACY_STATE_TABLE: StateTable = [
    row(0x004F, 0x0000, CiA402State::NotReadyToSwitchOn),
    row(0x004F, 0x0040, CiA402State::SwitchOnDisabled),
    row(0x004F, 0x0001, CiA402State::ReadyToSwitchOn),
    row(0x004F, 0x0003, CiA402State::SwitchedOn),
    row(0x004F, 0x0007, CiA402State::OperationEnabled),
    row(0x006F, 0x0007, CiA402State::QuickStopActive),
    row(0x004F, 0x000F, CiA402State::FaultReactionActive),
    row(0x004F, 0x0008, CiA402State::Fault),
];

/// Decode the logical state of a statusword (0x6041). First matching row
/// wins; a word matching no row is `NotReadyToSwitchOn`.
pub fn decode_state(status_word: u16, table: &StateTable) -> CiA402State {
    table
        .iter()
        .find(|r| status_word & r.mask == r.value)
        .map(|r| r.state)
        .unwrap_or(CiA402State::NotReadyToSwitchOn)
}

#[derive(FromPrimitive, Debug, PartialEq, Eq, Clone, Copy)]
pub enum StatusBit {
    ReadyToSwitchOn = 0,
    SwitchedOn = 1,
    OperationEnabled = 2,
    Fault = 3,
    VoltageEnabled = 4,
    QuickStop = 5,
    SwitchedOnDisabled = 6,
    Warning = 7,
    Reserved8 = 8,
    Remote = 9,
    TargetReached = 10,
    InternalLimitActive = 11,
    OperatingModeSpecific12 = 12,
    OperatingModeSpecific13 = 13,
    Reserved14 = 14,
    PositionReferencedToHomePosition = 15,
}

/// Raw bits set in a statusword.
pub fn parse_status_word(status: u16) -> Vec<StatusBit> {
    let bits = status.view_bits::<Lsb0>();
    bits.iter_ones().filter_map(StatusBit::from_usize).collect()
}

/// Individual statusword flags. `quick_stop_active` is true when bit 5 is
/// cleared (the bit is active low).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusBits {
    pub ready_to_switch_on: bool,
    pub switched_on: bool,
    pub operation_enabled: bool,
    pub fault: bool,
    pub voltage_enabled: bool,
    pub quick_stop_active: bool,
    pub switch_on_disabled: bool,
    pub warning: bool,
    pub remote: bool,
    pub target_reached: bool,
}

impl StatusBits {
    pub fn from_status_word(status_word: u16) -> Self {
        let bits = status_word.view_bits::<Lsb0>();
        StatusBits {
            ready_to_switch_on: bits[StatusBit::ReadyToSwitchOn as usize],
            switched_on: bits[StatusBit::SwitchedOn as usize],
            operation_enabled: bits[StatusBit::OperationEnabled as usize],
            fault: bits[StatusBit::Fault as usize],
            voltage_enabled: bits[StatusBit::VoltageEnabled as usize],
            quick_stop_active: !bits[StatusBit::QuickStop as usize],
            switch_on_disabled: bits[StatusBit::SwitchedOnDisabled as usize],
            warning: bits[StatusBit::Warning as usize],
            remote: bits[StatusBit::Remote as usize],
            target_reached: bits[StatusBit::TargetReached as usize],
        }
    }
}

#[derive(FromPrimitive, Debug, PartialEq, Eq, Clone, Copy)]
pub enum ControlWord {
    Shutdown,
    SwitchOn,
    DisableVoltage,
    EnableOperation,
    DisableOperation, // the same word as SwitchOn
    QuickStop,
    FaultReset,
}

impl ControlWord {
    pub fn to_u16(&self) -> u16 {
        match self {
            ControlWord::Shutdown => 0b0110,
            ControlWord::SwitchOn => 0b0111,
            ControlWord::DisableVoltage => 0b0000,
            ControlWord::EnableOperation => 0b1111,
            ControlWord::DisableOperation => 0b0111,
            ControlWord::QuickStop => 0b0010,
            ControlWord::FaultReset => 0b10000000,
        }
    }
}

/// Next controlword from the application intent and the current drive state.
///
/// Enabling walks SwitchOnDisabled -> ReadyToSwitchOn -> SwitchedOn ->
/// OperationEnabled one transition per cycle. A fault is only acknowledged
/// when `clear_fault` is set.
pub fn controlword(enable_drive: bool, clear_fault: bool, state: CiA402State) -> ControlWord {
    use CiA402State::*;

    if clear_fault && state == Fault {
        return ControlWord::FaultReset;
    }

    if !enable_drive {
        return match state {
            SwitchOnDisabled
            | ReadyToSwitchOn
            | SwitchedOn
            | OperationEnabled
            | QuickStopActive => ControlWord::Shutdown,
            _ => ControlWord::DisableVoltage,
        };
    }

    match state {
        SwitchOnDisabled => ControlWord::Shutdown,
        ReadyToSwitchOn => ControlWord::SwitchOn,
        SwitchedOn | OperationEnabled | QuickStopActive => ControlWord::EnableOperation,
        _ => ControlWord::DisableVoltage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CiA402State::*;

    #[test]
    fn decode_is_total() {
        for table in [&EXTENDED_STATE_TABLE, &LEGACY_STATE_TABLE] {
            for word in 0..=u16::MAX {
                let state = decode_state(word, table);
                let first = table.iter().find(|r| word & r.mask == r.value);
                match first {
                    Some(r) => assert_eq!(state, r.state, "word 0x{:04X}", word),
                    None => assert_eq!(state, NotReadyToSwitchOn, "word 0x{:04X}", word),
                }
            }
        }
    }

    #[test]
    fn concrete_words() {
        assert_eq!(decode_state(0x0237, &EXTENDED_STATE_TABLE), OperationEnabled);
        assert_eq!(decode_state(0x0008, &EXTENDED_STATE_TABLE), Fault);
        assert_eq!(decode_state(0x0008, &LEGACY_STATE_TABLE), Fault);
        assert_eq!(decode_state(0x0250, &EXTENDED_STATE_TABLE), SwitchOnDisabled);
        assert_eq!(decode_state(0x0231, &EXTENDED_STATE_TABLE), ReadyToSwitchOn);
        assert_eq!(decode_state(0x0233, &EXTENDED_STATE_TABLE), SwitchedOn);
        assert_eq!(decode_state(0x0217, &EXTENDED_STATE_TABLE), QuickStopActive);
        assert_eq!(decode_state(0x021F, &EXTENDED_STATE_TABLE), FaultReactionActive);
    }

    #[test]
    fn tables_differ_on_quick_stop_bit() {
        // enabled without bit 5
        assert_eq!(decode_state(0x0007, &EXTENDED_STATE_TABLE), QuickStopActive);
        assert_eq!(decode_state(0x0007, &LEGACY_STATE_TABLE), OperationEnabled);
        assert_eq!(decode_state(0x0001, &EXTENDED_STATE_TABLE), NotReadyToSwitchOn);
        assert_eq!(decode_state(0x0001, &LEGACY_STATE_TABLE), ReadyToSwitchOn);

        let legacy_quick_stop = (0..=u16::MAX)
            .filter(|w| decode_state(*w, &LEGACY_STATE_TABLE) == QuickStopActive)
            .count();
        assert_eq!(legacy_quick_stop, 0);
    }

    #[test]
    fn status_bits() {
        let bits = StatusBits::from_status_word(0x0637);
        assert!(bits.ready_to_switch_on);
        assert!(bits.switched_on);
        assert!(bits.operation_enabled);
        assert!(!bits.fault);
        assert!(bits.voltage_enabled);
        assert!(!bits.quick_stop_active);
        assert!(!bits.switch_on_disabled);
        assert!(!bits.warning);
        assert!(bits.remote);
        assert!(bits.target_reached);

        let bits = StatusBits::from_status_word(0x0088);
        assert!(bits.fault);
        assert!(bits.warning);
        assert!(bits.quick_stop_active);
    }

    #[test]
    fn raw_status_bits() {
        assert_eq!(
            parse_status_word(0x8209),
            vec![
                StatusBit::ReadyToSwitchOn,
                StatusBit::Fault,
                StatusBit::Remote,
                StatusBit::PositionReferencedToHomePosition
            ]
        );
    }

    #[test]
    fn controlword_table() {
        let expected = |enable: bool, clear: bool, state: CiA402State| -> u16 {
            match (enable, clear, state) {
                (_, true, Fault) => 0x0080,
                (
                    false,
                    _,
                    SwitchOnDisabled
                    | ReadyToSwitchOn
                    | SwitchedOn
                    | OperationEnabled
                    | QuickStopActive,
                ) => 0x0006,
                (false, _, _) => 0x0000,
                (true, _, SwitchOnDisabled) => 0x0006,
                (true, _, ReadyToSwitchOn) => 0x0007,
                (true, _, SwitchedOn | OperationEnabled | QuickStopActive) => 0x000F,
                (true, _, _) => 0x0000,
            }
        };

        for state in CiA402State::ALL {
            for enable in [false, true] {
                for clear in [false, true] {
                    assert_eq!(
                        controlword(enable, clear, state).to_u16(),
                        expected(enable, clear, state),
                        "enable={} clear={} state={:?}",
                        enable,
                        clear,
                        state
                    );
                }
            }
        }
    }

    #[test]
    fn fault_is_held_without_clear() {
        assert_eq!(controlword(true, false, Fault), ControlWord::DisableVoltage);
        assert_eq!(controlword(false, false, FaultReactionActive), ControlWord::DisableVoltage);
        assert_eq!(controlword(true, true, FaultReactionActive), ControlWord::DisableVoltage);
    }
}
