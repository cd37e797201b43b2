use ethercat_controller::{PdoError, SlaveKind};

use crate::{
    register::{FieldType, PdoRegister},
    state_machine::{StateTable, EXTENDED_STATE_TABLE, LEGACY_STATE_TABLE},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdoField {
    pub register: PdoRegister,
    pub field_type: FieldType,
}

const fn field(register: PdoRegister, field_type: FieldType) -> PdoField {
    PdoField {
        register,
        field_type,
    }
}

/// Ordered, packed field list of one PDO direction.
#[derive(Debug)]
pub struct PdoLayout {
    pub fields: &'static [PdoField],
}

impl PdoLayout {
    pub const fn size(&self) -> usize {
        let mut size = 0;
        let mut i = 0;
        while i < self.fields.len() {
            size += self.fields[i].field_type.size();
            i += 1;
        }
        size
    }

    pub fn contains(&self, register: PdoRegister) -> bool {
        self.fields.iter().any(|f| f.register == register)
    }

    /// Byte offset and type of a register.
    pub fn locate(&self, register: PdoRegister) -> Option<(usize, FieldType)> {
        let mut offset = 0;
        for f in self.fields {
            if f.register == register {
                return Some((offset, f.field_type));
            }
            offset += f.field_type.size();
        }
        None
    }
}

/// RX/TX layouts and statusword decoding table of one drive family.
#[derive(Debug)]
pub struct PdoMap {
    pub name: &'static str,
    pub rx: PdoLayout,
    pub tx: PdoLayout,
    pub states: &'static StateTable,
}

use FieldType::*;
use PdoRegister::*;

// RX 0x1600: 6040 6060 607A 60FF 2022 2523
//    0x1601: 2527 2528 250A 250B 250C 2511 2512 2513
static EXTENDED_RX: [PdoField; 14] = [
    field(ControlWord, U16),
    field(ModeOfOperation, I8),
    field(TargetPosition, I32),
    field(TargetVelocity, I32),
    field(TorqueCommand, F32),
    field(TorqueKp, F32),
    field(TorqueLoopMaxOutput, F32),
    field(TorqueLoopMinOutput, F32),
    field(VelocityLoopKp, F32),
    field(VelocityLoopKi, F32),
    field(VelocityLoopKd, F32),
    field(PositionLoopKp, F32),
    field(PositionLoopKi, F32),
    field(PositionLoopKd, F32),
];

// TX 0x1A00: 6041 6061 6064 2060 6077 2063 603F
//    0x1A01: 606C 204A 2078 2079 203B 203C 2076
//    0x1A02: 2072 2073
static EXTENDED_TX: [PdoField; 16] = [
    field(StatusWord, U16),
    field(ModeOfOperationDisplay, I8),
    field(PositionActualValue, I32),
    field(BusVoltage, F32),
    field(TorqueActualValue, I16),
    field(MotorTemperature, F32),
    field(ErrorCode, U16),
    field(VelocityActualValue, I32),
    field(OutputEncoderPosition, I32),
    field(PositionSetpoint, I32),
    field(VelocitySetpoint, F32),
    field(IqActual, F32),
    field(IdActual, F32),
    field(IdcActual, F32),
    field(IqCommand, F32),
    field(IdCommand, F32),
];

static LEGACY_RX: [PdoField; 5] = [
    field(ControlWord, U16),
    field(ModeOfOperation, I8),
    field(TargetPosition, I32),
    field(TargetVelocity, I32),
    field(TargetTorque, I16),
];

static LEGACY_TX: [PdoField; 7] = [
    field(StatusWord, U16),
    field(ModeOfOperationDisplay, I8),
    field(ErrorCode, U16),
    field(TorqueActualValue, I16),
    field(VelocityActualValue, I32),
    field(PositionActualValue, I32),
    field(AlState, U8),
];

/// Gains and current feedback map (`ds402`).
pub static EXTENDED_MAP: PdoMap = PdoMap {
    name: "ds402",
    rx: PdoLayout {
        fields: &EXTENDED_RX,
    },
    tx: PdoLayout {
        fields: &EXTENDED_TX,
    },
    states: &EXTENDED_STATE_TABLE,
};

/// Minimal position/velocity/torque map (`ds402_legacy`).
pub static LEGACY_MAP: PdoMap = PdoMap {
    name: "ds402_legacy",
    rx: PdoLayout { fields: &LEGACY_RX },
    tx: PdoLayout { fields: &LEGACY_TX },
    states: &LEGACY_STATE_TABLE,
};

impl PdoMap {
    pub fn for_kind(kind: SlaveKind) -> &'static PdoMap {
        match kind {
            SlaveKind::Ds402 => &EXTENDED_MAP,
            SlaveKind::Ds402Legacy => &LEGACY_MAP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PdoValue {
    Int(i64),
    Float(f64),
}

impl PdoValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            PdoValue::Int(v) => v as f64,
            PdoValue::Float(v) => v,
        }
    }

    /// Rounded to the nearest integer for floats.
    pub fn as_i64(&self) -> i64 {
        match *self {
            PdoValue::Int(v) => v,
            PdoValue::Float(v) => v.round() as i64,
        }
    }
}

/// Zero-filled outgoing payload of exactly the layout size.
pub struct PdoFrame<'a> {
    map: &'a PdoMap,
    buf: Vec<u8>,
}

impl<'a> PdoFrame<'a> {
    pub fn new(map: &'a PdoMap) -> Self {
        PdoFrame {
            map,
            buf: vec![0; map.rx.size()],
        }
    }

    /// Write a register. Integer fields are rounded and saturated to the
    /// range of their wire type.
    pub fn set(&mut self, register: PdoRegister, value: PdoValue) -> Result<(), PdoError> {
        let (offset, field_type) = self
            .map
            .rx
            .locate(register)
            .ok_or(PdoError::MissingRegister {
                register: register.name(),
                map: self.map.name,
            })?;

        let out = &mut self.buf[offset..offset + field_type.size()];
        if let Some((min, max)) = field_type.range() {
            let v = saturate(value, min, max);
            out.copy_from_slice(&v.to_le_bytes()[..field_type.size()]);
        } else {
            out.copy_from_slice(&(value.as_f64() as f32).to_le_bytes());
        }
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

fn saturate(value: PdoValue, min: i64, max: i64) -> i64 {
    match value {
        PdoValue::Int(v) => v.clamp(min, max),
        // NaN maps to 0
        PdoValue::Float(v) => {
            let v = v.round();
            if v.is_nan() {
                0
            } else {
                v.clamp(min as f64, max as f64) as i64
            }
        }
    }
}

/// Read access to an incoming payload of at least the layout size.
pub struct PdoView<'a> {
    map: &'a PdoMap,
    data: &'a [u8],
}

impl<'a> PdoView<'a> {
    pub fn new(map: &'a PdoMap, data: &'a [u8]) -> Result<Self, PdoError> {
        let expected = map.tx.size();
        if data.len() < expected {
            return Err(PdoError::InputTooShort {
                expected,
                actual: data.len(),
            });
        }
        Ok(PdoView { map, data })
    }

    pub fn get(&self, register: PdoRegister) -> Result<PdoValue, PdoError> {
        let (offset, field_type) = self
            .map
            .tx
            .locate(register)
            .ok_or(PdoError::MissingRegister {
                register: register.name(),
                map: self.map.name,
            })?;

        let b = &self.data[offset..offset + field_type.size()];
        let value = match field_type {
            U8 => PdoValue::Int(b[0] as i64),
            I8 => PdoValue::Int(b[0] as i8 as i64),
            U16 => PdoValue::Int(u16::from_le_bytes([b[0], b[1]]) as i64),
            I16 => PdoValue::Int(i16::from_le_bytes([b[0], b[1]]) as i64),
            U32 => PdoValue::Int(u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64),
            I32 => PdoValue::Int(i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64),
            F32 => PdoValue::Float(f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64),
        };
        Ok(value)
    }

    /// Like `get`, with `default` for registers the map does not carry.
    pub fn get_or(&self, register: PdoRegister, default: PdoValue) -> PdoValue {
        if self.map.tx.contains(register) {
            self.get(register).unwrap_or(default)
        } else {
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_sizes() {
        assert_eq!(EXTENDED_MAP.rx.size(), 51);
        assert_eq!(EXTENDED_MAP.tx.size(), 55);
        assert_eq!(LEGACY_MAP.rx.size(), 13);
        assert_eq!(LEGACY_MAP.tx.size(), 16);
    }

    #[test]
    fn field_offsets() {
        assert_eq!(EXTENDED_MAP.rx.locate(TargetPosition), Some((3, I32)));
        assert_eq!(EXTENDED_MAP.rx.locate(TorqueCommand), Some((11, F32)));
        assert_eq!(EXTENDED_MAP.rx.locate(PositionLoopKd), Some((47, F32)));
        assert_eq!(EXTENDED_MAP.tx.locate(ErrorCode), Some((17, U16)));
        assert_eq!(EXTENDED_MAP.tx.locate(IdCommand), Some((51, F32)));
        assert_eq!(LEGACY_MAP.tx.locate(AlState), Some((15, U8)));
        assert_eq!(LEGACY_MAP.rx.locate(TorqueCommand), None);
    }

    #[test]
    fn every_register_has_an_object_except_al_state() {
        for map in [&EXTENDED_MAP, &LEGACY_MAP] {
            for f in map.rx.fields.iter().chain(map.tx.fields) {
                assert_eq!(f.register.index().is_none(), f.register == AlState);
            }
        }
    }

    #[test]
    fn integers_are_rounded_and_saturated() {
        let mut frame = PdoFrame::new(&LEGACY_MAP);
        frame.set(TargetTorque, PdoValue::Float(40000.0)).unwrap();
        frame.set(TargetVelocity, PdoValue::Float(-2.5)).unwrap();
        frame.set(TargetPosition, PdoValue::Int(i64::MIN)).unwrap();
        frame.set(ModeOfOperation, PdoValue::Float(f64::NAN)).unwrap();
        let bytes = frame.into_bytes();

        assert_eq!(bytes.len(), 13);
        assert_eq!(&bytes[11..13], &i16::MAX.to_le_bytes());
        // round half away from zero
        assert_eq!(&bytes[7..11], &(-3i32).to_le_bytes());
        assert_eq!(&bytes[3..7], &i32::MIN.to_le_bytes());
        assert_eq!(bytes[2], 0);
    }

    #[test]
    fn missing_register_is_an_error() {
        let mut frame = PdoFrame::new(&LEGACY_MAP);
        let err = frame.set(TorqueKp, PdoValue::Float(1.0)).unwrap_err();
        assert!(matches!(
            err,
            PdoError::MissingRegister {
                register: "torque_kp",
                map: "ds402_legacy"
            }
        ));
    }

    #[test]
    fn short_input_is_rejected() {
        let data = [0u8; 54];
        let err = PdoView::new(&EXTENDED_MAP, &data).err().unwrap();
        assert!(matches!(
            err,
            PdoError::InputTooShort {
                expected: 55,
                actual: 54
            }
        ));
        assert!(PdoView::new(&LEGACY_MAP, &data).is_ok());
    }

    #[test]
    fn view_reads_little_endian_fields() {
        let mut data = vec![0u8; 16];
        data[0..2].copy_from_slice(&0x0237u16.to_le_bytes());
        data[2] = 0xF8; // -8
        data[3..5].copy_from_slice(&0x2310u16.to_le_bytes());
        data[5..7].copy_from_slice(&(-120i16).to_le_bytes());
        data[15] = 0x08;

        let view = PdoView::new(&LEGACY_MAP, &data).unwrap();
        assert_eq!(view.get(StatusWord).unwrap(), PdoValue::Int(0x0237));
        assert_eq!(view.get(ModeOfOperationDisplay).unwrap(), PdoValue::Int(-8));
        assert_eq!(view.get(ErrorCode).unwrap(), PdoValue::Int(0x2310));
        assert_eq!(view.get(TorqueActualValue).unwrap(), PdoValue::Int(-120));
        assert_eq!(view.get(AlState).unwrap(), PdoValue::Int(8));
        assert_eq!(view.get_or(BusVoltage, PdoValue::Float(0.0)), PdoValue::Float(0.0));
    }
}
