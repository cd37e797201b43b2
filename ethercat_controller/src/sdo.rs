use std::{fmt, thread, time::Duration};

use crate::{
    adapter::{SdoDataType, SdoReadSpec},
    error::PdoError,
    transport::SdoPayload,
};

/// Bring-up SDO access: attempts per object and the pause between them.
pub const SDO_ATTEMPTS: usize = 5;
pub const SDO_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Decoded startup SDO value.
#[derive(Debug, Clone, PartialEq)]
pub enum SdoValue {
    Unsigned(u64),
    Signed(i64),
    Float(f32),
    Bytes(Vec<u8>),
}

impl SdoValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SdoValue::Unsigned(v) => Some(*v as f64),
            SdoValue::Signed(v) => Some(*v as f64),
            SdoValue::Float(v) => Some(*v as f64),
            SdoValue::Bytes(_) => None,
        }
    }
}

impl fmt::Display for SdoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdoValue::Unsigned(v) => write!(f, "{}", v),
            SdoValue::Signed(v) => write!(f, "{}", v),
            SdoValue::Float(v) => write!(f, "{}", v),
            SdoValue::Bytes(bytes) => {
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// Decode a raw SDO upload according to the declared width and signedness.
pub fn decode_sdo_value(payload: SdoPayload, spec: &SdoReadSpec) -> Result<SdoValue, PdoError> {
    let data = match payload {
        SdoPayload::Scalar(v) => return decode_scalar(v, spec.data_type),
        SdoPayload::Bytes(data) => data,
    };

    if let Some(size) = spec.data_type.size() {
        if data.len() < size {
            return Err(PdoError::SdoPayloadTooShort {
                data_type: spec.data_type,
                expected: size,
                actual: data.len(),
            });
        }
    }

    let value = match spec.data_type {
        SdoDataType::U8 => SdoValue::Unsigned(data[0] as u64),
        SdoDataType::I8 => SdoValue::Signed(data[0] as i8 as i64),
        SdoDataType::U16 => SdoValue::Unsigned(u16::from_le_bytes([data[0], data[1]]) as u64),
        SdoDataType::I16 => SdoValue::Signed(i16::from_le_bytes([data[0], data[1]]) as i64),
        SdoDataType::U32 => SdoValue::Unsigned(u32::from_le_bytes(le4(&data)) as u64),
        SdoDataType::I32 => SdoValue::Signed(i32::from_le_bytes(le4(&data)) as i64),
        SdoDataType::F32 => SdoValue::Float(f32::from_le_bytes(le4(&data))),
        SdoDataType::Bytes => SdoValue::Bytes(data),
    };
    Ok(value)
}

fn decode_scalar(value: i64, data_type: SdoDataType) -> Result<SdoValue, PdoError> {
    let fits = match data_type {
        SdoDataType::U8 => u8::try_from(value).is_ok(),
        SdoDataType::U16 => u16::try_from(value).is_ok(),
        SdoDataType::U32 => u32::try_from(value).is_ok(),
        SdoDataType::I8 => i8::try_from(value).is_ok(),
        SdoDataType::I16 => i16::try_from(value).is_ok(),
        SdoDataType::I32 => i32::try_from(value).is_ok(),
        other => return Err(PdoError::UnsupportedSdoType(other)),
    };
    if !fits {
        return Err(PdoError::SdoValueOutOfRange { data_type, value });
    }

    Ok(match data_type {
        SdoDataType::U8 | SdoDataType::U16 | SdoDataType::U32 => SdoValue::Unsigned(value as u64),
        _ => SdoValue::Signed(value),
    })
}

fn le4(data: &[u8]) -> [u8; 4] {
    [data[0], data[1], data[2], data[3]]
}

/// Run `op` up to `attempts` times with a fixed `delay` in between, returning
/// the last error once the budget is spent.
pub fn with_retry<T, E: fmt::Display>(
    attempts: usize,
    delay: Duration,
    mut op: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                log::warn!("Attempt {}/{} failed: {}, retrying", attempt, attempts, e);
                thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
