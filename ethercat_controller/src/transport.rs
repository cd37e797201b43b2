use std::{fmt, io, time::Duration};

/// EtherCAT Application Layer (AL) states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum AlState {
    Init = 0x01,
    PreOp = 0x02,
    Boot = 0x03,
    SafeOp = 0x04,
    Op = 0x08,
}

/// AL error indication bit, or-ed onto the state code by the slave.
pub const AL_ERROR_FLAG: u8 = 0x10;

impl AlState {
    /// Parse the state part of a raw AL state code, ignoring the error flag.
    pub fn from_code(code: u8) -> Option<Self> {
        match code & 0x0F {
            0x01 => Some(AlState::Init),
            0x02 => Some(AlState::PreOp),
            0x03 => Some(AlState::Boot),
            0x04 => Some(AlState::SafeOp),
            0x08 => Some(AlState::Op),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            AlState::Init => "INIT",
            AlState::PreOp => "PRE-OP",
            AlState::Boot => "BOOT",
            AlState::SafeOp => "SAFE-OP",
            AlState::Op => "OP",
        }
    }
}

impl fmt::Display for AlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Human readable label of a raw AL state code, e.g. `SAFE-OP+ERR`.
pub fn describe_al_state(code: u8) -> String {
    let label = match AlState::from_code(code) {
        Some(state) => state.label().to_string(),
        None => format!("UNKNOWN(0x{:02X})", code),
    };
    if code & AL_ERROR_FLAG != 0 {
        format!("{}+ERR", label)
    } else {
        label
    }
}

/// What the transport knows about one slave after discovery and mapping.
///
/// Byte sizes are zero until the process data mapping has been built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlaveInfo {
    pub vendor_id: u32,
    pub product_code: u32,
    /// raw AL state code, including the error flag
    pub al_state: u8,
    pub al_status_code: u16,
    pub output_bytes: usize,
    pub input_bytes: usize,
}

/// Raw SDO upload result. Some master libraries hand narrow objects back as
/// scalars instead of byte strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdoPayload {
    Bytes(Vec<u8>),
    Scalar(i64),
}

/// The bus master library seen by the bring-up and the cyclic loop.
///
/// Slaves are addressed by their ring position. Only one context uses a
/// transport at a time: the master during bring-up, then the cyclic driver.
pub trait Transport: Send {
    /// Open the network interface.
    fn open(&mut self, iface: &str) -> io::Result<()>;

    /// Scan the ring and initialize the slaves, returning how many answered.
    fn discover(&mut self) -> io::Result<usize>;

    /// Build the process data image from the slaves' current PDO assignment.
    fn map_process_data(&mut self) -> io::Result<()>;

    /// Request an AL state for every slave.
    fn request_state(&mut self, state: AlState) -> io::Result<()>;

    /// Wait up to `timeout` for every slave to reach `state`, returning the
    /// lowest state code observed when the wait ended.
    fn check_state(&mut self, state: AlState, timeout: Duration) -> io::Result<u8>;

    /// Refresh the cached per-slave AL state and status codes.
    fn refresh_states(&mut self) -> io::Result<()>;

    fn supports_safe_op(&self) -> bool {
        true
    }

    fn send_process_data(&mut self) -> io::Result<()>;

    /// Receive the process data frame, waiting at most `timeout`. A timeout is
    /// not an error: the returned working counter simply stays low.
    fn receive_process_data(&mut self, timeout: Duration) -> io::Result<u16>;

    fn slave_info(&self, position: u16) -> io::Result<SlaveInfo>;

    fn sdo_read(&mut self, position: u16, index: u16, subindex: u8) -> io::Result<SdoPayload>;

    fn sdo_write(&mut self, position: u16, index: u16, subindex: u8, data: &[u8]) -> io::Result<()>;

    /// Output (master to slave) region of the process image for one slave.
    fn outputs(&mut self, position: u16) -> io::Result<&mut [u8]>;

    /// Input (slave to master) region of the process image for one slave.
    fn inputs(&mut self, position: u16) -> io::Result<&[u8]>;

    fn close(&mut self);
}
