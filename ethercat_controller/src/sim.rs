//! In-memory EtherCAT bus for dry runs and tests.
//!
//! Slaves are scripted with [`SimSlave`]; every transport call is recorded in a
//! log shared through [`SimHandle`], which stays usable after the bus has been
//! moved into a master.

use std::{
    collections::HashMap,
    fmt, io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use crate::transport::{AlState, SdoPayload, SlaveInfo, Transport, AL_ERROR_FLAG};

/// Working counter contribution of one slave exchanging both directions.
pub const WKC_PER_SLAVE: u16 = 3;

/// AL status code reported by a slave refusing OP (sync manager watchdog).
pub const REFUSED_OP_STATUS: u16 = 0x001B;

pub type Responder = Box<dyn FnMut(&[u8], &mut [u8]) + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    Open(String),
    Discover,
    MapProcessData,
    RequestState(AlState),
    CheckState(AlState),
    RefreshStates,
    Send,
    Receive,
    SdoRead {
        position: u16,
        index: u16,
        subindex: u8,
    },
    SdoWrite {
        position: u16,
        index: u16,
        subindex: u8,
        data: Vec<u8>,
    },
    Close,
}

/// Scripted slave of a [`SimulatedBus`].
pub struct SimSlave {
    vendor_id: u32,
    product_code: u32,
    rx_size: usize,
    tx_size: usize,
    dictionary: HashMap<(u16, u8), SdoPayload>,
    sdo_failures: usize,
    refuse_op: bool,
    ignore_init: bool,
    responder: Option<Responder>,

    al_state: u8,
    al_status_code: u16,
    outputs: Vec<u8>,
    inputs: Vec<u8>,
}

impl fmt::Debug for SimSlave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimSlave")
            .field("vendor_id", &self.vendor_id)
            .field("product_code", &self.product_code)
            .field("rx_size", &self.rx_size)
            .field("tx_size", &self.tx_size)
            .field("al_state", &self.al_state)
            .finish()
    }
}

impl SimSlave {
    /// A slave with `rx_size` output and `tx_size` input bytes.
    pub fn new(rx_size: usize, tx_size: usize) -> Self {
        SimSlave {
            vendor_id: 0,
            product_code: 0,
            rx_size,
            tx_size,
            dictionary: HashMap::new(),
            sdo_failures: 0,
            refuse_op: false,
            ignore_init: false,
            responder: None,
            al_state: 0,
            al_status_code: 0,
            outputs: vec![],
            inputs: vec![],
        }
    }

    pub fn identity(mut self, vendor_id: u32, product_code: u32) -> Self {
        self.vendor_id = vendor_id;
        self.product_code = product_code;
        self
    }

    pub fn sdo(mut self, index: u16, subindex: u8, payload: SdoPayload) -> Self {
        self.dictionary.insert((index, subindex), payload);
        self
    }

    pub fn sdo_f32(self, index: u16, subindex: u8, value: f32) -> Self {
        self.sdo(index, subindex, SdoPayload::Bytes(value.to_le_bytes().to_vec()))
    }

    /// Fail the next `count` SDO accesses with a timeout.
    pub fn transient_sdo_failures(mut self, count: usize) -> Self {
        self.sdo_failures = count;
        self
    }

    /// Stay in SAFE-OP with the error flag set when OP is requested.
    pub fn refuse_op(mut self) -> Self {
        self.refuse_op = true;
        self
    }

    /// Keep the current state when INIT is requested.
    pub fn ignore_init(mut self) -> Self {
        self.ignore_init = true;
        self
    }

    /// Called on every received frame with the slave's outputs and inputs.
    pub fn responder(mut self, responder: impl FnMut(&[u8], &mut [u8]) + Send + 'static) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    fn state(&self) -> Option<AlState> {
        AlState::from_code(self.al_state)
    }

    fn sdo_access(&mut self) -> io::Result<()> {
        if self.sdo_failures > 0 {
            self.sdo_failures -= 1;
            return Err(io::Error::new(io::ErrorKind::TimedOut, "SDO mailbox timeout"));
        }
        Ok(())
    }
}

/// Observer of a [`SimulatedBus`], cloneable and shareable across threads.
#[derive(Debug, Clone, Default)]
pub struct SimHandle {
    calls: Arc<Mutex<Vec<SimCall>>>,
    drop_frames: Arc<AtomicBool>,
}

impl SimHandle {
    pub fn calls(&self) -> Vec<SimCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn count(&self, call: &SimCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    /// SDO writes in the order they reached the bus.
    pub fn sdo_writes(&self) -> Vec<(u16, u16, u8, Vec<u8>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SimCall::SdoWrite {
                    position,
                    index,
                    subindex,
                    data,
                } => Some((position, index, subindex, data)),
                _ => None,
            })
            .collect()
    }

    /// Lose every following frame: the working counter drops to 0.
    pub fn set_drop_frames(&self, drop_frames: bool) {
        self.drop_frames.store(drop_frames, Ordering::SeqCst);
    }

    fn record(&self, call: SimCall) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }

    fn dropping(&self) -> bool {
        self.drop_frames.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct SimulatedBus {
    slaves: Vec<SimSlave>,
    handle: SimHandle,
    no_safe_op: bool,
    opened: bool,
    mapped: bool,
    requested: Option<AlState>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a slave at the next ring position.
    pub fn with_slave(mut self, slave: SimSlave) -> Self {
        self.slaves.push(slave);
        self
    }

    /// Behave like a master library without SAFE-OP support.
    pub fn without_safe_op(mut self) -> Self {
        self.no_safe_op = true;
        self
    }

    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.opened {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotConnected, "bus not opened"))
        }
    }

    fn ensure_mapped(&self) -> io::Result<()> {
        self.ensure_open()?;
        if self.mapped {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "process data not mapped",
            ))
        }
    }

    fn slave(&self, position: u16) -> io::Result<&SimSlave> {
        self.slaves.get(position as usize).ok_or_else(|| no_slave(position))
    }

    fn slave_mut(&mut self, position: u16) -> io::Result<&mut SimSlave> {
        self.slaves
            .get_mut(position as usize)
            .ok_or_else(|| no_slave(position))
    }
}

fn no_slave(position: u16) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no slave at position {}", position),
    )
}

impl Transport for SimulatedBus {
    fn open(&mut self, iface: &str) -> io::Result<()> {
        self.handle.record(SimCall::Open(iface.to_string()));
        self.opened = true;
        Ok(())
    }

    fn discover(&mut self) -> io::Result<usize> {
        self.handle.record(SimCall::Discover);
        self.ensure_open()?;
        for slave in &mut self.slaves {
            slave.al_state = AlState::Init.code();
        }
        Ok(self.slaves.len())
    }

    fn map_process_data(&mut self) -> io::Result<()> {
        self.handle.record(SimCall::MapProcessData);
        self.ensure_open()?;
        for slave in &mut self.slaves {
            slave.outputs = vec![0; slave.rx_size];
            slave.inputs = vec![0; slave.tx_size];
        }
        self.mapped = true;
        Ok(())
    }

    fn request_state(&mut self, state: AlState) -> io::Result<()> {
        self.handle.record(SimCall::RequestState(state));
        self.ensure_open()?;
        self.requested = Some(state);
        for slave in &mut self.slaves {
            match state {
                // OP is entered on the next exchanged frame
                AlState::Op => {}
                AlState::Init if slave.ignore_init => {}
                other => {
                    slave.al_state = other.code();
                    slave.al_status_code = 0;
                }
            }
        }
        Ok(())
    }

    fn check_state(&mut self, state: AlState, _timeout: Duration) -> io::Result<u8> {
        self.handle.record(SimCall::CheckState(state));
        self.ensure_open()?;
        Ok(self
            .slaves
            .iter()
            .map(|s| s.al_state)
            .min_by_key(|code| code & 0x0F)
            .unwrap_or(0))
    }

    fn refresh_states(&mut self) -> io::Result<()> {
        self.handle.record(SimCall::RefreshStates);
        self.ensure_open()
    }

    fn supports_safe_op(&self) -> bool {
        !self.no_safe_op
    }

    fn send_process_data(&mut self) -> io::Result<()> {
        self.handle.record(SimCall::Send);
        self.ensure_mapped()
    }

    fn receive_process_data(&mut self, _timeout: Duration) -> io::Result<u16> {
        self.handle.record(SimCall::Receive);
        self.ensure_mapped()?;
        if self.handle.dropping() {
            return Ok(0);
        }

        let op_requested = self.requested == Some(AlState::Op);
        let mut wkc = 0;
        for slave in &mut self.slaves {
            if slave.state().map_or(true, |s| s < AlState::SafeOp) {
                continue;
            }
            if op_requested && slave.al_state & 0x0F != AlState::Op.code() {
                if slave.refuse_op {
                    slave.al_state = AlState::SafeOp.code() | AL_ERROR_FLAG;
                    slave.al_status_code = REFUSED_OP_STATUS;
                } else {
                    slave.al_state = AlState::Op.code();
                }
            }
            if let Some(responder) = slave.responder.as_mut() {
                responder(&slave.outputs, &mut slave.inputs);
            }
            wkc += WKC_PER_SLAVE;
        }
        Ok(wkc)
    }

    fn slave_info(&self, position: u16) -> io::Result<SlaveInfo> {
        let slave = self.slave(position)?;
        Ok(SlaveInfo {
            vendor_id: slave.vendor_id,
            product_code: slave.product_code,
            al_state: slave.al_state,
            al_status_code: slave.al_status_code,
            output_bytes: slave.outputs.len(),
            input_bytes: slave.inputs.len(),
        })
    }

    fn sdo_read(&mut self, position: u16, index: u16, subindex: u8) -> io::Result<SdoPayload> {
        self.handle.record(SimCall::SdoRead {
            position,
            index,
            subindex,
        });
        self.ensure_open()?;
        let slave = self.slave_mut(position)?;
        slave.sdo_access()?;
        slave
            .dictionary
            .get(&(index, subindex))
            .cloned()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("object 0x{:04X}:{:02X} does not exist", index, subindex),
                )
            })
    }

    fn sdo_write(
        &mut self,
        position: u16,
        index: u16,
        subindex: u8,
        data: &[u8],
    ) -> io::Result<()> {
        self.handle.record(SimCall::SdoWrite {
            position,
            index,
            subindex,
            data: data.to_vec(),
        });
        self.ensure_open()?;
        let slave = self.slave_mut(position)?;
        slave.sdo_access()?;
        slave
            .dictionary
            .insert((index, subindex), SdoPayload::Bytes(data.to_vec()));
        Ok(())
    }

    fn outputs(&mut self, position: u16) -> io::Result<&mut [u8]> {
        self.ensure_mapped()?;
        Ok(&mut self.slave_mut(position)?.outputs)
    }

    fn inputs(&mut self, position: u16) -> io::Result<&[u8]> {
        self.ensure_mapped()?;
        Ok(&self.slave(position)?.inputs)
    }

    fn close(&mut self) {
        self.handle.record(SimCall::Close);
        self.opened = false;
        self.mapped = false;
        self.requested = None;
    }
}
