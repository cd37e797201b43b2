//! IgH EtherCAT master backend.
//!
//! The network interface is bound when the kernel module is loaded, so the
//! `iface` of the topology is only logged here. The process image lives in a
//! single domain whose PDO layout is read back from sync managers 2 and 3 of
//! every slave after the startup remap writes.

use std::{
    io,
    ops::Range,
    thread,
    time::{Duration, Instant},
};

use ethercat::{
    AlState as EcAlState, DomainIdx, Master, MasterAccess, PdoCfg, PdoEntryInfo, PdoEntryPos,
    PdoPos, SdoIdx, SlaveAddr, SlavePos, SmCfg, SmIdx,
};

use crate::transport::{AlState, SdoPayload, SlaveInfo, Transport};

const SDO_UPLOAD_CAPACITY: usize = 64;
const STATE_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Default)]
struct SlaveImage {
    outputs: Range<usize>,
    inputs: Range<usize>,
}

pub struct IghTransport {
    master_id: u32,
    master: Option<Master>,
    domain: Option<DomainIdx>,
    slave_count: usize,
    images: Vec<SlaveImage>,
    active: bool,
}

impl IghTransport {
    pub fn new(master_id: u32) -> Self {
        IghTransport {
            master_id,
            master: None,
            domain: None,
            slave_count: 0,
            images: vec![],
            active: false,
        }
    }

    fn master(&self) -> io::Result<&Master> {
        self.master.as_ref().ok_or_else(not_open)
    }

    fn master_mut(&mut self) -> io::Result<&mut Master> {
        self.master.as_mut().ok_or_else(not_open)
    }

    fn domain(&self) -> io::Result<DomainIdx> {
        self.domain.ok_or_else(not_open)
    }

    fn image(&self, position: u16) -> io::Result<SlaveImage> {
        self.images.get(position as usize).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no process data mapped for slave {}", position),
            )
        })
    }

    fn al_code(&self, position: u16) -> io::Result<u8> {
        let info = self.master()?.get_slave_info(SlavePos::from(position))?;
        Ok(state_code(info.al_state) | if info.error_flag != 0 { 0x10 } else { 0 })
    }

    fn lowest_state(&self) -> io::Result<u8> {
        let mut lowest = None;
        for pos in 0..self.slave_count as u16 {
            let code = self.al_code(pos)?;
            lowest = match lowest {
                Some(l) if l & 0x0F <= code & 0x0F => Some(l),
                _ => Some(code),
            };
        }
        Ok(lowest.unwrap_or(0))
    }

    // read back the PDOs currently assigned to one sync manager
    fn assigned_pdos(&mut self, position: SlavePos, sm: SmIdx) -> io::Result<Vec<PdoCfg>> {
        let master = self.master_mut()?;
        let sync = master.get_sync(position, sm)?;
        let mut pdos = vec![];
        for p in 0..sync.pdo_count {
            let pdo_pos = PdoPos::from(p);
            let pdo = master.get_pdo(position, sm, pdo_pos)?;
            let mut entries = vec![];
            for e in 0..pdo.entry_count {
                let entry = master.get_pdo_entry(position, sm, pdo_pos, PdoEntryPos::from(e))?;
                entries.push(PdoEntryInfo {
                    pos: PdoEntryPos::from(e),
                    ..entry
                });
            }
            pdos.push(PdoCfg {
                idx: pdo.idx,
                entries,
            });
        }
        Ok(pdos)
    }
}

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "IgH master not opened")
}

fn state_code(state: EcAlState) -> u8 {
    match state {
        EcAlState::Init => AlState::Init.code(),
        EcAlState::PreOp => AlState::PreOp.code(),
        EcAlState::Boot => AlState::Boot.code(),
        EcAlState::SafeOp => AlState::SafeOp.code(),
        EcAlState::Op => AlState::Op.code(),
    }
}

fn byte_len(pdos: &[PdoCfg]) -> usize {
    let bits: usize = pdos
        .iter()
        .flat_map(|p| p.entries.iter())
        .map(|e| e.bit_len as usize)
        .sum();
    (bits + 7) / 8
}

impl Transport for IghTransport {
    fn open(&mut self, iface: &str) -> io::Result<()> {
        log::info!(
            "Opening IgH master {} (interface '{}' is bound by the kernel module)",
            self.master_id,
            iface
        );
        let master = Master::open(self.master_id, MasterAccess::ReadWrite)?;
        master.reserve()?;
        self.domain = Some(master.create_domain()?);
        self.master = Some(master);
        Ok(())
    }

    fn discover(&mut self) -> io::Result<usize> {
        self.slave_count = self.master()?.get_info()?.slave_count as usize;
        Ok(self.slave_count)
    }

    fn map_process_data(&mut self) -> io::Result<()> {
        let domain = self.domain()?;
        let mut images = Vec::with_capacity(self.slave_count);

        for pos in 0..self.slave_count as u16 {
            let position = SlavePos::from(pos);
            let rx_pdos = self.assigned_pdos(position, SmIdx::from(2))?;
            let tx_pdos = self.assigned_pdos(position, SmIdx::from(3))?;

            let master = self.master_mut()?;
            let id = master.get_slave_info(position)?.id;
            let (vendor_id, product_code) = (id.vendor_id, id.product_code);
            let mut config = master.configure_slave(SlaveAddr::ByPos(pos), id)?;
            config.config_sm_pdos(SmCfg::output(2.into()), &rx_pdos)?;
            config.config_sm_pdos(SmCfg::input(3.into()), &tx_pdos)?;

            let mut register = |pdos: &[PdoCfg]| -> io::Result<Range<usize>> {
                let mut start = None;
                for entry in pdos.iter().flat_map(|p| p.entries.iter()) {
                    let offset = config.register_pdo_entry(entry.entry_idx, domain)?;
                    start = Some(start.map_or(offset.byte, |s: usize| s.min(offset.byte)));
                }
                let start = start.unwrap_or(0);
                Ok(start..start + byte_len(pdos))
            };
            let outputs = register(&rx_pdos)?;
            let inputs = register(&tx_pdos)?;

            log::debug!(
                "Slave {} (0x{:08X}:0x{:08X}): outputs {:?}, inputs {:?}",
                pos,
                vendor_id,
                product_code,
                outputs,
                inputs
            );
            images.push(SlaveImage { outputs, inputs });
        }

        self.master_mut()?.activate()?;
        self.active = true;
        self.images = images;
        Ok(())
    }

    fn request_state(&mut self, state: AlState) -> io::Result<()> {
        let target = EcAlState::try_from(state.code()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("AL state {} not supported by the IgH master", state),
            )
        })?;
        let count = self.slave_count as u16;
        let master = self.master_mut()?;
        for pos in 0..count {
            master.request_state(SlavePos::from(pos), target)?;
        }
        Ok(())
    }

    fn check_state(&mut self, state: AlState, timeout: Duration) -> io::Result<u8> {
        let deadline = Instant::now() + timeout;
        loop {
            let lowest = self.lowest_state()?;
            if lowest == state.code() || Instant::now() >= deadline {
                return Ok(lowest);
            }
            thread::sleep(STATE_POLL_INTERVAL);
        }
    }

    fn refresh_states(&mut self) -> io::Result<()> {
        // slave states are read live from the kernel master
        Ok(())
    }

    fn send_process_data(&mut self) -> io::Result<()> {
        let domain = self.domain()?;
        let master = self.master_mut()?;
        master.domain(domain).queue()?;
        master.send()?;
        Ok(())
    }

    // frames are collected by the kernel master, the timeout has no effect
    fn receive_process_data(&mut self, _timeout: Duration) -> io::Result<u16> {
        let domain = self.domain()?;
        let master = self.master_mut()?;
        master.receive()?;
        master.domain(domain).process()?;
        Ok(master.domain(domain).state()?.working_counter as u16)
    }

    fn slave_info(&self, position: u16) -> io::Result<SlaveInfo> {
        let info = self.master()?.get_slave_info(SlavePos::from(position))?;
        let image = self.images.get(position as usize).cloned().unwrap_or_default();
        Ok(SlaveInfo {
            vendor_id: info.id.vendor_id,
            product_code: info.id.product_code,
            al_state: self.al_code(position)?,
            al_status_code: 0,
            output_bytes: image.outputs.len(),
            input_bytes: image.inputs.len(),
        })
    }

    fn sdo_read(&mut self, position: u16, index: u16, subindex: u8) -> io::Result<SdoPayload> {
        let mut buf = [0u8; SDO_UPLOAD_CAPACITY];
        let data = self.master()?.sdo_upload(
            SlavePos::from(position),
            SdoIdx::new(index, subindex),
            false,
            &mut buf,
        )?;
        Ok(SdoPayload::Bytes(data.to_vec()))
    }

    fn sdo_write(
        &mut self,
        position: u16,
        index: u16,
        subindex: u8,
        data: &[u8],
    ) -> io::Result<()> {
        self.master_mut()?.sdo_download(
            SlavePos::from(position),
            SdoIdx::new(index, subindex),
            false,
            data,
        )?;
        Ok(())
    }

    fn outputs(&mut self, position: u16) -> io::Result<&mut [u8]> {
        let image = self.image(position)?;
        let domain = self.domain()?;
        let data = self.master_mut()?.domain_data(domain)?;
        data.get_mut(image.outputs).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "output range outside domain")
        })
    }

    fn inputs(&mut self, position: u16) -> io::Result<&[u8]> {
        let image = self.image(position)?;
        let domain = self.domain()?;
        let data = self.master_mut()?.domain_data(domain)?;
        data.get(image.inputs)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "input range outside domain"))
    }

    fn close(&mut self) {
        if let Some(mut master) = self.master.take() {
            if self.active {
                if let Err(e) = master.deactivate() {
                    log::warn!("Unable to deactivate IgH master: {}", e);
                }
            }
        }
        self.active = false;
        self.domain = None;
        self.images.clear();
    }
}
