#![allow(dead_code)]

use ethercat_controller::{
    sim::{SimSlave, SimulatedBus},
    AdapterRegistry, BoxedAdapter, Config, ConfigError, CycleMeta, PdoError, SdoDataType,
    SdoReadSpec, SlaveAdapter, SlaveConfig, SlaveIdentity, SlaveKind,
};

pub const RX_SIZE: usize = 4;
pub const TX_SIZE: usize = 4;
pub const VENDOR: u32 = 0x0000_00AB;
pub const PRODUCT: u32 = 0x0000_1234;

pub static ECHO_PARAMS: [SdoReadSpec; 2] = [
    SdoReadSpec::new("gain", 0x2511, 0, SdoDataType::F32),
    SdoReadSpec::new("limit", 0x2527, 1, SdoDataType::I16),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoStatus {
    pub value: u16,
    pub seq: u64,
}

/// Writes the command into the first two output bytes and reads the first
/// two input bytes back.
pub struct EchoAdapter {
    identity: SlaveIdentity,
    specs: &'static [SdoReadSpec],
    pub wrong_size: bool,
}

impl SlaveAdapter for EchoAdapter {
    type Command = u16;
    type Status = EchoStatus;

    fn identity(&self) -> &SlaveIdentity {
        &self.identity
    }

    fn rx_pdo_size(&self) -> usize {
        RX_SIZE
    }

    fn tx_pdo_size(&self) -> usize {
        TX_SIZE
    }

    fn encode(&mut self, command: &u16) -> Result<Vec<u8>, PdoError> {
        let mut out = vec![0; if self.wrong_size { RX_SIZE + 1 } else { RX_SIZE }];
        out[..2].copy_from_slice(&command.to_le_bytes());
        Ok(out)
    }

    fn decode(&mut self, input: &[u8], meta: &CycleMeta) -> Result<EchoStatus, PdoError> {
        if input.len() < TX_SIZE {
            return Err(PdoError::InputTooShort {
                expected: TX_SIZE,
                actual: input.len(),
            });
        }
        Ok(EchoStatus {
            value: u16::from_le_bytes([input[0], input[1]]),
            seq: meta.seq,
        })
    }

    fn startup_read_specs(&self) -> &'static [SdoReadSpec] {
        self.specs
    }
}

fn with_params(config: &SlaveConfig) -> Result<BoxedAdapter<u16, EchoStatus>, ConfigError> {
    Ok(Box::new(EchoAdapter {
        identity: config.into(),
        specs: &ECHO_PARAMS,
        wrong_size: false,
    }))
}

fn plain(config: &SlaveConfig) -> Result<BoxedAdapter<u16, EchoStatus>, ConfigError> {
    Ok(Box::new(EchoAdapter {
        identity: config.into(),
        specs: &[],
        wrong_size: config.name.starts_with("broken"),
    }))
}

pub fn registry() -> AdapterRegistry<u16, EchoStatus> {
    AdapterRegistry::new()
        .register(SlaveKind::Ds402, with_params)
        .register(SlaveKind::Ds402Legacy, plain)
}

/// One `ds402` slave at position 0 and one `ds402_legacy` slave at 1.
pub fn topology() -> Config {
    Config::from_yaml_str(
        r#"
iface: sim0
cycle_hz: 1000
strict_pdo_size: true
slaves:
  - name: a
    position: 0
    kind: ds402
    vendor_id: 0xAB
    product_code: 0x1234
    pdo_mapping:
      - { index: 0x1C12, subindex: 0, value: 0, size: 1 }
      - { index: 0x1C12, subindex: 1, value: 0x1601, size: 2 }
      - { index: 0x1C12, subindex: 0, value: 1, size: 1 }
  - name: b
    position: 1
    kind: ds402_legacy
"#,
    )
    .unwrap()
}

pub fn echo_slave() -> SimSlave {
    SimSlave::new(RX_SIZE, TX_SIZE)
        .identity(VENDOR, PRODUCT)
        .sdo_f32(0x2511, 0, 12.5)
        .sdo(
            0x2527,
            1,
            ethercat_controller::SdoPayload::Bytes((-300i16).to_le_bytes().to_vec()),
        )
        .responder(|out, inp| inp[..2].copy_from_slice(&out[..2]))
}

pub fn bus() -> SimulatedBus {
    SimulatedBus::new().with_slave(echo_slave()).with_slave(
        SimSlave::new(RX_SIZE, TX_SIZE).responder(|out, inp| inp[..2].copy_from_slice(&out[..2])),
    )
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
