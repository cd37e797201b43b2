use std::{
    collections::{BTreeMap, HashMap},
    io, thread,
    time::Duration,
};

use crate::{
    adapter::{AdapterRegistry, BoxedAdapter, PdoDirection, SdoReadSpec},
    config::{Config, SlaveConfig},
    error::{MasterError, SdoError},
    sdo::{decode_sdo_value, with_retry, SdoValue, SDO_ATTEMPTS, SDO_RETRY_DELAY},
    transport::{describe_al_state, AlState, SlaveInfo, Transport},
};

/// Bounded wait for a requested bus state.
pub const STATE_TIMEOUT: Duration = Duration::from_millis(50);
/// Exchanges performed in SAFE-OP before OP is requested.
pub const PRIMING_ROUNDS: usize = 5;
/// Exchange rounds allowed for every slave to report OP.
pub const OP_ROUNDS: usize = 50;
pub const OP_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Bounded wait of one process data receive.
pub const PROCESS_DATA_TIMEOUT: Duration = Duration::from_millis(2);

pub type SlaveNames = HashMap<String, u16>;
pub type StartupParams = HashMap<String, BTreeMap<String, SdoValue>>;

/// A configured slave bound to its adapter and bus position.
pub struct ConfiguredSlave<C, S> {
    pub name: String,
    pub position: u16,
    pub adapter: BoxedAdapter<C, S>,
}

/// How the bus settled when the runtime was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Settled,
    SettleTimedOut,
    AlreadyClosed,
}

/// Live handles produced by a successful bring-up.
///
/// The transport is closed exactly once, by `close` or on drop.
pub struct MasterRuntime<C, S> {
    transport: Box<dyn Transport>,
    slaves: Vec<ConfiguredSlave<C, S>>,
    slave_names: SlaveNames,
    startup_params: StartupParams,
    closed: bool,
}

impl<C, S> MasterRuntime<C, S> {
    /// Configured slaves, in configuration order.
    pub fn slaves(&self) -> &[ConfiguredSlave<C, S>] {
        &self.slaves
    }

    pub fn slave_position(&self, name: &str) -> Option<u16> {
        self.slave_names.get(name).copied()
    }

    /// Startup SDO values read from one slave during bring-up.
    pub fn startup_params(&self, name: &str) -> Option<&BTreeMap<String, SdoValue>> {
        self.startup_params.get(name)
    }

    pub fn slave_info(&self, name: &str) -> io::Result<SlaveInfo> {
        let position = self.slave_position(name).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("unknown slave '{}'", name))
        })?;
        self.transport.slave_info(position)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn io_parts(&mut self) -> (&mut dyn Transport, &mut [ConfiguredSlave<C, S>]) {
        (self.transport.as_mut(), &mut self.slaves)
    }

    /// Request INIT, give the slaves a bounded time to settle, then close the
    /// transport. Later calls do nothing.
    pub fn close(&mut self) -> ShutdownOutcome {
        if self.closed {
            return ShutdownOutcome::AlreadyClosed;
        }
        self.closed = true;

        // slaves settle to INIT before the socket goes away
        let settle = self
            .transport
            .request_state(AlState::Init)
            .and_then(|_| self.transport.check_state(AlState::Init, STATE_TIMEOUT));

        let outcome = match settle {
            Ok(code) if code == AlState::Init.code() => ShutdownOutcome::Settled,
            Ok(code) => {
                log::warn!(
                    "Slaves did not settle to INIT within {:?} (lowest state {})",
                    STATE_TIMEOUT,
                    describe_al_state(code)
                );
                ShutdownOutcome::SettleTimedOut
            }
            Err(e) => {
                log::warn!("Unable to confirm INIT before closing: {}", e);
                ShutdownOutcome::SettleTimedOut
            }
        };

        self.transport.close();
        log::info!("EtherCAT transport closed ({:?})", outcome);
        outcome
    }
}

impl<C, S> Drop for MasterRuntime<C, S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drives the bus from undiscovered to fully operational.
pub struct EthercatMaster<C, S> {
    config: Config,
    registry: AdapterRegistry<C, S>,
}

impl<C, S> EthercatMaster<C, S> {
    pub fn new(config: Config, registry: AdapterRegistry<C, S>) -> Self {
        EthercatMaster { config, registry }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bring the bus to OP. The configuration and every adapter are checked
    /// before the transport is touched; on any later failure the transport is
    /// closed before the error is returned.
    pub fn initialize(
        &self,
        transport: impl Transport + 'static,
    ) -> Result<MasterRuntime<C, S>, MasterError> {
        self.config.validate()?;
        let adapters = self
            .config
            .slaves
            .iter()
            .map(|cfg| self.registry.build(cfg))
            .collect::<Result<Vec<_>, _>>()?;

        let mut transport: Box<dyn Transport> = Box::new(transport);
        match self.bring_up(transport.as_mut(), adapters) {
            Ok((slaves, startup_params)) => {
                let slave_names = slaves
                    .iter()
                    .map(|s| (s.name.clone(), s.position))
                    .collect();
                log::info!("Master ready with {} configured slaves", slaves.len());
                Ok(MasterRuntime {
                    transport,
                    slaves,
                    slave_names,
                    startup_params,
                    closed: false,
                })
            }
            Err(e) => {
                log::error!("Bring-up failed: {}", e);
                transport.close();
                Err(e)
            }
        }
    }

    fn bring_up(
        &self,
        transport: &mut dyn Transport,
        adapters: Vec<BoxedAdapter<C, S>>,
    ) -> Result<(Vec<ConfiguredSlave<C, S>>, StartupParams), MasterError> {
        log::info!("Opening EtherCAT transport on {}", self.config.iface);
        transport
            .open(&self.config.iface)
            .map_err(MasterError::transport("opening the interface"))?;

        let detected = transport
            .discover()
            .map_err(MasterError::transport("discovering slaves"))?;
        log::info!("Found {} slaves", detected);
        if detected == 0 {
            return Err(MasterError::NoSlavesDetected);
        }

        // remap writes are only accepted in PRE-OP
        Self::transition(transport, AlState::PreOp)?;

        let mut slaves = Vec::with_capacity(adapters.len());
        let mut startup_params = HashMap::new();
        for (cfg, adapter) in self.config.slaves.iter().zip(adapters) {
            if cfg.position as usize >= detected {
                return Err(MasterError::PositionOutOfRange {
                    slave: cfg.name.clone(),
                    position: cfg.position,
                    detected,
                });
            }

            let info = transport
                .slave_info(cfg.position)
                .map_err(MasterError::transport("reading slave identity"))?;
            Self::validate_identity(&adapter, &info)?;

            let values = Self::read_startup_params(transport, cfg, adapter.startup_read_specs())?;
            Self::configure_pdo_mapping(transport, cfg)?;

            log::info!(
                "Slave '{}' at position {} configured as {} ({} startup parameters)",
                cfg.name,
                cfg.position,
                cfg.kind,
                values.len()
            );
            startup_params.insert(cfg.name.clone(), values);
            slaves.push(ConfiguredSlave {
                name: cfg.name.clone(),
                position: cfg.position,
                adapter,
            });
        }

        // remap writes change the layout, so the image is built afterwards
        transport
            .map_process_data()
            .map_err(MasterError::transport("building the process data mapping"))?;

        if self.config.strict_pdo_size {
            for slave in &slaves {
                Self::validate_pdo_sizes(transport, slave)?;
            }
        }

        self.transition_to_operational(transport)?;
        Ok((slaves, startup_params))
    }

    fn transition(transport: &mut dyn Transport, state: AlState) -> Result<(), MasterError> {
        transport
            .request_state(state)
            .map_err(MasterError::transport("requesting a bus state"))?;
        let reached = transport
            .check_state(state, STATE_TIMEOUT)
            .map_err(MasterError::transport("checking the bus state"))?;
        if reached != state.code() {
            return Err(MasterError::StateTimeout {
                requested: state,
                reached: describe_al_state(reached),
                timeout: STATE_TIMEOUT,
            });
        }
        log::debug!("Bus in {}", state);
        Ok(())
    }

    fn validate_identity(
        adapter: &BoxedAdapter<C, S>,
        info: &SlaveInfo,
    ) -> Result<(), MasterError> {
        let identity = adapter.identity();
        let checks = [
            ("vendor", identity.vendor_id, info.vendor_id),
            ("product", identity.product_code, info.product_code),
        ];
        for (field, expected, actual) in checks {
            if let Some(expected) = expected {
                if expected != actual {
                    return Err(MasterError::IdentityMismatch {
                        slave: identity.name.clone(),
                        field,
                        expected,
                        actual,
                    });
                }
            }
        }
        Ok(())
    }

    fn read_startup_params(
        transport: &mut dyn Transport,
        cfg: &SlaveConfig,
        specs: &[SdoReadSpec],
    ) -> Result<BTreeMap<String, SdoValue>, MasterError> {
        let mut values = BTreeMap::new();
        for spec in specs {
            let value = with_retry(SDO_ATTEMPTS, SDO_RETRY_DELAY, || -> Result<_, SdoError> {
                let raw = transport.sdo_read(cfg.position, spec.index, spec.subindex)?;
                Ok(decode_sdo_value(raw, spec)?)
            })
            .map_err(|source| MasterError::SdoRead {
                slave: cfg.name.clone(),
                key: spec.name,
                index: spec.index,
                subindex: spec.subindex,
                data_type: spec.data_type,
                attempts: SDO_ATTEMPTS,
                source,
            })?;
            log::debug!(
                "{} 0x{:04X}:{:02X} {} = {}",
                cfg.name,
                spec.index,
                spec.subindex,
                spec.name,
                value
            );
            values.insert(spec.name.to_string(), value);
        }
        Ok(values)
    }

    fn configure_pdo_mapping(
        transport: &mut dyn Transport,
        cfg: &SlaveConfig,
    ) -> Result<(), MasterError> {
        for write in &cfg.pdo_mapping {
            let payload = write.payload();
            // some drives reject remap writes briefly after a state change
            with_retry(SDO_ATTEMPTS, SDO_RETRY_DELAY, || {
                transport.sdo_write(cfg.position, write.index, write.subindex, &payload)
            })
            .map_err(|source| MasterError::SdoWrite {
                slave: cfg.name.clone(),
                index: write.index,
                subindex: write.subindex,
                value: write.value,
                size: write.size_bytes,
                attempts: SDO_ATTEMPTS,
                source,
            })?;
        }
        Ok(())
    }

    fn validate_pdo_sizes(
        transport: &dyn Transport,
        slave: &ConfiguredSlave<C, S>,
    ) -> Result<(), MasterError> {
        let info = transport
            .slave_info(slave.position)
            .map_err(MasterError::transport("reading process data sizes"))?;
        let checks = [
            (PdoDirection::Rx, slave.adapter.rx_pdo_size(), info.output_bytes),
            (PdoDirection::Tx, slave.adapter.tx_pdo_size(), info.input_bytes),
        ];
        for (direction, expected, actual) in checks {
            if expected != actual {
                return Err(MasterError::PdoSizeMismatch {
                    slave: slave.name.clone(),
                    direction,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// SAFE-OP, priming exchanges, then OP while exchanging process data:
    /// some drives only leave SAFE-OP with frames flowing.
    fn transition_to_operational(&self, transport: &mut dyn Transport) -> Result<(), MasterError> {
        if transport.supports_safe_op() {
            transport
                .request_state(AlState::SafeOp)
                .map_err(MasterError::transport("requesting SAFE-OP"))?;
            let reached = transport
                .check_state(AlState::SafeOp, STATE_TIMEOUT)
                .map_err(MasterError::transport("checking SAFE-OP"))?;
            if reached != AlState::SafeOp.code() {
                log::warn!(
                    "SAFE-OP not confirmed within {:?} (lowest state {}), continuing",
                    STATE_TIMEOUT,
                    describe_al_state(reached)
                );
            }
        }

        for _ in 0..PRIMING_ROUNDS {
            Self::exchange(transport)?;
        }

        transport
            .request_state(AlState::Op)
            .map_err(MasterError::transport("requesting OP"))?;

        for round in 0..OP_ROUNDS {
            Self::exchange(transport)?;
            transport
                .refresh_states()
                .map_err(MasterError::transport("reading slave states"))?;
            if self.all_in_op(transport) {
                log::info!("All configured slaves in OP after {} rounds", round + 1);
                return Ok(());
            }
            thread::sleep(OP_POLL_INTERVAL);
        }

        Err(MasterError::OperationalTimeout {
            table: self.state_table(transport),
        })
    }

    fn exchange(transport: &mut dyn Transport) -> Result<u16, MasterError> {
        transport
            .send_process_data()
            .map_err(MasterError::transport("sending process data"))?;
        transport
            .receive_process_data(PROCESS_DATA_TIMEOUT)
            .map_err(MasterError::transport("receiving process data"))
    }

    fn all_in_op(&self, transport: &dyn Transport) -> bool {
        self.config.slaves.iter().all(|cfg| {
            transport
                .slave_info(cfg.position)
                .map(|info| info.al_state & 0x0F == AlState::Op.code())
                .unwrap_or(false)
        })
    }

    fn state_table(&self, transport: &dyn Transport) -> String {
        self.config
            .slaves
            .iter()
            .map(|cfg| {
                let info = transport.slave_info(cfg.position).unwrap_or_default();
                format!(
                    "  {} pos={} state=0x{:02X} ({}) al_status=0x{:04X}",
                    cfg.name,
                    cfg.position,
                    info.al_state,
                    describe_al_state(info.al_state),
                    info.al_status_code
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
