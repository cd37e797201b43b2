use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::{
    adapter::CycleMeta,
    data::{LoopStats, SystemCommand, SystemStatus},
    error::{LoopError, PdoError},
    master::{MasterRuntime, PROCESS_DATA_TIMEOUT},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopped,
}

/// Fixed-rate tick bookkeeping on a monotonic clock.
///
/// A missed deadline moves the schedule to `now` instead of replaying the
/// lost ticks back to back.
#[derive(Debug, Clone, Copy)]
pub struct TickScheduler {
    period: Duration,
    next_tick: Instant,
}

impl TickScheduler {
    pub fn new(period: Duration, start: Instant) -> Self {
        TickScheduler {
            period,
            next_tick: start,
        }
    }

    pub fn next_tick(&self) -> Instant {
        self.next_tick
    }

    /// Advance by one period and return how long to sleep, or `None` when the
    /// deadline already passed.
    pub fn advance(&mut self, now: Instant) -> Option<Duration> {
        self.next_tick += self.period;
        if self.next_tick > now {
            Some(self.next_tick - now)
        } else {
            self.next_tick = now;
            None
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared<C, S> {
    pending: SystemCommand<C>,
    last_seq: u64,
    status: SystemStatus<S>,
    stats: LoopStats,
    state: LoopState,
}

/// Application side of a [`CyclicLoop`]: submit commands, read results.
pub struct LoopHandle<C, S> {
    shared: Arc<Mutex<Shared<C, S>>>,
    slaves: Arc<HashSet<String>>,
}

impl<C, S> Clone for LoopHandle<C, S> {
    fn clone(&self) -> Self {
        LoopHandle {
            shared: Arc::clone(&self.shared),
            slaves: Arc::clone(&self.slaves),
        }
    }
}

impl<C, S: Clone> LoopHandle<C, S> {
    /// Replace the command used by the following cycles. The last submission
    /// before a cycle starts wins.
    pub fn set_command(&self, command: SystemCommand<C>) -> Result<(), LoopError> {
        if let Some(unknown) = command.by_slave.keys().find(|n| !self.slaves.contains(*n)) {
            return Err(LoopError::UnknownSlave(unknown.clone()));
        }
        lock(&self.shared).pending = command;
        Ok(())
    }

    /// Replace the command of a single slave, keeping the others.
    pub fn set_slave_command(&self, slave: &str, command: C) -> Result<(), LoopError> {
        if !self.slaves.contains(slave) {
            return Err(LoopError::UnknownSlave(slave.to_string()));
        }
        lock(&self.shared)
            .pending
            .by_slave
            .insert(slave.to_string(), command);
        Ok(())
    }

    /// Copy of the latest published status.
    pub fn status(&self) -> SystemStatus<S> {
        lock(&self.shared).status.clone()
    }

    pub fn stats(&self) -> LoopStats {
        lock(&self.shared).stats
    }

    pub fn state(&self) -> LoopState {
        lock(&self.shared).state
    }
}

struct Driver<C, S> {
    runtime: MasterRuntime<C, S>,
    shared: Arc<Mutex<Shared<C, S>>>,
    period: Duration,
    epoch: Instant,
}

impl<C: Clone, S: Clone> Driver<C, S> {
    fn run_once(&mut self) -> Result<SystemStatus<S>, LoopError> {
        let epoch = self.epoch;
        let start = Instant::now();
        let command = {
            let mut shared = lock(&self.shared);
            shared.last_seq += 1;
            SystemCommand {
                by_slave: shared.pending.by_slave.clone(),
                seq: shared.last_seq,
                stamp_ns: nanos_since(epoch, start),
            }
        };

        let (transport, slaves) = self.runtime.io_parts();
        for slave in slaves.iter_mut() {
            let expected = slave.adapter.rx_pdo_size();
            let payload = match command.by_slave.get(&slave.name) {
                Some(cmd) => slave.adapter.encode(cmd).map_err(|source| LoopError::Adapter {
                    slave: slave.name.clone(),
                    source,
                })?,
                None => vec![0; expected],
            };
            if payload.len() != expected {
                return Err(LoopError::Adapter {
                    slave: slave.name.clone(),
                    source: PdoError::OutputSizeMismatch {
                        expected,
                        actual: payload.len(),
                    },
                });
            }

            let outputs = transport
                .outputs(slave.position)
                .map_err(|source| LoopError::ProcessData {
                    slave: slave.name.clone(),
                    source,
                })?;
            if outputs.len() != payload.len() {
                return Err(LoopError::Adapter {
                    slave: slave.name.clone(),
                    source: PdoError::OutputSizeMismatch {
                        expected: payload.len(),
                        actual: outputs.len(),
                    },
                });
            }
            outputs.copy_from_slice(&payload);
        }

        let wkc = match transport
            .send_process_data()
            .and_then(|_| transport.receive_process_data(PROCESS_DATA_TIMEOUT))
        {
            Ok(wkc) => wkc,
            Err(e) => {
                log::warn!("Process data exchange failed: {}", e);
                0
            }
        };

        let end = Instant::now();
        let cycle_time_ns = (end - start).as_nanos() as u64;
        let meta = CycleMeta {
            seq: command.seq,
            stamp_ns: nanos_since(epoch, end),
            cycle_time_ns,
            deviation_ns: cycle_time_ns as i64 - self.period.as_nanos() as i64,
        };

        let mut status = SystemStatus {
            by_slave: Default::default(),
            seq: meta.seq,
            stamp_ns: meta.stamp_ns,
        };
        for slave in slaves.iter_mut() {
            let inputs = transport
                .inputs(slave.position)
                .map_err(|source| LoopError::ProcessData {
                    slave: slave.name.clone(),
                    source,
                })?;
            let decoded = slave
                .adapter
                .decode(inputs, &meta)
                .map_err(|source| LoopError::Adapter {
                    slave: slave.name.clone(),
                    source,
                })?;
            status.by_slave.insert(slave.name.clone(), decoded);
        }

        let mut shared = lock(&self.shared);
        shared.status = status.clone();
        shared.stats.cycle_count += 1;
        shared.stats.last_wkc = wkc;
        shared.stats.last_cycle_time_ns = meta.cycle_time_ns;
        shared.stats.last_deviation_ns = meta.deviation_ns;
        Ok(status)
    }
}

fn nanos_since(epoch: Instant, at: Instant) -> u64 {
    at.duration_since(epoch).as_nanos() as u64
}

struct Worker {
    handle: JoinHandle<()>,
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
}

/// Fixed-rate process data exchange over a brought-up bus.
///
/// Cycles run either one at a time through [`CyclicLoop::run_once`] or on a
/// background thread between [`CyclicLoop::start`] and [`CyclicLoop::stop`].
pub struct CyclicLoop<C, S> {
    handle: LoopHandle<C, S>,
    driver: Arc<Mutex<Driver<C, S>>>,
    period: Duration,
    worker: Option<Worker>,
}

impl<C, S> CyclicLoop<C, S>
where
    C: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    pub fn new(runtime: MasterRuntime<C, S>, cycle_hz: u32) -> Result<Self, LoopError> {
        if cycle_hz == 0 {
            return Err(LoopError::InvalidCycleRate(cycle_hz));
        }
        let period = Duration::from_nanos(1_000_000_000 / cycle_hz as u64);

        let slaves = runtime.slaves().iter().map(|s| s.name.clone()).collect();
        let shared = Arc::new(Mutex::new(Shared {
            pending: SystemCommand::default(),
            last_seq: 0,
            status: SystemStatus::default(),
            stats: LoopStats::default(),
            state: LoopState::Idle,
        }));
        let driver = Driver {
            runtime,
            shared: Arc::clone(&shared),
            period,
            epoch: Instant::now(),
        };

        Ok(CyclicLoop {
            handle: LoopHandle {
                shared,
                slaves: Arc::new(slaves),
            },
            driver: Arc::new(Mutex::new(driver)),
            period,
            worker: None,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn handle(&self) -> LoopHandle<C, S> {
        self.handle.clone()
    }

    pub fn set_command(&self, command: SystemCommand<C>) -> Result<(), LoopError> {
        self.handle.set_command(command)
    }

    pub fn set_slave_command(&self, slave: &str, command: C) -> Result<(), LoopError> {
        self.handle.set_slave_command(slave, command)
    }

    pub fn status(&self) -> SystemStatus<S> {
        self.handle.status()
    }

    pub fn stats(&self) -> LoopStats {
        self.handle.stats()
    }

    pub fn state(&self) -> LoopState {
        self.handle.state()
    }

    /// Run a single cycle on the calling thread.
    pub fn run_once(&self) -> Result<SystemStatus<S>, LoopError> {
        lock(&self.driver).run_once()
    }

    /// Spawn the driver thread. Does nothing while it is already running.
    pub fn start(&mut self) -> Result<(), LoopError> {
        if let Some(worker) = self.worker.take() {
            let exited = worker.handle.is_finished()
                || !matches!(worker.done_rx.try_recv(), Err(TryRecvError::Empty));
            if !exited {
                self.worker = Some(worker);
                return Ok(());
            }
            // the driver aborted on its own
            if worker.handle.join().is_err() {
                log::error!("Cyclic driver thread panicked");
            }
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        let driver = Arc::clone(&self.driver);
        let shared = Arc::clone(&self.handle.shared);
        let period = self.period;

        lock(&shared).state = LoopState::Running;
        let handle = thread::Builder::new()
            .name("ethercat-cyclic".into())
            .spawn(move || {
                let mut ticks = TickScheduler::new(period, Instant::now());
                loop {
                    match stop_rx.try_recv() {
                        Err(TryRecvError::Empty) => {}
                        _ => break,
                    }

                    if let Err(e) = lock(&driver).run_once() {
                        log::error!("Cyclic exchange aborted: {}", e);
                        break;
                    }

                    if let Some(sleep) = ticks.advance(Instant::now()) {
                        match stop_rx.recv_timeout(sleep) {
                            Err(RecvTimeoutError::Timeout) => {}
                            _ => break,
                        }
                    }
                }
                lock(&shared).state = LoopState::Stopped;
                let _ = done_tx.send(());
            })
            .map_err(|e| {
                lock(&self.handle.shared).state = LoopState::Idle;
                LoopError::Spawn(e)
            })?;

        log::info!("Cyclic loop started at {:?} per cycle", period);
        self.worker = Some(Worker {
            handle,
            stop_tx,
            done_rx,
        });
        Ok(())
    }

    /// Ask the driver to exit before its next cycle and wait up to `timeout`.
    /// Returns whether the driver thread was joined.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => return true,
        };
        let _ = worker.stop_tx.try_send(());

        match worker.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    log::error!("Cyclic driver thread panicked");
                }
                lock(&self.handle.shared).state = LoopState::Stopped;
                log::info!("Cyclic loop stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("Cyclic driver did not exit within {:?}", timeout);
                self.worker = Some(worker);
                false
            }
        }
    }

    /// Give the bus back once the driver has exited, so it can be closed
    /// explicitly. Returns `None` if the driver thread is still alive.
    pub fn into_runtime(mut self) -> Option<MasterRuntime<C, S>> {
        if !self.stop(Duration::from_secs(2)) {
            return None;
        }
        let driver = Arc::clone(&self.driver);
        drop(self);
        Arc::try_unwrap(driver)
            .ok()
            .map(|driver| driver.into_inner().unwrap_or_else(PoisonError::into_inner).runtime)
    }
}

impl<C, S> Drop for CyclicLoop<C, S> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.try_send(());
            drop(worker.stop_tx);
            if worker.done_rx.recv_timeout(Duration::from_secs(2)).is_ok() {
                let _ = worker.handle.join();
            }
        }
    }
}
