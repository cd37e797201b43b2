mod common;

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use common::*;
use ethercat_controller::{
    sim::{SimSlave, SimulatedBus},
    CyclicLoop, EthercatMaster, LoopError, LoopState, MasterRuntime, PdoError, ShutdownOutcome,
    SystemCommand,
};

fn runtime(bus: SimulatedBus) -> MasterRuntime<u16, EchoStatus> {
    EthercatMaster::new(topology(), registry()).initialize(bus).unwrap()
}

#[test]
fn missing_command_sends_zeroed_outputs() {
    init_logger();
    let bus = bus();
    let cyclic = CyclicLoop::new(runtime(bus), 1000).unwrap();

    cyclic.set_slave_command("a", 0xBEEF).unwrap();
    let status = cyclic.run_once().unwrap();
    assert_eq!(status.by_slave["a"].value, 0xBEEF);
    assert_eq!(status.by_slave["b"].value, 0);
    assert_eq!(cyclic.stats().last_wkc, 6);
}

#[test]
fn seq_increases_on_resubmission() {
    let cyclic = CyclicLoop::new(runtime(bus()), 1000).unwrap();
    let command = SystemCommand::default().with("a", 1).with("b", 2);

    let mut last = 0;
    for _ in 0..5 {
        cyclic.set_command(command.clone()).unwrap();
        let status = cyclic.run_once().unwrap();
        assert!(status.seq > last);
        assert_eq!(status.by_slave["a"].seq, status.seq);
        last = status.seq;
    }
    assert_eq!(cyclic.stats().cycle_count, 5);
    assert_eq!(cyclic.status().seq, last);
}

#[test]
fn cycle_timing_is_reported() {
    let cyclic = CyclicLoop::new(runtime(bus()), 500).unwrap();
    assert_eq!(cyclic.period(), Duration::from_millis(2));

    cyclic.run_once().unwrap();
    let stats = cyclic.stats();
    assert!(stats.last_cycle_time_ns > 0);
    assert_eq!(
        stats.last_deviation_ns,
        stats.last_cycle_time_ns as i64 - 2_000_000
    );
}

#[test]
fn zero_rate_is_rejected() {
    let err = CyclicLoop::new(runtime(bus()), 0).err().unwrap();
    assert!(matches!(err, LoopError::InvalidCycleRate(0)));
}

#[test]
fn unknown_slave_is_rejected() {
    let cyclic = CyclicLoop::new(runtime(bus()), 1000).unwrap();
    assert!(matches!(
        cyclic.set_slave_command("c", 1),
        Err(LoopError::UnknownSlave(name)) if name == "c"
    ));
    assert!(cyclic
        .set_command(SystemCommand::default().with("a", 1).with("z", 2))
        .is_err());
}

#[test]
fn wrong_encoded_size_is_an_error() {
    let mut config = topology();
    config.slaves[1].name = "broken".into();
    let runtime = EthercatMaster::new(config, registry()).initialize(bus()).unwrap();
    let cyclic = CyclicLoop::new(runtime, 1000).unwrap();

    // zero-filled without a command
    cyclic.run_once().unwrap();

    cyclic.set_slave_command("broken", 7).unwrap();
    let err = cyclic.run_once().err().unwrap();
    assert!(matches!(
        err,
        LoopError::Adapter {
            source: PdoError::OutputSizeMismatch {
                expected: 4,
                actual: 5
            },
            ..
        }
    ));
}

#[test]
fn output_image_must_match_encoded_size() {
    let mut config = topology();
    config.strict_pdo_size = false;
    let bus = SimulatedBus::new()
        .with_slave(echo_slave())
        .with_slave(SimSlave::new(2, TX_SIZE));
    let runtime = EthercatMaster::new(config, registry()).initialize(bus).unwrap();
    let cyclic = CyclicLoop::new(runtime, 1000).unwrap();

    cyclic.set_slave_command("b", 0x1234).unwrap();
    let err = cyclic.run_once().err().unwrap();
    assert!(matches!(
        err,
        LoopError::Adapter {
            slave,
            source: PdoError::OutputSizeMismatch {
                expected: 4,
                actual: 2
            },
        } if slave == "b"
    ));
    assert_eq!(cyclic.stats().cycle_count, 0);
}

#[test]
fn degraded_cycle_is_not_an_error() {
    let bus = bus();
    let handle = bus.handle();
    let cyclic = CyclicLoop::new(runtime(bus), 1000).unwrap();

    handle.set_drop_frames(true);
    cyclic.run_once().unwrap();
    assert_eq!(cyclic.stats().last_wkc, 0);

    handle.set_drop_frames(false);
    cyclic.run_once().unwrap();
    assert_eq!(cyclic.stats().last_wkc, 6);
}

#[test]
fn concurrent_submissions_never_interleave() {
    let cyclic = Arc::new(CyclicLoop::new(runtime(bus()), 1000).unwrap());

    let writers: Vec<_> = (0..4u16)
        .map(|w| {
            let handle = cyclic.handle();
            thread::spawn(move || {
                for i in 0..200u16 {
                    let v = w * 1000 + i;
                    handle
                        .set_command(SystemCommand::default().with("a", v).with("b", v))
                        .unwrap();
                }
            })
        })
        .collect();

    for _ in 0..100 {
        let status = cyclic.run_once().unwrap();
        assert_eq!(status.by_slave["a"].value, status.by_slave["b"].value);
    }
    for w in writers {
        w.join().unwrap();
    }

    // the cycle after the last submission reflects it
    let last = cyclic.handle();
    last.set_command(SystemCommand::default().with("a", 4242).with("b", 4242)).unwrap();
    assert_eq!(cyclic.run_once().unwrap().by_slave["b"].value, 4242);
}

#[test]
fn background_driver_runs_and_stops() {
    init_logger();
    let mut cyclic = CyclicLoop::new(runtime(bus()), 1000).unwrap();
    assert_eq!(cyclic.state(), LoopState::Idle);

    cyclic.set_slave_command("a", 11).unwrap();
    cyclic.start().unwrap();
    assert_eq!(cyclic.state(), LoopState::Running);

    let deadline = Instant::now() + Duration::from_secs(2);
    while cyclic.stats().cycle_count < 10 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(cyclic.stats().cycle_count >= 10);
    assert_eq!(cyclic.status().by_slave["a"].value, 11);

    assert!(cyclic.stop(Duration::from_secs(1)));
    assert_eq!(cyclic.state(), LoopState::Stopped);
    let count = cyclic.stats().cycle_count;
    thread::sleep(Duration::from_millis(10));
    assert_eq!(cyclic.stats().cycle_count, count);

    // restart after stop
    cyclic.start().unwrap();
    assert!(cyclic.stop(Duration::from_secs(1)));

    let mut runtime = cyclic.into_runtime().unwrap();
    assert_eq!(runtime.close(), ShutdownOutcome::Settled);
}

#[test]
fn aborted_driver_can_be_restarted() {
    init_logger();
    let mut config = topology();
    config.slaves[1].name = "broken".into();
    let runtime = EthercatMaster::new(config, registry()).initialize(bus()).unwrap();
    let mut cyclic = CyclicLoop::new(runtime, 1000).unwrap();

    cyclic.set_slave_command("broken", 7).unwrap();
    cyclic.start().unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while cyclic.state() == LoopState::Running && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(cyclic.state(), LoopState::Stopped);
    assert_eq!(cyclic.stats().cycle_count, 0);

    cyclic.set_command(SystemCommand::default().with("a", 3)).unwrap();
    cyclic.start().unwrap();
    assert_eq!(cyclic.state(), LoopState::Running);

    let deadline = Instant::now() + Duration::from_secs(2);
    while cyclic.stats().cycle_count < 5 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(cyclic.stats().cycle_count >= 5);
    assert_eq!(cyclic.status().by_slave["a"].value, 3);
    assert!(cyclic.stop(Duration::from_secs(1)));
}

#[test]
fn driver_exits_when_the_loop_is_dropped() {
    let bus = bus();
    let handle = bus.handle();
    let mut cyclic = CyclicLoop::new(runtime(bus), 1000).unwrap();
    cyclic.start().unwrap();
    thread::sleep(Duration::from_millis(5));
    drop(cyclic);

    assert_eq!(handle.count(&ethercat_controller::sim::SimCall::Close), 1);
}
