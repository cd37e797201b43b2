use std::{
    env,
    error::Error,
    thread,
    time::{Duration, Instant},
};

use ds402_ethercat_controller::{master, Command, Ds402Loop, ModeOfOperation};
use ethercat_controller::{Config, SystemCommand};

#[cfg(feature = "igh")]
fn transport(_config: &Config) -> ethercat_controller::IghTransport {
    ethercat_controller::IghTransport::new(0)
}

#[cfg(not(feature = "igh"))]
fn transport(config: &Config) -> ethercat_controller::sim::SimulatedBus {
    log::warn!("Built without the 'igh' feature, running on a simulated bus");
    ds402_ethercat_controller::sim::simulated_bus(config).0
}

fn hold_position(cyclic: &Ds402Loop) -> SystemCommand<Command> {
    let status = cyclic.status();
    let mut command = SystemCommand::default();
    for (name, drive) in &status.by_slave {
        command = command.with(
            name,
            Command {
                target_position: drive.measured_position,
                ..Command::enable(ModeOfOperation::CyclicSyncPosition)
            },
        );
    }
    command
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args: Vec<_> = env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        println!("usage: {} TOPOLOGY-FILE [SECONDS]", env!("CARGO_BIN_NAME"));
        return Ok(());
    }
    let filename = &args[1];
    let duration = match args.get(2) {
        Some(s) => Duration::from_secs_f64(s.parse()?),
        None => Duration::from_secs(5),
    };

    let config = Config::from_yaml(filename)?;
    let cycle_hz = config.cycle_hz;
    let bus = transport(&config);

    let runtime = master(config).initialize(bus)?;
    for slave in runtime.slaves() {
        let info = runtime.slave_info(&slave.name)?;
        log::info!(
            "{} pos={} state=0x{:02X} rx={}B tx={}B",
            slave.name,
            slave.position,
            info.al_state,
            info.output_bytes,
            info.input_bytes
        );
        if let Some(params) = runtime.startup_params(&slave.name) {
            for (key, value) in params {
                log::info!("  {} = {:?}", key, value);
            }
        }
    }

    let mut cyclic = Ds402Loop::new(runtime, cycle_hz)?;
    // one idle cycle to read where the drives are before enabling them
    cyclic.run_once()?;
    cyclic.set_command(hold_position(&cyclic))?;
    cyclic.start()?;

    let t0 = Instant::now();
    while t0.elapsed() < duration {
        thread::sleep(Duration::from_secs(1));
        let stats = cyclic.stats();
        let status = cyclic.status();
        println!(
            "cycle={} wkc={} cycle_time={}us deviation={}us",
            stats.cycle_count,
            stats.last_wkc,
            stats.last_cycle_time_ns / 1000,
            stats.last_deviation_ns / 1000
        );
        let mut names: Vec<_> = status.by_slave.keys().collect();
        names.sort();
        for name in names {
            let drive = &status.by_slave[name];
            println!(
                "  {} {:?} sw=0x{:04X} err=0x{:04X} pos={:.4} vel={:.4} torque={:.4}",
                name,
                drive.state,
                drive.status_word,
                drive.error_code,
                drive.measured_position,
                drive.measured_velocity,
                drive.measured_torque
            );
        }
    }

    log::info!("Disabling drives");
    cyclic.set_command(SystemCommand::default())?;
    thread::sleep(Duration::from_millis(100));

    if !cyclic.stop(Duration::from_secs(1)) {
        log::error!("Cyclic loop did not stop in time");
        return Ok(());
    }
    if let Some(mut runtime) = cyclic.into_runtime() {
        log::info!("Shutdown: {:?}", runtime.close());
    }
    Ok(())
}
