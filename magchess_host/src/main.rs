use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context};
use clap::Parser;
use log::{info, warn};
use magchess_host::configfile::load_calibration;
use magchess_host::console::{spawn_reader, ChannelSource};
use magchess_host::status::session_status;
use magchess_mcu::session::Outcome;
use magchess_mcu::sim::{SimDelay, SimRig, SimSwitch};
use magchess_mcu::{Calibration, HeadError, Session, SessionState, StepPosition};

/// Magnetic chess head simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Calibration file
    #[arg()]
    config_file: Option<String>,

    /// read moves from file instead of stdin
    #[arg(short, long)]
    script: Option<String>,

    /// write log to file instead of stderr
    #[arg(short, long)]
    logfile: Option<String>,

    /// enable debug messages
    #[arg(short, long)]
    verbose: bool,

    /// physical X position of the head at power-on, in steps from the switch
    #[arg(long, default_value_t = 12_000)]
    start_x: i32,

    /// physical Y position of the head at power-on, in steps from the switch
    #[arg(long, default_value_t = 8_000)]
    start_y: i32,

    /// print a JSON status snapshot after every command
    #[arg(long)]
    status: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if args.verbose {
        builder.filter(None, log::LevelFilter::Debug);
    } else {
        builder.filter(None, log::LevelFilter::Info);
    }
    if let Some(ref logfile) = args.logfile {
        let target = Box::new(File::create(logfile).with_context(|| format!("Can't create logfile {}", logfile))?);
        builder.target(env_logger::Target::Pipe(target));
    }
    builder.init();

    let cal = match args.config_file {
        Some(ref path) => load_calibration(Path::new(path)).with_context(|| format!("Loading {}", path))?,
        None => Calibration::default(),
    };
    info!("Starting simulator");

    let input: Box<dyn BufRead + Send> = match args.script {
        Some(ref path) => Box::new(BufReader::new(File::open(path).with_context(|| format!("Opening {}", path))?)),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let rig = RefCell::new(SimRig::new(StepPosition::new(args.start_x, args.start_y)));
    rig.borrow_mut().place_starting_pieces(&cal);

    let mut session = Session::new(
        SimRig::motion(&rig, cal),
        ChannelSource::new(spawn_reader(input), io::stdout()),
        SimSwitch::button(&rig),
        SimDelay::new(&rig),
        cal,
    );
    if let Err(e) = session.start() {
        bail!("Homing failed: {}", e);
    }

    loop {
        match session.service() {
            Ok(Outcome::Faulted(e)) => {
                // Nobody stands at the board in the simulator: resync straight away
                // when the board may be out of step, otherwise press resume.
                if e.is_fatal() && !matches!(e, HeadError::Homing { .. }) {
                    warn!("Command failed ({}); restoring the starting layout", e);
                    if let Err(e) = session.setup_pieces() {
                        bail!("Setting up the pieces failed: {}", e);
                    }
                } else {
                    warn!("Command failed ({}); resuming", e);
                    session.button_press();
                    session.button_release();
                }
                if session.state() != SessionState::Running {
                    bail!("Could not resume after {}", e);
                }
            }
            Ok(outcome) => info!("{:?}", outcome),
            Err(e) => {
                info!("{}", e);
                break;
            }
        }
        if args.status {
            println!("{}", session_status(&session));
        }
    }

    let rig = rig.borrow();
    info!("Simulated time {:.1} s", rig.clock_ns() as f64 / 1e9);
    println!("{}", serde_json::to_string_pretty(&session_status(&session))?);
    Ok(())
}
