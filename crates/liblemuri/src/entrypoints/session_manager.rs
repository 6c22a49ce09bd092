use clap::Parser;
use log::{error, info, trace, warn};
use signal_hook::iterator::Signals;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Instant;

use crate::config;
use crate::dbus;
use crate::events::{Event, EventReceiver, EventSender};
use crate::logging;
use crate::phases::PhaseStateMachine;
use crate::process::OsProcessLauncher;
use crate::runtime_info::RuntimeInfo;
use crate::signal_handler;

/// Lemuri session manager
#[derive(Parser, Debug)]
#[command(name = "lemuri-session", version)]
pub struct CliArgs {
    /// Name of the session we are about to start
    #[arg(short, long = "session-name", value_name = "SESSION")]
    pub session_name: String,

    /// Directory holding `<session>.conf` and `<session>.d/`
    #[arg(long, default_value = config::DEFAULT_CONFIG_ROOT)]
    pub config_root: PathBuf,

    /// Window manager command, overrides `X-WindowManager=` of the session
    #[arg(short, long)]
    pub window_manager: Option<String>,

    /// Stop units as soon as one of their required bus services vanishes
    #[arg(long)]
    pub shutdown_on_missing_deps: bool,

    #[arg(long, default_value_t = log::LevelFilter::Info)]
    pub log_level: log::LevelFilter,

    /// Also write the log to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

pub fn run_session_manager() {
    let cli_args = CliArgs::parse();

    let (log_conf, conf) = config::load_config(&config::ConfigArgs {
        session_name: &cli_args.session_name,
        config_root: &cli_args.config_root,
        window_manager: cli_args.window_manager.as_deref(),
        shutdown_on_missing_deps: cli_args.shutdown_on_missing_deps,
        log_level: cli_args.log_level,
        log_file: cli_args.log_file.as_deref(),
    });

    if let Err(e) = logging::setup_logging(&log_conf) {
        eprintln!("{e}");
        std::process::exit(1);
    }
    info!("Starting session {}", conf.session_name);

    // Has to happen before any thread exists, it may modify the environment.
    if let Err(e) = dbus::launch::ensure_session_bus() {
        warn!("Could not launch a session bus: {e}");
    }

    let signals = match Signals::new([
        signal_hook::consts::SIGCHLD,
        signal_hook::consts::SIGTERM,
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGQUIT,
    ]) {
        Ok(signals) => signals,
        Err(e) => {
            error!("Couldnt setup listening to the signals: {e}");
            std::process::exit(1);
        }
    };

    let (events_tx, events_rx) = mpsc::channel();
    start_signal_handler_thread(signals, events_tx.clone());

    let bus = match dbus::DBusSession::connect(events_tx) {
        Ok(bus) => bus,
        Err(e) => {
            error!("Unable to connect to the bus: {e}");
            std::process::exit(1);
        }
    };

    let run_info = RuntimeInfo::new(Box::new(OsProcessLauncher), Box::new(bus));
    let mut session = PhaseStateMachine::new(conf, run_info);
    if let Err(e) = session.start() {
        error!("Unable to register the session: {e}");
        std::process::exit(1);
    }
    session.process_pending();

    run_event_loop(&mut session, &events_rx);
    info!("Session ended");
}

fn start_signal_handler_thread(signals: Signals, events: EventSender) {
    std::thread::spawn(move || {
        // listen on signals from the child processes
        signal_handler::handle_signals(signals, events);
    });
}

/// Feeds events to the session one at a time until a termination signal
/// arrives. Phase timers are implemented as the receive timeout.
pub fn run_event_loop(session: &mut PhaseStateMachine, events: &EventReceiver) {
    loop {
        let event = match session.next_deadline() {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                match events.recv_timeout(timeout) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => Event::PhaseTimeout,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match events.recv() {
                Ok(event) => event,
                Err(_) => break,
            },
        };

        let shutdown = event == Event::Shutdown;
        session.handle_event(event);
        if shutdown {
            return;
        }
    }
    trace!("All event sources are gone");
    session.shutdown();
}
