// Evhub CLI
// Watches input devices and prints every raw event the hub reports

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use log::{info, warn, LevelFilter};

use evhub_core::{EventHub, HubSettings, RawEvent, FINISHED_DEVICE_SCAN};

/// Events fetched per get_events call.
const EVENT_BUFFER_SIZE: usize = 256;

/// Evdev input hub monitor
#[derive(Parser, Debug)]
#[command(name = "evhub")]
#[command(author = "evhub contributors")]
#[command(version)]
#[command(about = "Watch input devices and print their raw events", long_about = None)]
struct Args {
    /// TOML settings file (defaults to ~/.config/evhub/settings.toml when present)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Ignore a device by name or node path (can be used multiple times)
    #[arg(short, long, value_name = "DEVICE")]
    exclude: Vec<String>,

    /// Scan once, print the device table and exit
    #[arg(long)]
    list_devices: bool,

    /// Poll timeout in milliseconds; negative waits until something happens
    #[arg(short, long, value_name = "MS", default_value_t = -1, allow_hyphen_values = true)]
    timeout: i32,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_settings(args: &Args) -> Result<HubSettings, Box<dyn std::error::Error>> {
    let mut settings = match &args.config {
        Some(path) => HubSettings::from_file(path)?,
        None => match HubSettings::load_default() {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Could not load default settings, using built-in defaults: {}", e);
                HubSettings::new()
            }
        },
    };
    settings.excluded.extend(args.exclude.iter().cloned());
    Ok(settings)
}

/// Drive the hub until the first scan has been reported, then print its dump.
fn list_devices(hub: &EventHub) {
    let mut buffer = vec![RawEvent::default(); EVENT_BUFFER_SIZE];
    loop {
        let count = hub.get_events(0, &mut buffer);
        if count == 0 || buffer[..count].iter().any(|e| e.event_type == FINISHED_DEVICE_SCAN) {
            break;
        }
    }
    print!("{}", hub.dump());
}

fn run(hub: &EventHub, running: &AtomicBool, timeout: i32) {
    let mut buffer = vec![RawEvent::default(); EVENT_BUFFER_SIZE];
    println!("evhub is running. Press Ctrl+C to exit.");

    while running.load(Ordering::SeqCst) {
        let count = hub.get_events(timeout, &mut buffer);
        for event in &buffer[..count] {
            println!("{}", event);
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    env_logger::Builder::from_default_env().filter_level(level).init();

    let settings = load_settings(&args)?;
    if let Some(path) = settings.source_path() {
        info!("Loaded settings from {}", path.display());
    }

    let hub = Arc::new(EventHub::new(&settings)?);

    if args.list_devices {
        list_devices(&hub);
        return Ok(());
    }

    // Set up signal handler for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let running = Arc::clone(&running);
        let hub = Arc::clone(&hub);
        std::thread::spawn(move || {
            if signals.forever().next().is_some() {
                println!("\nReceived signal, shutting down gracefully...");
                running.store(false, Ordering::SeqCst);
                hub.wake();
            }
        });
    }

    run(&hub, &running, args.timeout);
    Ok(())
}
