use anyhow::{bail, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use linein::stream::Direction;
use linein::{
    AudioBackend, ConfigManager, CpalBackend, LatencyPreset, MockBackend, MockHandle,
    PassthroughEngine,
};
use log::info;
use rand::Rng;
use serde::Serialize;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Render quantum the mock pump asks for, 2ms at 48kHz
const MOCK_QUANTUM_FRAMES: usize = 96;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    let matches = Command::new("linein")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Low-latency instrument passthrough from line input to output")
        .arg(
            Arg::new("list-devices")
                .long("list-devices")
                .help("List output devices and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("output-device")
                .long("output-device")
                .value_name("ID")
                .help("Output device id (see --list-devices)")
                .value_parser(clap::value_parser!(i32)),
        )
        .arg(
            Arg::new("gain")
                .long("gain")
                .value_name("GAIN")
                .help("Linear gain, 3.0 to 12.0")
                .value_parser(clap::value_parser!(f32)),
        )
        .arg(
            Arg::new("target-ms")
                .long("target-ms")
                .value_name("MS")
                .help("Target queued audio in ms, 0 disables drain control")
                .value_parser(clap::value_parser!(i32)),
        )
        .arg(
            Arg::new("drain-rate")
                .long("drain-rate")
                .value_name("RATE")
                .help("Share of the excess discarded per quantum, 0.0 to 1.0")
                .value_parser(clap::value_parser!(f32)),
        )
        .arg(
            Arg::new("preset")
                .long("preset")
                .value_name("PRESET")
                .help("Latency preset; --target-ms and --drain-rate override it")
                .value_parser(["off", "low", "safe"]),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Configuration file (default: platform config dir)"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print telemetry as JSON lines")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("mock")
                .long("mock")
                .help("Run against a simulated device instead of real hardware")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let manager = match matches.get_one::<String>("config") {
        Some(path) => ConfigManager::with_path(path)?,
        None => ConfigManager::new()?,
    };
    let mut config = manager.config().clone();
    apply_overrides(&mut config.control, &matches)?;

    let (backend, mock): (Box<dyn AudioBackend>, Option<MockHandle>) = if matches.get_flag("mock") {
        let backend = MockBackend::new();
        let handle = backend.handle();
        (Box::new(backend), Some(handle))
    } else {
        (Box::new(CpalBackend::new()), None)
    };

    if matches.get_flag("list-devices") {
        for device in backend.output_devices() {
            println!("{}", device);
        }
        return Ok(());
    }

    let json = matches.get_flag("json");
    let mut engine = PassthroughEngine::new(backend, config)?;
    if !engine.create() {
        bail!("Could not open the audio streams");
    }
    engine.set_effect_on(true);

    let pump = mock.map(MockPump::spawn);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl+C")?;
                info!("Ctrl+C received, shutting down");
                break;
            }
            _ = ticker.tick() => {
                engine.recover_if_disconnected();
                print_status(&engine, json)?;
            }
        }
    }

    engine.delete();
    if let Some(pump) = pump {
        pump.stop();
    }

    Ok(())
}

fn apply_overrides(
    control: &mut linein::config::ControlSettings,
    matches: &ArgMatches,
) -> Result<()> {
    if let Some(preset) = matches.get_one::<String>("preset") {
        control.apply_preset(preset.parse::<LatencyPreset>()?);
    }
    if let Some(&gain) = matches.get_one::<f32>("gain") {
        control.gain = gain;
    }
    if let Some(&ms) = matches.get_one::<i32>("target-ms") {
        control.target_buffer_ms = ms;
    }
    if let Some(&rate) = matches.get_one::<f32>("drain-rate") {
        control.drain_rate = rate;
    }
    if let Some(&id) = matches.get_one::<i32>("output-device") {
        control.output_device = Some(id);
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusLine<'a> {
    state: linein::EngineState,
    gain: f32,
    target_buffer_ms: i32,
    drain_rate: f32,
    #[serde(flatten)]
    telemetry: &'a linein::TelemetrySnapshot,
}

fn print_status(engine: &PassthroughEngine, json: bool) -> Result<()> {
    let snapshot = engine.snapshot();
    let params = engine.parameters();

    if json {
        let line = StatusLine {
            state: engine.state(),
            gain: params.gain(),
            target_buffer_ms: params.target_buffer_ms(),
            drain_rate: params.drain_rate(),
            telemetry: &snapshot,
        };
        println!("{}", serde_json::to_string(&line).context("Failed to serialize telemetry")?);
        return Ok(());
    }

    let transport = |low_latency: bool| if low_latency { "low-latency" } else { "legacy" };
    println!(
        "{:<9} buffer {:>4}ms | in {:>3}ms {} | out {:>3}ms {} | \
         drained {} underrun {} overflow {}",
        engine.state(),
        snapshot.current_buffer_ms,
        snapshot.input_latency_ms,
        transport(snapshot.input_low_latency),
        snapshot.output_latency_ms,
        transport(snapshot.output_low_latency),
        snapshot.stats.drained_frames,
        snapshot.stats.underrun_frames,
        snapshot.stats.overflow_frames,
    );
    Ok(())
}

/// Feeds the mock backend from a plain thread: a 220Hz tone in, render
/// quanta pulled out. Capture quanta vary in size so the queue wanders and
/// drain control has something to do.
struct MockPump {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl MockPump {
    fn spawn(handle: MockHandle) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let thread = thread::spawn(move || {
            let mut rng = rand::thread_rng();
            let sample_rate = handle
                .stream(Direction::Capture)
                .map(|stream| stream.sample_rate)
                .unwrap_or(linein::mock_backend::MOCK_SAMPLE_RATE) as f32;
            let step = TAU * 220.0 / sample_rate;
            let mut phase = 0.0f32;
            let mut input = Vec::with_capacity(MOCK_QUANTUM_FRAMES * 2);

            while flag.load(Ordering::Relaxed) {
                let frames = rng.gen_range(MOCK_QUANTUM_FRAMES - 16..=MOCK_QUANTUM_FRAMES + 24);
                input.clear();
                for _ in 0..frames {
                    input.push(0.1 * phase.sin());
                    phase = (phase + step) % TAU;
                }
                handle.push_capture(&input);
                handle.pull_render(MOCK_QUANTUM_FRAMES);
                thread::sleep(Duration::from_millis(2));
            }
        });

        Self { running, thread }
    }

    fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        let _ = self.thread.join();
    }
}
