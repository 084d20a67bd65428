//! Headless host
//!
//! Runs the message controller with a simulated audio thread and speaks
//! newline-delimited JSON envelopes on stdin/stdout:
//!
//! ```text
//! $ echo '{"id":10,"payload":{"note":69}}' | cadence-headless
//! {"id":10,"payload":{"voice":0,"note":69,"active":true,"velocity":1.0,"frequency_hz":440.0}}
//! ```
//!
//! Usage: `cadence-headless [config.yaml]`. Logs go to stderr (`RUST_LOG`).

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use cadence_core::config::{default_config_path, load_config, MessagingConfig};
use cadence_core::engine::Engine;
use cadence_core::messaging::MessageController;
use cadence_core::SAMPLE_RATE;

/// Frames rendered per simulated audio cycle
const BLOCK_SIZE: usize = 256;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| default_config_path("messaging.yaml"));
    log::info!("cadence-headless starting, config: {:?}", config_path);

    let config: MessagingConfig = load_config(&config_path);
    let (mut controller, endpoint) =
        MessageController::new(config).context("Failed to create message controller")?;

    // Outbound events go through a writer thread so the control thread never
    // waits on stdout
    let (out_tx, out_rx) = crossbeam::channel::unbounded::<String>();
    let writer = thread::Builder::new()
        .name("cadence-stdout".into())
        .spawn(move || {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for line in out_rx {
                if writeln!(out, "{}", line).and_then(|_| out.flush()).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn stdout writer")?;

    controller.register_client("stdio", move |text: &str| {
        let _ = out_tx.send(text.to_owned());
    });

    let running = Arc::new(AtomicBool::new(true));
    let audio = spawn_audio_thread(Engine::new(endpoint), Arc::clone(&running))?;

    controller.start().context("Failed to start message controller")?;

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        controller.send_raw_from_client(line)?;
    }

    log::info!("stdin closed, shutting down");
    controller.stop()?;
    // Releases the last sender so the writer thread ends
    controller.unregister_client();

    running.store(false, Ordering::Relaxed);
    if audio.join().is_err() {
        log::error!("Audio thread panicked");
    }
    if writer.join().is_err() {
        log::error!("Stdout writer panicked");
    }

    let stats = controller.stats();
    log::info!(
        "Handled {} envelopes ({} rejected), delivered {} events",
        stats.envelopes_handled,
        stats.protocol_errors,
        stats.events_delivered
    );
    Ok(())
}

/// Call `Engine::process` at the block rate until `running` is cleared
fn spawn_audio_thread(
    mut engine: Engine,
    running: Arc<AtomicBool>,
) -> anyhow::Result<thread::JoinHandle<()>> {
    let period = Duration::from_secs_f64(BLOCK_SIZE as f64 / SAMPLE_RATE as f64);

    thread::Builder::new()
        .name("cadence-audio".into())
        .spawn(move || {
            let mut buffer = vec![0.0f32; BLOCK_SIZE];
            let mut next = Instant::now();
            while running.load(Ordering::Relaxed) {
                engine.process(&mut buffer);
                next += period;
                let now = Instant::now();
                if next > now {
                    thread::sleep(next - now);
                } else {
                    // Fell behind; don't try to catch up with a burst
                    next = now;
                }
            }
        })
        .context("Failed to spawn audio thread")
}
