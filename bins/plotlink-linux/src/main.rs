use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plotlink_acquisition::{AcquisitionProducer, SimulatedAdc};
use plotlink_core::{CircularSampleBuffer, Clock, TelemetryConfig};
use plotlink_session::{StreamForwarder, TelemetryLink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout is the serial fallback and carries frames only
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,plotlink_session=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("plotlink starting...");

    // Configuration
    let config = match std::env::args().nth(1) {
        Some(path) => TelemetryConfig::load(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => TelemetryConfig::default(),
    };
    let acquisition = config.acquisition.clone();
    let clock: Arc<dyn Clock> = Arc::from(config.clock.build());

    let link = TelemetryLink::builder(config.link.clone())
        .clock(clock)
        .build();

    // Received application commands are echoed back as log lines
    let echo = link.clone();
    link.on_command(move |line| echo.push_log(&format!("command: {}", line.trim()), None));

    // Acquisition
    let (writer, reader) = CircularSampleBuffer::<u16>::new(acquisition.buffer_capacity)?.split();
    let adc = SimulatedAdc::new(acquisition.channel, acquisition.sample_rate_hz);
    let poll_interval = Duration::from_millis(acquisition.poll_interval_ms.max(1));
    let producer = AcquisitionProducer::begin(adc, writer, &acquisition)?;
    let task = producer.spawn(poll_interval)?;

    let mut forwarder = StreamForwarder::new(
        reader,
        format!("adc{}", acquisition.channel),
        acquisition.step_ms(),
        acquisition.batch_size,
    )
    .with_unit("raw");

    // Control listener
    let runner = link.clone();
    let mut link_handle = tokio::spawn(async move { runner.run().await });

    // Serial input on a plain thread; a pending stdin read must not hold up shutdown
    let serial = link.clone();
    std::thread::Builder::new()
        .name("serial-input".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        serial.handle_serial_line(&line);
                    }
                    Err(e) => {
                        tracing::warn!("stdin read failed: {}", e);
                        break;
                    }
                }
            }
        })?;

    tracing::info!(
        "Control port {}, streaming adc{} every {:?}",
        config.link.control_port,
        acquisition.channel,
        poll_interval
    );

    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down...");
                break;
            }
            _ = &mut link_handle => {
                tracing::warn!("Telemetry link stopped");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = forwarder.drain(&link) {
                    tracing::error!("Failed to forward samples: {}", e);
                }
            }
        }
    }

    // The producer must be halted before the ring goes away
    let producer = task.stop()?;
    let stats = producer.stats();
    producer.finish();
    tracing::info!(
        "Acquisition stopped: {} raw samples, {} pushed, {} read errors",
        stats.raw_samples,
        stats.pushed,
        stats.read_errors
    );

    link.stop();
    if !link.flush(Duration::from_secs(1)) {
        tracing::warn!("Serial output still pending at shutdown");
    }
    if !link_handle.is_finished() {
        let _ = tokio::time::timeout(Duration::from_secs(1), link_handle).await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
