//! Telemetry link facade.
//!
//! [`TelemetryLink`] ties the session, the transport, the command router and
//! the chunker together. It is cheap to clone; one clone typically drives
//! [`TelemetryLink::run`] on the runtime while others push frames.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use plotlink_core::{Clock, Format, LinkConfig, Sample, UptimeClock};
use plotlink_protocol::frame::NEWLINE;
use plotlink_protocol::{plausible_timestamp, CodecError, Encoder, LogLine, PacketChunker, TelemetryFrame};

use crate::router::{CommandRouter, Dispatch, Resolve, SystemResolver};
use crate::session::{LinkSession, Route};
use crate::transport::{SerialSink, Transport};

/// Largest control datagram accepted.
const MAX_CONTROL_DATAGRAM: usize = 2048;

/// Errors returned by the push operations.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Codec(#[from] CodecError),
}

struct Inner {
    config: LinkConfig,
    clock: Arc<dyn Clock>,
    encoder: Encoder,
    session: RwLock<LinkSession>,
    transport: Transport,
    router: CommandRouter,
    chunker: Mutex<PacketChunker>,
    shutdown: watch::Sender<bool>,
}

/// Builder for [`TelemetryLink`].
pub struct TelemetryLinkBuilder {
    config: LinkConfig,
    clock: Option<Arc<dyn Clock>>,
    serial: Option<SerialSink>,
    resolver: Option<Arc<dyn Resolve>>,
}

impl TelemetryLinkBuilder {
    /// Clock used for implicit timestamps. Defaults to [`UptimeClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Fallback sink. Defaults to stdout.
    pub fn serial(mut self, sink: SerialSink) -> Self {
        self.serial = Some(sink);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> TelemetryLink {
        let config = self.config;
        let resolver = self.resolver.unwrap_or_else(|| Arc::new(SystemResolver));
        let (shutdown, _) = watch::channel(false);

        TelemetryLink {
            inner: Arc::new(Inner {
                clock: self.clock.unwrap_or_else(|| Arc::new(UptimeClock::new())),
                encoder: Encoder::new(config.precision),
                session: RwLock::new(LinkSession::new(config.control_port)),
                transport: Transport::new(
                    self.serial.unwrap_or_else(|| Box::new(io::stdout())),
                    config.serial_queue_frames,
                ),
                router: CommandRouter::new(resolver, &config),
                chunker: Mutex::new(PacketChunker::from_config(&config)),
                shutdown,
                config,
            }),
        }
    }
}

/// Session-oriented telemetry link with serial fallback.
#[derive(Clone)]
pub struct TelemetryLink {
    inner: Arc<Inner>,
}

impl TelemetryLink {
    pub fn builder(config: LinkConfig) -> TelemetryLinkBuilder {
        TelemetryLinkBuilder {
            config,
            clock: None,
            serial: None,
            resolver: None,
        }
    }

    /// Link with the default clock, resolver and stdout fallback.
    pub fn new(config: LinkConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    pub fn now_ms(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    // Session

    pub fn is_linked(&self) -> bool {
        self.session().is_linked()
    }

    pub fn is_transport_available(&self) -> bool {
        self.session().is_transport_available()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.session().peer()
    }

    /// Address of the bound control listener.
    pub fn control_addr(&self) -> Option<SocketAddr> {
        self.inner.transport.local_addr()
    }

    pub fn route(&self) -> Route {
        self.session().route()
    }

    /// Datagrams dropped by the transport so far.
    pub fn dropped_datagrams(&self) -> u64 {
        self.inner.transport.dropped()
    }

    /// Serial frames dropped because the fallback sink fell behind.
    pub fn dropped_serial_frames(&self) -> u64 {
        self.inner.transport.dropped_serial()
    }

    /// Wait up to `timeout` for queued serial output to be written.
    /// Returns false if frames were still pending.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.inner.transport.flush_serial(timeout)
    }

    fn session(&self) -> LinkSession {
        self.inner
            .session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drop the current peer without notifying it.
    pub fn disconnect(&self) {
        let peer = self
            .inner
            .session
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .unlink();
        if let Some(peer) = peer {
            info!("Disconnected from {}", peer);
        }
    }

    /// Stop the control listener and fall back to serial.
    pub fn stop(&self) {
        self.disconnect();
        self.inner.shutdown.send_replace(true);
    }

    // Inbound

    /// Register the handler for application commands.
    pub fn on_command<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.router.set_callback(Arc::new(callback));
    }

    /// Route a line received on the serial side.
    pub fn handle_serial_line(&self, line: &str) -> Dispatch {
        self.dispatch(line)
    }

    fn dispatch(&self, raw: &str) -> Dispatch {
        self.inner
            .router
            .dispatch(raw, &self.inner.session, &self.inner.transport)
    }

    // Outbound

    fn transmit(&self, bytes: &[u8]) {
        self.inner.transport.send(self.route(), bytes);
    }

    /// Send a log line. A missing or zero timestamp is taken from the clock.
    pub fn push_log(&self, text: &str, timestamp_ms: Option<u64>) {
        let timestamp_ms = timestamp_ms
            .filter(|&ts| ts != 0)
            .unwrap_or_else(|| self.now_ms());
        let mut out = Vec::with_capacity(text.len() + 24);
        self.inner.encoder.encode_log(
            &LogLine {
                timestamp_ms,
                message: text,
            },
            &mut out,
        );
        self.transmit(&out);
    }

    /// Send one value stamped with the current time.
    pub fn push_scalar<T: Sample>(
        &self,
        name: &str,
        value: T,
        unit: Option<&str>,
    ) -> Result<(), LinkError> {
        self.push_scalar_at(name, self.now_ms(), value, unit)
    }

    /// Send one value at `timestamp_ms`.
    ///
    /// Timestamps below 100000 are replaced by the clock.
    pub fn push_scalar_at<T: Sample>(
        &self,
        name: &str,
        timestamp_ms: u64,
        value: T,
        unit: Option<&str>,
    ) -> Result<(), LinkError> {
        let timestamp_ms = plausible_timestamp(timestamp_ms, self.now_ms());
        let frame = TelemetryFrame::scalar(name, timestamp_ms, &value).with_unit(unit);
        let bytes = self.inner.encoder.to_bytes(&frame)?;
        self.transmit(&bytes);
        Ok(())
    }

    /// Send a series in the configured format. Returns the number of frames.
    pub fn push_series<T: Sample>(
        &self,
        name: &str,
        step_ms: u32,
        values: &[T],
        unit: Option<&str>,
    ) -> Result<usize, LinkError> {
        self.push_series_as(self.inner.config.series_format, name, step_ms, values, unit)
    }

    /// Send a series in `format`. Returns the number of frames.
    pub fn push_series_as<T: Sample>(
        &self,
        format: Format,
        name: &str,
        step_ms: u32,
        values: &[T],
        unit: Option<&str>,
    ) -> Result<usize, LinkError> {
        let now = self.now_ms();
        let chunked = self
            .inner
            .chunker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .chunk(name, step_ms, values, unit, format, now)?;
        if !chunked.complete {
            warn!(
                "Packet limit of {} bytes cannot hold a value of {:?}",
                self.inner.config.max_packet_bytes, name
            );
        }

        let route = self.route();
        for frame in &chunked.frames {
            self.inner.transport.send(route, frame);
        }
        Ok(chunked.frames.len())
    }

    /// Send raw text.
    pub fn print(&self, text: &str) {
        self.transmit(text.as_bytes());
    }

    /// Send text followed by CRLF.
    pub fn println(&self, text: &str) {
        let mut line = String::with_capacity(text.len() + NEWLINE.len());
        line.push_str(text);
        line.push_str(NEWLINE);
        self.transmit(line.as_bytes());
    }

    // Listener

    /// Serve the control port until [`TelemetryLink::stop`].
    ///
    /// Binding is retried every `rebind_interval_ms` until it succeeds.
    pub async fn run(&self) {
        let mut shutdown = self.inner.shutdown.subscribe();
        let retry = Duration::from_millis(self.inner.config.rebind_interval_ms.max(1));
        let addr = SocketAddr::new(self.inner.config.bind_addr, self.inner.config.control_port);

        while !*shutdown.borrow() {
            match self.bind(addr) {
                Ok(socket) => {
                    self.serve(&socket, &mut shutdown).await;
                    self.release();
                }
                Err(e) => {
                    warn!("Failed to bind control port {}: {} (retry in {:?})", addr, e, retry);
                }
            }
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(retry) => {}
                _ = shutdown.changed() => {}
            }
        }

        self.release();
        info!("Telemetry link stopped");
    }

    fn bind(&self, addr: SocketAddr) -> io::Result<UdpSocket> {
        let socket = std::net::UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let sender = socket.try_clone()?;
        let local = socket.local_addr()?;
        let socket = UdpSocket::from_std(socket)?;

        self.inner.transport.attach(sender)?;
        self.inner
            .session
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .transport_up(local.port());
        info!("Control listener bound on {}", local);
        Ok(socket)
    }

    fn release(&self) {
        self.inner.transport.detach();
        self.inner
            .session
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .transport_down();
    }

    async fn serve(&self, socket: &UdpSocket, shutdown: &mut watch::Receiver<bool>) {
        let mut buf = vec![0u8; MAX_CONTROL_DATAGRAM];
        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => match received {
                    Ok((n, from)) => {
                        let payload = String::from_utf8_lossy(&buf[..n]);
                        debug!("Control datagram from {}: {:?}", from, payload);
                        self.dispatch(&payload);
                    }
                    Err(e) if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
                    ) => {
                        debug!("Ignoring ICMP error on control socket: {}", e);
                    }
                    Err(e) => {
                        warn!("Control listener failed: {}", e);
                        return;
                    }
                },
                _ = shutdown.changed() => return,
            }
        }
    }
}
