//! The single send primitive.
//!
//! Everything the link emits goes through [`Transport::send`] with a
//! [`Route`] picked from the session. Datagrams are fire-and-forget: the
//! socket is non-blocking and a full send buffer drops the frame. Serial
//! frames are handed to a writer thread through a bounded queue and dropped
//! when the queue is full, so a stalled sink never holds up the caller.

use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, trace, warn};

use crate::session::Route;

/// Byte sink used when no plotter is linked.
pub type SerialSink = Box<dyn Write + Send>;

/// Outgoing side of the link.
pub struct Transport {
    socket: RwLock<Option<UdpSocket>>,
    serial: Sender<Vec<u8>>,
    /// Serial frames accepted but not yet written.
    pending: Arc<AtomicUsize>,
    dropped: AtomicU64,
    dropped_serial: AtomicU64,
}

impl Transport {
    /// Transport writing serial frames to `sink`, with at most
    /// `queue_frames` frames waiting for it.
    pub fn new(sink: SerialSink, queue_frames: usize) -> Self {
        let (serial, queue) = bounded(queue_frames.max(1));
        let pending = Arc::new(AtomicUsize::new(0));

        let writer_pending = pending.clone();
        let spawned = thread::Builder::new()
            .name("serial-writer".to_string())
            .spawn(move || serial_writer(sink, queue, writer_pending));
        if let Err(e) = spawned {
            // The queue is disconnected from here on and every frame counts as dropped
            warn!("Failed to start serial writer: {}", e);
        }

        Self {
            socket: RwLock::new(None),
            serial,
            pending,
            dropped: AtomicU64::new(0),
            dropped_serial: AtomicU64::new(0),
        }
    }

    /// Use `socket` for datagrams. It is switched to non-blocking mode.
    pub fn attach(&self, socket: UdpSocket) -> io::Result<()> {
        socket.set_nonblocking(true)?;
        *self.socket.write().unwrap_or_else(|e| e.into_inner()) = Some(socket);
        Ok(())
    }

    pub fn detach(&self) {
        *self.socket.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Local address of the attached socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(|s| s.local_addr().ok())
    }

    /// Datagrams dropped because the socket was busy or gone.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Serial frames dropped because the writer queue was full or gone.
    pub fn dropped_serial(&self) -> u64 {
        self.dropped_serial.load(Ordering::Relaxed)
    }

    /// Wait until every queued serial frame has been written, or `timeout`
    /// passes. Returns whether the queue drained.
    pub fn flush_serial(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending.load(Ordering::Acquire) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Send `bytes` along `route`. Never blocks.
    pub fn send(&self, route: Route, bytes: &[u8]) {
        match route {
            Route::Datagram(peer) => self.send_datagram(peer, bytes),
            Route::Serial => self.write_serial(bytes),
        }
    }

    fn send_datagram(&self, peer: SocketAddr, bytes: &[u8]) {
        let guard = self.socket.read().unwrap_or_else(|e| e.into_inner());
        let Some(socket) = guard.as_ref() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("No datagram socket, dropped {} bytes for {}", bytes.len(), peer);
            return;
        };

        match socket.send_to(bytes, peer) {
            Ok(_) => trace!("Sent {} bytes to {}", bytes.len(), peer),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Send buffer full, dropped datagram for {}", peer);
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to send datagram to {}: {}", peer, e);
            }
        }
    }

    fn write_serial(&self, bytes: &[u8]) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        match self.serial.try_send(bytes.to_vec()) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                self.dropped_serial.fetch_add(1, Ordering::Relaxed);
                trace!("Serial queue full, dropped {} bytes", frame.len());
            }
            Err(TrySendError::Disconnected(frame)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                self.dropped_serial.fetch_add(1, Ordering::Relaxed);
                debug!("Serial writer gone, dropped {} bytes", frame.len());
            }
        }
    }

    /// Source address the OS would use to reach `peer`.
    ///
    /// Falls back to the bound address, then to the unspecified address, if
    /// no route can be found.
    pub fn local_ip_toward(&self, peer: SocketAddr) -> IpAddr {
        let bound = self.local_addr().map(|a| a.ip());
        if let Some(ip) = bound.filter(|ip| !ip.is_unspecified()) {
            return ip;
        }

        let any: IpAddr = match peer {
            SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
            SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
        };
        let probe = UdpSocket::bind((any, 0)).and_then(|s| {
            s.connect(peer)?;
            s.local_addr()
        });
        match probe {
            Ok(addr) => addr.ip(),
            Err(e) => {
                debug!("Could not determine local address toward {}: {}", peer, e);
                bound.unwrap_or(any)
            }
        }
    }
}

/// Writer thread body. Ends once the transport is dropped.
fn serial_writer(mut sink: SerialSink, queue: Receiver<Vec<u8>>, pending: Arc<AtomicUsize>) {
    for frame in queue.iter() {
        if let Err(e) = sink.write_all(&frame).and_then(|_| sink.flush()) {
            debug!("Serial write failed: {}", e);
        }
        pending.fetch_sub(1, Ordering::AcqRel);
    }
    trace!("Serial writer stopped");
}
