//! Link session state.

use std::net::SocketAddr;

/// Where outgoing frames go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// UDP datagram to the linked plotter.
    Datagram(SocketAddr),
    /// The serial sink.
    Serial,
}

/// Link state shared by the control listener and the senders.
///
/// A session starts unlinked. Only the command router (on a valid
/// `CONNECT`/`DISCONNECT`) and an explicit disconnect change the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSession {
    peer: Option<SocketAddr>,
    local_control_port: u16,
    transport_available: bool,
}

impl LinkSession {
    pub fn new(local_control_port: u16) -> Self {
        Self {
            peer: None,
            local_control_port,
            transport_available: false,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.peer.is_some()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn local_control_port(&self) -> u16 {
        self.local_control_port
    }

    pub fn is_transport_available(&self) -> bool {
        self.transport_available
    }

    /// Current destination of outgoing frames.
    pub fn route(&self) -> Route {
        match self.peer {
            Some(peer) if self.transport_available => Route::Datagram(peer),
            _ => Route::Serial,
        }
    }

    /// Link (or re-target) the session to `peer`.
    pub fn link(&mut self, peer: SocketAddr) {
        self.peer = Some(peer);
    }

    /// Drop the peer, returning it.
    pub fn unlink(&mut self) -> Option<SocketAddr> {
        self.peer.take()
    }

    /// Record the bound control port (the OS picks it when 0 is configured).
    pub fn transport_up(&mut self, local_control_port: u16) {
        self.local_control_port = local_control_port;
        self.transport_available = true;
    }

    pub fn transport_down(&mut self) {
        self.transport_available = false;
    }
}
