//! Inbound command routing.
//!
//! Control lines change the session; everything else is handed, verbatim,
//! to the application callback registered with
//! [`crate::TelemetryLink::on_command`].

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use plotlink_core::LinkConfig;
use plotlink_protocol::{encode_control_line, Command, ControlVerb};

use crate::session::{LinkSession, Route};
use crate::transport::Transport;

/// Host name resolution.
pub trait Resolve: Send + Sync {
    fn resolve(&self, host: &str) -> Option<IpAddr>;
}

/// Accepts IP literals and falls back to the system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve(&self, host: &str) -> Option<IpAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Some(ip);
        }
        (host, 0)
            .to_socket_addrs()
            .ok()?
            .map(|addr| addr.ip())
            .next()
    }
}

/// Application command handler.
pub type CommandCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// What the router did with a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Session linked (or re-targeted) to this peer.
    Linked(SocketAddr),
    /// Session unlinked from this peer.
    Unlinked(SocketAddr),
    /// Host did not resolve; the session is unchanged.
    Unresolved(String),
    /// CONNECT without a bound datagram listener.
    Rejected,
    /// DISCONNECT while not linked.
    Ignored,
    /// Handed to the application callback.
    Forwarded,
    /// Application line with no callback registered.
    Unhandled,
}

/// Classifies inbound lines and applies control commands to the session.
pub struct CommandRouter {
    resolver: Arc<dyn Resolve>,
    callback: RwLock<Option<CommandCallback>>,
    advertise_addr: Option<IpAddr>,
}

impl CommandRouter {
    pub fn new(resolver: Arc<dyn Resolve>, config: &LinkConfig) -> Self {
        Self {
            resolver,
            callback: RwLock::new(None),
            advertise_addr: config.advertise_addr,
        }
    }

    pub fn set_callback(&self, callback: CommandCallback) {
        *self.callback.write().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    /// Handle one inbound line.
    pub fn dispatch(
        &self,
        raw: &str,
        session: &RwLock<LinkSession>,
        transport: &Transport,
    ) -> Dispatch {
        match Command::parse(raw) {
            Command::Connect { host, port } => self.connect(&host, port, session, transport),
            Command::Disconnect { .. } => self.disconnect(session, transport),
            Command::Passthrough(line) => self.forward(&line),
        }
    }

    fn connect(
        &self,
        host: &str,
        port: u16,
        session: &RwLock<LinkSession>,
        transport: &Transport,
    ) -> Dispatch {
        let local_port = {
            let session = session.read().unwrap_or_else(|e| e.into_inner());
            if !session.is_transport_available() {
                warn!("CONNECT from {}:{} ignored: no datagram listener", host, port);
                return Dispatch::Rejected;
            }
            session.local_control_port()
        };

        let Some(ip) = self.resolver.resolve(host) else {
            warn!("CONNECT ignored: cannot resolve {:?}", host);
            return Dispatch::Unresolved(host.to_string());
        };
        let peer = SocketAddr::new(ip, port);

        {
            let mut session = session.write().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = session.peer().filter(|p| *p != peer) {
                info!("Re-targeting link from {} to {}", previous, peer);
            }
            session.link(peer);
        }

        let local_ip = self.local_ip(transport, peer);
        let ack = encode_control_line(ControlVerb::Connect, local_ip, local_port);
        transport.send(Route::Datagram(peer), ack.as_bytes());
        info!("Linked to {} (acknowledged as {}:{})", peer, local_ip, local_port);
        Dispatch::Linked(peer)
    }

    fn disconnect(&self, session: &RwLock<LinkSession>, transport: &Transport) -> Dispatch {
        let (peer, local_port) = {
            let session = session.read().unwrap_or_else(|e| e.into_inner());
            match session.peer() {
                Some(peer) => (peer, session.local_control_port()),
                None => {
                    info!("DISCONNECT ignored: not linked");
                    return Dispatch::Ignored;
                }
            }
        };

        let local_ip = self.local_ip(transport, peer);
        let bye = encode_control_line(ControlVerb::Disconnect, local_ip, local_port);
        transport.send(Route::Datagram(peer), bye.as_bytes());

        session.write().unwrap_or_else(|e| e.into_inner()).unlink();
        info!("Unlinked from {}", peer);
        Dispatch::Unlinked(peer)
    }

    fn forward(&self, line: &str) -> Dispatch {
        let callback = self
            .callback
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match callback {
            Some(callback) => {
                callback(line);
                Dispatch::Forwarded
            }
            None => {
                debug!("No command handler for {:?}", line);
                Dispatch::Unhandled
            }
        }
    }

    fn local_ip(&self, transport: &Transport, peer: SocketAddr) -> IpAddr {
        self.advertise_addr
            .unwrap_or_else(|| transport.local_ip_toward(peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io;
    use std::net::{Ipv4Addr, UdpSocket};
    use std::sync::Mutex;
    use std::time::Duration;

    struct FixedResolver(HashMap<&'static str, IpAddr>);

    impl Resolve for FixedResolver {
        fn resolve(&self, host: &str) -> Option<IpAddr> {
            host.parse().ok().or_else(|| self.0.get(host).copied())
        }
    }

    fn router() -> CommandRouter {
        let mut hosts = HashMap::new();
        hosts.insert("plotter", IpAddr::V4(Ipv4Addr::LOCALHOST));
        CommandRouter::new(Arc::new(FixedResolver(hosts)), &LinkConfig::default())
    }

    fn bound_transport() -> (Transport, RwLock<LinkSession>) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = socket.local_addr().unwrap().port();
        let transport = Transport::new(Box::new(io::sink()), 8);
        transport.attach(socket).unwrap();
        let mut session = LinkSession::new(port);
        session.transport_up(port);
        (transport, RwLock::new(session))
    }

    fn listener() -> (UdpSocket, u16) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = socket.local_addr().unwrap().port();
        (socket, port)
    }

    fn recv_line(socket: &UdpSocket) -> String {
        let mut buf = [0u8; 128];
        let (n, _) = socket.recv_from(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[test]
    fn test_system_resolver_literals() {
        assert_eq!(
            SystemResolver.resolve("10.1.2.3"),
            Some("10.1.2.3".parse().unwrap())
        );
        assert_eq!(SystemResolver.resolve("::1"), Some("::1".parse().unwrap()));
    }

    #[test]
    fn test_connect_then_disconnect() {
        let router = router();
        let (transport, session) = bound_transport();
        let local_port = session.read().unwrap().local_control_port();
        let (plotter, plotter_port) = listener();

        let outcome = router.dispatch(&format!("CONNECT:plotter:{plotter_port}\n"), &session, &transport);
        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), plotter_port);
        assert_eq!(outcome, Dispatch::Linked(peer));
        assert_eq!(session.read().unwrap().route(), Route::Datagram(peer));
        assert_eq!(recv_line(&plotter), format!("CONNECT:127.0.0.1:{local_port}\n"));

        let outcome = router.dispatch("DISCONNECT:plotter:1", &session, &transport);
        assert_eq!(outcome, Dispatch::Unlinked(peer));
        assert_eq!(recv_line(&plotter), format!("DISCONNECT:127.0.0.1:{local_port}\n"));
        assert!(!session.read().unwrap().is_linked());
    }

    #[test]
    fn test_unresolved_host_keeps_state() {
        let router = router();
        let (transport, session) = bound_transport();
        let (_plotter, plotter_port) = listener();
        router.dispatch(&format!("CONNECT:127.0.0.1:{plotter_port}"), &session, &transport);
        let before = session.read().unwrap().clone();

        let outcome = router.dispatch("CONNECT:nowhere:9000", &session, &transport);
        assert_eq!(outcome, Dispatch::Unresolved("nowhere".into()));
        assert_eq!(*session.read().unwrap(), before);
    }

    #[test]
    fn test_connect_without_listener_is_rejected() {
        let router = router();
        let transport = Transport::new(Box::new(io::sink()), 8);
        let session = RwLock::new(LinkSession::new(47268));
        assert_eq!(
            router.dispatch("CONNECT:plotter:9000", &session, &transport),
            Dispatch::Rejected
        );
        assert!(!session.read().unwrap().is_linked());
    }

    #[test]
    fn test_disconnect_while_unlinked_is_ignored() {
        let router = router();
        let (transport, session) = bound_transport();
        assert_eq!(
            router.dispatch("DISCONNECT:plotter:9000", &session, &transport),
            Dispatch::Ignored
        );
    }

    #[test]
    fn test_passthrough_reaches_callback_verbatim() {
        let router = router();
        let (transport, session) = bound_transport();
        assert_eq!(
            router.dispatch("LED:on", &session, &transport),
            Dispatch::Unhandled
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        router.set_callback(Arc::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string())
        }));

        for line in ["LED:on\n", "CONNECT:plotter:99999", "hello"] {
            assert_eq!(router.dispatch(line, &session, &transport), Dispatch::Forwarded);
        }
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["LED:on\n", "CONNECT:plotter:99999", "hello"]
        );
        assert!(!session.read().unwrap().is_linked());
    }

    #[test]
    fn test_advertised_address_is_announced() {
        let config = LinkConfig {
            advertise_addr: Some("10.0.0.42".parse().unwrap()),
            ..LinkConfig::default()
        };
        let router = CommandRouter::new(Arc::new(SystemResolver), &config);
        let (transport, session) = bound_transport();
        let local_port = session.read().unwrap().local_control_port();
        let (plotter, plotter_port) = listener();

        router.dispatch(&format!("CONNECT:127.0.0.1:{plotter_port}"), &session, &transport);
        assert_eq!(recv_line(&plotter), format!("CONNECT:10.0.0.42:{local_port}\n"));
    }
}
