//! Control commands.
//!
//! A plotter opens a session by sending `CONNECT:<host>:<port>` to the
//! device's control port and closes it with `DISCONNECT:<host>:<port>`. The
//! device answers both with the same verb carrying its own address. Any
//! other line is an application command and is handed to the user callback
//! untouched.

use std::fmt;
use std::net::IpAddr;

/// Session control verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlVerb {
    Connect,
    Disconnect,
}

impl ControlVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlVerb::Connect => "CONNECT",
            ControlVerb::Disconnect => "DISCONNECT",
        }
    }

    fn from_str(verb: &str) -> Option<Self> {
        match verb {
            "CONNECT" => Some(ControlVerb::Connect),
            "DISCONNECT" => Some(ControlVerb::Disconnect),
            _ => None,
        }
    }
}

impl fmt::Display for ControlVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound line, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect { host: String, port: u16 },
    Disconnect { host: String, port: u16 },
    /// Unknown verb or malformed control line, carried verbatim.
    Passthrough(String),
}

impl Command {
    /// Classify a line.
    ///
    /// The line is trimmed, then split at the first colon (end of the verb)
    /// and at the last colon (start of the port); what lies between is the
    /// host, so IPv6 literals survive. A control verb with a missing host or
    /// a port outside `1..=65535` makes the whole line a pass-through.
    pub fn parse(raw: &str) -> Command {
        let line = raw.trim();
        let passthrough = || Command::Passthrough(raw.to_string());

        let Some(first) = line.find(':') else {
            return passthrough();
        };
        let Some(verb) = ControlVerb::from_str(&line[..first]) else {
            return passthrough();
        };
        let last = line.rfind(':').unwrap_or(first);
        if last == first {
            return passthrough();
        }

        let host = &line[first + 1..last];
        let port = match line[last + 1..].parse::<u16>() {
            Ok(port) if port != 0 => port,
            _ => return passthrough(),
        };
        if host.is_empty() {
            return passthrough();
        }

        let host = host.to_string();
        match verb {
            ControlVerb::Connect => Command::Connect { host, port },
            ControlVerb::Disconnect => Command::Disconnect { host, port },
        }
    }

    pub fn verb(&self) -> Option<ControlVerb> {
        match self {
            Command::Connect { .. } => Some(ControlVerb::Connect),
            Command::Disconnect { .. } => Some(ControlVerb::Disconnect),
            Command::Passthrough(_) => None,
        }
    }
}

/// `VERB:<ip>:<port>\n`
pub fn encode_control_line(verb: ControlVerb, addr: IpAddr, port: u16) -> String {
    format!("{}:{}:{}\n", verb, addr, port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_parse_connect() {
        assert_eq!(
            Command::parse("CONNECT:192.168.1.20:47269\n"),
            Command::Connect {
                host: "192.168.1.20".into(),
                port: 47269
            }
        );
        assert_eq!(
            Command::parse("  DISCONNECT:plotter.local:9000  "),
            Command::Disconnect {
                host: "plotter.local".into(),
                port: 9000
            }
        );
    }

    #[test]
    fn test_parse_ipv6_host() {
        assert_eq!(
            Command::parse("CONNECT:fe80::1:5000"),
            Command::Connect {
                host: "fe80::1".into(),
                port: 5000
            }
        );
    }

    #[test]
    fn test_malformed_lines_pass_through() {
        for line in [
            "CONNECT",
            "CONNECT:",
            "CONNECT:host",
            "CONNECT::47268",
            "CONNECT:host:0",
            "CONNECT:host:65536",
            "CONNECT:host:12ab",
            "CONNECT:host:-1",
            ":host:1",
            "connect:host:1",
        ] {
            assert_eq!(
                Command::parse(line),
                Command::Passthrough(line.to_string()),
                "{line:?}"
            );
        }
    }

    #[test]
    fn test_unknown_verbs_pass_through_verbatim() {
        let raw = "LED:on:1\r\n";
        assert_eq!(Command::parse(raw), Command::Passthrough(raw.to_string()));
        assert_eq!(Command::parse(raw).verb(), None);
    }

    #[test]
    fn test_encode_control_line() {
        let line = encode_control_line(ControlVerb::Connect, IpAddr::V4(Ipv4Addr::LOCALHOST), 47268);
        assert_eq!(line, "CONNECT:127.0.0.1:47268\n");
        assert_eq!(
            Command::parse(&line),
            Command::Connect {
                host: "127.0.0.1".into(),
                port: 47268
            }
        );
    }
}
