//! # plotlink-session
//!
//! Session-oriented telemetry link.
//!
//! A [`TelemetryLink`] listens for `CONNECT`/`DISCONNECT` datagrams on its
//! control port. While a plotter is linked every frame goes to it over UDP;
//! otherwise frames fall back to the serial sink (stdout by default). The
//! [`StreamForwarder`] drains a sample ring into the link in batches.

pub mod forwarder;
pub mod link;
pub mod router;
pub mod session;
pub mod transport;

pub use forwarder::StreamForwarder;
pub use link::{LinkError, TelemetryLink, TelemetryLinkBuilder};
pub use router::{CommandRouter, Dispatch, Resolve, SystemResolver};
pub use session::{LinkSession, Route};
pub use transport::{SerialSink, Transport};

pub use plotlink_core::{Format, LinkConfig};
