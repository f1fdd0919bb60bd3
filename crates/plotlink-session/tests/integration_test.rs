//! Integration tests for the telemetry link.
//!
//! These tests run a real link on a loopback UDP port and talk to it the
//! way a plotter does.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use plotlink_core::{LinkConfig, ManualClock};
use plotlink_protocol::{decode_binary_frame, decode_text_frame, DecodedFrame};
use plotlink_session::{Format, TelemetryLink};

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

fn test_config(port: u16) -> LinkConfig {
    LinkConfig {
        control_port: port,
        bind_addr: "127.0.0.1".parse().unwrap(),
        rebind_interval_ms: 50,
        ..LinkConfig::default()
    }
}

/// Start a link on an ephemeral port and wait until it is bound.
async fn start_link(config: LinkConfig) -> (TelemetryLink, SharedBuf, JoinHandle<()>) {
    let serial = SharedBuf::default();
    let link = TelemetryLink::builder(config)
        .clock(Arc::new(ManualClock::new(1_000_000)))
        .serial(Box::new(serial.clone()))
        .build();

    let runner = link.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    wait_for(|| link.control_addr().is_some()).await;
    (link, serial, handle)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Condition not reached in time");
}

/// A plotter socket on loopback.
async fn plotter() -> (UdpSocket, u16) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    (socket, port)
}

async fn recv(socket: &UdpSocket) -> Vec<u8> {
    let mut buf = vec![0u8; 2048];
    let (n, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("Timeout waiting for datagram")
        .unwrap();
    buf.truncate(n);
    buf
}

/// Assert nothing else arrives for a short while.
async fn expect_silence(socket: &UdpSocket) {
    let mut buf = vec![0u8; 2048];
    let extra = timeout(Duration::from_millis(150), socket.recv_from(&mut buf)).await;
    assert!(extra.is_err(), "Unexpected datagram: {:?}", extra);
}

async fn send(socket: &UdpSocket, to: SocketAddr, text: &str) {
    socket.send_to(text.as_bytes(), to).await.unwrap();
}

#[tokio::test]
async fn test_link_round_trip() {
    let (link, serial, handle) = start_link(test_config(0)).await;
    let control = link.control_addr().unwrap();
    let (plotter, plotter_port) = plotter().await;

    send(&plotter, control, &format!("CONNECT:127.0.0.1:{plotter_port}\n")).await;
    let ack = recv(&plotter).await;
    assert_eq!(
        String::from_utf8(ack).unwrap(),
        format!("CONNECT:127.0.0.1:{}\n", control.port())
    );
    expect_silence(&plotter).await;
    assert!(link.is_linked());

    link.push_series("wave", 10, &[1.0f32, 2.0, 3.0, 4.0, 5.0], Some("V"))
        .unwrap();
    let frame = decode_text_frame(&recv(&plotter).await).unwrap();
    assert_eq!(frame.name(), "wave");
    assert_eq!(frame.values(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    assert_eq!(
        frame.timestamps(),
        vec![1_000_000, 1_000_010, 1_000_020, 1_000_030, 1_000_040]
    );

    link.push_log("hello", Some(1_000_123));
    assert_eq!(
        decode_text_frame(&recv(&plotter).await).unwrap(),
        DecodedFrame::Log {
            timestamp_ms: 1_000_123,
            message: "hello".into()
        }
    );

    send(&plotter, control, "DISCONNECT:127.0.0.1:1\n").await;
    let bye = recv(&plotter).await;
    assert_eq!(
        String::from_utf8(bye).unwrap(),
        format!("DISCONNECT:127.0.0.1:{}\n", control.port())
    );
    expect_silence(&plotter).await;
    wait_for(|| !link.is_linked()).await;

    link.push_log("back on serial", Some(1_000_200));
    assert!(link.flush(Duration::from_secs(2)));
    assert!(serial.contents().contains(">:1000200:back on serial\r\n"));

    link.stop();
    timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    assert!(!link.is_transport_available());
}

#[tokio::test]
async fn test_binary_series_over_udp() {
    let (link, _, handle) = start_link(test_config(0)).await;
    let control = link.control_addr().unwrap();
    let (plotter, plotter_port) = plotter().await;

    send(&plotter, control, &format!("CONNECT:127.0.0.1:{plotter_port}")).await;
    recv(&plotter).await;

    let values: Vec<i16> = (0..300).map(|i| i * 10 - 1_500).collect();
    let frames = link
        .push_series_as(Format::Binary, "raw", 2, &values, None)
        .unwrap();
    assert_eq!(frames, 2);

    let mut received = Vec::new();
    let mut timestamps = Vec::new();
    for _ in 0..frames {
        let frame = decode_binary_frame(&recv(&plotter).await, None).unwrap();
        timestamps.extend(frame.timestamps());
        received.extend(frame.values());
    }
    assert_eq!(received, values.iter().map(|&v| f64::from(v)).collect::<Vec<_>>());
    assert_eq!(
        timestamps,
        (0..300u64).map(|i| 1_000_000 + i * 2).collect::<Vec<_>>()
    );

    link.stop();
    timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_malformed_commands_pass_through() {
    let (link, _, handle) = start_link(test_config(0)).await;
    let control = link.control_addr().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    link.on_command(move |line| sink.lock().unwrap().push(line.to_string()));

    let (plotter, _) = plotter().await;
    for line in ["CONNECT:127.0.0.1:notaport", "CONNECT:127.0.0.1:0", "SET:gain:3\n"] {
        send(&plotter, control, line).await;
    }

    wait_for(|| seen.lock().unwrap().len() == 3).await;
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["CONNECT:127.0.0.1:notaport", "CONNECT:127.0.0.1:0", "SET:gain:3\n"]
    );
    assert!(!link.is_linked());

    link.stop();
    timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unlinked_frames_use_serial() {
    let (link, serial, handle) = start_link(test_config(0)).await;

    link.push_scalar_at("temp", 2_000_000, 21.5f64, Some("C")).unwrap();
    link.println("ready");
    assert!(link.flush(Duration::from_secs(2)));
    assert_eq!(serial.contents(), ">temp:2000000:21.50§C|g\r\nready\r\n");

    link.stop();
    timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_rebind_after_port_frees_up() {
    let blocker = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = blocker.local_addr().unwrap().port();

    let serial = SharedBuf::default();
    let link = TelemetryLink::builder(test_config(port))
        .serial(Box::new(serial))
        .build();
    let runner = link.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    sleep(Duration::from_millis(120)).await;
    assert!(!link.is_transport_available());

    drop(blocker);
    wait_for(|| link.is_transport_available()).await;
    assert_eq!(link.control_addr().unwrap().port(), port);

    link.stop();
    timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}
