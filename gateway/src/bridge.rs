//! Loopback event bridge: local processes push events to the hub over a
//! plain TCP socket.
//!
//! The listener binds `127.0.0.1` only and runs on a dedicated blocking
//! OS thread. Each connection carries a single JSON event object; the
//! sender may close immediately after writing. Crossing back into the
//! async domain happens exclusively through the [`HubHandle`] command
//! channel.

use std::io::Read;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::events::Event;
use crate::hub::HubHandle;

/// Largest accepted payload per connection.
const MAX_PAYLOAD: usize = 1024;

/// How long to wait for the sender to finish writing.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Binds the loopback listener and spawns the bridge thread.
///
/// Returns the bound address (useful when the port is 0 in tests) and
/// the thread handle. A bind failure is returned to the caller, where it
/// is fatal at startup.
pub fn spawn(port: u16, hub: HubHandle) -> std::io::Result<(SocketAddr, thread::JoinHandle<()>)> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))?;
    let addr = listener.local_addr()?;
    info!(%addr, "event bridge listening");

    let handle = thread::Builder::new()
        .name("event-bridge".to_string())
        .spawn(move || accept_loop(listener, hub))?;

    Ok((addr, handle))
}

fn accept_loop(listener: TcpListener, hub: HubHandle) {
    for conn in listener.incoming() {
        match conn {
            Ok(stream) => handle_connection(stream, &hub),
            Err(err) => warn!(error = %err, "event bridge accept failed"),
        }
    }
}

/// Reads one event payload, forwards it to the hub, drops the stream.
///
/// Anything that is not a well-formed play-audio event is logged and
/// discarded; the bridge never answers and never stops accepting.
fn handle_connection(stream: TcpStream, hub: &HubHandle) {
    if let Err(err) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
        warn!(error = %err, "failed to set bridge read timeout");
        return;
    }

    let buf = read_payload(&stream);
    drop(stream);

    match serde_json::from_slice::<Event>(&buf) {
        Ok(event @ Event::PlayAudio { .. }) => {
            debug!(?event, "bridge event accepted");
            hub.broadcast(event);
        }
        Ok(other) => {
            debug!(?other, "bridge event type not broadcastable, dropped");
        }
        Err(err) => {
            warn!(error = %err, len = buf.len(), "malformed bridge payload dropped");
        }
    }
}

/// Reads until a complete JSON value is buffered, so a sender that
/// holds its socket open after writing does not stall the accept loop
/// for the whole read timeout. Stops on close, timeout, or the payload
/// cap; the caller does the final parse.
fn read_payload(stream: &TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 256];

    while buf.len() < MAX_PAYLOAD {
        let room = (MAX_PAYLOAD - buf.len()).min(chunk.len());
        match (&*stream).read(&mut chunk[..room]) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                match serde_json::from_slice::<Event>(&buf) {
                    // Truncated value: the sender is still writing.
                    Err(err) if err.is_eof() => {}
                    _ => break,
                }
            }
            Err(err) => {
                let timed_out = matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                );
                if !timed_out {
                    debug!(error = %err, "event bridge read failed");
                }
                break;
            }
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub;
    use std::io::Write;
    use tokio::sync::mpsc;

    async fn recv_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("channel closed")
    }

    fn send_payload(addr: SocketAddr, payload: &[u8]) {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(payload).unwrap();
    }

    #[tokio::test]
    async fn payload_reaches_registered_client() {
        let (hub, _task) = hub::spawn();
        let (addr, _bridge) = spawn(0, hub.clone()).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(tx);

        send_payload(addr, br#"{"type":"play_audio","sound":"count","count":7}"#);
        assert_eq!(
            recv_frame(&mut rx).await,
            r#"{"type":"play_audio","sound":"count","count":7}"#
        );
    }

    #[tokio::test]
    async fn missing_sound_defaults_to_count() {
        let (hub, _task) = hub::spawn();
        let (addr, _bridge) = spawn(0, hub.clone()).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(tx);

        send_payload(addr, br#"{"type":"play_audio"}"#);
        assert_eq!(
            recv_frame(&mut rx).await,
            r#"{"type":"play_audio","sound":"count"}"#
        );
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped_and_listener_survives() {
        let (hub, _task) = hub::spawn();
        let (addr, _bridge) = spawn(0, hub.clone()).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(tx);

        send_payload(addr, b"this is not json");
        send_payload(addr, br#"{"type":"connected","message":"ok"}"#);
        send_payload(addr, br#"{"type":"play_audio","sound":"succeed"}"#);

        // Only the valid play-audio event comes through.
        assert_eq!(
            recv_frame(&mut rx).await,
            r#"{"type":"play_audio","sound":"succeed"}"#
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn open_socket_after_payload_does_not_delay_delivery() {
        let (hub, _task) = hub::spawn();
        let (addr, _bridge) = spawn(0, hub.clone()).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(tx);

        // The sender writes a complete event but keeps the connection
        // open; the frame must arrive well before the read timeout.
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .write_all(br#"{"type":"play_audio","sound":"count","count":1}"#)
            .unwrap();

        assert_eq!(
            recv_frame(&mut rx).await,
            r#"{"type":"play_audio","sound":"count","count":1}"#
        );
        drop(stream);
    }

    #[tokio::test]
    async fn sender_closing_without_shutdown_still_delivers() {
        let (hub, _task) = hub::spawn();
        let (addr, _bridge) = spawn(0, hub.clone()).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(tx);

        {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream
                .write_all(br#"{"type":"play_audio","sound":"milestone","count":10}"#)
                .unwrap();
            // Dropped here, closing the socket abruptly.
        }

        assert_eq!(
            recv_frame(&mut rx).await,
            r#"{"type":"play_audio","sound":"milestone","count":10}"#
        );
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let holder = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = holder.local_addr().unwrap().port();

        let (hub, _task) = hub::spawn();
        assert!(spawn(port, hub).is_err());
    }
}
