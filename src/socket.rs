//! Module for receiving location provider events over a UDP socket.
//!
//! The remote provider pushes one JSON-encoded [`ProviderEvent`] per
//! datagram. Events are forwarded to the authority thread in arrival order,
//! nothing is reordered or coalesced here.
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::sleep;
use std::{io, time};

use serde::{Deserialize, Serialize};

use crate::location::ProviderEvent;

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Struct modeling the parameters required for the event socket.
pub struct SocketParameters {
    /// The ip address the socket should listen on.
    pub address: String,
    /// The port the socket should listen on.
    pub port: u32,
}

/// Thread function for the provider event socket.
///
/// Binds a nonblocking UDP socket and forwards every decodable datagram to
/// the location thread. Runs until the finish flag is set or the socket
/// cannot be created.
///
/// # Arguments
///
/// * `tx` - The channel provider events are forwarded on.
///
/// * `thread_finished` - Indicates that the thread should finish operation
///   and should return.
///
/// * `params` - Parameters for the socket.
pub fn socket_thread(
    tx: Sender<ProviderEvent>,
    thread_finished: Arc<AtomicBool>,
    params: SocketParameters,
) {
    let socket: UdpSocket = match UdpSocket::bind(format!("{}:{}", params.address, params.port)) {
        Ok(socket) => socket,
        Err(err) => {
            log::error!(target: "lightlogd::udp", "Could not open udp socket: \'{}\'", err);
            thread_finished.store(true, Ordering::SeqCst);
            return;
        }
    };
    match socket.set_nonblocking(true) {
        Ok(_) => log::debug!(target: "lightlogd::udp", "Set socket to nonblocking mode!"),
        Err(err) => {
            log::error!(target: "lightlogd::udp", "Could not set socket to nonblocking mode: \'{}\'", err);
            thread_finished.store(true, Ordering::SeqCst);
            return;
        }
    }

    match socket.local_addr() {
        Ok(res) => {
            log::info!(target: "lightlogd::udp", "Listening for provider events on: \'{}\'", res);
        }
        Err(err) => {
            log::error!(target: "lightlogd::udp", "Could not get socket address: \'{}\'", err);
            thread_finished.store(true, Ordering::SeqCst);
            return;
        }
    }

    let timeout = time::Duration::from_millis(100);

    while !thread_finished.load(Ordering::SeqCst) {
        // One provider event per datagram. Oversized datagrams are cut off
        // and will fail to decode.
        let mut buf: [u8; 1024] = [0; 1024];

        let (buf_size, addr) = match socket.recv_from(&mut buf) {
            Ok(res) => res,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                sleep(timeout);
                continue;
            }
            Err(msg) => {
                log::error!(target: "lightlogd::udp", "Socket cannot recv data: \'{}\'", msg);
                continue;
            }
        };

        log::debug!(target: "lightlogd::udp", "Received data with length: \'{}\' from \'{}\'!", &buf_size, &addr);

        let recv_data_str = match std::str::from_utf8(&buf[..buf_size]) {
            Ok(str) => str.trim_end(),
            Err(err) => {
                log::error!(target: "lightlogd::udp", "Received data cannot be converted to UTF-8 str: \'{}\'", err);
                continue;
            }
        };

        let event = match serde_json::from_str::<ProviderEvent>(recv_data_str) {
            Ok(result) => result,
            Err(err) => {
                log::error!(target: "lightlogd::udp", "Received data cannot be deserialized via JSON: \'{}\'", err);
                continue;
            }
        };

        match tx.send(event) {
            Ok(_) => log::debug!(target: "lightlogd::udp", "Send event to location thread!"),
            Err(err) => {
                log::error!(target: "lightlogd::udp", "Could not send event to location thread: \'{}\'", err);
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use crate::location::{AccuracyAuthorization, AuthorizationState, ProviderEvent};
    use chrono::{TimeZone, Utc};

    #[test]
    fn decodes_authorization_changed_datagram() {
        let payload =
            r#"{"event":"authorization_changed","state":"authorized_when_in_use","accuracy":"full"}"#;
        let event = serde_json::from_str::<ProviderEvent>(payload).unwrap();
        assert_eq!(
            event,
            ProviderEvent::AuthorizationChanged {
                state: AuthorizationState::AuthorizedWhenInUse,
                accuracy: AccuracyAuthorization::Full,
            }
        );
    }

    #[test]
    fn decodes_location_updated_datagram() {
        let payload = r#"{"event":"location_updated","sample":{"latitude":25.033,"longitude":121.565,"horizontal_accuracy":5.0,"fix_timestamp":"2024-01-01T00:00:00Z"}}"#;
        let event = serde_json::from_str::<ProviderEvent>(payload).unwrap();
        match event {
            ProviderEvent::LocationUpdated { sample } => {
                assert_eq!(sample.latitude, 25.033);
                assert_eq!(sample.longitude, 121.565);
                assert_eq!(sample.fix_timestamp, Utc.ymd(2024, 1, 1).and_hms(0, 0, 0));
            }
            other => panic!("expected LocationUpdated, got {:?}", other),
        }
    }

    #[test]
    fn decodes_provider_error_datagram() {
        let payload = r#"{"event":"provider_error","message":"gps signal lost"}"#;
        let event = serde_json::from_str::<ProviderEvent>(payload).unwrap();
        assert_eq!(
            event,
            ProviderEvent::ProviderError {
                message: String::from("gps signal lost")
            }
        );
    }

    #[test]
    fn rejects_unknown_event_tag() {
        let payload = r#"{"event":"heading_updated","heading":12.0}"#;
        assert!(serde_json::from_str::<ProviderEvent>(payload).is_err());
    }
}
