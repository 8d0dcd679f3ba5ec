//! End-to-end test over a real loopback socket
//!
//! A minimal broker thread speaks just enough MQTT to accept one client,
//! acknowledge its subscription and QoS 1 publish, and push one message back.

use bytes::BytesMut;
use mqtt_telemetry::protocol::{
    decode, encode, ConnAck, Decoded, Packet, Publish, QoS, SubAck, SubscribeReturnCode,
};
use mqtt_telemetry::{
    Client, ConnectOptions, ConnectionState, DisconnectReason, Pump, ReceivedMessage,
    SessionEvent, SessionSettings, TcpTransport,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Read frames until `stop` returns true for one of them; returns all of them
fn read_until(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    stop: impl Fn(&Packet) -> bool,
) -> Vec<Packet> {
    let mut packets = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        while let Decoded::Complete { packet, consumed } = decode(&buffer[..]).unwrap() {
            let _ = buffer.split_to(consumed);
            let done = stop(&packet);
            packets.push(packet);
            if done {
                return packets;
            }
        }
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "client closed before the expected packet");
        buffer.extend_from_slice(&chunk[..n]);
    }
}

fn spawn_broker() -> (u16, thread::JoinHandle<Vec<Packet>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        let mut buffer = BytesMut::new();
        let mut seen = Vec::new();

        seen.extend(read_until(&mut stream, &mut buffer, |p| matches!(p, Packet::Connect(_))));
        let connack = Packet::ConnAck(ConnAck {
            session_present: false,
            code: 0,
        });
        stream.write_all(&encode(&connack).unwrap()).unwrap();

        let packets = read_until(&mut stream, &mut buffer, |p| matches!(p, Packet::Subscribe(_)));
        if let Some(Packet::Subscribe(subscribe)) = packets.last() {
            let ack = SubAck {
                packet_id: subscribe.packet_id,
                return_codes: vec![SubscribeReturnCode::Granted(QoS::AtMostOnce)],
            };
            stream.write_all(&encode(&Packet::SubAck(ack)).unwrap()).unwrap();
        }
        seen.extend(packets);

        let packets = read_until(&mut stream, &mut buffer, |p| matches!(p, Packet::Publish(_)));
        if let Some(Packet::Publish(Publish {
            packet_id: Some(id),
            ..
        })) = packets.last()
        {
            stream.write_all(&encode(&Packet::PubAck(*id)).unwrap()).unwrap();
        }
        seen.extend(packets);

        let inbound = Publish::new("v1/devices/me/rpc/request/7", r#"{"method":"reboot"}"#);
        stream.write_all(&encode(&Packet::Publish(inbound)).unwrap()).unwrap();

        seen.extend(read_until(&mut stream, &mut buffer, |p| matches!(p, Packet::Disconnect)));
        seen
    });

    (port, handle)
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_full_session_over_tcp() {
    let (port, broker) = spawn_broker();

    let client: Client<TcpTransport> = Client::new(SessionSettings::default());
    let messages = Arc::new(Mutex::new(Vec::<ReceivedMessage>::new()));
    let sink = Arc::clone(&messages);
    client
        .set_message_handler(move |message: &ReceivedMessage| {
            sink.lock().unwrap().push(message.clone());
        })
        .unwrap();
    let events = Arc::new(Mutex::new(Vec::<SessionEvent>::new()));
    let event_sink = Arc::clone(&events);
    client
        .set_event_handler(move |event: &SessionEvent| {
            event_sink.lock().unwrap().push(event.clone());
        })
        .unwrap();

    client
        .connect_tcp("127.0.0.1", port, ConnectOptions::new("tcp-test"))
        .unwrap();
    let pump = Pump::spawn(client.clone(), Duration::from_millis(5));
    client.wait_connected().await.unwrap();

    client
        .subscribe("v1/devices/me/rpc/request/+", QoS::AtMostOnce)
        .unwrap();
    let packet_id = client
        .publish(
            "v1/gateway/telemetry",
            r#"{"device1":[{"test1":123}]}"#,
            QoS::AtLeastOnce,
        )
        .unwrap()
        .unwrap();

    eventually("the inbound message", || !messages.lock().unwrap().is_empty()).await;
    eventually("the PUBACK", || {
        events
            .lock()
            .unwrap()
            .contains(&SessionEvent::Published { packet_id })
    })
    .await;

    pump.shutdown().await.unwrap();
    assert_eq!(
        client.state().unwrap(),
        ConnectionState::Disconnected(Some(DisconnectReason::Requested))
    );

    let received = messages.lock().unwrap().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].topic_lossy(), "v1/devices/me/rpc/request/7");
    assert_eq!(received[0].payload_lossy(), r#"{"method":"reboot"}"#);

    let seen = broker.join().unwrap();
    assert!(matches!(seen.first(), Some(Packet::Connect(c)) if c.client_id == "tcp-test"));
    assert!(matches!(seen.last(), Some(Packet::Disconnect)));
    let published: Vec<&Publish> = seen
        .iter()
        .filter_map(|p| match p {
            Packet::Publish(publish) => Some(publish),
            _ => None,
        })
        .collect();
    assert_eq!(published.len(), 1);
    assert_eq!(&published[0].topic[..], b"v1/gateway/telemetry");
}

#[test]
fn test_connect_to_closed_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client: Client<TcpTransport> = Client::new(SessionSettings::default());
    let result = client.connect_tcp("127.0.0.1", port, ConnectOptions::new("nobody"));
    assert!(result.is_err());
    assert!(client.state().unwrap().is_disconnected());
}
