//! Background pump behaviour with the in-memory broker

use mqtt_telemetry::protocol::{Packet, Publish};
use mqtt_telemetry::testing::MockTransport;
use mqtt_telemetry::{
    Client, ConnectOptions, ConnectionState, DisconnectReason, Pump, QoS, ReceivedMessage,
    SessionSettings,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

async fn wait_for(condition: impl Fn() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_stop_is_observed_without_waiting_for_a_tick() {
    let client: Client<MockTransport> = Client::new(SessionSettings::default());
    let pump = Pump::spawn(client, Duration::from_secs(3600));

    timeout(Duration::from_secs(1), pump.stop())
        .await
        .expect("pump did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_pump_delivers_inbound_messages() {
    let (transport, broker) = MockTransport::pair();
    let client = Client::new(SessionSettings::default());
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    client
        .set_message_handler(move |_: &ReceivedMessage| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    client
        .connect(transport, ConnectOptions::new("pump-delivery"))
        .unwrap();

    let pump = Pump::spawn(client.clone(), Duration::from_millis(5));
    client.wait_connected().await.unwrap();
    client.subscribe("rpc/+", QoS::AtMostOnce).unwrap();
    wait_for(|| {
        broker
            .received()
            .iter()
            .any(|p| matches!(p, Packet::Subscribe(_)))
    })
    .await;

    for i in 0..3 {
        broker.send(&Packet::Publish(Publish::new(format!("rpc/{i}"), "call")));
    }
    broker.send(&Packet::Publish(Publish::new("other/topic", "ignored")));

    wait_for(|| delivered.load(Ordering::SeqCst) == 3).await;
    pump.shutdown().await.unwrap();
    assert_eq!(delivered.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_pump_keeps_running_across_reconnects() {
    let (transport, broker) = MockTransport::pair();
    let client = Client::new(SessionSettings::default());
    client
        .connect(transport, ConnectOptions::new("pump-reconnect"))
        .unwrap();
    let pump = Pump::spawn(client.clone(), Duration::from_millis(5));
    client.wait_connected().await.unwrap();

    broker.close();
    wait_for(|| client.state().unwrap().is_disconnected()).await;
    assert!(matches!(
        client.state().unwrap(),
        ConnectionState::Disconnected(Some(DisconnectReason::TransportFailure(_)))
    ));
    assert!(!pump.is_finished());

    let (transport, broker) = MockTransport::pair();
    client
        .connect(transport, ConnectOptions::new("pump-reconnect"))
        .unwrap();
    client.wait_connected().await.unwrap();
    client.publish("a/b", "again", QoS::AtMostOnce).unwrap();
    wait_for(|| broker.published().len() == 1).await;

    pump.shutdown().await.unwrap();
    assert!(broker.is_closed());
}
