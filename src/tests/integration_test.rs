//! End-to-end scenarios across clients, broker and both delivery pipelines.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::broker::listener::BrokerListener;
use crate::broker::Broker;
use crate::client::{ChannelListener, ClientConnection};
use crate::config::BrokerSettings;
use crate::Message;

#[derive(Default)]
struct Connections {
    count: std::sync::atomic::AtomicUsize,
}

impl BrokerListener for Connections {
    fn connected(&self, _id: &str) {
        self.count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[tokio::test]
async fn integration_pubsub_end_to_end() {
    let broker = Arc::new(Broker::with_settings(BrokerSettings {
        sync_workers: 4,
        async_shards: 2,
        ..BrokerSettings::default()
    }));
    let connections = Arc::new(Connections::default());
    broker.add_listener(connections.clone());

    let (listener_a, mut rx_a) = ChannelListener::new();
    let client_a = ClientConnection::new(broker.clone(), Arc::new(listener_a));
    let (listener_b, mut rx_b) = ChannelListener::new();
    let client_b = ClientConnection::new(broker.clone(), Arc::new(listener_b));

    let id_a = client_a.connect().unwrap();
    client_b.connect().unwrap();
    client_a.add_subject("test", Some(&["x"])).unwrap();
    client_b.add_subject("test", None).unwrap();
    client_a.start_receive(None).unwrap();
    client_b.start_receive(None).unwrap();
    assert_eq!(
        connections.count.load(std::sync::atomic::Ordering::SeqCst),
        2
    );

    // synchronous, worker pool
    assert_eq!(broker.send(Message::on("test", Some("x"), json!("hello world"))).unwrap(), 2);
    assert_eq!(rx_a.try_recv().unwrap().payload(), &json!("hello world"));
    assert_eq!(rx_b.try_recv().unwrap().payload(), &json!("hello world"));

    // asynchronous, only b matches key y
    assert_eq!(broker.send_async(Message::on("test", Some("y"), json!("async"))).unwrap(), 1);
    let message = tokio::time::timeout(Duration::from_secs(5), rx_b.recv())
        .await
        .expect("timed out")
        .expect("channel closed");
    assert_eq!(message.payload(), &json!("async"));

    // targeted message skips b
    let targeted = Message::on("test", Some("x"), json!("only a")).with_destination(&id_a);
    assert_eq!(broker.send(targeted).unwrap(), 1);
    assert_eq!(rx_a.try_recv().unwrap().payload(), &json!("only a"));
    assert!(rx_b.try_recv().is_err());

    // late joiner catches up from the cache, minus the message targeted at a
    let (listener_c, mut rx_c) = ChannelListener::new();
    let client_c = ClientConnection::new(broker.clone(), Arc::new(listener_c));
    client_c.connect().unwrap();
    client_c.add_subject("test", None).unwrap();
    assert_eq!(client_c.start_receive(Some(0)).unwrap(), 2);
    let replayed: Vec<_> = std::iter::from_fn(|| rx_c.try_recv().ok())
        .map(|m| m.payload().clone())
        .collect();
    assert_eq!(replayed, vec![json!("hello world"), json!("async")]);

    broker.close();
    assert!(client_a.is_server_closed());
    assert!(client_b.is_server_closed());
    assert!(client_c.is_server_closed());
    assert!(broker.connected_ids().is_empty());
}
