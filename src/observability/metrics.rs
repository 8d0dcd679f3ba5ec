//! Thread-safe per-session metrics
//!
//! Atomic counters for wire traffic, delivery outcomes and connection
//! lifecycle, plus a bounded window of PUBACK round-trip times. Each session
//! owns its own collector so several clients in one process never share
//! counters.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_LATENCY_SAMPLES: usize = 1000;

/// Thread-safe metrics collector using atomics and a mutex for latencies
#[derive(Debug)]
pub struct SessionMetrics {
    // Wire traffic
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,

    // Delivery
    messages_published: AtomicU64,
    messages_acknowledged: AtomicU64,
    messages_received: AtomicU64,
    retransmissions: AtomicU64,
    delivery_failures: AtomicU64,
    ack_latencies: Mutex<Vec<u64>>, // in milliseconds

    // Connection lifecycle
    connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connections_rejected: AtomicU64,
    connections_lost: AtomicU64,
    pings_sent: AtomicU64,
    last_pong: AtomicU64,
    connection_start_time: AtomicU64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            messages_acknowledged: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            retransmissions: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            ack_latencies: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            pings_sent: AtomicU64::new(0),
            last_pong: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
        }
    }

    // Wire traffic
    pub fn packet_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_sent.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_received.fetch_add(count as u64, Ordering::Relaxed);
    }

    // Delivery
    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_acknowledged(&self, latency: Duration) {
        self.messages_acknowledged.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut latencies) = self.ack_latencies.lock() {
            latencies.push(latency.as_millis() as u64);
            if latencies.len() > MAX_LATENCY_SAMPLES {
                latencies.remove(0);
            }
        }
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retransmission(&self) {
        self.retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_failed(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Connection lifecycle
    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    /// Connection ended for any reason other than a CONNACK rejection
    pub fn connection_lost(&self) {
        if self.connected.swap(false, Ordering::Relaxed) {
            self.connections_lost.fetch_add(1, Ordering::Relaxed);
        }
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn ping_sent(&self) {
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pong_received(&self) {
        self.last_pong.store(current_timestamp(), Ordering::Relaxed);
    }

    fn latency_statistics(&self) -> (f64, f64, f64) {
        match self.ack_latencies.lock() {
            Ok(latencies) if !latencies.is_empty() => {
                let mut sorted = latencies.clone();
                sorted.sort_unstable();
                let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
                (avg, percentile(&sorted, 50.0), percentile(&sorted, 95.0))
            }
            _ => (0.0, 0.0, 0.0),
        }
    }

    fn connection_duration(&self, now: u64) -> u64 {
        let start = self.connection_start_time.load(Ordering::Relaxed);
        if start > 0 && self.connected.load(Ordering::Relaxed) {
            now.saturating_sub(start)
        } else {
            0
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg, p50, p95) = self.latency_statistics();

        MetricsSnapshot {
            timestamp: now,
            traffic: TrafficMetrics {
                packets_sent: self.packets_sent.load(Ordering::Relaxed),
                packets_received: self.packets_received.load(Ordering::Relaxed),
                bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
                bytes_received: self.bytes_received.load(Ordering::Relaxed),
            },
            delivery: DeliveryMetrics {
                messages_published: self.messages_published.load(Ordering::Relaxed),
                messages_acknowledged: self.messages_acknowledged.load(Ordering::Relaxed),
                messages_received: self.messages_received.load(Ordering::Relaxed),
                retransmissions: self.retransmissions.load(Ordering::Relaxed),
                delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
                avg_ack_latency_ms: avg,
                p50_ack_latency_ms: p50,
                p95_ack_latency_ms: p95,
            },
            connection: ConnectionMetrics {
                connected: self.connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                pings_sent: self.pings_sent.load(Ordering::Relaxed),
                last_pong: self.last_pong.load(Ordering::Relaxed),
                connection_duration_secs: self.connection_duration(now),
            },
        }
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub traffic: TrafficMetrics,
    pub delivery: DeliveryMetrics,
    pub connection: ConnectionMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrafficMetrics {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryMetrics {
    pub messages_published: u64,
    pub messages_acknowledged: u64,
    pub messages_received: u64,
    pub retransmissions: u64,
    pub delivery_failures: u64,
    pub avg_ack_latency_ms: f64,
    pub p50_ack_latency_ms: f64,
    pub p95_ack_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connections_rejected: u64,
    pub connections_lost: u64,
    pub pings_sent: u64,
    pub last_pong: u64,
    pub connection_duration_secs: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper {
        sorted_data[lower] as f64
    } else {
        let weight = index - lower as f64;
        sorted_data[lower] as f64 * (1.0 - weight) + sorted_data[upper] as f64 * weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_traffic_counters() {
        let metrics = SessionMetrics::new();
        metrics.packet_sent();
        metrics.packet_sent();
        metrics.packet_received();
        metrics.bytes_written(14);
        metrics.bytes_read(4);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.traffic.packets_sent, 2);
        assert_eq!(snapshot.traffic.packets_received, 1);
        assert_eq!(snapshot.traffic.bytes_sent, 14);
        assert_eq!(snapshot.traffic.bytes_received, 4);
    }

    #[test]
    fn test_connection_lifecycle() {
        let metrics = SessionMetrics::new();
        metrics.connection_attempt();
        metrics.connection_established();
        assert!(metrics.snapshot().connection.connected);

        metrics.connection_lost();
        metrics.connection_lost();
        let snapshot = metrics.snapshot();
        assert!(!snapshot.connection.connected);
        assert_eq!(snapshot.connection.connections_lost, 1);
        assert_eq!(snapshot.connection.connection_duration_secs, 0);

        metrics.connection_attempt();
        metrics.connection_rejected();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connection.connection_attempts, 2);
        assert_eq!(snapshot.connection.connections_rejected, 1);
    }

    #[test]
    fn test_delivery_latency_statistics() {
        let metrics = SessionMetrics::new();
        for ms in [10, 20, 30, 40, 50] {
            metrics.message_acknowledged(Duration::from_millis(ms));
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.delivery.messages_acknowledged, 5);
        assert_eq!(snapshot.delivery.avg_ack_latency_ms, 30.0);
        assert_eq!(snapshot.delivery.p50_ack_latency_ms, 30.0);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let metrics = SessionMetrics::new();
        for _ in 0..(MAX_LATENCY_SAMPLES + 10) {
            metrics.message_acknowledged(Duration::from_millis(1));
        }
        assert_eq!(
            metrics.ack_latencies.lock().unwrap().len(),
            MAX_LATENCY_SAMPLES
        );
    }

    #[test]
    fn test_thread_safety() {
        let metrics = Arc::new(SessionMetrics::new());
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.message_published();
                        metrics.retransmission();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.delivery.messages_published, 1000);
        assert_eq!(snapshot.delivery.retransmissions, 1000);
    }

    #[test]
    fn test_percentile_calculation() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        assert_eq!(percentile(&data, 0.0), 1.0);
        assert_eq!(percentile(&data, 100.0), 10.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = SessionMetrics::new();
        metrics.delivery_failed();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["delivery"]["delivery_failures"], 1);
    }
}
