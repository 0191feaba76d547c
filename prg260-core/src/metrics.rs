// SPDX-License-Identifier: MIT
//
// PRG260 Driver: Keystore and Entropy Engine for the PRG260 Device
// Copyright (c) 2025 PRG260 Driver Contributors

//! Metrics collection and reporting

use crate::protocol::Command;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

const LATENCY_WINDOW: usize = 10_000;

/// Driver metrics, cheap to clone and share
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    start_time: Instant,

    // Exchange metrics, keystore commands and entropy reads alike
    commands_total: AtomicU64,
    commands_failed: AtomicU64,
    device_rejections: AtomicU64,
    protocol_errors: AtomicU64,

    // Entropy metrics
    entropy_requests: AtomicU64,
    entropy_bytes: AtomicU64,

    // Exchange latency (microseconds)
    latencies: RwLock<Vec<u64>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                start_time: Instant::now(),
                commands_total: AtomicU64::new(0),
                commands_failed: AtomicU64::new(0),
                device_rejections: AtomicU64::new(0),
                protocol_errors: AtomicU64::new(0),
                entropy_requests: AtomicU64::new(0),
                entropy_bytes: AtomicU64::new(0),
                latencies: RwLock::new(Vec::with_capacity(LATENCY_WINDOW)),
            }),
        }
    }

    /// Record the outcome of one exchange with the device
    pub fn record_exchange(
        &self,
        command: Command,
        result: Result<usize, &crate::Error>,
        latency_micros: u64,
    ) {
        self.inner.commands_total.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(bytes) if command == Command::Entropy => {
                self.inner.entropy_requests.fetch_add(1, Ordering::Relaxed);
                self.inner.entropy_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
            }
            Ok(_) => {}
            Err(e) => {
                self.inner.commands_failed.fetch_add(1, Ordering::Relaxed);
                if e.is_device_rejection() {
                    self.inner.device_rejections.fetch_add(1, Ordering::Relaxed);
                }
                if e.is_protocol_error() {
                    self.inner.protocol_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        let mut latencies = self.inner.latencies.write();
        latencies.push(latency_micros);
        if latencies.len() > LATENCY_WINDOW {
            latencies.drain(0..LATENCY_WINDOW / 2);
        }
    }

    pub fn commands_total(&self) -> u64 {
        self.inner.commands_total.load(Ordering::Relaxed)
    }

    pub fn commands_failed(&self) -> u64 {
        self.inner.commands_failed.load(Ordering::Relaxed)
    }

    pub fn device_rejections(&self) -> u64 {
        self.inner.device_rejections.load(Ordering::Relaxed)
    }

    pub fn protocol_errors(&self) -> u64 {
        self.inner.protocol_errors.load(Ordering::Relaxed)
    }

    pub fn entropy_requests(&self) -> u64 {
        self.inner.entropy_requests.load(Ordering::Relaxed)
    }

    pub fn entropy_bytes(&self) -> u64 {
        self.inner.entropy_bytes.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }

    pub fn latency_percentile(&self, percentile: f64) -> Option<u64> {
        let latencies = self.inner.latencies.read();
        if latencies.is_empty() {
            return None;
        }

        let mut sorted = latencies.clone();
        sorted.sort_unstable();
        let index = ((sorted.len() as f64 * percentile).ceil() as usize).min(sorted.len() - 1);
        Some(sorted[index])
    }

    pub fn latency_p50(&self) -> Option<u64> {
        self.latency_percentile(0.50)
    }

    pub fn latency_p99(&self) -> Option<u64> {
        self.latency_percentile(0.99)
    }

    /// Generate Prometheus-compatible metrics output
    pub fn prometheus_format(&self) -> String {
        let mut output = String::new();

        let counters = [
            (
                "prg260_commands_total",
                "Total device exchanges",
                self.commands_total(),
            ),
            (
                "prg260_commands_failed",
                "Exchanges that returned an error",
                self.commands_failed(),
            ),
            (
                "prg260_device_rejections",
                "Commands refused by the device",
                self.device_rejections(),
            ),
            (
                "prg260_protocol_errors",
                "Replies with a bad opcode or checksum",
                self.protocol_errors(),
            ),
            (
                "prg260_entropy_requests",
                "Successful entropy reads",
                self.entropy_requests(),
            ),
            (
                "prg260_entropy_bytes",
                "Entropy bytes delivered",
                self.entropy_bytes(),
            ),
        ];
        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, value));
        }

        output.push_str("# HELP prg260_uptime_seconds Driver uptime in seconds\n");
        output.push_str("# TYPE prg260_uptime_seconds gauge\n");
        output.push_str(&format!("prg260_uptime_seconds {}\n", self.uptime_seconds()));

        if let Some(p50) = self.latency_p50() {
            output.push_str(
                "# HELP prg260_latency_p50_microseconds Exchange latency 50th percentile\n",
            );
            output.push_str("# TYPE prg260_latency_p50_microseconds gauge\n");
            output.push_str(&format!("prg260_latency_p50_microseconds {}\n", p50));
        }

        if let Some(p99) = self.latency_p99() {
            output.push_str(
                "# HELP prg260_latency_p99_microseconds Exchange latency 99th percentile\n",
            );
            output.push_str("# TYPE prg260_latency_p99_microseconds gauge\n");
            output.push_str(&format!("prg260_latency_p99_microseconds {}\n", p99));
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_metrics() {
        let metrics = Metrics::new();

        metrics.record_exchange(Command::Entropy, Ok(1024), 100);
        metrics.record_exchange(Command::State, Ok(0), 50);
        metrics.record_exchange(Command::Reset, Err(&Error::AccessDenied(Command::Reset)), 80);
        metrics.record_exchange(
            Command::GetKey,
            Err(&Error::IntegrityFailure {
                expected: 1,
                actual: 2,
            }),
            80,
        );

        assert_eq!(metrics.commands_total(), 4);
        assert_eq!(metrics.commands_failed(), 2);
        assert_eq!(metrics.device_rejections(), 1);
        assert_eq!(metrics.protocol_errors(), 1);
        assert_eq!(metrics.entropy_requests(), 1);
        assert_eq!(metrics.entropy_bytes(), 1024);
    }

    #[test]
    fn test_latency_percentiles() {
        let metrics = Metrics::new();

        for i in 1..=100 {
            metrics.record_exchange(Command::State, Ok(0), i);
        }

        let p50 = metrics.latency_p50().unwrap();
        assert!((45..=55).contains(&p50));

        let p99 = metrics.latency_p99().unwrap();
        assert!((95..=100).contains(&p99));
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.record_exchange(Command::Entropy, Ok(16), 10);

        let text = metrics.prometheus_format();
        assert!(text.contains("prg260_commands_total 1\n"));
        assert!(text.contains("prg260_entropy_bytes 16\n"));
        assert!(text.contains("# TYPE prg260_uptime_seconds gauge"));
    }
}
