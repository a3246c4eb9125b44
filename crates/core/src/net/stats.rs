use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub delivery_failures: u64,
    pub encoding_failures: u64,
}

/// Counters shared by every viewer task.
#[derive(Debug, Default)]
pub struct DeliveryCounters {
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    delivery_failures: AtomicU64,
    encoding_failures: AtomicU64,
}

impl DeliveryCounters {
    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_encoding_failure(&self) {
        self.encoding_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> NetworkStats {
        NetworkStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            encoding_failures: self.encoding_failures.load(Ordering::Relaxed),
        }
    }
}
