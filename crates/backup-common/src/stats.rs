//! Process-lifetime counters, updated without locks.
//!
//! Every counter is an independent atomic; a snapshot may interleave
//! slightly stale values across counters. That is an accepted tradeoff
//! (see the concurrency model) in exchange for never blocking a dispatcher
//! on the stats sink.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::{RequestCode, ResponseCode};

const REQUEST_OPCODES: usize = 7;
const RESPONSE_OPCODES: usize = 8;

fn request_slot(code: u16) -> Option<usize> {
    RequestCode::from_u16(code).map(|c| (c as u16 - RequestCode::Register as u16) as usize)
}

fn response_slot(code: ResponseCode) -> usize {
    (code as u16 - ResponseCode::RegisterSuccess as u16) as usize
}

#[derive(Debug)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub requests_total: AtomicU64,
    pub responses_total: AtomicU64,
    requests_by_opcode: [AtomicU64; REQUEST_OPCODES],
    responses_by_opcode: [AtomicU64; RESPONSE_OPCODES],
    pub files_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub errors_total: AtomicU64,
    pub clients_registered: AtomicU64,
    pub clients_reconnected: AtomicU64,
    pub crc_valid: AtomicU64,
    pub crc_invalid: AtomicU64,
    pub crc_aborted: AtomicU64,
}

/// An immutable point-in-time read of every counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub requests_total: u64,
    pub responses_total: u64,
    pub requests_by_opcode: [u64; REQUEST_OPCODES],
    pub responses_by_opcode: [u64; RESPONSE_OPCODES],
    pub files_received: u64,
    pub bytes_received: u64,
    pub errors_total: u64,
    pub clients_registered: u64,
    pub clients_reconnected: u64,
    pub crc_valid: u64,
    pub crc_invalid: u64,
    pub crc_aborted: u64,
}

impl Default for StatsSnapshot {
    fn default() -> Self {
        Self {
            connections_total: 0,
            connections_active: 0,
            requests_total: 0,
            responses_total: 0,
            requests_by_opcode: [0; REQUEST_OPCODES],
            responses_by_opcode: [0; RESPONSE_OPCODES],
            files_received: 0,
            bytes_received: 0,
            errors_total: 0,
            clients_registered: 0,
            clients_reconnected: 0,
            crc_valid: 0,
            crc_invalid: 0,
            crc_aborted: 0,
        }
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            requests_total: AtomicU64::new(0),
            responses_total: AtomicU64::new(0),
            requests_by_opcode: std::array::from_fn(|_| AtomicU64::new(0)),
            responses_by_opcode: std::array::from_fn(|_| AtomicU64::new(0)),
            files_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            clients_registered: AtomicU64::new(0),
            clients_reconnected: AtomicU64::new(0),
            crc_valid: AtomicU64::new(0),
            crc_invalid: AtomicU64::new(0),
            crc_aborted: AtomicU64::new(0),
        }
    }

    pub fn log_connection(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn log_disconnection(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a request by its raw opcode, whether or not it maps to a
    /// known `RequestCode` (an unrecognized opcode still counts toward the
    /// flat total, just not toward the per-opcode breakdown).
    pub fn log_request(&self, opcode: u16) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if let Some(slot) = request_slot(opcode) {
            self.requests_by_opcode[slot].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn log_response(&self, code: ResponseCode) {
        self.responses_total.fetch_add(1, Ordering::Relaxed);
        self.responses_by_opcode[response_slot(code)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn log_file_received(&self, size: u64) {
        self.files_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(size, Ordering::Relaxed);
    }

    pub fn log_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn log_registration(&self) {
        self.clients_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn log_reconnection(&self) {
        self.clients_reconnected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn log_crc_valid(&self) {
        self.crc_valid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn log_crc_invalid(&self) {
        self.crc_invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn log_crc_aborted(&self) {
        self.crc_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            requests_total: self.requests_total.load(Ordering::Relaxed),
            responses_total: self.responses_total.load(Ordering::Relaxed),
            requests_by_opcode: std::array::from_fn(|i| {
                self.requests_by_opcode[i].load(Ordering::Relaxed)
            }),
            responses_by_opcode: std::array::from_fn(|i| {
                self.responses_by_opcode[i].load(Ordering::Relaxed)
            }),
            files_received: self.files_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            clients_registered: self.clients_registered.load(Ordering::Relaxed),
            clients_reconnected: self.clients_reconnected.load(Ordering::Relaxed),
            crc_valid: self.crc_valid.load(Ordering::Relaxed),
            crc_invalid: self.crc_invalid.load(Ordering::Relaxed),
            crc_aborted: self.crc_aborted.load(Ordering::Relaxed),
        }
    }
}
