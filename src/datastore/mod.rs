// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The concurrent multi-slave datastore: per-slave coil and register
//! arrays, atomic multi-element reads and writes, a bounded audit trail,
//! and engine counters. Every operation is serialized under a single
//! exclusive lock so that a write-vector either commits in full or leaves
//! no trace, and a reader never observes a torn register or a partial
//! coil update.

pub mod snapshot;

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::frame::SlaveId;

/// Default array length used when a slave's sizes are not given explicitly,
/// matching the reference server's defaults.
pub const DEFAULT_SLAVE_SIZE: usize = 100;

/// Default audit-trail capacity.
pub const DEFAULT_HISTORY_SIZE: usize = 1000;

/// Which of the four data spaces an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Coil,
    DiscreteInput,
    HoldingRegister,
    InputRegister,
}

/// A mutated scalar value, tagged by the kind it came from. Replaces the
/// dynamically typed old/new value pair of the system this was modeled on
/// with a statically typed sum so serializers never have to guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryValue {
    Coil(bool),
    Register(u16),
}

/// One audit-trail entry: a single scalar element mutated by a successful
/// write.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub slave_id: SlaveId,
    pub kind: DataKind,
    pub address: u16,
    pub old_value: HistoryValue,
    pub new_value: HistoryValue,
    pub source: String,
}

/// Requested sizes for a slave's four data spaces.
#[derive(Debug, Clone, Copy)]
pub struct SlaveSizes {
    pub coils: usize,
    pub discrete_inputs: usize,
    pub holding_registers: usize,
    pub input_registers: usize,
}

impl Default for SlaveSizes {
    fn default() -> Self {
        Self {
            coils: DEFAULT_SLAVE_SIZE,
            discrete_inputs: DEFAULT_SLAVE_SIZE,
            holding_registers: DEFAULT_SLAVE_SIZE,
            input_registers: DEFAULT_SLAVE_SIZE,
        }
    }
}

/// Optional per-field resize request; a `None` field keeps its current size.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResizeRequest {
    pub coils: Option<usize>,
    pub discrete_inputs: Option<usize>,
    pub holding_registers: Option<usize>,
    pub input_registers: Option<usize>,
}

#[derive(Debug, Clone, Default)]
struct DataBlock {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
}

impl DataBlock {
    fn new(sizes: SlaveSizes) -> Self {
        Self {
            coils: vec![false; sizes.coils],
            discrete_inputs: vec![false; sizes.discrete_inputs],
            holding_registers: vec![0; sizes.holding_registers],
            input_registers: vec![0; sizes.input_registers],
        }
    }
}

fn resize_vec<T: Clone + Default>(values: &mut Vec<T>, new_len: usize) {
    values.resize(new_len, T::default());
}

/// Why a read did not return data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    NotFound,
    OutOfRange,
}

/// Why a write did not take effect. No partial effect ever occurs: either
/// every element in the target range committed, or none did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    NotFound,
    OutOfRange,
}

/// Monotonic request counters, reset only on process restart.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub function_codes: HashMap<u8, u64>,
}

struct Inner {
    slaves: HashMap<SlaveId, DataBlock>,
    history: VecDeque<HistoryRecord>,
    history_max_size: usize,
    modified: bool,
    stats: EngineStats,
}

/// The shared, lockable multi-slave store. Handlers and transports hold it
/// by reference; they never own the slave blocks directly.
pub struct Datastore {
    inner: Mutex<Inner>,
}

impl Datastore {
    #[must_use]
    pub fn new(history_max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slaves: HashMap::new(),
                history: VecDeque::new(),
                history_max_size,
                modified: false,
                stats: EngineStats::default(),
            }),
        }
    }

    pub fn initialize_slave(&self, slave_id: SlaveId, sizes: SlaveSizes) {
        let mut inner = self.inner.lock();
        inner.slaves.insert(slave_id, DataBlock::new(sizes));
        inner.modified = true;
    }

    /// Resizes a slave in place, old values truncated or padded with
    /// defaults. Returns `false` if the slave does not exist.
    pub fn resize_slave(&self, slave_id: SlaveId, resize: ResizeRequest) -> bool {
        let mut inner = self.inner.lock();
        let Some(block) = inner.slaves.get_mut(&slave_id) else {
            return false;
        };
        if let Some(n) = resize.coils {
            resize_vec(&mut block.coils, n);
        }
        if let Some(n) = resize.discrete_inputs {
            resize_vec(&mut block.discrete_inputs, n);
        }
        if let Some(n) = resize.holding_registers {
            resize_vec(&mut block.holding_registers, n);
        }
        if let Some(n) = resize.input_registers {
            resize_vec(&mut block.input_registers, n);
        }
        inner.modified = true;
        true
    }

    #[must_use]
    pub fn slave_ids(&self) -> Vec<SlaveId> {
        let mut ids: Vec<_> = self.inner.lock().slaves.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn has_slave(&self, slave_id: SlaveId) -> bool {
        self.inner.lock().slaves.contains_key(&slave_id)
    }

    fn read_bits(
        &self,
        slave_id: SlaveId,
        address: u16,
        count: u16,
        pick: impl Fn(&DataBlock) -> &[bool],
    ) -> Result<Vec<bool>, ReadError> {
        let inner = self.inner.lock();
        let block = inner.slaves.get(&slave_id).ok_or(ReadError::NotFound)?;
        let values = pick(block);
        let (addr, count) = (address as usize, count as usize);
        if addr + count > values.len() {
            return Err(ReadError::OutOfRange);
        }
        Ok(values[addr..addr + count].to_vec())
    }

    fn read_words(
        &self,
        slave_id: SlaveId,
        address: u16,
        count: u16,
        pick: impl Fn(&DataBlock) -> &[u16],
    ) -> Result<Vec<u16>, ReadError> {
        let inner = self.inner.lock();
        let block = inner.slaves.get(&slave_id).ok_or(ReadError::NotFound)?;
        let values = pick(block);
        let (addr, count) = (address as usize, count as usize);
        if addr + count > values.len() {
            return Err(ReadError::OutOfRange);
        }
        Ok(values[addr..addr + count].to_vec())
    }

    pub fn read_coils(&self, slave_id: SlaveId, address: u16, count: u16) -> Result<Vec<bool>, ReadError> {
        self.read_bits(slave_id, address, count, |b| &b.coils)
    }

    pub fn read_discrete_inputs(&self, slave_id: SlaveId, address: u16, count: u16) -> Result<Vec<bool>, ReadError> {
        self.read_bits(slave_id, address, count, |b| &b.discrete_inputs)
    }

    pub fn read_holding_registers(&self, slave_id: SlaveId, address: u16, count: u16) -> Result<Vec<u16>, ReadError> {
        self.read_words(slave_id, address, count, |b| &b.holding_registers)
    }

    pub fn read_input_registers(&self, slave_id: SlaveId, address: u16, count: u16) -> Result<Vec<u16>, ReadError> {
        self.read_words(slave_id, address, count, |b| &b.input_registers)
    }

    fn push_history(inner: &mut Inner, record: HistoryRecord) {
        inner.history.push_back(record);
        if inner.history.len() > inner.history_max_size {
            inner.history.pop_front();
        }
    }

    pub fn write_coil(
        &self,
        slave_id: SlaveId,
        address: u16,
        value: bool,
        source: &str,
    ) -> Result<(), WriteError> {
        let mut inner = self.inner.lock();
        let Some(block) = inner.slaves.get_mut(&slave_id) else {
            return Err(WriteError::NotFound);
        };
        let addr = address as usize;
        if addr >= block.coils.len() {
            return Err(WriteError::OutOfRange);
        }
        let old = block.coils[addr];
        block.coils[addr] = value;
        inner.modified = true;
        Self::push_history(
            &mut inner,
            HistoryRecord {
                timestamp: Utc::now(),
                slave_id,
                kind: DataKind::Coil,
                address,
                old_value: HistoryValue::Coil(old),
                new_value: HistoryValue::Coil(value),
                source: source.to_owned(),
            },
        );
        Ok(())
    }

    pub fn write_register(
        &self,
        slave_id: SlaveId,
        address: u16,
        value: u16,
        source: &str,
    ) -> Result<(), WriteError> {
        let mut inner = self.inner.lock();
        let value = value & 0xFFFF;
        let Some(block) = inner.slaves.get_mut(&slave_id) else {
            return Err(WriteError::NotFound);
        };
        let addr = address as usize;
        if addr >= block.holding_registers.len() {
            return Err(WriteError::OutOfRange);
        }
        let old = block.holding_registers[addr];
        block.holding_registers[addr] = value;
        inner.modified = true;
        Self::push_history(
            &mut inner,
            HistoryRecord {
                timestamp: Utc::now(),
                slave_id,
                kind: DataKind::HoldingRegister,
                address,
                old_value: HistoryValue::Register(old),
                new_value: HistoryValue::Register(value),
                source: source.to_owned(),
            },
        );
        Ok(())
    }

    pub fn write_coils(
        &self,
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
        source: &str,
    ) -> Result<(), WriteError> {
        let mut inner = self.inner.lock();
        let addr = address as usize;
        {
            let block = inner.slaves.get(&slave_id).ok_or(WriteError::NotFound)?;
            if addr + values.len() > block.coils.len() {
                return Err(WriteError::OutOfRange);
            }
        }
        let now = Utc::now();
        let mut records = Vec::with_capacity(values.len());
        {
            let block = inner.slaves.get_mut(&slave_id).expect("checked above");
            for (i, &value) in values.iter().enumerate() {
                let old = block.coils[addr + i];
                block.coils[addr + i] = value;
                records.push(HistoryRecord {
                    timestamp: now,
                    slave_id,
                    kind: DataKind::Coil,
                    address: (addr + i) as u16,
                    old_value: HistoryValue::Coil(old),
                    new_value: HistoryValue::Coil(value),
                    source: source.to_owned(),
                });
            }
        }
        inner.modified = true;
        for record in records {
            Self::push_history(&mut inner, record);
        }
        Ok(())
    }

    pub fn write_registers(
        &self,
        slave_id: SlaveId,
        address: u16,
        values: &[u16],
        source: &str,
    ) -> Result<(), WriteError> {
        let mut inner = self.inner.lock();
        let addr = address as usize;
        {
            let block = inner.slaves.get(&slave_id).ok_or(WriteError::NotFound)?;
            if addr + values.len() > block.holding_registers.len() {
                return Err(WriteError::OutOfRange);
            }
        }
        let now = Utc::now();
        let mut records = Vec::with_capacity(values.len());
        {
            let block = inner.slaves.get_mut(&slave_id).expect("checked above");
            for (i, &value) in values.iter().enumerate() {
                let value = value & 0xFFFF;
                let old = block.holding_registers[addr + i];
                block.holding_registers[addr + i] = value;
                records.push(HistoryRecord {
                    timestamp: now,
                    slave_id,
                    kind: DataKind::HoldingRegister,
                    address: (addr + i) as u16,
                    old_value: HistoryValue::Register(old),
                    new_value: HistoryValue::Register(value),
                    source: source.to_owned(),
                });
            }
        }
        inner.modified = true;
        for record in records {
            Self::push_history(&mut inner, record);
        }
        Ok(())
    }

    /// Returns the most recent `limit` history entries, oldest first.
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<HistoryRecord> {
        let inner = self.inner.lock();
        let len = inner.history.len();
        let skip = len.saturating_sub(limit);
        inner.history.iter().skip(skip).cloned().collect()
    }

    pub fn record_request(&self, function_code: u8, success: bool) {
        let mut inner = self.inner.lock();
        inner.stats.total_requests += 1;
        if success {
            inner.stats.successful_requests += 1;
        }
        *inner.stats.function_codes.entry(function_code).or_insert(0) += 1;
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.inner.lock().stats.clone()
    }

    /// Checks and clears the dirty flag in one step, for auto-save gating.
    pub fn take_modified(&self) -> bool {
        let mut inner = self.inner.lock();
        std::mem::replace(&mut inner.modified, false)
    }

    #[must_use]
    pub fn snapshot(&self) -> snapshot::Snapshot {
        let inner = self.inner.lock();
        snapshot::Snapshot::from_slaves(&inner.slaves)
    }

    pub fn restore(&self, snap: &snapshot::Snapshot) {
        let mut inner = self.inner.lock();
        inner.slaves = snap.to_slaves();
        inner.modified = false;
    }
}

impl snapshot::SlaveBlock for DataBlock {
    fn coils(&self) -> &[bool] {
        &self.coils
    }
    fn discrete_inputs(&self) -> &[bool] {
        &self.discrete_inputs
    }
    fn holding_registers(&self) -> &[u16] {
        &self.holding_registers
    }
    fn input_registers(&self) -> &[u16] {
        &self.input_registers
    }
    fn from_parts(coils: Vec<bool>, discrete_inputs: Vec<bool>, holding_registers: Vec<u16>, input_registers: Vec<u16>) -> Self {
        DataBlock { coils, discrete_inputs, holding_registers, input_registers }
    }
}
