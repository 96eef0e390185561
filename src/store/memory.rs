use crate::generator::Operation;
use crate::store::{BatchMode, Codec, Connector, Store};
use anyhow::{Result, bail};
use std::collections::{HashMap, VecDeque};
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

type Data = Arc<RwLock<HashMap<u64, Vec<u8>>>>;

/// In-process store. All connections from one connector (and its clones) see the same data.
#[derive(Default, Clone)]
pub struct MemoryConnector {
    data: Data,
    stats: Arc<MemoryStats>,
    codec: Codec,
}

/// Counters shared by every connection of a [`MemoryConnector`].
#[derive(Default)]
pub struct MemoryStats {
    gets: AtomicU64,
    sets: AtomicU64,
    flushes: AtomicU64,
    max_in_flight: AtomicU64,
    batches: Mutex<Vec<(usize, BatchMode)>>,
    per_connection: Mutex<Vec<Arc<AtomicU64>>>,
}

impl MemoryStats {
    #[cfg(test)]
    pub fn ops(&self) -> u64 {
        self.gets.load(Ordering::Relaxed) + self.sets.load(Ordering::Relaxed)
    }

    pub fn gets(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn max_in_flight(&self) -> u64 {
        self.max_in_flight.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn batches(&self) -> Vec<(usize, BatchMode)> {
        self.batches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Operations issued through each connection, in connection order.
    pub fn ops_per_connection(&self) -> Vec<u64> {
        self.per_connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }
}

impl MemoryConnector {
    pub fn new(codec: Codec) -> Self {
        MemoryConnector {
            codec,
            ..Default::default()
        }
    }

    #[cfg(test)]
    pub fn stats(&self) -> &MemoryStats {
        &self.stats
    }

    #[cfg(test)]
    pub fn keys(&self) -> Vec<u64> {
        let mut keys: Vec<u64> = self
            .data
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        keys.sort_unstable();
        keys
    }

    #[cfg(test)]
    pub fn value_len(&self, key: u64) -> Option<usize> {
        self.data
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .map(Vec::len)
    }

    /// Value lengths of `keys`, read under one lock.
    #[cfg(test)]
    pub fn value_lens(&self, keys: &[u64]) -> Vec<Option<usize>> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        keys.iter().map(|k| data.get(k).map(Vec::len)).collect()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self) -> Result<Box<dyn Store>> {
        let ops = Arc::new(AtomicU64::new(0));
        self.stats
            .per_connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ops.clone());
        Ok(Box::new(MemoryStore {
            data: self.data.clone(),
            stats: self.stats.clone(),
            ops,
            codec: self.codec,
            pending: VecDeque::new(),
        }))
    }

    fn describe(&self) -> String {
        format!("in-memory ({:?} codec)", self.codec)
    }

    fn share(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    fn report(&self) -> Option<String> {
        let s = &self.stats;
        Some(format!(
            "{} gets, {} sets, {} flushes over {} connections",
            s.gets(),
            s.sets(),
            s.flushes(),
            s.ops_per_connection().len()
        ))
    }
}

struct MemoryStore {
    data: Data,
    stats: Arc<MemoryStats>,
    ops: Arc<AtomicU64>,
    codec: Codec,
    /// Submitted but not yet completed, oldest first
    pending: VecDeque<Operation>,
}

impl MemoryStore {
    fn count(&self, op: &Operation) {
        let counter = match op {
            Operation::Get(_) => &self.stats.gets,
            Operation::Set(..) => &self.stats.sets,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.ops.fetch_add(1, Ordering::Relaxed);
    }

    fn lookup(&self, data: &HashMap<u64, Vec<u8>>, key: u64) -> bool {
        let value = data.get(&key);
        if self.codec == Codec::Generic {
            black_box(value.cloned());
        }
        value.is_some()
    }
}

impl Store for MemoryStore {
    fn get(&mut self, key: u64) -> Result<bool> {
        self.count(&Operation::Get(key));
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        Ok(self.lookup(&data, key))
    }

    fn set(&mut self, key: u64, value: &[u8]) -> Result<()> {
        self.count(&Operation::Set(key, &[]));
        self.data
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Vec::from(value));
        Ok(())
    }

    fn flush_all(&mut self) -> Result<()> {
        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        self.data.write().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }

    fn execute_batch(&mut self, ops: &[Operation], mode: BatchMode) -> Result<()> {
        self.stats
            .batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((ops.len(), mode));
        match mode {
            BatchMode::Pipeline => {
                for op in ops {
                    self.apply(*op)?;
                }
            }
            BatchMode::Transaction => {
                // One write lock for the whole batch: readers see all of it or none
                let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
                for op in ops {
                    self.count(op);
                    match *op {
                        Operation::Get(key) => {
                            self.lookup(&data, key);
                        }
                        Operation::Set(key, value) => {
                            data.insert(key, Vec::from(value));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn submit(&mut self, op: Operation) -> Result<()> {
        self.pending.push_back(op);
        self.stats
            .max_in_flight
            .fetch_max(self.pending.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn complete(&mut self) -> Result<()> {
        match self.pending.pop_front() {
            Some(op) => self.apply(op),
            None => bail!("no operation in flight"),
        }
    }
}
