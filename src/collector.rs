//! Thread-safe aggregation of coverage signals.
//!
//! A `Collector` is shared (behind an `Arc`) across every worker in the
//! pool; `add_signal` is the only hot path, called once per observed
//! `CoverageSignal`. `merge` exists for combining collectors across
//! independently-run batches (e.g. a future sharded executor) and locks
//! both sides in a fixed address order to avoid deadlocking against a
//! concurrent `other.merge(self)`.

use std::sync::Mutex;

use crate::model::{Coverage, CoverageSignal};
use crate::signal;

pub struct Collector {
    coverage: Mutex<Coverage>,
}

impl Collector {
    pub fn new() -> Self {
        Collector {
            coverage: Mutex::new(Coverage::new()),
        }
    }

    /// Record one observed signal. Branch-carrying signals are a no-op
    /// placeholder: the wire grammar reserves the field, but aggregation
    /// and reporting don't model branches yet.
    pub fn add_signal(&self, sig: &CoverageSignal) -> Result<(), signal::SignalCodecError> {
        let parsed = signal::parse(&sig.signal_id)?;
        if parsed.branch.is_some() {
            return Ok(());
        }
        let key = format!("{}:{}", parsed.start_pos, parsed.length);

        let mut coverage = self.coverage.lock().expect("collector mutex poisoned");
        *coverage.positions.entry(parsed.file).or_default().entry(key).or_insert(0) += 1;
        Ok(())
    }

    /// Merge `other`'s accumulated counts into `self`, locking both
    /// collectors in pointer-address order.
    pub fn merge(&self, other: &Collector) {
        let self_addr = self as *const Collector as usize;
        let other_addr = other as *const Collector as usize;
        if self_addr == other_addr {
            return;
        }
        if self_addr < other_addr {
            let mut dst = self.coverage.lock().expect("collector mutex poisoned");
            let src = other.coverage.lock().expect("collector mutex poisoned");
            merge_into(&mut dst, &src);
        } else {
            let src = other.coverage.lock().expect("collector mutex poisoned");
            let mut dst = self.coverage.lock().expect("collector mutex poisoned");
            merge_into(&mut dst, &src);
        }
    }

    /// A consistent point-in-time copy of the aggregated coverage.
    pub fn snapshot(&self) -> Coverage {
        self.coverage.lock().expect("collector mutex poisoned").clone()
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_into(dst: &mut Coverage, src: &Coverage) {
    for (file, points) in &src.positions {
        let entry = dst.positions.entry(file.clone()).or_default();
        for (key, hits) in points {
            *entry.entry(key.clone()).or_insert(0) += hits;
        }
    }
}
