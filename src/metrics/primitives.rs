//! Atomic series the scheduler exports.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Exported name and help line of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub name: &'static str,
    pub help: &'static str,
}

impl Descriptor {
    const fn new(name: &'static str, help: &'static str) -> Self {
        Self { name, help }
    }

    fn header(&self, kind: &str) -> String {
        format!("# HELP {0} {1}\n# TYPE {0} {2}\n", self.name, self.help, kind)
    }
}

/// Count of events since startup.
#[derive(Debug)]
pub struct Counter {
    desc: Descriptor,
    value: AtomicU64,
}

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            desc: Descriptor::new(name, help),
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub(crate) fn expose(&self, out: &mut String) {
        out.push_str(&self.desc.header("counter"));
        out.push_str(&format!("{} {}\n", self.desc.name, self.get()));
    }
}

/// Current level of something, such as armed entries or owned segments.
#[derive(Debug)]
pub struct Gauge {
    desc: Descriptor,
    value: AtomicI64,
}

impl Gauge {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            desc: Descriptor::new(name, help),
            value: AtomicI64::new(0),
        }
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Move the level by `delta`, which may be negative.
    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    pub(crate) fn expose(&self, out: &mut String) {
        out.push_str(&self.desc.header("gauge"));
        out.push_str(&format!("{} {}\n", self.desc.name, self.get()));
    }
}

/// Count, total and worst case of timed passes.
///
/// Exported as a Prometheus summary without quantiles.
#[derive(Debug)]
pub struct PassTimer {
    desc: Descriptor,
    count: AtomicU64,
    total_micros: AtomicU64,
    max_micros: AtomicU64,
}

impl PassTimer {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            desc: Descriptor::new(name, help),
            count: AtomicU64::new(0),
            total_micros: AtomicU64::new(0),
            max_micros: AtomicU64::new(0),
        }
    }

    pub fn record(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PassTimes {
        PassTimes {
            count: self.count.load(Ordering::Relaxed),
            total: Duration::from_micros(self.total_micros.load(Ordering::Relaxed)),
            max: Duration::from_micros(self.max_micros.load(Ordering::Relaxed)),
        }
    }

    pub(crate) fn expose(&self, out: &mut String) {
        let times = self.snapshot();
        out.push_str(&self.desc.header("summary"));
        out.push_str(&format!(
            "{0}_sum {1}\n{0}_count {2}\n",
            self.desc.name,
            times.total.as_secs_f64(),
            times.count
        ));
    }
}

/// Point-in-time values of a [`PassTimer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassTimes {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
}

impl PassTimes {
    /// Mean pass duration, zero before the first pass.
    pub fn mean(&self) -> Duration {
        match u32::try_from(self.count) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.total / count,
            Err(_) => Duration::from_secs_f64(self.total.as_secs_f64() / self.count as f64),
        }
    }
}

/// Error counts keyed by [`Error::kind`](crate::Error::kind).
#[derive(Debug)]
pub struct ErrorCounter {
    desc: Descriptor,
    by_kind: Mutex<BTreeMap<&'static str, u64>>,
}

impl ErrorCounter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            desc: Descriptor::new(name, help),
            by_kind: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn inc(&self, kind: &'static str) {
        *self.by_kind.lock().entry(kind).or_default() += 1;
    }

    pub fn get(&self, kind: &str) -> u64 {
        self.by_kind.lock().get(kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.by_kind.lock().values().sum()
    }

    pub(crate) fn expose(&self, out: &mut String) {
        out.push_str(&self.desc.header("counter"));
        for (kind, count) in self.by_kind.lock().iter() {
            out.push_str(&format!("{}{{kind=\"{}\"}} {}\n", self.desc.name, kind, count));
        }
    }
}
