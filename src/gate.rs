//! Ingestion gate.
//!
//! Bulk document reads and writes close the gate so packet dispatch does not interleave
//! with them. The gate is advisory: closing it never blocks the serial reader, packets are
//! still framed and decoded, they are just dropped instead of buffered.
//!
//! Closures are reference-counted. Every [`IngestionGate::acquire`] returns a
//! [`GateGuard`]; the gate reopens when the last guard is dropped, so overlapping bulk
//! operations cannot reopen it early and every exit path (including `?` and panics
//! unwinding through the owner) releases it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Process-wide advisory ingestion flag.
#[derive(Debug, Clone, Default)]
pub struct IngestionGate {
    holders: Arc<AtomicUsize>,
}

impl IngestionGate {
    /// Create an open gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the gate until the returned guard is dropped.
    #[must_use = "the gate reopens as soon as the guard is dropped"]
    pub fn acquire(&self) -> GateGuard {
        let previous = self.holders.fetch_add(1, Ordering::AcqRel);
        if previous == 0 {
            tracing::debug!("Ingestion gate closed");
        }
        GateGuard {
            holders: Arc::clone(&self.holders),
        }
    }

    /// Whether packets may be dispatched.
    pub fn is_open(&self) -> bool {
        self.holders.load(Ordering::Acquire) == 0
    }

    /// Number of outstanding guards.
    pub fn holders(&self) -> usize {
        self.holders.load(Ordering::Acquire)
    }
}

/// Keeps the gate closed while alive.
#[derive(Debug)]
pub struct GateGuard {
    holders: Arc<AtomicUsize>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        if self.holders.fetch_sub(1, Ordering::AcqRel) == 1 {
            tracing::debug!("Ingestion gate reopened");
        }
    }
}

/// A value whose producer must keep the gate closed until the value is consumed.
///
/// Used for bulk responses: the handler returns `Guarded<T>` and the gate reopens only
/// once whoever sends the response drops it.
#[derive(Debug)]
pub struct Guarded<T> {
    value: T,
    _guard: GateGuard,
}

impl<T> Guarded<T> {
    /// Tie `value` to `guard`.
    pub fn new(value: T, guard: GateGuard) -> Self {
        Self {
            value,
            _guard: guard,
        }
    }

    /// Borrow the value.
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Release the gate and hand the value out.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> std::ops::Deref for Guarded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_starts_open() {
        assert!(IngestionGate::new().is_open());
    }

    #[test]
    fn test_guard_closes_and_reopens() {
        let gate = IngestionGate::new();
        {
            let _guard = gate.acquire();
            assert!(!gate.is_open());
        }
        assert!(gate.is_open());
    }

    #[test]
    fn test_overlapping_guards_keep_gate_closed() {
        let gate = IngestionGate::new();
        let first = gate.acquire();
        let second = gate.clone().acquire();
        drop(first);
        assert!(!gate.is_open(), "released too early");
        assert_eq!(gate.holders(), 1);
        drop(second);
        assert!(gate.is_open());
    }

    #[test]
    fn test_error_path_releases() {
        fn write_documents() -> Result<usize, String> {
            Err("write rejected".to_string())
        }
        fn bulk_write(gate: &IngestionGate) -> Result<(), String> {
            let _guard = gate.acquire();
            write_documents()?;
            Ok(())
        }
        let gate = IngestionGate::new();
        assert!(bulk_write(&gate).is_err());
        assert!(gate.is_open());
    }

    #[test]
    fn test_guarded_value_holds_gate_until_consumed() {
        let gate = IngestionGate::new();
        let response = Guarded::new(vec![1, 2, 3], gate.acquire());
        assert!(!gate.is_open());
        assert_eq!(response.len(), 3);
        let body = response.into_inner();
        assert!(gate.is_open());
        assert_eq!(body, vec![1, 2, 3]);
    }
}
