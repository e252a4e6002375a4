//! Monotonic request id allocation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out strictly increasing request ids for the lifetime of a session.
/// Never reused, even across a transport restart: a late response for id 5
/// must never be mistaken for a fresh request reusing that number.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let ids = IdAllocator::new();
        let a = ids.next();
        let b = ids.next();
        let c = ids.next();
        assert!(a < b);
        assert!(b < c);
    }
}
