use std::{
    collections::HashSet,
    net::UdpSocket,
    sync::{Mutex, PoisonError},
};

use rand::Rng;

use super::port_error::PortError;

/// An even receive port and the odd send port right above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortPair {
    pub primary: u16,
    pub secondary: u16,
}

impl PortPair {
    #[must_use]
    pub fn from_primary(primary: u16) -> Self {
        Self {
            primary,
            secondary: primary.saturating_add(1),
        }
    }
}

/// Process-wide pool of leased local UDP ports.
///
/// Every lookup-and-lease runs under one mutex, and a pair is only handed out
/// after the OS accepted a bind on both of its ports.
#[derive(Debug)]
pub struct PortAllocator {
    leased: Mutex<HashSet<u16>>,
    start: u16,
    end: u16,
    scan_window: u16,
}

impl PortAllocator {
    /// # Errors
    /// [`PortError::InvalidRange`] if the range cannot hold a single pair.
    pub fn new(start: u16, end: u16, scan_window: u16) -> Result<Self, PortError> {
        if start == 0 || end <= start {
            return Err(PortError::InvalidRange { start, end });
        }
        Ok(Self {
            leased: Mutex::new(HashSet::new()),
            start,
            end,
            scan_window: scan_window.max(2),
        })
    }

    /// Random even base inside the range: `start + rand(0..1000) * 10`.
    #[must_use]
    pub fn random_base(&self) -> u16 {
        self.random_base_with_headroom(0)
    }

    /// Like [`random_base`](Self::random_base), but leaves at least
    /// `headroom` ports plus one scan window above the base when the range allows.
    #[must_use]
    pub fn random_base_with_headroom(&self, headroom: u16) -> u16 {
        let reserved = u32::from(headroom) + u32::from(self.scan_window);
        let span = u32::from(self.end - self.start).saturating_sub(reserved);
        let steps = (span / 10).clamp(1, 1000);
        let offset = rand::thread_rng().gen_range(0..steps) * 10;
        even(self.start.saturating_add(offset as u16))
    }

    /// Leases the first bindable pair at or above `hint`, scanning by 2 within
    /// the scan window.
    ///
    /// # Errors
    /// [`PortError::Exhausted`] when no pair in the window is free and bindable.
    pub fn allocate_pair(&self, hint: u16) -> Result<PortPair, PortError> {
        let from = even(hint.clamp(self.start, self.end));
        let mut leased = self.leased.lock().unwrap_or_else(PoisonError::into_inner);

        let stop = u32::from(from) + u32::from(self.scan_window);
        let mut port = u32::from(from);
        while port < stop && port < u32::from(self.end) {
            let pair = PortPair::from_primary(port as u16);
            if !leased.contains(&pair.primary)
                && !leased.contains(&pair.secondary)
                && can_bind(pair.primary)
                && can_bind(pair.secondary)
            {
                leased.insert(pair.primary);
                leased.insert(pair.secondary);
                return Ok(pair);
            }
            port += 2;
        }

        Err(PortError::Exhausted {
            from,
            window: self.scan_window,
        })
    }

    /// Leases exactly `pair` without probing the OS.
    ///
    /// # Errors
    /// [`PortError::AlreadyLeased`] if either port is taken.
    pub fn reserve_pair(&self, pair: PortPair) -> Result<(), PortError> {
        let mut leased = self.leased.lock().unwrap_or_else(PoisonError::into_inner);
        for p in [pair.primary, pair.secondary] {
            if leased.contains(&p) {
                return Err(PortError::AlreadyLeased(p));
            }
        }
        leased.insert(pair.primary);
        leased.insert(pair.secondary);
        Ok(())
    }

    /// Returns both ports of `pair` to the pool. Releasing twice is harmless.
    pub fn release_pair(&self, pair: PortPair) {
        let mut leased = self.leased.lock().unwrap_or_else(PoisonError::into_inner);
        leased.remove(&pair.primary);
        leased.remove(&pair.secondary);
    }

    #[must_use]
    pub fn is_leased(&self, port: u16) -> bool {
        self.leased
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&port)
    }

    #[must_use]
    pub fn leased_count(&self) -> usize {
        self.leased
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn even(p: u16) -> u16 {
    p & !1
}

fn can_bind(port: u16) -> bool {
    UdpSocket::bind(("0.0.0.0", port)).is_ok()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use std::{sync::Arc, thread};

    fn allocator() -> PortAllocator {
        PortAllocator::new(41_000, 42_000, 100).unwrap()
    }

    #[test]
    fn pairs_are_even_and_adjacent() {
        let a = allocator();
        let p = a.allocate_pair(41_001).unwrap();
        assert_eq!(p.primary % 2, 0);
        assert_eq!(p.secondary, p.primary + 1);
        assert!(a.is_leased(p.primary) && a.is_leased(p.secondary));
    }

    #[test]
    fn same_hint_never_returns_same_pair() {
        let a = allocator();
        let p1 = a.allocate_pair(41_100).unwrap();
        let p2 = a.allocate_pair(41_100).unwrap();
        assert_ne!(p1, p2);
        assert!(p2.primary > p1.primary);
    }

    #[test]
    fn released_pair_is_allocatable_again() {
        let a = allocator();
        let p1 = a.allocate_pair(41_200).unwrap();
        a.release_pair(p1);
        assert_eq!(a.leased_count(), 0);
        let p2 = a.allocate_pair(41_200).unwrap();
        assert_eq!(p1, p2);
    }

    #[test]
    fn reserved_ports_are_skipped() {
        let a = allocator();
        a.reserve_pair(PortPair::from_primary(41_300)).unwrap();
        let p = a.allocate_pair(41_300).unwrap();
        assert_ne!(p.primary, 41_300);
        assert_eq!(
            a.reserve_pair(PortPair::from_primary(41_300)),
            Err(PortError::AlreadyLeased(41_300))
        );
    }

    #[test]
    fn window_exhaustion_is_an_error() {
        let a = PortAllocator::new(41_400, 42_000, 4).unwrap();
        a.reserve_pair(PortPair::from_primary(41_400)).unwrap();
        a.reserve_pair(PortPair::from_primary(41_402)).unwrap();
        assert_eq!(
            a.allocate_pair(41_400),
            Err(PortError::Exhausted {
                from: 41_400,
                window: 4
            })
        );
    }

    #[test]
    fn concurrent_allocations_never_overlap() {
        let a = Arc::new(allocator());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let a = Arc::clone(&a);
                thread::spawn(move || {
                    (0..5)
                        .map(|_| a.allocate_pair(41_500).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut seen = HashSet::new();
        for h in handles {
            for p in h.join().unwrap() {
                assert!(seen.insert(p.primary));
                assert!(seen.insert(p.secondary));
            }
        }
        assert_eq!(seen.len(), 40);
    }

    #[test]
    fn random_base_stays_in_range() {
        let a = allocator();
        for _ in 0..50 {
            let b = a.random_base();
            assert!((41_000..42_000).contains(&b));
            assert_eq!(b % 2, 0);
        }
    }

    #[test]
    fn headroom_keeps_base_low_enough() {
        let a = allocator();
        for _ in 0..50 {
            let b = a.random_base_with_headroom(500);
            assert!(b + 500 + 100 <= 42_000, "base {b}");
        }
    }

    #[test]
    fn invalid_range_is_rejected() {
        assert!(PortAllocator::new(5000, 5000, 100).is_err());
    }
}
