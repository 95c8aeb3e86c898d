//! # Sticky-session worker selection.
//!
//! Maps a client address to a worker so that the same client keeps landing on
//! the same worker for as long as the pool size does not change.
//!
//! ```text
//!   10.0.0.7 ──► ip_hash([10,0,0,7], seed) % count ──► workers (ascending id)[i]
//! ```
//!
//! The seed is drawn once per master run. Forwarding the accepted connection
//! to the chosen worker is the embedding application's job.

use std::net::IpAddr;

use rand::Rng;

const INT31: u32 = 0x7fff_ffff;

/// 31-bit rolling hash over address octets.
pub fn ip_hash(octets: &[u8], seed: u32) -> u32 {
    let mut h = octets.iter().fold(seed & INT31, |r, &octet| {
        let mut r = r.wrapping_add(u32::from(octet)) & INT31;
        r = r.wrapping_add(r << 10) & INT31;
        r ^ (r >> 6)
    });
    h = h.wrapping_add(h << 3) & INT31;
    h ^= h >> 11;
    h.wrapping_add(h << 15) & INT31
}

/// Octets fed to the hash; IPv4-mapped IPv6 addresses hash like their IPv4 form.
fn octets(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.octets().to_vec(),
            None => v6.octets().to_vec(),
        },
    }
}

/// Seeded address-to-worker selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StickyRouter {
    seed: u32,
}

impl StickyRouter {
    /// Router with a fresh random seed.
    pub fn new() -> Self {
        Self::with_seed(rand::rng().random_range(0..1_000_000_000))
    }

    pub fn with_seed(seed: u32) -> Self {
        Self { seed }
    }

    #[inline]
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Index into a pool of `count` workers, `None` for an empty pool.
    pub fn index(&self, ip: IpAddr, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }
        Some(ip_hash(&octets(ip), self.seed) as usize % count)
    }

    /// Picks from `workers`, which must be in a stable (ascending id) order.
    pub fn pick<'a, T>(&self, ip: IpAddr, workers: &'a [T]) -> Option<&'a T> {
        self.index(ip, workers.len()).map(|i| &workers[i])
    }
}

impl Default for StickyRouter {
    fn default() -> Self {
        Self::new()
    }
}
