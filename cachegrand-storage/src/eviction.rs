//! Sampling-based eviction policy selection.

use std::sync::Arc;

use crate::entry::EntryIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    Lru,
    Lfu,
    Random,
    Ttl,
}

/// One sampled candidate: the key it was stored under plus the entry it
/// points to, cheap to carry around since the entry itself is `Arc`-shared
/// with the hash table.
pub struct EvictionCandidate {
    pub key: Box<[u8]>,
    pub entry: Arc<EntryIndex>,
}

/// Picks a victim from `sample` per `policy`. Returns `None` for an empty
/// sample, or for `Ttl` when no sampled candidate carries an expiry.
pub fn select_victim<'a>(
    policy: EvictionPolicy,
    sample: &'a [EvictionCandidate],
    now_ms: u64,
    lfu_half_life_ms: u64,
) -> Option<&'a EvictionCandidate> {
    if sample.is_empty() {
        return None;
    }

    match policy {
        EvictionPolicy::Lru => sample.iter().min_by_key(|c| {
            c.entry
                .last_access_time_ms
                .load(std::sync::atomic::Ordering::Relaxed)
        }),
        EvictionPolicy::Lfu => sample.iter().min_by(|a, b| {
            decayed_access_count(a, now_ms, lfu_half_life_ms)
                .partial_cmp(&decayed_access_count(b, now_ms, lfu_half_life_ms))
                .unwrap_or(std::cmp::Ordering::Equal)
        }),
        EvictionPolicy::Random => sample.first(),
        EvictionPolicy::Ttl => sample
            .iter()
            .filter(|c| {
                c.entry
                    .expiry_time_ms
                    .load(std::sync::atomic::Ordering::Relaxed)
                    > 0
            })
            .min_by_key(|c| {
                c.entry
                    .expiry_time_ms
                    .load(std::sync::atomic::Ordering::Relaxed)
            }),
    }
}

/// Applies exponential time-decay to an entry's raw access counter, halving
/// its weight every `half_life_ms` since last access. Mirrors LFU
/// implementations that age counters on read rather than letting a
/// long-idle, once-hot key stay "hot" forever.
fn decayed_access_count(candidate: &EvictionCandidate, now_ms: u64, half_life_ms: u64) -> f64 {
    use std::sync::atomic::Ordering;

    let counter = candidate.entry.access_counter.load(Ordering::Relaxed) as f64;
    if half_life_ms == 0 {
        return counter;
    }
    let last_access = candidate.entry.last_access_time_ms.load(Ordering::Relaxed);
    let age_ms = now_ms.saturating_sub(last_access) as f64;
    let half_lives = age_ms / half_life_ms as f64;
    counter * 0.5f64.powf(half_lives)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkChain;

    fn candidate(key: &[u8], last_access_ms: u64, access_count: u64, expiry_ms: u64) -> EvictionCandidate {
        let entry = EntryIndex::new(0, key, ChunkChain::from_memory(b"v"), 0, expiry_ms);
        entry
            .last_access_time_ms
            .store(last_access_ms, std::sync::atomic::Ordering::Relaxed);
        entry
            .access_counter
            .store(access_count, std::sync::atomic::Ordering::Relaxed);
        EvictionCandidate {
            key: Box::from(key),
            entry: Arc::new(entry),
        }
    }

    #[test]
    fn lru_picks_the_oldest_last_access() {
        let sample = vec![
            candidate(b"a", 500, 0, 0),
            candidate(b"b", 100, 0, 0),
            candidate(b"c", 900, 0, 0),
        ];
        let victim = select_victim(EvictionPolicy::Lru, &sample, 1_000, 0).unwrap();
        assert_eq!(&*victim.key, b"b");
    }

    #[test]
    fn lfu_picks_the_lowest_decayed_counter() {
        let sample = vec![candidate(b"a", 1_000, 10, 0), candidate(b"b", 1_000, 2, 0)];
        let victim = select_victim(EvictionPolicy::Lfu, &sample, 1_000, 3_600_000).unwrap();
        assert_eq!(&*victim.key, b"b");
    }

    #[test]
    fn ttl_ignores_candidates_without_expiry() {
        let sample = vec![candidate(b"a", 0, 0, 0), candidate(b"b", 0, 0, 5_000)];
        let victim = select_victim(EvictionPolicy::Ttl, &sample, 1_000, 0).unwrap();
        assert_eq!(&*victim.key, b"b");
    }

    #[test]
    fn empty_sample_yields_no_victim() {
        assert!(select_victim(EvictionPolicy::Lru, &[], 1_000, 0).is_none());
    }
}
