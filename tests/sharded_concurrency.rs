// ==============================================
// SHARDED TOKEN CACHE CONCURRENCY TESTS (integration)
// ==============================================
//
// Multi-threaded behavior of ShardedTokenCache: counter convergence under
// mixed readers/writers, insert/erase churn, capacity races, and stale
// handle visibility. These require real threads and cannot live inline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use tokenkv::store::sharded::ShardedTokenCache;
use tokenkv::token::Token;

// Deterministic per-thread probe sequence; avoids pulling a PRNG crate
// into the test just to scatter indices.
fn xorshift64(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

// ==============================================
// Mixed Readers + Writers: Counter Convergence
// ==============================================
//
// Pre-populate, then hammer the same handle set with concurrent add(+1)
// and read. Every write lands exactly once: after joining, the sum of all
// values equals the number of successful adds.

mod counter_convergence {
    use super::*;

    const KEYS: u64 = 1024;
    const WRITERS: usize = 4;
    const READERS: usize = 4;
    const OPS_PER_THREAD: usize = 10_000;

    #[test]
    fn concurrent_adds_are_never_lost() {
        let cache: Arc<ShardedTokenCache<u64, u64>> =
            Arc::new(ShardedTokenCache::with_shards(8, 2 * KEYS as usize));

        let handles: Vec<Token> = (0..KEYS).map(|k| cache.insert(1, k, 0)).collect();
        assert!(
            handles.iter().all(|t| !t.is_null()),
            "pre-population must not exhaust any shard"
        );
        assert_eq!(cache.len(), KEYS as usize);

        let handles = Arc::new(handles);
        let barrier = Arc::new(Barrier::new(WRITERS + READERS));
        let total_adds = Arc::new(AtomicUsize::new(0));
        let mut threads = Vec::new();

        for writer_id in 0..WRITERS {
            let cache = cache.clone();
            let handles = handles.clone();
            let barrier = barrier.clone();
            let total_adds = total_adds.clone();
            threads.push(thread::spawn(move || {
                let mut rng = 0x9E37_79B9_7F4A_7C15u64 ^ (writer_id as u64 + 1);
                barrier.wait();
                let mut successes = 0usize;
                for _ in 0..OPS_PER_THREAD {
                    let idx = (xorshift64(&mut rng) % KEYS) as usize;
                    if cache.add(handles[idx], 1) {
                        successes += 1;
                    }
                }
                total_adds.fetch_add(successes, Ordering::Relaxed);
            }));
        }

        let max_total = (WRITERS * OPS_PER_THREAD) as u64;
        for reader_id in 0..READERS {
            let cache = cache.clone();
            let handles = handles.clone();
            let barrier = barrier.clone();
            threads.push(thread::spawn(move || {
                let mut rng = 0xD1B5_4A32_D192_ED03u64 ^ (reader_id as u64 + 1);
                barrier.wait();
                for _ in 0..OPS_PER_THREAD {
                    let idx = (xorshift64(&mut rng) % KEYS) as usize;
                    let value = cache
                        .read(handles[idx], |v| *v)
                        .expect("handle stays valid for the whole run");
                    assert!(value <= max_total, "read {value} exceeds all possible adds");
                }
            }));
        }

        for t in threads {
            t.join().unwrap();
        }

        let expected = total_adds.load(Ordering::Relaxed) as u64;
        assert_eq!(expected, max_total, "every add targets a valid handle");

        let sum: u64 = handles
            .iter()
            .map(|&t| cache.read(t, |v| *v).unwrap())
            .sum();
        assert_eq!(sum, expected, "adds were lost or double-applied");
        assert_eq!(cache.len(), KEYS as usize);
        cache.check_invariants().unwrap();
    }
}

// ==============================================
// Insert/Erase Churn Across Threads
// ==============================================
//
// Threads cycle disjoint key ranges through insert -> read -> erase. The
// cache must come back empty with its partition invariants intact, and
// each thread's keys must never be visible to another thread's range.

mod churn {
    use super::*;

    const THREADS: usize = 8;
    const KEYS_PER_THREAD: u64 = 64;
    const ROUNDS: usize = 200;

    #[test]
    fn disjoint_key_churn_converges_to_empty() {
        let cache: Arc<ShardedTokenCache<u64, u64>> = Arc::new(ShardedTokenCache::with_shards(
            8,
            4 * THREADS * KEYS_PER_THREAD as usize,
        ));
        let barrier = Arc::new(Barrier::new(THREADS));
        let mut threads = Vec::new();

        for thread_id in 0..THREADS as u64 {
            let cache = cache.clone();
            let barrier = barrier.clone();
            threads.push(thread::spawn(move || {
                let base = thread_id * 1_000_000;
                barrier.wait();
                for round in 0..ROUNDS {
                    let mut tokens = Vec::with_capacity(KEYS_PER_THREAD as usize);
                    for k in 0..KEYS_PER_THREAD {
                        let key = base + k;
                        let token = cache.insert((thread_id % 4) as u8, key, round as u64);
                        assert!(!token.is_null(), "shard exhausted during churn");
                        tokens.push((key, token));
                    }
                    for &(key, token) in &tokens {
                        assert_eq!(cache.read(token, |v| *v), Some(round as u64));
                        assert_eq!(cache.find_handle(&key), token);
                    }
                    for &(_, token) in &tokens {
                        assert!(cache.erase(token), "own token must erase");
                        assert!(!cache.erase(token), "second erase must fail");
                    }
                }
            }));
        }

        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
        cache.check_invariants().unwrap();
    }
}

// ==============================================
// Capacity Race: No Overshoot
// ==============================================
//
// More would-be entries than capacity, inserted from many threads at
// once. Successful inserts must equal the final size, and the cache must
// never exceed its fixed capacity.

mod capacity_race {
    use super::*;

    const THREADS: usize = 8;
    const KEYS_PER_THREAD: u64 = 100;

    #[test]
    fn concurrent_inserts_never_exceed_capacity() {
        // Single shard so every insert contends on one capacity bound.
        let cache: Arc<ShardedTokenCache<u64, u64>> =
            Arc::new(ShardedTokenCache::with_shards(1, 64));
        let capacity = cache.capacity();

        let barrier = Arc::new(Barrier::new(THREADS));
        let successes = Arc::new(AtomicUsize::new(0));
        let mut threads = Vec::new();

        for thread_id in 0..THREADS as u64 {
            let cache = cache.clone();
            let barrier = barrier.clone();
            let successes = successes.clone();
            threads.push(thread::spawn(move || {
                barrier.wait();
                let mut won = 0usize;
                for k in 0..KEYS_PER_THREAD {
                    let key = thread_id * KEYS_PER_THREAD + k;
                    if !cache.insert(1, key, key).is_null() {
                        won += 1;
                    }
                }
                successes.fetch_add(won, Ordering::Relaxed);
            }));
        }

        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(cache.len(), capacity, "cache should fill exactly to capacity");
        assert_eq!(successes.load(Ordering::Relaxed), capacity);
        cache.check_invariants().unwrap();
    }
}

// ==============================================
// Stale Handles Under Concurrent Erase
// ==============================================
//
// One thread erases and re-inserts while others read through retained
// handles. Reads may hit or miss but must never observe another
// generation's value.

mod stale_visibility {
    use super::*;

    const READERS: usize = 4;
    const CYCLES: u64 = 2_000;

    #[test]
    fn readers_never_observe_recycled_values() {
        let cache: Arc<ShardedTokenCache<u64, u64>> =
            Arc::new(ShardedTokenCache::with_shards(2, 32));

        // The value stored with generation g is g as u64; a validated read
        // must return exactly its token's generation.
        let first = cache.insert(1, 7, 1);
        assert_eq!(first.generation(), 1);

        let barrier = Arc::new(Barrier::new(READERS + 1));
        let current = Arc::new(parking_lot::Mutex::new(first));
        let mut threads = Vec::new();

        for _ in 0..READERS {
            let cache = cache.clone();
            let barrier = barrier.clone();
            let current = current.clone();
            threads.push(thread::spawn(move || {
                barrier.wait();
                for _ in 0..CYCLES {
                    let token = *current.lock();
                    if let Some(value) = cache.read(token, |v| *v) {
                        assert_eq!(
                            value,
                            token.generation() as u64,
                            "read crossed a generation boundary"
                        );
                    }
                }
            }));
        }

        {
            let cache = cache.clone();
            let barrier = barrier.clone();
            let current = current.clone();
            threads.push(thread::spawn(move || {
                barrier.wait();
                for _ in 0..CYCLES {
                    let token = *current.lock();
                    assert!(cache.erase(token));
                    let next = cache.insert(1, 7, (token.generation() + 1) as u64);
                    assert!(!next.is_null());
                    assert_eq!(next.generation(), token.generation() + 1);
                    *current.lock() = next;
                }
            }));
        }

        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(cache.len(), 1);
        cache.check_invariants().unwrap();
    }
}
