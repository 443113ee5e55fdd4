use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

/// Extendible hash table: a directory of `2^global_depth` slots, each
/// pointing at a bucket with `local_depth <= global_depth`. A full bucket is
/// split by partitioning its entries on bit `1 << local_depth` of the key
/// hash; when `local_depth == global_depth` the directory doubles first by
/// appending a copy of itself. The directory never shrinks.
///
/// All operations are serialized by a single mutex; the buffer pool uses
/// this structure as its `page_id -> frame_id` table.
#[derive(Debug)]
pub struct ExtendibleHashTable<K, V> {
    inner: Mutex<ExtendibleHashInner<K, V>>,
}

#[derive(Debug)]
struct ExtendibleHashInner<K, V> {
    global_depth: u32,
    size_limit: usize,
    // Directory slots index into the bucket arena; several slots may share
    // one bucket until it splits.
    directory: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

#[derive(Debug)]
struct Bucket<K, V> {
    local_depth: u32,
    items: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn new(local_depth: u32) -> Self {
        Self {
            local_depth,
            items: Vec::new(),
        }
    }
}

impl<K: Hash + Eq + Clone, V: Clone> ExtendibleHashTable<K, V> {
    /// `size_limit` bounds the number of entries per bucket.
    pub fn new(size_limit: usize) -> Self {
        assert!(size_limit > 0, "bucket size limit must be positive");
        Self {
            inner: Mutex::new(ExtendibleHashInner {
                global_depth: 0,
                size_limit,
                directory: vec![0],
                buckets: vec![Bucket::new(0)],
            }),
        }
    }

    fn hash_key(key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as usize
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let bucket = &inner.buckets[inner.bucket_index_of(key)];
        bucket
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let bucket_idx = inner.bucket_index_of(key);
        let bucket = &mut inner.buckets[bucket_idx];
        if let Some(pos) = bucket.items.iter().position(|(k, _)| k == key) {
            bucket.items.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let size_limit = inner.size_limit;
        loop {
            let bucket_idx = inner.bucket_index_of(&key);
            let bucket = &mut inner.buckets[bucket_idx];

            if let Some(pos) = bucket.items.iter().position(|(k, _)| k == &key) {
                bucket.items[pos].1 = value;
                return;
            }
            if bucket.items.len() < size_limit {
                bucket.items.push((key, value));
                return;
            }
            inner.split_bucket(bucket_idx);
        }
    }

    pub fn global_depth(&self) -> u32 {
        self.inner.lock().global_depth
    }

    pub fn local_depth(&self, directory_index: usize) -> u32 {
        let inner = self.inner.lock();
        inner.buckets[inner.directory[directory_index]].local_depth
    }

    /// Number of distinct buckets reachable from the directory.
    pub fn num_buckets(&self) -> usize {
        let inner = self.inner.lock();
        let mut seen: Vec<usize> = inner.directory.clone();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }
}

impl<K: Hash + Eq + Clone, V: Clone> ExtendibleHashInner<K, V> {
    fn bucket_index_of(&self, key: &K) -> usize {
        let hash = ExtendibleHashTable::<K, V>::hash_key(key);
        self.directory[hash & ((1usize << self.global_depth) - 1)]
    }

    fn split_bucket(&mut self, bucket_idx: usize) {
        let local_depth = self.buckets[bucket_idx].local_depth;
        if local_depth == self.global_depth {
            // Double the directory: slot i + 2^global aliases slot i.
            let clone = self.directory.clone();
            self.directory.extend(clone);
            self.global_depth += 1;
        }

        let mask = 1usize << local_depth;
        let mut low = Bucket::new(local_depth + 1);
        let mut high = Bucket::new(local_depth + 1);
        for (k, v) in self.buckets[bucket_idx].items.drain(..) {
            let hash = ExtendibleHashTable::<K, V>::hash_key(&k);
            if hash & mask != 0 {
                high.items.push((k, v));
            } else {
                low.items.push((k, v));
            }
        }
        let low_idx = self.buckets.len();
        self.buckets.push(low);
        let high_idx = self.buckets.len();
        self.buckets.push(high);

        for (slot, target) in self.directory.iter_mut().enumerate() {
            if *target == bucket_idx {
                *target = if slot & mask != 0 { high_idx } else { low_idx };
            }
        }
    }
}
