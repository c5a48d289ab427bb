use std::sync::atomic::Ordering::{Acquire, Release};

use parking_lot::Mutex;
use sdd::{AtomicShared, Guard, Shared, Tag};
use tracing::trace;

use super::bucket::{Bucket, Entry, Writer};
use crate::hasher::index_of;

/// [`Table`] is a power-of-two sized array of lazily allocated [`Bucket`] slots.
pub(crate) struct Table<K, V> {
    slots: Box<[AtomicShared<Bucket<K, V>>]>,
    /// `0` or `1`, alternating on every resize.
    epoch: u8,
    /// Serializes [`Bucket`] allocation.
    alloc_lock: Mutex<()>,
}

/// Result of a [`Table::migrate_from`] call.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct Migration {
    /// Number of live entries linked into the new table.
    pub(crate) migrated: usize,
    /// Number of removed entries left behind.
    pub(crate) purged: usize,
}

impl<K: 'static, V: 'static> Table<K, V> {
    /// Creates a new [`Table`] without any [`Bucket`] allocated.
    pub(crate) fn new(capacity: usize, epoch: u8) -> Self {
        assert!(capacity.is_power_of_two(), "invalid capacity: {capacity}");
        Self {
            slots: (0..capacity).map(|_| AtomicShared::null()).collect(),
            epoch: epoch & 1,
            alloc_lock: Mutex::new(()),
        }
    }

    /// Returns the number of slots.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub(crate) const fn epoch(&self) -> u8 {
        self.epoch
    }

    /// Returns the slot index for the hash value.
    #[inline]
    pub(crate) fn index(&self, hash: u64) -> usize {
        index_of(hash, self.capacity())
    }

    /// Returns a reference to the [`Bucket`] at the index if allocated.
    #[inline]
    pub(crate) fn bucket<'g>(&self, index: usize, guard: &'g Guard) -> Option<&'g Bucket<K, V>> {
        self.slots[index].load(Acquire, guard).as_ref()
    }

    /// Returns a reference to the [`Bucket`] at the index, allocating it if needed.
    pub(crate) fn bucket_or_alloc<'g>(&self, index: usize, guard: &'g Guard) -> &'g Bucket<K, V> {
        if let Some(bucket) = self.bucket(index, guard) {
            return bucket;
        }

        let _lock = self.alloc_lock.lock();
        if let Some(bucket) = self.bucket(index, guard) {
            // Another thread allocated it.
            return bucket;
        }
        trace!(index, epoch = self.epoch, "bucket allocated");
        let bucket = Shared::new(Bucket::default());
        let bucket_ref = bucket.get_guarded_ref(guard);
        self.slots[index].swap((Some(bucket), Tag::None), Release);
        bucket_ref
    }

    /// Returns the number of allocated buckets.
    pub(crate) fn num_allocated(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_null(Acquire)).count()
    }

    /// Returns the number of live entries in the longest chain.
    pub(crate) fn longest_chain(&self, guard: &Guard) -> usize {
        (0..self.capacity())
            .filter_map(|index| self.bucket(index, guard).map(Bucket::len))
            .max()
            .unwrap_or(0)
    }

    /// Calls the visitor on every live entry.
    pub(crate) fn for_each<'g, F: FnMut(&'g Entry<K, V>)>(
        &self,
        mut visitor: F,
        guard: &'g Guard,
    ) {
        for index in 0..self.capacity() {
            if let Some(bucket) = self.bucket(index, guard) {
                bucket.for_each(&mut visitor, guard);
            }
        }
    }

    /// Links every live entry of the old table into `self`.
    ///
    /// The chains of the old table are only read, therefore readers holding the old table keep
    /// observing a consistent view. The caller must prevent any other thread from modifying
    /// the old table, and must not publish `self` before this returns.
    pub(crate) fn migrate_from(&self, old: &Table<K, V>, guard: &Guard) -> Migration {
        let mut migration = Migration::default();
        for index in 0..old.capacity() {
            let Some(old_bucket) = old.bucket(index, guard) else {
                continue;
            };
            old_bucket.for_each_node(
                &mut |node| {
                    let entry = node.shared_entry();
                    if entry.is_live() {
                        let bucket = self.bucket_or_alloc(self.index(entry.hash()), guard);
                        Writer::lock(bucket).push_back(entry.clone(), guard);
                        migration.migrated += 1;
                    } else {
                        migration.purged += 1;
                    }
                },
                guard,
            );
        }
        migration
    }
}

#[cfg(test)]
mod test {
    use sdd::{Guard, Shared};

    use super::{Migration, Table};
    use crate::hash_table::bucket::{Bucket, Entry, Writer};
    use crate::hasher::{index_of, MapKey};

    fn insert(table: &Table<u64, u64>, key: u64, guard: &Guard) {
        let hash = key.hash_key();
        let bucket = table.bucket_or_alloc(table.index(hash), guard);
        Writer::lock(bucket).push_back(Shared::new(Entry::new(key, hash, key)), guard);
    }

    #[test]
    fn lazy_allocation() {
        let guard = Guard::new();
        let table: Table<u64, u64> = Table::new(16, 0);
        assert_eq!(table.num_allocated(), 0);
        assert!(table.bucket(3, &guard).is_none());

        let first = table.bucket_or_alloc(3, &guard);
        let second = table.bucket_or_alloc(3, &guard);
        assert!(std::ptr::eq(first, second));
        assert_eq!(table.num_allocated(), 1);
    }

    #[test]
    fn racing_allocation() {
        let table: Table<u64, u64> = Table::new(16, 0);
        let addresses: Vec<usize> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        let guard = Guard::new();
                        let bucket: *const Bucket<u64, u64> = table.bucket_or_alloc(7, &guard);
                        bucket as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(addresses.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(table.num_allocated(), 1);
    }

    #[test]
    fn migrate() {
        let guard = Guard::new();
        let old: Table<u64, u64> = Table::new(16, 0);
        for key in 0..256 {
            insert(&old, key, &guard);
        }
        let removed = old
            .bucket(index_of(5, 16), &guard)
            .unwrap()
            .mark_removed(&5, 5, &guard);
        assert!(removed);

        let new: Table<u64, u64> = Table::new(64, old.epoch() ^ 1);
        assert_eq!(new.epoch(), 1);
        assert_eq!(
            new.migrate_from(&old, &guard),
            Migration {
                migrated: 255,
                purged: 1
            }
        );

        for key in (0..256).filter(|k| *k != 5) {
            let hash = key.hash_key();
            let entry = new
                .bucket(index_of(hash, 64), &guard)
                .and_then(|b| b.search(&key, hash, &guard))
                .unwrap();
            assert_eq!(entry.value(&guard), Some(&key));

            // The old table is intact.
            assert!(old
                .bucket(index_of(hash, 16), &guard)
                .and_then(|b| b.search(&key, hash, &guard))
                .is_some());
        }

        // Entries are shared, so a value replaced through the new table is visible in the old.
        let hash = 7_u64.hash_key();
        let entry = new.bucket(new.index(hash), &guard).unwrap().search(&7, hash, &guard).unwrap();
        assert!(entry.replace(70).is_some());
        let entry = old.bucket(old.index(hash), &guard).unwrap().search(&7, hash, &guard).unwrap();
        assert_eq!(entry.value(&guard), Some(&70));

        let mut count = 0;
        new.for_each(|_| count += 1, &guard);
        assert_eq!(count, 255);
        assert_eq!(new.num_allocated(), 64);
        assert_eq!(new.longest_chain(&guard), 4);
        assert_eq!(old.longest_chain(&guard), 16);
    }
}
