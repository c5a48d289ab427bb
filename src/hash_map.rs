//! [`HashMap`] is a lock-striped concurrent hash map.

use std::fmt::{self, Debug};
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use parking_lot::RwLock;
use sdd::{AtomicShared, Guard, Shared, Tag};
use tracing::{debug, warn};

use super::hash_table::bucket::{Entry, Writer};
use super::hash_table::table::Table;
use super::hasher::{index_of, MapKey};
use super::Equivalent;

/// The initial number of buckets.
pub const DEFAULT_CAPACITY: usize = 16;

/// The default load factor.
///
/// A resize is triggered when the number of entries exceeds `capacity * load_factor * 3`.
pub const DEFAULT_LOAD_FACTOR: f64 = 0.7;

/// The largest capacity a [`HashMap`] can grow to.
const MAXIMUM_CAPACITY: usize = 1_usize << (usize::BITS - 2);

/// The ratio of a batch expected to be new entries.
const BATCH_HINT_RATIO: f64 = 0.66;

/// Lock-striped concurrent hash map.
///
/// [`HashMap`] is an array of buckets, each of which is a chain of entries protected by its own
/// lock. The array is replaced with a larger one as the map grows.
///
/// ## Locking behavior
///
/// ### Reads
///
/// [`HashMap::get`] and [`HashMap::read`] never acquire any locks. The bucket array is protected
/// by [`sdd`], so a reader keeps accessing the array it loaded even if the array gets replaced
/// concurrently; a replaced array is dropped once no readers can reach it.
///
/// ### Writes
///
/// Replacing the value of an existing key is lock-free: the value cell is atomically swapped, and
/// the last swap wins when multiple threads update the same key. Inserting and removing entries
/// require the lock of the bucket. Every write operation also holds the map-wide lock in shared
/// mode.
///
/// ### Resize
///
/// A resize holds the map-wide lock exclusively, and links every live entry into a new bucket
/// array without modifying the old array; the new array is published only after it is complete.
///
/// ## Keys
///
/// Keys must implement [`MapKey`], a sealed trait covering byte sequences, strings, booleans,
/// integers, time values, and the tagged [`Key`](crate::Key) type.
pub struct HashMap<K, V> {
    table: AtomicShared<Table<K, V>>,
    len: AtomicUsize,
    load_factor: f64,
    resize_count: AtomicUsize,
    rw_lock: RwLock<()>,
}

impl<K, V> HashMap<K, V>
where
    K: 'static + MapKey + Eq,
    V: 'static,
{
    /// Creates an empty [`HashMap`] with the specified capacity.
    ///
    /// The actual capacity is the smallest power of two that is equal to or greater than the
    /// specified capacity and [`DEFAULT_CAPACITY`].
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::HashMap;
    ///
    /// let hashmap: HashMap<u64, u32> = HashMap::with_capacity(1000);
    ///
    /// assert_eq!(hashmap.capacity(), 1024);
    /// ```
    #[inline]
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_load_factor(capacity, DEFAULT_LOAD_FACTOR)
    }

    /// Creates an empty [`HashMap`] with the specified capacity and load factor.
    ///
    /// # Panics
    ///
    /// Panics if the load factor is not a positive finite number.
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::HashMap;
    ///
    /// let hashmap: HashMap<u64, u32> = HashMap::with_capacity_and_load_factor(0, 0.25);
    ///
    /// assert_eq!(hashmap.capacity(), 16);
    /// assert_eq!(hashmap.load_factor(), 0.25);
    /// ```
    #[must_use]
    pub fn with_capacity_and_load_factor(capacity: usize, load_factor: f64) -> Self {
        assert!(
            load_factor.is_finite() && load_factor > 0.0,
            "invalid load factor: {load_factor}"
        );
        let capacity = capacity
            .clamp(DEFAULT_CAPACITY, MAXIMUM_CAPACITY)
            .next_power_of_two();
        Self {
            table: AtomicShared::new(Table::new(capacity, 0)),
            len: AtomicUsize::new(0),
            load_factor,
            resize_count: AtomicUsize::new(0),
            rw_lock: RwLock::new(()),
        }
    }

    /// Inserts a key-value pair into the [`HashMap`] only if the key does not exist.
    ///
    /// Returns `false` without modifying the existing value if the key exists.
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::HashMap;
    ///
    /// let hashmap: HashMap<u64, u32> = HashMap::new();
    ///
    /// assert!(hashmap.set_nx(1, 0));
    /// assert!(!hashmap.set_nx(1, 1));
    /// assert_eq!(hashmap.get(&1), Some(0));
    /// ```
    pub fn set_nx(&self, key: K, val: V) -> bool {
        self.resize(0);
        let _shared = self.rw_lock.read();

        let guard = Guard::new();
        let hash = key.hash_key();
        let table = self.current_table(&guard);
        let writer = Writer::lock(table.bucket_or_alloc(table.index(hash), &guard));
        if writer.search_and_purge(&key, hash, &guard).0.is_some() {
            return false;
        }
        writer.push_back(Shared::new(Entry::new(key, hash, val)), &guard);
        self.len.fetch_add(1, Relaxed);
        true
    }

    /// Removes a key-value pair.
    ///
    /// The entry is unlinked from its bucket immediately. Returns `false` if the key does not
    /// exist.
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::HashMap;
    ///
    /// let hashmap: HashMap<u64, u32> = HashMap::new();
    ///
    /// assert!(!hashmap.del(&1));
    /// assert!(hashmap.set(1, 0).is_none());
    /// assert!(hashmap.del(&1));
    /// assert!(!hashmap.contains(&1));
    /// ```
    pub fn del<Q>(&self, key: &Q) -> bool
    where
        Q: MapKey + Equivalent<K> + ?Sized,
    {
        let _shared = self.rw_lock.read();

        let guard = Guard::new();
        let hash = key.hash_key();
        let table = self.current_table(&guard);
        let Some(bucket) = table.bucket(table.index(hash), &guard) else {
            return false;
        };
        if Writer::lock(bucket).remove(key, hash, &guard) {
            self.len.fetch_sub(1, Relaxed);
            return true;
        }
        false
    }

    /// Marks a key-value pair removed without acquiring the bucket lock.
    ///
    /// The removed entry stays in its bucket until the next insertion into, removal from, or
    /// resize of the bucket unlinks it. Returns `false` if the key does not exist.
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::HashMap;
    ///
    /// let hashmap: HashMap<u64, u32> = HashMap::new();
    ///
    /// assert!(hashmap.set(1, 0).is_none());
    /// assert!(hashmap.del_lazy(&1));
    /// assert!(!hashmap.del_lazy(&1));
    /// assert!(hashmap.set_nx(1, 1));
    /// assert_eq!(hashmap.get(&1), Some(1));
    /// ```
    pub fn del_lazy<Q>(&self, key: &Q) -> bool
    where
        Q: MapKey + Equivalent<K> + ?Sized,
    {
        let _shared = self.rw_lock.read();

        let guard = Guard::new();
        let hash = key.hash_key();
        let table = self.current_table(&guard);
        if table
            .bucket(table.index(hash), &guard)
            .is_some_and(|bucket| bucket.mark_removed(key, hash, &guard))
        {
            self.len.fetch_sub(1, Relaxed);
            return true;
        }
        false
    }

    /// Reads a key-value pair.
    ///
    /// Returns `None` if the key does not exist.
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::HashMap;
    ///
    /// let hashmap: HashMap<String, u32> = HashMap::new();
    ///
    /// assert!(hashmap.read("one", |_, v| *v).is_none());
    /// assert!(hashmap.set("one".to_string(), 10).is_none());
    /// assert_eq!(hashmap.read("one", |k, v| (k.len(), *v)), Some((3, 10)));
    /// ```
    #[inline]
    pub fn read<Q, R, F: FnOnce(&K, &V) -> R>(&self, key: &Q, reader: F) -> Option<R>
    where
        Q: MapKey + Equivalent<K> + ?Sized,
    {
        let guard = Guard::new();
        let hash = key.hash_key();
        let table = self.current_table(&guard);
        let entry = table
            .bucket(table.index(hash), &guard)?
            .search(key, hash, &guard)?;
        entry.value(&guard).map(|v| reader(entry.key(), v))
    }

    /// Returns `true` if the [`HashMap`] contains a value for the specified key.
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::HashMap;
    ///
    /// let hashmap: HashMap<u64, u32> = HashMap::new();
    ///
    /// assert!(!hashmap.contains(&1));
    /// assert!(hashmap.set(1, 0).is_none());
    /// assert!(hashmap.contains(&1));
    /// ```
    #[inline]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        Q: MapKey + Equivalent<K> + ?Sized,
    {
        self.read(key, |_, _| ()).is_some()
    }

    /// Visits every live entry.
    ///
    /// The entries are visited without taking a snapshot; entries inserted or removed during the
    /// scan may or may not be visited.
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::HashMap;
    ///
    /// let hashmap: HashMap<u64, u64> = HashMap::new();
    ///
    /// assert!(hashmap.set(1, 0).is_none());
    /// assert!(hashmap.set(2, 1).is_none());
    ///
    /// let mut sum = 0;
    /// hashmap.for_each(|k, v| sum += *k + *v);
    /// assert_eq!(sum, 4);
    /// ```
    pub fn for_each<F: FnMut(&K, &V)>(&self, mut visitor: F) {
        let guard = Guard::new();
        self.current_table(&guard).for_each(
            |entry| {
                if let Some(v) = entry.value(&guard) {
                    visitor(entry.key(), v);
                }
            },
            &guard,
        );
    }

    /// Returns the number of entries in the [`HashMap`].
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::HashMap;
    ///
    /// let hashmap: HashMap<u64, u32> = HashMap::new();
    ///
    /// assert!(hashmap.set(1, 0).is_none());
    /// assert_eq!(hashmap.len(), 1);
    /// ```
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Relaxed)
    }

    /// Returns `true` if the [`HashMap`] is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of buckets.
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::HashMap;
    ///
    /// let hashmap: HashMap<u64, u32> = HashMap::new();
    /// assert_eq!(hashmap.capacity(), 16);
    ///
    /// for k in 0..64 {
    ///     hashmap.set(k, 0);
    /// }
    /// assert_eq!(hashmap.capacity(), 32);
    /// ```
    #[inline]
    pub fn capacity(&self) -> usize {
        self.current_table(&Guard::new()).capacity()
    }

    /// Returns the load factor.
    #[inline]
    pub const fn load_factor(&self) -> f64 {
        self.load_factor
    }

    /// Returns the number of resizes performed so far.
    #[inline]
    pub fn resize_count(&self) -> usize {
        self.resize_count.load(Relaxed)
    }

    /// Returns the epoch of the current bucket array.
    ///
    /// The epoch alternates between `0` and `1` on every resize.
    #[inline]
    pub fn epoch(&self) -> u8 {
        self.current_table(&Guard::new()).epoch()
    }

    /// Returns the index of the bucket that may contain the key.
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::{index_of, HashMap, MapKey};
    ///
    /// let hashmap: HashMap<u64, u32> = HashMap::with_capacity(1024);
    ///
    /// assert_eq!(hashmap.bucket_index(&1025), 1);
    /// assert_eq!(hashmap.bucket_index("key"), index_of("key".hash_key(), 1024));
    /// ```
    #[inline]
    pub fn bucket_index<Q>(&self, key: &Q) -> usize
    where
        Q: MapKey + ?Sized,
    {
        index_of(key.hash_key(), self.capacity())
    }

    /// Returns a reference to the current [`Table`].
    #[inline]
    fn current_table<'g>(&self, guard: &'g Guard) -> &'g Table<K, V> {
        let table_ptr = self.table.load(Acquire, guard);
        debug_assert!(!table_ptr.is_null());
        // The table handle is populated on construction, and is only swapped with another table.
        unsafe { table_ptr.as_ref().unwrap_unchecked() }
    }

    /// Returns `true` if the [`HashMap`] needs to grow to accommodate `hint` more entries.
    fn dilate(&self, capacity: usize, hint: usize) -> bool {
        #[allow(clippy::cast_precision_loss)]
        let population = self.len().saturating_add(hint) as f64;
        #[allow(clippy::cast_precision_loss)]
        let threshold = capacity as f64 * self.load_factor * 3.0;
        if population <= threshold {
            return false;
        }
        if capacity > MAXIMUM_CAPACITY / 2 {
            warn!(capacity, "the hash map cannot grow any further");
            return false;
        }
        true
    }

    /// Returns the smallest power-of-two multiplier of the capacity to accommodate `hint` more
    /// entries.
    fn multiple(&self, capacity: usize, hint: usize) -> usize {
        #[allow(clippy::cast_precision_loss)]
        let expected = self.len().saturating_add(hint) as f64 / (3.0 * self.load_factor);
        let mut multiple = 2;
        #[allow(clippy::cast_precision_loss)]
        while ((capacity * multiple) as f64) < expected && capacity * multiple < MAXIMUM_CAPACITY {
            multiple *= 2;
        }
        multiple
    }

    /// Grows the [`HashMap`] if needed to accommodate `hint` more entries.
    fn resize(&self, hint: usize) {
        if !self.dilate(self.capacity(), hint) {
            return;
        }

        let _exclusive = self.rw_lock.write();
        let guard = Guard::new();
        loop {
            // Another thread may have resized it while waiting for the lock.
            let table = self.current_table(&guard);
            if !self.dilate(table.capacity(), hint) {
                break;
            }
            self.migrate(table, self.multiple(table.capacity(), hint), &guard);
        }
    }

    /// Links every entry in the current table into a new table, and publishes the new table.
    ///
    /// The map-wide lock must be held exclusively.
    fn migrate(&self, old_table: &Table<K, V>, multiple: usize, guard: &Guard) {
        let new_table = Shared::new(Table::new(
            old_table.capacity() * multiple,
            old_table.epoch() ^ 1,
        ));
        let migration = new_table.migrate_from(old_table, guard);
        debug!(
            old_capacity = old_table.capacity(),
            new_capacity = new_table.capacity(),
            epoch = new_table.epoch(),
            migrated = migration.migrated,
            purged = migration.purged,
            buckets = new_table.num_allocated(),
            longest_chain = new_table.longest_chain(guard),
            "hash map resized"
        );
        self.table.swap((Some(new_table), Tag::None), Release);
        self.len.store(migration.migrated, Relaxed);
        self.resize_count.fetch_add(1, Relaxed);
    }
}

impl<K, V> HashMap<K, V>
where
    K: 'static + MapKey + Eq,
    V: 'static + Clone,
{
    /// Creates an empty default [`HashMap`].
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::HashMap;
    ///
    /// let hashmap: HashMap<u64, u32> = HashMap::new();
    ///
    /// assert_eq!(hashmap.capacity(), 16);
    /// assert!(hashmap.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Inserts or updates a key-value pair.
    ///
    /// Returns the previous value if the key existed, or `None` if the key was newly inserted.
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::HashMap;
    ///
    /// let hashmap: HashMap<u64, u32> = HashMap::new();
    ///
    /// assert!(hashmap.set(1, 0).is_none());
    /// assert_eq!(hashmap.set(1, 1), Some(0));
    /// assert_eq!(hashmap.get(&1), Some(1));
    /// ```
    pub fn set(&self, key: K, val: V) -> Option<V> {
        self.resize(0);
        let _shared = self.rw_lock.read();

        let guard = Guard::new();
        let hash = key.hash_key();
        let table = self.current_table(&guard);
        let bucket = table.bucket_or_alloc(table.index(hash), &guard);
        if let Some(entry) = bucket.search(&key, hash, &guard) {
            return Self::replace(entry, val);
        }

        // Another thread may have inserted the key before the lock was acquired.
        let writer = Writer::lock(bucket);
        if let (Some(entry), _) = writer.search_and_purge(&key, hash, &guard) {
            return Self::replace(entry, val);
        }
        writer.push_back(Shared::new(Entry::new(key, hash, val)), &guard);
        self.len.fetch_add(1, Relaxed);
        None
    }

    /// Inserts every key-value pair.
    ///
    /// Nothing is inserted if the lengths differ. The [`HashMap`] grows in advance to
    /// accommodate the batch.
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::HashMap;
    ///
    /// let hashmap: HashMap<u64, u32> = HashMap::new();
    ///
    /// hashmap.mset(vec![1, 2], vec![10]);
    /// assert!(hashmap.is_empty());
    ///
    /// hashmap.mset(vec![1, 2], vec![10, 20]);
    /// assert_eq!(hashmap.get(&2), Some(20));
    /// ```
    pub fn mset(&self, keys: Vec<K>, vals: Vec<V>) {
        if keys.len() != vals.len() {
            debug!(
                keys = keys.len(),
                values = vals.len(),
                "batch with mismatched lengths ignored"
            );
            return;
        }

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let hint = (keys.len() as f64 * BATCH_HINT_RATIO) as usize;
        self.resize(hint);
        for (key, val) in keys.into_iter().zip(vals) {
            self.set(key, val);
        }
    }

    /// Returns a clone of the value associated with the key.
    ///
    /// Returns `None` if the key does not exist.
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::HashMap;
    ///
    /// let hashmap: HashMap<Vec<u8>, u32> = HashMap::new();
    ///
    /// assert!(hashmap.get(&b"key"[..]).is_none());
    /// assert!(hashmap.set(b"key".to_vec(), 1).is_none());
    /// assert_eq!(hashmap.get(&b"key"[..]), Some(1));
    /// ```
    #[inline]
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        Q: MapKey + Equivalent<K> + ?Sized,
    {
        self.read(key, |_, v| v.clone())
    }

    /// Replaces the value of the entry, and returns a clone of the previous value.
    #[inline]
    fn replace(entry: &Entry<K, V>, val: V) -> Option<V> {
        entry.replace(val).map(|prev| (*prev).clone())
    }
}

impl<K, V> Clone for HashMap<K, V>
where
    K: 'static + MapKey + Eq + Clone,
    V: 'static + Clone,
{
    #[inline]
    fn clone(&self) -> Self {
        let self_clone = Self::with_capacity_and_load_factor(self.capacity(), self.load_factor);
        self.for_each(|k, v| {
            self_clone.set(k.clone(), v.clone());
        });
        self_clone
    }
}

impl<K, V> Debug for HashMap<K, V>
where
    K: 'static + MapKey + Eq + Debug,
    V: 'static + Debug,
{
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_map();
        self.for_each(|k, v| {
            d.entry(k, v);
        });
        d.finish()
    }
}

impl<K, V> Default for HashMap<K, V>
where
    K: 'static + MapKey + Eq,
    V: 'static + Clone,
{
    /// Creates an empty default [`HashMap`].
    ///
    /// The default capacity is `16`.
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::HashMap;
    ///
    /// let hashmap: HashMap<u64, u32> = HashMap::default();
    ///
    /// assert_eq!(hashmap.capacity(), 16);
    /// ```
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> PartialEq for HashMap<K, V>
where
    K: 'static + MapKey + Eq,
    V: 'static + PartialEq,
{
    /// Compares two [`HashMap`] instances.
    ///
    /// ## Locking behavior
    ///
    /// Neither map is locked; the result is unspecified if either is modified concurrently.
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::HashMap;
    ///
    /// let hashmap1: HashMap<u64, u32> = HashMap::new();
    /// assert!(hashmap1.set(1, 0).is_none());
    ///
    /// let hashmap2: HashMap<u64, u32> = HashMap::with_capacity(1024);
    /// assert!(hashmap2.set(1, 0).is_none());
    ///
    /// assert_eq!(hashmap1, hashmap2);
    /// ```
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let mut equal = true;
        self.for_each(|k, v| {
            if equal {
                equal = other.read(k, |_, ov| v == ov).unwrap_or(false);
            }
        });
        equal
    }
}

impl<K, V> FromIterator<(K, V)> for HashMap<K, V>
where
    K: 'static + MapKey + Eq,
    V: 'static + Clone,
{
    #[inline]
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let iter = iter.into_iter();
        let hashmap = Self::new();
        hashmap.resize(iter.size_hint().0);
        iter.for_each(|(k, v)| {
            hashmap.set(k, v);
        });
        hashmap
    }
}

impl<K, V> Extend<(K, V)> for HashMap<K, V>
where
    K: 'static + MapKey + Eq,
    V: 'static + Clone,
{
    #[inline]
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        let iter = iter.into_iter();
        self.resize(iter.size_hint().0);
        iter.for_each(|(k, v)| {
            self.set(k, v);
        });
    }
}
