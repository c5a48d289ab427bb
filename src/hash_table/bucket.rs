use std::ops::Deref;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::sync::atomic::{AtomicBool, AtomicUsize};

use parking_lot::{Mutex, MutexGuard};
use sdd::{AtomicShared, Guard, Ptr, Shared, Tag};

use crate::Equivalent;

/// [`Entry`] is a single key-value binding.
///
/// An [`Entry`] is shared by every table it has been linked into; each table threads it through
/// its own [`Node`], so linking an [`Entry`] into a new table never modifies the old one.
pub(crate) struct Entry<K, V> {
    key: K,
    hash: u64,
    /// The value cell; replacing the value swaps the handle.
    value: AtomicShared<V>,
    /// `true` if the entry was removed.
    tombstone: AtomicBool,
}

/// [`Node`] links an [`Entry`] into the chain of a [`Bucket`].
pub(crate) struct Node<K, V> {
    entry: Shared<Entry<K, V>>,
    next: AtomicShared<Node<K, V>>,
}

/// [`Bucket`] is a lock-protected singly linked chain of entries sharing a table slot.
///
/// Structural modification requires the [`Bucket`] lock held through a [`Writer`], whereas
/// readers traverse the chain without any locks.
pub(crate) struct Bucket<K, V> {
    head: AtomicShared<Node<K, V>>,
    /// Only accessed by a [`Writer`].
    tail: AtomicShared<Node<K, V>>,
    /// Number of live entries.
    len: AtomicUsize,
    lock: Mutex<()>,
}

/// [`Writer`] holds the exclusive lock on a [`Bucket`].
pub(crate) struct Writer<'b, K, V> {
    bucket: &'b Bucket<K, V>,
    _lock: MutexGuard<'b, ()>,
}

impl<K, V> Entry<K, V> {
    /// Creates a new live [`Entry`].
    #[inline]
    pub(crate) fn new(key: K, hash: u64, val: V) -> Self
    where
        V: 'static,
    {
        Self {
            key,
            hash,
            value: AtomicShared::new(val),
            tombstone: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) const fn key(&self) -> &K {
        &self.key
    }

    #[inline]
    pub(crate) const fn hash(&self) -> u64 {
        self.hash
    }

    /// Returns `true` if the entry has not been removed.
    #[inline]
    pub(crate) fn is_live(&self) -> bool {
        !self.tombstone.load(Acquire)
    }

    /// Marks the entry removed.
    ///
    /// Returns `false` if another thread had already removed it.
    #[inline]
    pub(crate) fn mark_removed(&self) -> bool {
        self.tombstone
            .compare_exchange(false, true, AcqRel, Acquire)
            .is_ok()
    }

    /// Returns a reference to the current value.
    #[inline]
    pub(crate) fn value<'g>(&self, guard: &'g Guard) -> Option<&'g V> {
        self.value.load(Acquire, guard).as_ref()
    }

    /// Replaces the value, and returns the previous value handle.
    #[inline]
    pub(crate) fn replace(&self, val: V) -> Option<Shared<V>>
    where
        V: 'static,
    {
        self.value.swap((Some(Shared::new(val)), Tag::None), AcqRel).0
    }

    /// Returns `true` if the entry holds the key.
    #[inline]
    fn matches<Q>(&self, key: &Q, hash: u64) -> bool
    where
        Q: Equivalent<K> + ?Sized,
    {
        self.hash == hash && key.equivalent(&self.key)
    }
}

impl<K, V> Node<K, V> {
    /// Returns the shared handle to the [`Entry`].
    #[inline]
    pub(crate) const fn shared_entry(&self) -> &Shared<Entry<K, V>> {
        &self.entry
    }
}

impl<K: 'static, V: 'static> Bucket<K, V> {
    /// Returns the number of live entries in the [`Bucket`].
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len.load(Relaxed)
    }

    /// Searches for a live entry without acquiring the lock.
    #[inline]
    pub(crate) fn search<'g, Q>(
        &self,
        key: &Q,
        hash: u64,
        guard: &'g Guard,
    ) -> Option<&'g Entry<K, V>>
    where
        Q: Equivalent<K> + ?Sized,
    {
        let mut node_ptr = self.head.load(Acquire, guard);
        while let Some(node) = node_ptr.as_ref() {
            let entry = node.entry.get_guarded_ref(guard);
            if entry.is_live() && entry.matches(key, hash) {
                return Some(entry);
            }
            node_ptr = node.next.load(Acquire, guard);
        }
        None
    }

    /// Marks the live entry holding the key removed without unlinking it.
    ///
    /// The caller is responsible for updating the map-wide counter.
    pub(crate) fn mark_removed<Q>(&self, key: &Q, hash: u64, guard: &Guard) -> bool
    where
        Q: Equivalent<K> + ?Sized,
    {
        if let Some(entry) = self.search(key, hash, guard) {
            if entry.mark_removed() {
                self.len.fetch_sub(1, Relaxed);
                return true;
            }
        }
        false
    }

    /// Calls the visitor on every live entry in the chain.
    pub(crate) fn for_each<'g, F: FnMut(&'g Entry<K, V>)>(
        &self,
        visitor: &mut F,
        guard: &'g Guard,
    ) {
        self.for_each_node(
            &mut |node| {
                let entry = node.entry.get_guarded_ref(guard);
                if entry.is_live() {
                    visitor(entry);
                }
            },
            guard,
        );
    }

    /// Calls the visitor on every node in the chain including those of removed entries.
    pub(crate) fn for_each_node<'g, F: FnMut(&'g Node<K, V>)>(
        &self,
        visitor: &mut F,
        guard: &'g Guard,
    ) {
        let mut node_ptr = self.head.load(Acquire, guard);
        while let Some(node) = node_ptr.as_ref() {
            visitor(node);
            node_ptr = node.next.load(Acquire, guard);
        }
    }
}

impl<K, V> Default for Bucket<K, V> {
    #[inline]
    fn default() -> Self {
        Self {
            head: AtomicShared::null(),
            tail: AtomicShared::null(),
            len: AtomicUsize::new(0),
            lock: Mutex::new(()),
        }
    }
}

impl<'b, K: 'static, V: 'static> Writer<'b, K, V> {
    /// Locks the [`Bucket`].
    #[inline]
    pub(crate) fn lock(bucket: &'b Bucket<K, V>) -> Self {
        Self {
            bucket,
            _lock: bucket.lock.lock(),
        }
    }

    /// Searches for a live entry, and unlinks every removed entry it passes by.
    ///
    /// Returns the number of unlinked removed entries along with the entry if found.
    pub(crate) fn search_and_purge<'g, Q>(
        &self,
        key: &Q,
        hash: u64,
        guard: &'g Guard,
    ) -> (Option<&'g Entry<K, V>>, usize)
    where
        Q: Equivalent<K> + ?Sized,
    {
        let mut purged = 0;
        let mut prev_ptr = Ptr::null();
        let mut node_ptr = self.head.load(Acquire, guard);
        while let Some(node) = node_ptr.as_ref() {
            let entry = node.entry.get_guarded_ref(guard);
            let next_ptr = node.next.load(Acquire, guard);
            if !entry.is_live() {
                self.unlink(prev_ptr, node, guard);
                purged += 1;
            } else if entry.matches(key, hash) {
                return (Some(entry), purged);
            } else {
                prev_ptr = node_ptr;
            }
            node_ptr = next_ptr;
        }
        (None, purged)
    }

    /// Appends the entry to the tail of the chain.
    pub(crate) fn push_back(&self, entry: Shared<Entry<K, V>>, guard: &Guard) {
        let node = Shared::new(Node {
            entry,
            next: AtomicShared::null(),
        });
        if let Some(tail) = self.tail.load(Acquire, guard).as_ref() {
            tail.next.swap((Some(node.clone()), Tag::None), Release);
        } else {
            self.head.swap((Some(node.clone()), Tag::None), Release);
        }
        self.tail.swap((Some(node), Tag::None), Release);
        self.len.fetch_add(1, Relaxed);
    }

    /// Removes the live entry holding the key.
    ///
    /// Returns `false` if the key was not found, or another thread removed it first.
    pub(crate) fn remove<Q>(&self, key: &Q, hash: u64, guard: &Guard) -> bool
    where
        Q: Equivalent<K> + ?Sized,
    {
        let mut prev_ptr = Ptr::null();
        let mut node_ptr = self.head.load(Acquire, guard);
        while let Some(node) = node_ptr.as_ref() {
            let entry = node.entry.get_guarded_ref(guard);
            let next_ptr = node.next.load(Acquire, guard);
            if !entry.is_live() {
                self.unlink(prev_ptr, node, guard);
            } else if entry.matches(key, hash) {
                // Marking the entry removed hides it from readers of superseded tables as well.
                let removed = entry.mark_removed();
                self.unlink(prev_ptr, node, guard);
                if removed {
                    self.len.fetch_sub(1, Relaxed);
                }
                return removed;
            } else {
                prev_ptr = node_ptr;
            }
            node_ptr = next_ptr;
        }
        false
    }

    /// Unlinks the node whose predecessor is `prev_ptr`.
    ///
    /// The `next` link of the unlinked node is left intact so that readers currently positioned
    /// on the node are able to proceed.
    fn unlink(&self, prev_ptr: Ptr<'_, Node<K, V>>, node: &Node<K, V>, guard: &Guard) {
        let next = node.next.get_shared(Acquire, guard);
        let is_tail = next.is_none();
        match prev_ptr.as_ref() {
            Some(prev) => {
                prev.next.swap((next, Tag::None), Release);
            }
            None => {
                self.head.swap((next, Tag::None), Release);
            }
        }
        if is_tail {
            // The predecessor becomes the tail; `None` if the chain is now empty.
            self.tail.swap((prev_ptr.get_shared(), Tag::None), Release);
        }
    }
}

impl<K, V> Deref for Writer<'_, K, V> {
    type Target = Bucket<K, V>;

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.bucket
    }
}
