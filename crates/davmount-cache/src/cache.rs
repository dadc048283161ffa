//! Node cache.
//!
//! A single keyed store of [`Node`]s plus a store of missing-entry markers,
//! both guarded by one cache-wide lock. Every mutation runs under that lock,
//! so no observer sees a node whose key disagrees with its path fields.
//!
//! # Reservations
//!
//! A caller that needs metadata for an uncached path reserves it first. The
//! reservation puts a `Pending` slot in the map; other callers that hit the
//! slot get [`Lookup::Pending`] and wait on the shared [`Flight`] instead of
//! issuing a duplicate fetch. The leader settles the reservation with the
//! fetched node, a confirmed absence, or an error. A reservation dropped
//! without being settled is released.
//!
//! # Change notification
//!
//! Every insert, rename and removal bumps a generation counter and wakes
//! listeners obtained from [`NodeCache::listen`]. Listeners are woken after
//! the cache lock has been released.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use event_listener::{Event, EventListener};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::node::{Node, NodeRef};
use crate::path::{self, PathMapper};
use crate::repository::{RemoteItem, RepoError};
use crate::stats::CacheStats;

/// Result of a cache lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// A cached node exists for the path.
    Found(NodeRef),
    /// Another caller is fetching the path right now.
    Pending(Arc<Flight>),
    /// The path was confirmed absent less than one TTL ago.
    KnownMissing,
    /// No information; the repository must be asked.
    Unknown,
}

/// How a reserved fetch ended.
#[derive(Debug, Clone)]
pub enum FlightOutcome {
    Found(NodeRef),
    Absent,
    Failed(RepoError),
}

/// Completion signal for one reserved fetch.
#[derive(Debug, Default)]
pub struct Flight {
    outcome: Mutex<Option<FlightOutcome>>,
    done: Condvar,
}

impl Flight {
    fn complete(&self, outcome: FlightOutcome) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
        }
        self.done.notify_all();
    }

    /// Blocks until the fetch settles or `timeout` elapses.
    ///
    /// Returns `None` on timeout.
    pub fn wait(&self, timeout: Duration) -> Option<FlightOutcome> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.outcome.lock();
        while slot.is_none() {
            if self.done.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.outcome.lock().is_some()
    }
}

/// Answer to [`NodeCache::reserve`].
pub enum Reservation<'a> {
    /// The caller owns the fetch and must settle the guard.
    Leader(ReservationGuard<'a>),
    /// Someone else owns the fetch.
    Waiter(Arc<Flight>),
    Found(NodeRef),
    KnownMissing,
}

/// Ownership of a pending slot.
///
/// Dropping the guard without settling it releases the slot and fails the
/// flight so waiters do not hang.
pub struct ReservationGuard<'a> {
    cache: &'a NodeCache,
    path: String,
    flight: Arc<Flight>,
    tracked: bool,
    settled: bool,
}

impl ReservationGuard<'_> {
    /// The reserved path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Publishes the fetched node.
    ///
    /// If a node was inserted for the path while the fetch ran, that node
    /// wins and is returned instead, keeping one node per path.
    pub fn fulfil(mut self, node: Node) -> NodeRef {
        self.settled = true;
        let node = if self.tracked {
            self.cache.settle_found(&self.path, &self.flight, node)
        } else {
            Arc::new(node)
        };
        self.flight.complete(FlightOutcome::Found(Arc::clone(&node)));
        node
    }

    /// Records that the repository confirmed the path absent.
    pub fn absent(mut self) {
        self.settled = true;
        if self.tracked {
            self.cache.settle_absent(&self.path, &self.flight);
        }
        self.flight.complete(FlightOutcome::Absent);
    }

    /// Releases the slot after a failed fetch. No marker is recorded.
    pub fn fail(mut self, error: RepoError) {
        self.settled = true;
        if self.tracked {
            self.cache.release(&self.path, &self.flight);
        }
        self.flight.complete(FlightOutcome::Failed(error));
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if self.tracked {
            self.cache.release(&self.path, &self.flight);
        }
        self.flight.complete(FlightOutcome::Failed(RepoError::Protocol {
            status: None,
            message: format!("fetch of {} abandoned", self.path),
        }));
    }
}

enum Slot {
    Ready(NodeRef),
    Pending(Arc<Flight>),
}

#[derive(Default)]
struct CacheState {
    nodes: HashMap<String, Slot>,
    missing: HashMap<String, Instant>,
}

impl CacheState {
    /// Removes `key` and every descendant. Returns the number of nodes dropped.
    fn remove_subtree(&mut self, key: &str) -> u64 {
        let doomed: Vec<String> = self
            .nodes
            .keys()
            .filter(|k| k.as_str() == key || path::is_descendant(k, key))
            .cloned()
            .collect();
        let mut removed = 0;
        for k in doomed {
            if let Some(Slot::Ready(_)) = self.nodes.remove(&k) {
                removed += 1;
            }
        }
        removed
    }

    /// Re-keys `old` and its descendants under `new`, rewriting path fields.
    fn move_subtree(&mut self, mapper: &PathMapper, old: &str, new: &str) -> usize {
        let moved: Vec<String> = self
            .nodes
            .keys()
            .filter(|k| k.as_str() == old || path::is_descendant(k, old))
            .cloned()
            .collect();
        let mut count = 0;
        for old_key in moved {
            let new_key = format!("{new}{}", &old_key[old.len()..]);
            match self.nodes.remove(&old_key) {
                Some(Slot::Ready(node)) => {
                    node.relocate(&new_key, mapper.to_repository(&new_key));
                    self.missing.remove(&new_key);
                    self.nodes.insert(new_key, Slot::Ready(node));
                    count += 1;
                }
                // A fetch for the old key is now meaningless; its leader will
                // find the slot gone and keep the result uncached.
                Some(Slot::Pending(_)) | None => {}
            }
        }
        count
    }
}

/// Process-wide store of cached nodes and missing-entry markers.
pub struct NodeCache {
    state: Mutex<CacheState>,
    mapper: PathMapper,
    ttl: Duration,
    enabled: bool,
    changed: Event,
    generation: AtomicU64,
    stats: CacheStats,
}

impl NodeCache {
    /// Creates an empty cache.
    pub fn new(config: &CacheConfig, mapper: PathMapper) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            mapper,
            ttl: config.ttl,
            enabled: config.is_enabled(),
            changed: Event::new(),
            generation: AtomicU64::new(0),
            stats: CacheStats::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Builds a node for `local_path` from remote metadata.
    pub fn node_from_remote(&self, local_path: &str, item: &RemoteItem) -> Node {
        Node::from_remote(local_path, self.mapper.to_repository(local_path), item)
    }

    /// Looks up `path` without reserving it.
    pub fn lookup(&self, path: &str) -> Lookup {
        if !self.enabled {
            return Lookup::Unknown;
        }
        let mut state = self.state.lock();
        match state.nodes.get(path) {
            Some(Slot::Ready(node)) => {
                self.stats.record_hit();
                return Lookup::Found(Arc::clone(node));
            }
            Some(Slot::Pending(flight)) => {
                self.stats.record_pending_hit();
                return Lookup::Pending(Arc::clone(flight));
            }
            None => {}
        }
        if self.check_missing(&mut state, path) {
            self.stats.record_negative_hit();
            return Lookup::KnownMissing;
        }
        self.stats.record_miss();
        Lookup::Unknown
    }

    /// Returns the cached node at `path`, ignoring pending slots and markers.
    pub fn get(&self, path: &str) -> Option<NodeRef> {
        match self.state.lock().nodes.get(path) {
            Some(Slot::Ready(node)) => Some(Arc::clone(node)),
            _ => None,
        }
    }

    /// Looks up `path` and, if nothing is known, reserves it for the caller.
    pub fn reserve(&self, path: &str) -> Reservation<'_> {
        if !self.enabled {
            return Reservation::Leader(ReservationGuard {
                cache: self,
                path: path.to_string(),
                flight: Arc::new(Flight::default()),
                tracked: false,
                settled: false,
            });
        }

        let mut state = self.state.lock();
        match state.nodes.get(path) {
            Some(Slot::Ready(node)) => {
                self.stats.record_hit();
                return Reservation::Found(Arc::clone(node));
            }
            Some(Slot::Pending(flight)) => {
                self.stats.record_pending_hit();
                return Reservation::Waiter(Arc::clone(flight));
            }
            None => {}
        }
        if self.check_missing(&mut state, path) {
            self.stats.record_negative_hit();
            return Reservation::KnownMissing;
        }

        self.stats.record_miss();
        let flight = Arc::new(Flight::default());
        state
            .nodes
            .insert(path.to_string(), Slot::Pending(Arc::clone(&flight)));
        trace!(path, "reserved");
        Reservation::Leader(ReservationGuard {
            cache: self,
            path: path.to_string(),
            flight,
            tracked: true,
            settled: false,
        })
    }

    /// Adds or replaces the node at its path and clears any missing marker.
    pub fn insert(&self, node: Node) -> NodeRef {
        let node = Arc::new(node);
        if !self.enabled {
            return node;
        }
        let key = node.local_path();
        {
            let mut state = self.state.lock();
            state.missing.remove(&key);
            state.nodes.insert(key, Slot::Ready(Arc::clone(&node)));
        }
        self.stats.record_insert();
        self.notify_changed();
        node
    }

    /// Inserts the node unless one is already cached at its path.
    ///
    /// Returns whichever node ends up cached.
    pub fn insert_if_absent(&self, node: Node) -> NodeRef {
        if !self.enabled {
            return Arc::new(node);
        }
        let key = node.local_path();
        let node = {
            let mut state = self.state.lock();
            if let Some(Slot::Ready(existing)) = state.nodes.get(&key) {
                return Arc::clone(existing);
            }
            let node = Arc::new(node);
            state.missing.remove(&key);
            state.nodes.insert(key, Slot::Ready(Arc::clone(&node)));
            node
        };
        self.stats.record_insert();
        self.notify_changed();
        node
    }

    /// Records that `path` was confirmed absent, replacing any older marker.
    pub fn mark_missing(&self, path: &str) {
        if !self.enabled {
            return;
        }
        let mut state = self.state.lock();
        state.missing.insert(path.to_string(), Instant::now());
        trace!(path, "marked missing");
    }

    /// Removes the node and, for directories, every cached descendant.
    pub fn remove(&self, node: &Node) -> u64 {
        self.remove_path(&node.local_path())
    }

    /// Removes whatever is cached at `path` and below it.
    pub fn remove_path(&self, path: &str) -> u64 {
        if !self.enabled {
            return 0;
        }
        let removed = self.state.lock().remove_subtree(path);
        if removed > 0 {
            debug!(path, removed, "removed from cache");
            self.stats.record_evictions(removed);
            self.notify_changed();
        }
        removed
    }

    /// Drops a node whose metadata can no longer be trusted and forces its
    /// parent to be enumerated again. A parent that is not cached is ignored.
    pub fn invalidate(&self, node: &Node) {
        if !self.enabled {
            return;
        }
        let key = node.local_path();
        let removed = {
            let mut state = self.state.lock();
            let removed = state.remove_subtree(&key);
            if let Some(parent) = path::parent(&key)
                && let Some(Slot::Ready(parent)) = state.nodes.get(parent)
            {
                parent.state_mut().is_parsed = false;
            }
            removed
        };
        debug!(path = %key, "invalidated");
        self.stats.record_evictions(removed);
        self.notify_changed();
    }

    /// Moves the entry at `old` and all of its cached descendants to `new`.
    ///
    /// Anything cached at `new` beforehand is dropped. Returns the number of
    /// nodes moved.
    pub fn rename_subtree(&self, old: &str, new: &str) -> usize {
        if !self.enabled || old == new {
            return 0;
        }
        let (displaced, moved) = {
            let mut state = self.state.lock();
            let displaced = state.remove_subtree(new);
            let moved = state.move_subtree(&self.mapper, old, new);
            (displaced, moved)
        };
        debug!(old, new, moved, "renamed subtree");
        self.stats.record_evictions(displaced);
        self.notify_changed();
        moved
    }

    /// Moves `node` to `new_path`, cascading over its cached descendants.
    ///
    /// Works for uncached nodes too: their path fields are rewritten in place.
    pub fn relocate(&self, node: &NodeRef, new_path: &str) {
        let new_path = path::normalize(new_path);
        let old_path = node.local_path();
        if old_path == new_path {
            return;
        }
        if !self.enabled {
            node.relocate(&new_path, self.mapper.to_repository(&new_path));
            return;
        }
        let displaced = {
            let mut state = self.state.lock();
            let displaced = state.remove_subtree(&new_path);
            let cached_here = matches!(
                state.nodes.get(&old_path),
                Some(Slot::Ready(existing)) if Arc::ptr_eq(existing, node)
            );
            state.move_subtree(&self.mapper, &old_path, &new_path);
            if !cached_here {
                node.relocate(&new_path, self.mapper.to_repository(&new_path));
                state.missing.remove(&new_path);
                state
                    .nodes
                    .insert(new_path.clone(), Slot::Ready(Arc::clone(node)));
            }
            displaced
        };
        debug!(old = %old_path, new = %new_path, "relocated");
        self.stats.record_evictions(displaced);
        self.notify_changed();
    }

    /// Cached nodes that are immediate children of `dir`.
    pub fn immediate_children(&self, dir: &str) -> Vec<NodeRef> {
        self.state
            .lock()
            .nodes
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Ready(node) if path::is_immediate_child(key, dir) => Some(Arc::clone(node)),
                _ => None,
            })
            .collect()
    }

    /// Makes the cached children of `folder` match a fresh enumeration.
    ///
    /// Children missing from the cache are inserted, cached children absent
    /// from `items` are removed with their subtrees, and `folder` is marked
    /// parsed. Existing children keep their identity; with `refresh_idle` set
    /// their metadata is updated when they have no open handles and no
    /// unflushed data. Pending slots are never removed.
    ///
    /// Returns the children in enumeration order, or `None` if `folder` is
    /// no longer the node cached at its path.
    pub fn reconcile(
        &self,
        folder: &NodeRef,
        items: &[RemoteItem],
        refresh_idle: bool,
    ) -> Option<Vec<NodeRef>> {
        if !self.enabled {
            return None;
        }
        let folder_path = folder.local_path();
        let (children, inserted, removed) = {
            let mut state = self.state.lock();
            match state.nodes.get(&folder_path) {
                Some(Slot::Ready(cached)) if Arc::ptr_eq(cached, folder) => {}
                _ => return None,
            }

            let mut seen = HashSet::with_capacity(items.len());
            let mut children = Vec::with_capacity(items.len());
            let mut inserted = 0u64;
            for item in items {
                if is_synthetic(&item.name) {
                    continue;
                }
                let key = path::join(&folder_path, &item.name);
                if !seen.insert(key.clone()) {
                    continue;
                }
                state.missing.remove(&key);
                if let Some(Slot::Ready(existing)) = state.nodes.get(&key) {
                    if refresh_idle {
                        existing.refresh_from(item);
                    }
                    children.push(Arc::clone(existing));
                    continue;
                }
                let node = Arc::new(self.node_from_remote(&key, item));
                state.nodes.insert(key, Slot::Ready(Arc::clone(&node)));
                children.push(node);
                inserted += 1;
            }

            let stale: Vec<String> = state
                .nodes
                .iter()
                .filter(|(key, slot)| {
                    matches!(slot, Slot::Ready(_))
                        && path::is_immediate_child(key, &folder_path)
                        && !seen.contains(key.as_str())
                })
                .map(|(key, _)| key.clone())
                .collect();
            let mut removed = 0;
            for key in &stale {
                removed += state.remove_subtree(key);
            }

            folder.mark_parsed();
            (children, inserted, removed)
        };

        trace!(path = %folder_path, inserted, removed, "reconciled listing");
        for _ in 0..inserted {
            self.stats.record_insert();
        }
        self.stats.record_evictions(removed);
        if inserted > 0 || removed > 0 {
            self.notify_changed();
        }
        Some(children)
    }

    /// Drops every node, marker and pending slot.
    pub fn clear(&self) {
        let removed = {
            let mut state = self.state.lock();
            let removed = state.nodes.len() as u64;
            state.nodes.clear();
            state.missing.clear();
            removed
        };
        self.stats.record_evictions(removed);
        self.notify_changed();
    }

    /// Sorted paths of every cached node.
    pub fn snapshot(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .state
            .lock()
            .nodes
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(key, _)| key.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Number of cached nodes (pending slots excluded).
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .nodes
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of recorded missing markers, expired ones included.
    pub fn missing_len(&self) -> usize {
        self.state.lock().missing.len()
    }

    /// Registers interest in the next cache change.
    pub fn listen(&self) -> EventListener {
        self.changed.listen()
    }

    /// Monotonic counter bumped on every change notification.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn notify_changed(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.changed.notify(usize::MAX);
    }

    /// True if an unexpired marker exists; expired markers are dropped.
    fn check_missing(&self, state: &mut CacheState, path: &str) -> bool {
        match state.missing.get(path) {
            Some(at) if at.elapsed() < self.ttl => true,
            Some(_) => {
                state.missing.remove(path);
                false
            }
            None => false,
        }
    }

    fn settle_found(&self, path: &str, flight: &Arc<Flight>, node: Node) -> NodeRef {
        let node = {
            let mut state = self.state.lock();
            match state.nodes.get(path) {
                Some(Slot::Pending(ours)) if Arc::ptr_eq(ours, flight) => {
                    let node = Arc::new(node);
                    state.missing.remove(path);
                    state
                        .nodes
                        .insert(path.to_string(), Slot::Ready(Arc::clone(&node)));
                    node
                }
                Some(Slot::Ready(existing)) => return Arc::clone(existing),
                // Removed or renamed away while the fetch ran.
                _ => return Arc::new(node),
            }
        };
        self.stats.record_insert();
        self.notify_changed();
        node
    }

    fn settle_absent(&self, path: &str, flight: &Arc<Flight>) {
        let mut state = self.state.lock();
        if matches!(state.nodes.get(path), Some(Slot::Pending(ours)) if Arc::ptr_eq(ours, flight)) {
            state.nodes.remove(path);
        }
        if !state.nodes.contains_key(path) {
            state.missing.insert(path.to_string(), Instant::now());
        }
    }

    fn release(&self, path: &str, flight: &Arc<Flight>) {
        let mut state = self.state.lock();
        if matches!(state.nodes.get(path), Some(Slot::Pending(ours)) if Arc::ptr_eq(ours, flight)) {
            state.nodes.remove(path);
        }
    }
}

fn is_synthetic(name: &str) -> bool {
    name.is_empty() || name == "." || name == ".."
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{FileInfo, attributes};
    use chrono::Utc;
    use event_listener::Listener;
    use std::thread;

    fn cache_with_ttl(ttl: Duration) -> NodeCache {
        NodeCache::new(&CacheConfig::default().ttl(ttl), PathMapper::new("/dav"))
    }

    fn dir(path: &str) -> Node {
        Node::new(
            path,
            PathMapper::new("/dav").to_repository(path),
            FileInfo::new(attributes::DIRECTORY),
        )
    }

    fn file(path: &str) -> Node {
        Node::new(
            path,
            PathMapper::new("/dav").to_repository(path),
            FileInfo::new(attributes::ARCHIVE),
        )
    }

    fn item(name: &str, is_collection: bool) -> RemoteItem {
        RemoteItem {
            path: format!("/dav/{name}"),
            name: name.to_string(),
            is_collection,
            content_length: 0,
            created: Utc::now(),
            modified: Utc::now(),
        }
    }

    #[test]
    fn test_lookup_unknown_then_found() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        assert!(matches!(cache.lookup("/a"), Lookup::Unknown));

        cache.insert(file("/a"));
        assert!(matches!(cache.lookup("/a"), Lookup::Found(_)));
        assert_eq!(cache.stats().snapshot().hits, 1);
        assert_eq!(cache.stats().snapshot().misses, 1);
    }

    #[test]
    fn test_negative_entry_expires() {
        let cache = cache_with_ttl(Duration::from_millis(100));
        cache.mark_missing("/gone");
        assert!(matches!(cache.lookup("/gone"), Lookup::KnownMissing));

        thread::sleep(Duration::from_millis(150));
        assert!(matches!(cache.lookup("/gone"), Lookup::Unknown));
        assert_eq!(cache.missing_len(), 0);
    }

    #[test]
    fn test_insert_clears_missing_marker() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        cache.mark_missing("/a");
        cache.insert(file("/a"));
        assert!(matches!(cache.lookup("/a"), Lookup::Found(_)));
        assert_eq!(cache.missing_len(), 0);
    }

    #[test]
    fn test_insert_if_absent_keeps_existing() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        let first = cache.insert(file("/a"));
        let second = cache.insert_if_absent(file("/a"));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_remove_directory_cascades() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        let a = cache.insert(dir("/A"));
        cache.insert(file("/A/x"));
        cache.insert(file("/A/y"));
        cache.insert(file("/AB"));

        assert_eq!(cache.remove(&a), 3);
        assert_eq!(cache.snapshot(), vec!["/AB".to_string()]);
    }

    #[test]
    fn test_remove_file_only_removes_itself() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        cache.insert(dir("/A"));
        let x = cache.insert(file("/A/x"));
        assert_eq!(cache.remove(&x), 1);
        assert_eq!(cache.snapshot(), vec!["/A".to_string()]);
    }

    #[test]
    fn test_rename_subtree() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        cache.insert(dir("/A"));
        cache.insert(file("/A/x"));
        cache.insert(dir("/A/y"));
        cache.insert(file("/A/y/z"));

        cache.rename_subtree("/A", "/B");

        assert_eq!(cache.snapshot(), vec!["/B", "/B/x", "/B/y", "/B/y/z"]);
        for key in cache.snapshot() {
            let node = cache.get(&key).unwrap();
            let state = node.state();
            assert_eq!(state.local_path, key);
            assert_eq!(state.repository_path, format!("/dav{key}"));
        }
    }

    #[test]
    fn test_relocate_moves_node_and_children() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        let a = cache.insert(dir("/A"));
        let x = cache.insert(file("/A/x"));
        x.state_mut().content = Some(b"keep".to_vec());

        cache.relocate(&a, "/B");

        assert!(Arc::ptr_eq(&cache.get("/B").unwrap(), &a));
        assert!(Arc::ptr_eq(&cache.get("/B/x").unwrap(), &x));
        assert_eq!(x.state().content.as_deref(), Some(&b"keep"[..]));
        assert!(cache.get("/A").is_none());
    }

    #[test]
    fn test_invalidate_flags_parent() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        let parent = cache.insert(dir("/A"));
        parent.mark_parsed();
        let child = cache.insert(file("/A/x"));

        cache.invalidate(&child);
        assert!(cache.get("/A/x").is_none());
        assert!(!parent.is_parsed());
    }

    #[test]
    fn test_invalidate_without_cached_parent() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        let child = cache.insert(file("/A/x"));
        cache.invalidate(&child);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reservation_exclusive() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        let Reservation::Leader(guard) = cache.reserve("/a") else {
            panic!("first caller must lead");
        };
        let Reservation::Waiter(flight) = cache.reserve("/a") else {
            panic!("second caller must wait");
        };
        assert!(matches!(cache.lookup("/a"), Lookup::Pending(_)));
        assert!(cache.get("/a").is_none());

        let node = guard.fulfil(file("/a"));
        match flight.wait(Duration::from_secs(1)) {
            Some(FlightOutcome::Found(found)) => assert!(Arc::ptr_eq(&found, &node)),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(matches!(cache.lookup("/a"), Lookup::Found(_)));
    }

    #[test]
    fn test_reservation_waiter_across_threads() {
        let cache = Arc::new(cache_with_ttl(Duration::from_secs(5)));
        let Reservation::Leader(guard) = cache.reserve("/a") else {
            panic!("first caller must lead");
        };

        let waiter = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || match cache.reserve("/a") {
                Reservation::Waiter(flight) => flight.wait(Duration::from_secs(5)),
                Reservation::Found(node) => Some(FlightOutcome::Found(node)),
                _ => None,
            })
        };

        thread::sleep(Duration::from_millis(20));
        let node = guard.fulfil(file("/a"));
        match waiter.join().unwrap() {
            Some(FlightOutcome::Found(found)) => assert!(Arc::ptr_eq(&found, &node)),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_reservation_absent_records_marker() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        let Reservation::Leader(guard) = cache.reserve("/a") else {
            panic!("first caller must lead");
        };
        guard.absent();
        assert!(matches!(cache.reserve("/a"), Reservation::KnownMissing));
    }

    #[test]
    fn test_dropped_reservation_is_released() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        let flight = {
            let Reservation::Leader(guard) = cache.reserve("/a") else {
                panic!("first caller must lead");
            };
            let Reservation::Waiter(flight) = cache.reserve("/a") else {
                panic!("second caller must wait");
            };
            drop(guard);
            flight
        };
        assert!(matches!(
            flight.wait(Duration::from_millis(10)),
            Some(FlightOutcome::Failed(_))
        ));
        assert!(matches!(cache.lookup("/a"), Lookup::Unknown));
        assert_eq!(cache.missing_len(), 0);
    }

    #[test]
    fn test_fulfil_adopts_concurrent_insert() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        let Reservation::Leader(guard) = cache.reserve("/a") else {
            panic!("first caller must lead");
        };
        let inserted = cache.insert(file("/a"));
        let fulfilled = guard.fulfil(file("/a"));
        assert!(Arc::ptr_eq(&inserted, &fulfilled));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_reconcile_adds_and_removes() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        let folder = cache.insert(dir("/"));
        let x = cache.insert(file("/x"));
        cache.insert(dir("/y"));
        cache.insert(file("/y/deep"));

        let children = cache
            .reconcile(&folder, &[item("x", false), item("z", false)], false)
            .unwrap();

        assert_eq!(children.len(), 2);
        assert!(Arc::ptr_eq(&children[0], &x));
        assert_eq!(cache.snapshot(), vec!["/", "/x", "/z"]);
        assert!(folder.is_parsed());
    }

    #[test]
    fn test_reconcile_skips_pending_and_stale_folder() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        let folder = cache.insert(dir("/"));
        let Reservation::Leader(_guard) = cache.reserve("/pending") else {
            panic!("first caller must lead");
        };
        cache.reconcile(&folder, &[], false).unwrap();
        assert!(matches!(cache.lookup("/pending"), Lookup::Pending(_)));

        let detached = Arc::new(dir("/"));
        assert!(cache.reconcile(&detached, &[], false).is_none());
    }

    #[test]
    fn test_disabled_mode() {
        let cache = NodeCache::new(&CacheConfig::disabled(), PathMapper::new("/dav"));
        cache.insert(file("/a"));
        cache.mark_missing("/b");
        assert!(matches!(cache.lookup("/a"), Lookup::Unknown));
        assert!(matches!(cache.lookup("/b"), Lookup::Unknown));
        assert!(cache.is_empty());

        let Reservation::Leader(guard) = cache.reserve("/a") else {
            panic!("disabled cache always leads");
        };
        guard.fulfil(file("/a"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_change_notification() {
        let cache = Arc::new(cache_with_ttl(Duration::from_secs(5)));
        let before = cache.generation();
        let listener = cache.listen();

        let writer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.insert(file("/a"));
            })
        };

        assert!(listener.wait_timeout(Duration::from_secs(5)).is_some());
        writer.join().unwrap();
        assert!(cache.generation() > before);
    }
}
