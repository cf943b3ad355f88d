//! Read-through caching decorator.
//!
//! Three bounded LRU caches sit in one struct behind one mutex:
//!
//! - term → id for positive lookups and allocations
//! - id → term for reverse lookups
//! - known-absent terms, populated when the wrapped table answers
//!   [`NodeId::DOES_NOT_EXIST`]
//!
//! The lock is held across delegation, so a miss and the allocation that
//! would invalidate it cannot interleave. Only pointer identifiers are
//! cached; inline and special identifiers pass straight through.

use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use lru::LruCache;
use parking_lot::Mutex;
use tripledb_types::{NodeId, StoreConfig, Term};

use crate::{
    error::{Error, Result},
    table::{NodeIter, NodeTable},
};

/// Hit and miss counters of a [`CachingNodeTable`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from a cache, including negative hits.
    pub hits: u64,
    /// Lookups delegated to the wrapped table.
    pub misses: u64,
    /// Entries currently held in the term → id cache.
    pub node_to_id_len: usize,
    /// Entries currently held in the id → term cache.
    pub id_to_node_len: usize,
    /// Entries currently held in the known-absent cache.
    pub node_miss_len: usize,
}

struct CacheState {
    term_to_id: LruCache<Term, NodeId>,
    id_to_term: LruCache<NodeId, Term>,
    absent: LruCache<Term, ()>,
}

impl CacheState {
    fn remember(&mut self, term: &Term, id: NodeId) {
        if id.is_pointer() {
            self.term_to_id.put(term.clone(), id);
            self.id_to_term.put(id, term.clone());
        }
    }
}

fn capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)
}

/// Node table decorator adding positive and negative caching.
pub struct CachingNodeTable {
    inner: Arc<dyn NodeTable>,
    state: Mutex<Option<CacheState>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachingNodeTable {
    /// Wraps `inner` with caches sized from `config`.
    pub fn new(inner: Arc<dyn NodeTable>, config: &StoreConfig) -> Self {
        let state = CacheState {
            term_to_id: LruCache::new(capacity(config.node_to_id_cache_size)),
            id_to_term: LruCache::new(capacity(config.id_to_node_cache_size)),
            absent: LruCache::new(capacity(config.node_miss_cache_size)),
        };
        Self {
            inner,
            state: Mutex::new(Some(state)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns hit/miss counters and current cache occupancy.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let (node_to_id_len, id_to_node_len, node_miss_len) = state
            .as_ref()
            .map_or((0, 0, 0), |s| (s.term_to_id.len(), s.id_to_term.len(), s.absent.len()));
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            node_to_id_len,
            id_to_node_len,
            node_miss_len,
        }
    }

    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
}

impl NodeTable for CachingNodeTable {
    fn get_or_allocate(&self, term: &Term) -> Result<NodeId> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(Error::Closed)?;
        if let Some(id) = state.term_to_id.get(term) {
            self.hit();
            return Ok(*id);
        }
        self.miss();
        let id = self.inner.get_or_allocate(term)?;
        state.absent.pop(term);
        state.remember(term, id);
        Ok(id)
    }

    fn lookup_id(&self, term: &Term) -> Result<NodeId> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(Error::Closed)?;
        if let Some(id) = state.term_to_id.get(term) {
            self.hit();
            return Ok(*id);
        }
        if state.absent.get(term).is_some() {
            self.hit();
            return Ok(NodeId::DOES_NOT_EXIST);
        }
        self.miss();
        let id = self.inner.lookup_id(term)?;
        if id.is_does_not_exist() {
            state.absent.put(term.clone(), ());
        } else {
            state.remember(term, id);
        }
        Ok(id)
    }

    fn lookup_term(&self, id: NodeId) -> Result<Option<Term>> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(Error::Closed)?;
        if let Some(term) = state.id_to_term.get(&id) {
            self.hit();
            return Ok(Some(term.clone()));
        }
        self.miss();
        let term = self.inner.lookup_term(id)?;
        if let Some(term) = &term {
            state.remember(term, id);
        }
        Ok(term)
    }

    fn is_empty(&self) -> Result<bool> {
        let guard = self.state.lock();
        guard.as_ref().ok_or(Error::Closed)?;
        self.inner.is_empty()
    }

    fn all(&self) -> Result<NodeIter<'_>> {
        if self.state.lock().is_none() {
            return Err(Error::Closed);
        }
        self.inner.all()
    }

    fn allocation_offset(&self) -> u64 {
        self.inner.allocation_offset()
    }

    fn sync(&self) -> Result<()> {
        let guard = self.state.lock();
        guard.as_ref().ok_or(Error::Closed)?;
        self.inner.sync()
    }

    fn close(&self) -> Result<()> {
        let taken = self.state.lock().take();
        match taken {
            Some(_) => self.inner.close(),
            None => Ok(()),
        }
    }
}
