//! Lazily rewritten per-slot GPU bindings.
//!
//! Resource owners (the bloom kernel, the light buffers) keep their
//! parameters in a [`DeferredDescriptorCache`]. Changing a parameter only
//! marks every slot dirty; the slot's bindings are rewritten the next time
//! that slot is bound for drawing. A slot still in flight on the GPU is
//! never touched, because nothing binds it until its fence has been waited.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::error::FrameResult;

struct CacheState<P> {
    params: P,
    dirty: Vec<bool>,
    rewrites: Vec<u64>,
}

/// Parameters of type `P` plus one dirty flag per frame slot.
///
/// ```
/// use renderer_frame::DeferredDescriptorCache;
///
/// let cache = DeferredDescriptorCache::new(1.0_f32, 2);
/// assert!(cache.set(2.0));
/// assert!(!cache.set(2.0));
///
/// let rewrote = cache.bind(0, |sigma| {
///     assert_eq!(*sigma, 2.0);
///     Ok(())
/// }).unwrap();
/// assert!(rewrote);
/// assert!(!cache.is_dirty(0));
/// assert!(cache.is_dirty(1));
/// ```
pub struct DeferredDescriptorCache<P> {
    state: Mutex<CacheState<P>>,
}

impl<P: PartialEq> DeferredDescriptorCache<P> {
    /// Creates the cache with every slot dirty, so the first bind of each
    /// slot writes its bindings.
    pub fn new(params: P, slots: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                params,
                dirty: vec![true; slots],
                rewrites: vec![0; slots],
            }),
        }
    }

    // The guarded data is plain values and flags, consistent after any
    // panic, so a poisoned lock is taken over.
    fn lock(&self) -> MutexGuard<'_, CacheState<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn slots(&self) -> usize {
        self.lock().dirty.len()
    }

    /// Replaces the parameters. Returns false, leaving every flag alone,
    /// when `params` equals the current value.
    pub fn set(&self, params: P) -> bool {
        let mut state = self.lock();
        if state.params == params {
            return false;
        }
        state.params = params;
        state.dirty.fill(true);
        true
    }

    /// Edits the parameters in place. Slots are only dirtied when the edit
    /// changed something.
    pub fn update<F>(&self, edit: F) -> bool
    where
        P: Clone,
        F: FnOnce(&mut P),
    {
        let mut state = self.lock();
        let before = state.params.clone();
        edit(&mut state.params);
        if state.params == before {
            return false;
        }
        state.dirty.fill(true);
        true
    }

    /// Rewrites `slot`'s bindings with `write` if the slot is dirty.
    ///
    /// Returns whether a rewrite happened. If `write` fails the slot stays
    /// dirty and the error is returned.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range.
    pub fn bind<F>(&self, slot: usize, write: F) -> FrameResult<bool>
    where
        F: FnOnce(&P) -> FrameResult<()>,
    {
        let mut state = self.lock();
        if !state.dirty[slot] {
            return Ok(false);
        }
        write(&state.params)?;
        state.dirty[slot] = false;
        state.rewrites[slot] += 1;
        trace!("Rewrote bindings for slot {}", slot);
        Ok(true)
    }

    pub fn is_dirty(&self, slot: usize) -> bool {
        self.lock().dirty.get(slot).copied().unwrap_or(false)
    }

    /// How many times `slot` has been rewritten.
    pub fn rewrite_count(&self, slot: usize) -> u64 {
        self.lock().rewrites.get(slot).copied().unwrap_or(0)
    }

    /// Forces a rewrite of every slot, e.g. after the bound resources were
    /// recreated.
    pub fn mark_all_dirty(&self) {
        self.lock().dirty.fill(true);
    }

    /// Copy of the current parameters.
    pub fn get(&self) -> P
    where
        P: Clone,
    {
        self.lock().params.clone()
    }
}

impl<P: fmt::Debug> fmt::Debug for DeferredDescriptorCache<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("DeferredDescriptorCache")
            .field("params", &state.params)
            .field("dirty", &state.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameError;

    #[test]
    fn test_cache_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DeferredDescriptorCache<Vec<f32>>>();
    }

    #[test]
    fn test_new_cache_is_dirty_everywhere() {
        let cache = DeferredDescriptorCache::new(0_u32, 3);
        assert_eq!(cache.slots(), 3);
        assert!((0..3).all(|slot| cache.is_dirty(slot)));
    }

    #[test]
    fn test_same_value_twice_rewrites_once() {
        let cache = DeferredDescriptorCache::new(1_u32, 2);
        cache.bind(0, |_| Ok(())).unwrap();
        assert_eq!(cache.rewrite_count(0), 1);

        assert!(cache.set(5));
        assert!(!cache.set(5));
        assert!(cache.bind(0, |_| Ok(())).unwrap());
        assert!(!cache.bind(0, |_| Ok(())).unwrap());
        assert_eq!(cache.rewrite_count(0), 2);
    }

    #[test]
    fn test_bind_only_clears_its_slot() {
        let cache = DeferredDescriptorCache::new(String::from("a"), 2);
        cache.bind(0, |_| Ok(())).unwrap();
        cache.bind(1, |_| Ok(())).unwrap();

        // Slot 0 in flight, slot 1 recording: the change reaches both flags
        // but only slot 1's bind consumes one
        cache.set("b".to_string());
        let mut seen = None;
        cache
            .bind(1, |p| {
                seen = Some(p.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen.as_deref(), Some("b"));
        assert!(!cache.is_dirty(1));
        assert!(cache.is_dirty(0));
        assert_eq!(cache.rewrite_count(0), 1);
    }

    #[test]
    fn test_failed_write_keeps_slot_dirty() {
        let cache = DeferredDescriptorCache::new(1_u8, 1);
        let err = cache
            .bind(0, |_| Err(FrameError::Config("no buffer".into())))
            .unwrap_err();
        assert!(matches!(err, FrameError::Config(_)));
        assert!(cache.is_dirty(0));
        assert_eq!(cache.rewrite_count(0), 0);
    }

    #[test]
    fn test_update_detects_noop_edits() {
        let cache = DeferredDescriptorCache::new(vec![1.0_f32, 2.0], 2);
        cache.bind(0, |_| Ok(())).unwrap();
        cache.bind(1, |_| Ok(())).unwrap();

        assert!(!cache.update(|v| v[0] = 1.0));
        assert!(!cache.is_dirty(0));

        assert!(cache.update(|v| v.push(3.0)));
        assert!(cache.is_dirty(0) && cache.is_dirty(1));
        assert_eq!(cache.get().len(), 3);
    }

    #[test]
    fn test_mark_all_dirty() {
        let cache = DeferredDescriptorCache::new((), 2);
        cache.bind(0, |_| Ok(())).unwrap();
        cache.mark_all_dirty();
        assert!(cache.is_dirty(0));
    }
}
