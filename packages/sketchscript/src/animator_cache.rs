//! Per-object animator cache.
//!
//! Maps a shape identity to the animator its factory produced on the first
//! tick that saw it. Entries are only written for non-unit animators, so a
//! factory bound later still reaches shapes that were skipped earlier.

use std::collections::HashMap;

use rhai::Dynamic;

use crate::canvas::ShapeId;

#[derive(Debug, Default)]
pub struct AnimatorCache {
    animators: HashMap<ShapeId, Dynamic>,
}

impl AnimatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached animator for `id`, or build one with `factory`.
    ///
    /// A factory yielding `()` (or `None`) caches nothing. Factory errors are
    /// passed through and leave the cache unchanged.
    pub fn get_or_create<E, F>(&mut self, id: ShapeId, factory: F) -> Result<Option<Dynamic>, E>
    where
        F: FnOnce() -> Result<Option<Dynamic>, E>,
    {
        if let Some(animator) = self.animators.get(&id) {
            return Ok(Some(animator.clone()));
        }

        match factory()? {
            Some(animator) if !animator.is_unit() => {
                self.animators.insert(id, animator.clone());
                Ok(Some(animator))
            }
            _ => Ok(None),
        }
    }

    /// Store the animator state produced by an `update` call.
    /// Ignored if the entry was evicted in the meantime.
    pub fn replace(&mut self, id: ShapeId, animator: Dynamic) {
        if let Some(slot) = self.animators.get_mut(&id) {
            *slot = animator;
        }
    }

    pub fn get(&self, id: ShapeId) -> Option<&Dynamic> {
        self.animators.get(&id)
    }

    pub fn contains(&self, id: ShapeId) -> bool {
        self.animators.contains_key(&id)
    }

    /// Drop the entry for a shape that left the canvas.
    pub fn evict(&mut self, id: ShapeId) -> bool {
        self.animators.remove(&id).is_some()
    }

    pub fn clear(&mut self) {
        self.animators.clear();
    }

    pub fn len(&self) -> usize {
        self.animators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.animators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn make(value: i64) -> Result<Option<Dynamic>, Infallible> {
        Ok(Some(Dynamic::from(value)))
    }

    #[test]
    fn test_factory_runs_once_per_shape() {
        let mut cache = AnimatorCache::new();
        let mut calls = 0;

        for _ in 0..5 {
            let animator = cache
                .get_or_create(ShapeId(1), || {
                    calls += 1;
                    make(10)
                })
                .unwrap();
            assert_eq!(animator.unwrap().as_int().unwrap(), 10);
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_unit_result_is_not_cached() {
        let mut cache = AnimatorCache::new();
        let none = cache
            .get_or_create(ShapeId(1), || Ok::<_, Infallible>(Some(Dynamic::UNIT)))
            .unwrap();
        assert!(none.is_none());
        assert!(!cache.contains(ShapeId(1)));

        let later = cache.get_or_create(ShapeId(1), || make(3)).unwrap();
        assert!(later.is_some());
        assert!(cache.contains(ShapeId(1)));
    }

    #[test]
    fn test_factory_error_leaves_cache_untouched() {
        let mut cache = AnimatorCache::new();
        let result = cache.get_or_create(ShapeId(7), || Err::<Option<Dynamic>, _>("boom"));
        assert_eq!(result.unwrap_err(), "boom");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evict() {
        let mut cache = AnimatorCache::new();
        for id in 1..=3 {
            cache.get_or_create(ShapeId(id), || make(id as i64)).unwrap();
        }

        assert!(cache.evict(ShapeId(2)));
        assert!(!cache.evict(ShapeId(2)));

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(ShapeId(3)));

        // Replacing an evicted entry does not resurrect it.
        cache.replace(ShapeId(1), Dynamic::from(99_i64));
        assert!(!cache.contains(ShapeId(1)));
    }
}
