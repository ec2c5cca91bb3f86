//! LRU texture unit binding
//!
//! Maps textures onto the limited set of hardware texture units. A texture
//! that is already resident is reused without touching the driver; a new
//! texture takes the lowest free unit, or evicts the least recently used one.
//!
//! Each occupied unit holds exactly one texture and each texture occupies at
//! most one unit. The recency clock is owned by the cache and advances on
//! every bind.

use crate::render::api::RenderBackend;
use crate::render::resources::{ResourceToken, Texture2D};
use crate::render::{RenderError, RenderResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BoundTexture {
    texture: ResourceToken,
    last_used: u64,
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextureCacheStats {
    /// Texture was already resident
    pub hits: u64,
    /// Texture was placed in a free unit
    pub misses: u64,
    /// Texture displaced the least recently used one
    pub evictions: u64,
}

/// LRU mapping from texture identity to texture unit
#[derive(Debug, Clone)]
pub struct TextureBindingCache {
    units: Vec<Option<BoundTexture>>,
    clock: u64,
    stats: TextureCacheStats,
}

impl TextureBindingCache {
    /// Cache over `capacity` texture units
    pub fn new(capacity: usize) -> Self {
        Self {
            units: vec![None; capacity],
            clock: 0,
            stats: TextureCacheStats::default(),
        }
    }

    /// Number of texture units
    pub fn capacity(&self) -> usize {
        self.units.len()
    }

    /// Make `texture` resident and return its unit
    ///
    /// The driver is only called on a miss or an eviction.
    pub fn bind(&mut self, backend: &mut dyn RenderBackend, texture: &Texture2D) -> RenderResult<usize> {
        if self.units.is_empty() {
            return Err(RenderError::State {
                operation: "bind_texture",
                reason: "device exposes no texture units".to_string(),
            });
        }

        self.clock += 1;
        let token = texture.token();

        if let Some(unit) = self.unit_of(token) {
            if let Some(bound) = self.units[unit].as_mut() {
                bound.last_used = self.clock;
            }
            self.stats.hits += 1;
            return Ok(unit);
        }

        let unit = match self.units.iter().position(Option::is_none) {
            Some(free) => {
                self.stats.misses += 1;
                free
            }
            None => {
                let victim = self.least_recently_used();
                backend.unbind_texture(victim)?;
                self.units[victim] = None;
                self.stats.evictions += 1;
                log::trace!("Evicted texture unit {victim}");
                victim
            }
        };

        backend.bind_texture(texture, unit)?;
        self.units[unit] = Some(BoundTexture { texture: token, last_used: self.clock });
        Ok(unit)
    }

    /// Unit currently holding `texture`
    pub fn unit_of(&self, texture: ResourceToken) -> Option<usize> {
        self.units
            .iter()
            .position(|slot| slot.is_some_and(|bound| bound.texture == texture))
    }

    /// Texture resident in `unit`
    pub fn texture_in(&self, unit: usize) -> Option<ResourceToken> {
        self.units.get(unit).copied().flatten().map(|bound| bound.texture)
    }

    /// Hit/miss counters
    pub fn stats(&self) -> TextureCacheStats {
        self.stats
    }

    /// Forget every mapping without touching the driver
    pub fn reset(&mut self) {
        self.units.iter_mut().for_each(|slot| *slot = None);
    }

    // Oldest recency wins; ties go to the lowest unit
    fn least_recently_used(&self) -> usize {
        self.units
            .iter()
            .enumerate()
            .min_by_key(|(_, slot)| slot.map_or(0, |bound| bound.last_used))
            .map_or(0, |(unit, _)| unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendKind, RenderParameters};
    use crate::render::api::DeviceCapabilities;
    use crate::render::backends::headless::{DriverCall, HeadlessBackend};
    use crate::render::resources::{TextureDescriptor, TextureFormat};
    use std::collections::HashSet;
    use std::rc::Rc;

    fn backend_with_units(units: usize) -> HeadlessBackend {
        let mut backend = HeadlessBackend::with_capabilities(DeviceCapabilities {
            max_active_textures: units,
            max_render_targets: 1,
        });
        backend
            .initialize(&RenderParameters::new(BackendKind::Headless))
            .expect("headless init");
        backend
    }

    fn textures(backend: &mut HeadlessBackend, count: usize) -> Vec<Rc<Texture2D>> {
        let texel = [255u8; 4];
        (0..count)
            .map(|_| {
                backend
                    .resource_creator()
                    .create_texture_2d(&TextureDescriptor::immutable(1, 1, TextureFormat::Rgba8, &texel))
                    .expect("texture")
            })
            .collect()
    }

    fn assert_bijection(cache: &TextureBindingCache) {
        let mut seen = HashSet::new();
        for unit in 0..cache.capacity() {
            if let Some(token) = cache.texture_in(unit) {
                assert!(seen.insert(token), "texture resident in two units");
                assert_eq!(cache.unit_of(token), Some(unit));
            }
        }
    }

    #[test]
    fn test_hit_does_not_rebind() {
        let mut backend = backend_with_units(4);
        let tex = textures(&mut backend, 1);
        let mut cache = TextureBindingCache::new(4);

        let first = cache.bind(&mut backend, &tex[0]).unwrap();
        let second = cache.bind(&mut backend, &tex[0]).unwrap();

        assert_eq!(first, 0);
        assert_eq!(first, second);
        assert_eq!(backend.stats().texture_binds, 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_reset_forgets_units_without_driver_calls() {
        let mut backend = backend_with_units(4);
        let tex = textures(&mut backend, 2);
        let mut cache = TextureBindingCache::new(4);
        cache.bind(&mut backend, &tex[0]).unwrap();
        cache.bind(&mut backend, &tex[1]).unwrap();
        let calls = backend.call_log().len();

        cache.reset();
        assert_eq!(backend.call_log().len(), calls);
        assert!((0..cache.capacity()).all(|unit| cache.texture_in(unit).is_none()));

        // Residency is unknown again, so the next bind reaches the driver
        assert_eq!(cache.bind(&mut backend, &tex[1]).unwrap(), 0);
        assert_eq!(backend.stats().texture_binds, 3);
    }

    #[test]
    fn test_lowest_free_unit_is_used() {
        let mut backend = backend_with_units(4);
        let tex = textures(&mut backend, 3);
        let mut cache = TextureBindingCache::new(4);

        let units: Vec<usize> = tex.iter().map(|t| cache.bind(&mut backend, t).unwrap()).collect();
        assert_eq!(units, vec![0, 1, 2]);
    }

    #[test]
    fn test_capacity_plus_one_evicts_first_bound() {
        let capacity = 4;
        let mut backend = backend_with_units(capacity);
        let tex = textures(&mut backend, capacity + 1);
        let mut cache = TextureBindingCache::new(capacity);

        for t in &tex[..capacity] {
            cache.bind(&mut backend, t).unwrap();
        }
        let unit = cache.bind(&mut backend, &tex[capacity]).unwrap();

        assert_eq!(unit, 0);
        assert_eq!(cache.unit_of(tex[0].token()), None);
        for t in &tex[1..] {
            assert!(cache.unit_of(t.token()).is_some());
        }
        assert_eq!(cache.stats().evictions, 1);

        let calls = backend.calls();
        let n = calls.len();
        assert_eq!(calls[n - 2], DriverCall::UnbindTexture { unit: 0 });
        assert_eq!(calls[n - 1], DriverCall::BindTexture { unit: 0, texture: tex[capacity].token() });
    }

    #[test]
    fn test_refreshed_texture_survives_eviction() {
        let mut backend = backend_with_units(2);
        let tex = textures(&mut backend, 3);
        let mut cache = TextureBindingCache::new(2);

        cache.bind(&mut backend, &tex[0]).unwrap();
        cache.bind(&mut backend, &tex[1]).unwrap();
        cache.bind(&mut backend, &tex[0]).unwrap();
        let unit = cache.bind(&mut backend, &tex[2]).unwrap();

        assert_eq!(unit, 1);
        assert_eq!(cache.unit_of(tex[0].token()), Some(0));
        assert_eq!(cache.unit_of(tex[1].token()), None);
    }

    #[test]
    fn test_bijection_under_churn() {
        let mut backend = backend_with_units(3);
        let tex = textures(&mut backend, 7);
        let mut cache = TextureBindingCache::new(3);

        let sequence = [0, 1, 2, 3, 0, 4, 4, 5, 1, 6, 2, 2, 0, 3, 5, 6, 1];
        for &i in &sequence {
            let unit = cache.bind(&mut backend, &tex[i]).unwrap();
            assert_eq!(cache.texture_in(unit), Some(tex[i].token()));
            assert_bijection(&cache);
        }
    }

    #[test]
    fn test_zero_capacity_is_state_error() {
        let mut backend = backend_with_units(1);
        let tex = textures(&mut backend, 1);
        let mut cache = TextureBindingCache::new(0);

        assert!(matches!(cache.bind(&mut backend, &tex[0]), Err(RenderError::State { .. })));
    }
}
