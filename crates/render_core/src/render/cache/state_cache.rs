//! Pipeline state de-duplication
//!
//! Remembers the last value committed to the driver for each
//! [`StateCategory`]. Repeating a value costs nothing; the first value for a
//! category always reaches the driver, since the driver's initial state is
//! never assumed.

use crate::render::api::{PipelineState, RenderBackend, StateCategory};
use crate::render::RenderResult;

/// Last committed value per pipeline state category
#[derive(Debug, Clone, Default)]
pub struct PipelineStateCache {
    slots: [Option<PipelineState>; StateCategory::COUNT],
    redundant: u64,
}

impl PipelineStateCache {
    /// Cache with every category unknown
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit `state`, skipping the driver call if it is already current
    ///
    /// Returns whether the driver was called. A failed driver call leaves
    /// the category unchanged.
    pub fn set(&mut self, backend: &mut dyn RenderBackend, state: PipelineState) -> RenderResult<bool> {
        let slot = &mut self.slots[state.category().index()];
        if *slot == Some(state) {
            self.redundant += 1;
            return Ok(false);
        }

        backend.apply_state(state)?;
        *slot = Some(state);
        log::trace!("Pipeline state committed: {state:?}");
        Ok(true)
    }

    /// Value last committed for a category
    pub fn current(&self, category: StateCategory) -> Option<PipelineState> {
        self.slots[category.index()]
    }

    /// Number of calls absorbed by the cache
    pub fn redundant_calls(&self) -> u64 {
        self.redundant
    }

    /// Forget every category; the next `set` of each reaches the driver
    pub fn invalidate(&mut self) {
        self.slots = [None; StateCategory::COUNT];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendKind, RenderParameters};
    use crate::render::api::{BlendFactor, DepthFunc};
    use crate::render::backends::headless::HeadlessBackend;

    fn backend() -> HeadlessBackend {
        let mut backend = HeadlessBackend::new();
        backend
            .initialize(&RenderParameters::new(BackendKind::Headless))
            .expect("headless init");
        backend
    }

    #[test]
    fn test_identical_value_issues_one_driver_call() {
        let mut backend = backend();
        let mut cache = PipelineStateCache::new();

        assert!(cache.set(&mut backend, PipelineState::DepthTest(true)).unwrap());
        assert!(!cache.set(&mut backend, PipelineState::DepthTest(true)).unwrap());

        assert_eq!(backend.stats().state_changes, 1);
        assert_eq!(cache.redundant_calls(), 1);
    }

    #[test]
    fn test_alternating_values_issue_three_driver_calls() {
        let mut backend = backend();
        let mut cache = PipelineStateCache::new();

        cache.set(&mut backend, PipelineState::DepthFunc(DepthFunc::Less)).unwrap();
        cache.set(&mut backend, PipelineState::DepthFunc(DepthFunc::Greater)).unwrap();
        cache.set(&mut backend, PipelineState::DepthFunc(DepthFunc::Less)).unwrap();

        assert_eq!(backend.stats().state_changes, 3);
    }

    #[test]
    fn test_first_set_always_reaches_driver() {
        let mut backend = backend();
        let mut cache = PipelineStateCache::new();

        // Matches the usual driver default but is still issued
        cache.set(&mut backend, PipelineState::Blending(false)).unwrap();
        cache.set(
            &mut backend,
            PipelineState::BlendFactor { src: BlendFactor::One, dst: BlendFactor::Zero },
        )
        .unwrap();

        assert_eq!(backend.stats().state_changes, 2);
        assert_eq!(cache.current(StateCategory::Blending), Some(PipelineState::Blending(false)));
    }

    #[test]
    fn test_invalidate_forces_reissue() {
        let mut backend = backend();
        let mut cache = PipelineStateCache::new();

        cache.set(&mut backend, PipelineState::DepthWrite(true)).unwrap();
        cache.invalidate();
        cache.set(&mut backend, PipelineState::DepthWrite(true)).unwrap();

        assert_eq!(backend.stats().state_changes, 2);
    }
}
