// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Features and their registry.
//!
//! A feature is a piece of per-frame decoding logic: it validates the syntax of the incoming
//! parameter block, then keeps whatever state it derives from it for the packets and sub-pipelines
//! to consume during the rest of the frame.

use std::any::Any;

use crate::decoder::DecodeSettings;
use crate::decoder::PipelineError;
use crate::decoder::PipelineResult;

/// Identifier of a feature within a [`FeatureManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureId(pub u32);

impl FeatureId {
    pub const BASIC: FeatureId = FeatureId(0);
    pub const PREDICATION: FeatureId = FeatureId(1);
    pub const MARKER: FeatureId = FeatureId(2);
    pub const FILM_GRAIN: FeatureId = FeatureId(0x100);
}

/// A feature consuming parameter blocks of type `P`.
pub trait Feature<P>: Any {
    /// Called once when the pipeline is created.
    fn init(&mut self, _settings: &DecodeSettings) -> PipelineResult<()> {
        Ok(())
    }

    /// Validates `params` without changing any state.
    fn check(&self, _params: &P) -> PipelineResult<()> {
        Ok(())
    }

    /// Updates the per-frame state from `params`. `updated` gives access to the features that
    /// were registered, and thus updated, before this one.
    fn update(&mut self, params: &P, updated: &dyn FeatureLookup) -> PipelineResult<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Read access to a set of features, whatever their parameter type.
pub trait FeatureLookup {
    fn lookup(&self, id: FeatureId) -> Option<&dyn Any>;
}

impl<'a> dyn FeatureLookup + 'a {
    /// Returns feature `id` as a `T`.
    pub fn get<T: Any>(&self, id: FeatureId) -> PipelineResult<&T> {
        self.lookup(id)
            .ok_or_else(|| PipelineError::NotFound(format!("feature {:?}", id)))?
            .downcast_ref::<T>()
            .ok_or_else(|| {
                PipelineError::NotFound(format!(
                    "feature {:?} of type {}",
                    id,
                    std::any::type_name::<T>()
                ))
            })
    }
}

type FeatureEntry<P> = (FeatureId, Box<dyn Feature<P>>);

fn find<P: 'static>(entries: &[FeatureEntry<P>], id: FeatureId) -> Option<&dyn Any> {
    entries
        .iter()
        .find(|(entry_id, _)| *entry_id == id)
        .map(|(_, feature)| feature.as_any())
}

/// Features updated so far during [`FeatureManager::update`].
struct UpdatedFeatures<'a, P>(&'a [FeatureEntry<P>]);

impl<'a, P: 'static> FeatureLookup for UpdatedFeatures<'a, P> {
    fn lookup(&self, id: FeatureId) -> Option<&dyn Any> {
        find(self.0, id)
    }
}

/// Registry of the features of a pipeline, in registration order.
pub struct FeatureManager<P> {
    features: Vec<FeatureEntry<P>>,
}

impl<P: 'static> Default for FeatureManager<P> {
    fn default() -> Self {
        Self {
            features: Vec::new(),
        }
    }
}

impl<P: 'static> FeatureManager<P> {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn register(&mut self, id: FeatureId, feature: Box<dyn Feature<P>>) -> PipelineResult<()> {
        if self.features.iter().any(|(entry_id, _)| *entry_id == id) {
            return Err(PipelineError::InvalidParameter(format!(
                "feature {:?} registered twice",
                id
            )));
        }

        self.features.push((id, feature));
        Ok(())
    }

    pub fn init(&mut self, settings: &DecodeSettings) -> PipelineResult<()> {
        for (_, feature) in self.features.iter_mut() {
            feature.init(settings)?;
        }

        Ok(())
    }

    /// Validates `params` against every feature. Fails at the first feature rejecting them.
    pub fn check_features(&self, params: &P) -> PipelineResult<()> {
        for (id, feature) in &self.features {
            feature.check(params).map_err(|e| {
                log::debug!("feature {:?} rejected the frame: {}", id, e);
                e
            })?;
        }

        Ok(())
    }

    /// Updates every feature from `params`, in registration order.
    pub fn update(&mut self, params: &P) -> PipelineResult<()> {
        for i in 0..self.features.len() {
            let (updated, remaining) = self.features.split_at_mut(i);
            let (id, feature) = &mut remaining[0];
            log::trace!("updating feature {:?}", id);
            feature.update(params, &UpdatedFeatures(updated))?;
        }

        Ok(())
    }

    /// Checks then updates every feature. No feature is modified if any check fails.
    pub fn prepare(&mut self, params: &P) -> PipelineResult<()> {
        self.check_features(params)?;
        self.update(params)
    }

    pub fn get_feature<T: Any>(&self, id: FeatureId) -> PipelineResult<&T> {
        (self as &dyn FeatureLookup).get(id)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl<P: 'static> FeatureLookup for FeatureManager<P> {
    fn lookup(&self, id: FeatureId) -> Option<&dyn Any> {
        find(&self.features, id)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Feature recording the values it was updated with, and rejecting values above `limit`.
    #[derive(Default)]
    pub(crate) struct CountingFeature {
        pub limit: u32,
        pub values: Vec<u32>,
        pub seen_before: Option<usize>,
    }

    impl Feature<u32> for CountingFeature {
        fn check(&self, params: &u32) -> PipelineResult<()> {
            if *params > self.limit {
                return Err(PipelineError::InvalidParameter(format!("{} is too big", params)));
            }
            Ok(())
        }

        fn update(&mut self, params: &u32, updated: &dyn FeatureLookup) -> PipelineResult<()> {
            self.values.push(*params);
            self.seen_before = updated
                .get::<CountingFeature>(FeatureId::BASIC)
                .ok()
                .map(|f| f.values.len());
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn manager() -> FeatureManager<u32> {
        let mut manager = FeatureManager::new();
        manager
            .register(
                FeatureId::BASIC,
                Box::new(CountingFeature {
                    limit: 100,
                    ..Default::default()
                }),
            )
            .unwrap();
        manager
            .register(
                FeatureId::MARKER,
                Box::new(CountingFeature {
                    limit: 10,
                    ..Default::default()
                }),
            )
            .unwrap();
        manager
    }

    #[test]
    fn failed_check_updates_nothing() {
        let mut manager = manager();

        // Accepted by the first feature, rejected by the second one.
        assert!(matches!(
            manager.prepare(&50),
            Err(PipelineError::InvalidParameter(_))
        ));
        let basic = manager.get_feature::<CountingFeature>(FeatureId::BASIC).unwrap();
        assert!(basic.values.is_empty());

        manager.prepare(&5).unwrap();
        let basic = manager.get_feature::<CountingFeature>(FeatureId::BASIC).unwrap();
        assert_eq!(basic.values, vec![5]);
    }

    #[test]
    fn features_see_earlier_updates() {
        let mut manager = manager();
        manager.prepare(&1).unwrap();
        manager.prepare(&2).unwrap();

        let marker = manager.get_feature::<CountingFeature>(FeatureId::MARKER).unwrap();
        assert_eq!(marker.seen_before, Some(2));
        let basic = manager.get_feature::<CountingFeature>(FeatureId::BASIC).unwrap();
        assert_eq!(basic.seen_before, None);
    }

    #[test]
    fn lookups() {
        let mut manager = manager();
        assert!(matches!(
            manager.get_feature::<CountingFeature>(FeatureId::FILM_GRAIN),
            Err(PipelineError::NotFound(_))
        ));
        // Right id, wrong type.
        assert!(matches!(
            manager.get_feature::<u8>(FeatureId::BASIC),
            Err(PipelineError::NotFound(_))
        ));
        assert!(matches!(
            manager.register(FeatureId::BASIC, Box::<CountingFeature>::default()),
            Err(PipelineError::InvalidParameter(_))
        ));
        assert_eq!(manager.len(), 2);
    }
}
