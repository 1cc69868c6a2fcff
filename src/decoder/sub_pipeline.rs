// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Sub-pipelines: optional contributors of packets.

use crate::decoder::activation::ActivationList;
use crate::decoder::activation::PacketActivationRecord;
use crate::decoder::feature::FeatureLookup;
use crate::decoder::packet::PacketList;
use crate::decoder::DecodeSettings;
use crate::decoder::PipelineResult;

/// A unit deciding, frame by frame, which of its packets to activate.
pub trait SubPipeline<P> {
    /// Called once at pipeline creation. The sub-pipeline registers the packets it may activate
    /// into `packets`.
    fn init(&mut self, settings: &DecodeSettings, packets: &mut PacketList) -> PipelineResult<()>;

    /// Clears the per-frame state at the beginning of a frame.
    fn reset(&mut self) {}

    /// Activates zero or more packets for the current frame, based on the updated `features`.
    fn prepare(
        &mut self,
        params: &P,
        features: &dyn FeatureLookup,
        activations: &mut ActivationList,
    ) -> PipelineResult<()>;
}

/// Ordered set of sub-pipelines running in the same phase of the frame.
pub struct SubPipelineManager<P> {
    name: &'static str,
    sub_pipelines: Vec<Box<dyn SubPipeline<P>>>,
    activations: ActivationList,
}

impl<P> SubPipelineManager<P> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            sub_pipelines: Vec::new(),
            activations: ActivationList::new(),
        }
    }

    pub fn register(&mut self, sub_pipeline: Box<dyn SubPipeline<P>>) {
        self.sub_pipelines.push(sub_pipeline);
    }

    pub fn init(&mut self, settings: &DecodeSettings, packets: &mut PacketList) -> PipelineResult<()> {
        for sub_pipeline in self.sub_pipelines.iter_mut() {
            sub_pipeline.init(settings, packets)?;
        }

        Ok(())
    }

    pub fn reset(&mut self) {
        self.activations.clear();
        for sub_pipeline in self.sub_pipelines.iter_mut() {
            sub_pipeline.reset();
        }
    }

    /// Lets every sub-pipeline activate its packets, in registration order. Stops at the first
    /// failure, in which case no activation of this call is kept.
    pub fn prepare(&mut self, params: &P, features: &dyn FeatureLookup) -> PipelineResult<()> {
        self.activations.clear();
        for sub_pipeline in self.sub_pipelines.iter_mut() {
            if let Err(e) = sub_pipeline.prepare(params, features, &mut self.activations) {
                log::debug!("{} sub-pipeline failed to prepare: {}", self.name, e);
                self.activations.clear();
                return Err(e);
            }
        }

        Ok(())
    }

    /// Packets activated by the last [`SubPipelineManager::prepare`] call.
    pub fn activations(&self) -> &[PacketActivationRecord] {
        self.activations.records()
    }

    /// Moves the pending activations to the end of `list`.
    pub fn drain_into(&mut self, list: &mut ActivationList) {
        list.append(&mut self.activations);
    }

    pub fn len(&self) -> usize {
        self.sub_pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sub_pipelines.is_empty()
    }
}
