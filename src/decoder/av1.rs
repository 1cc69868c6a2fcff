// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! AV1 decode pipeline.
//!
//! Frames are decoded one tile per pass. The passes of a call are spread over the available
//! decode engines, and frames carrying film grain parameters get the film grain kernels appended
//! after their last pass.

pub mod basic_feature;
pub mod film_grain;
pub mod packet;
pub mod tile_coding;

use crate::codec::av1::Av1DecodeParams;
use crate::decoder::activation::ActivationList;
use crate::decoder::av1::basic_feature::Av1BasicFeature;
use crate::decoder::av1::film_grain::FilmGrainFeature;
use crate::decoder::av1::film_grain::FilmGrainSubPipeline;
use crate::decoder::av1::packet::Av1DecodePacket;
use crate::decoder::av1::packet::Av1PictureSubPacket;
use crate::decoder::av1::packet::Av1TileSubPacket;
use crate::decoder::feature::FeatureId;
use crate::decoder::feature::FeatureLookup;
use crate::decoder::feature::FeatureManager;
use crate::decoder::packet::PacketId;
use crate::decoder::packet::PacketList;
use crate::decoder::pipeline::PipelineCodec;
use crate::decoder::sub_packet::SubPacketId;
use crate::decoder::sub_packet::SubPacketManager;
use crate::decoder::sub_pipeline::SubPipelineManager;
use crate::decoder::DecodeParams;
use crate::decoder::DecodeSettings;
use crate::decoder::MarkerParams;
use crate::decoder::PipelineResult;
use crate::decoder::PredicationParams;

impl DecodeParams for Av1DecodeParams {
    fn data_size(&self) -> u32 {
        self.data_size
    }

    fn predication(&self) -> Option<&PredicationParams> {
        self.predication.as_ref()
    }

    fn marker(&self) -> Option<&MarkerParams> {
        self.marker.as_ref()
    }
}

/// Number of engines the passes of the current frame are spread on.
fn num_pipes(settings: &DecodeSettings, tile_cols: u16) -> u32 {
    if settings.disable_scalability {
        1
    } else {
        u32::from(settings.num_vdbox)
            .min(u32::from(tile_cols))
            .max(1)
    }
}

pub struct Av1;

impl PipelineCodec for Av1 {
    type Params = Av1DecodeParams;

    fn register_features(features: &mut FeatureManager<Self::Params>) -> PipelineResult<()> {
        features.register(FeatureId::BASIC, Box::<Av1BasicFeature>::default())?;
        features.register(FeatureId::FILM_GRAIN, Box::<FilmGrainFeature>::default())
    }

    fn register_sub_packets(sub_packets: &mut SubPacketManager) -> PipelineResult<()> {
        sub_packets.register(SubPacketId::AV1_PICTURE, Box::<Av1PictureSubPacket>::default())?;
        sub_packets.register(SubPacketId::AV1_TILE, Box::<Av1TileSubPacket>::default())
    }

    fn register_packets(packets: &mut PacketList) -> PipelineResult<()> {
        packets.register(PacketId::DECODE, Box::<Av1DecodePacket>::default())
    }

    fn register_sub_pipelines(
        _pre: &mut SubPipelineManager<Self::Params>,
        post: &mut SubPipelineManager<Self::Params>,
    ) {
        post.register(Box::<FilmGrainSubPipeline>::default());
    }

    fn activate_decode_packets(
        settings: &DecodeSettings,
        features: &dyn FeatureLookup,
        activations: &mut ActivationList,
    ) -> PipelineResult<()> {
        let basic = features.get::<Av1BasicFeature>(FeatureId::BASIC)?;
        let passes = basic.num_passes();
        let pipes = num_pipes(settings, basic.pic_params().tile_cols);
        log::debug!("{} decode passes on {} pipes", passes, pipes);

        for pass in 0..passes {
            // Each round of pipes is flushed on its own unless the frame goes in one submission.
            let immediate = !settings.single_task_phase_supported && (pass + 1) % pipes == 0;
            activations.activate(PacketId::DECODE, immediate, pass as u16, (pass % pipes) as u8);
        }

        Ok(())
    }

    fn is_complete_bitstream(features: &dyn FeatureLookup) -> PipelineResult<bool> {
        Ok(features
            .get::<Av1BasicFeature>(FeatureId::BASIC)?
            .is_complete())
    }

    fn feedback_number(params: &Self::Params) -> u32 {
        params.pic_params.status_report_feedback_number
    }
}
