// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hardware decode packet of AV1 frames.
//!
//! Each pass programs the picture state of the frame, then the coding state and bitstream object
//! of the tile the pass decodes.

use std::any::Any;

use enumn::N;

use crate::backend::CommandBuffer;
use crate::decoder::av1::basic_feature::Av1BasicFeature;
use crate::decoder::common::MarkerSubPacket;
use crate::decoder::common::PredicationSubPacket;
use crate::decoder::feature::FeatureId;
use crate::decoder::packet::CommandSize;
use crate::decoder::packet::Packet;
use crate::decoder::packet::PacketContext;
use crate::decoder::packet::PacketProperties;
use crate::decoder::sub_packet::SubPacket;
use crate::decoder::sub_packet::SubPacketId;
use crate::decoder::PipelineError;
use crate::decoder::PipelineResult;

/// Kinds of the AV1 decode engine commands.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Av1VdCommand {
    PictureState = 0x1,
    TileCodingState = 0x2,
    BitstreamObject = 0x3,
}

const PICTURE_STATE_DWORDS: usize = 6;
const TILE_CODING_STATE_DWORDS: usize = 4;
const BITSTREAM_OBJECT_DWORDS: usize = 2;

fn vd_command_size(dwords: usize) -> usize {
    4 * (2 + dwords)
}

/// Programs the picture-level state of the frame.
#[derive(Debug, Default)]
pub struct Av1PictureSubPacket;

impl Av1PictureSubPacket {
    pub fn emit(&self, cmd: &mut CommandBuffer, basic: &Av1BasicFeature) {
        let pic = basic.pic_params();
        let info = &pic.pic_info;
        let flags = u32::from(pic.lossless)
            | u32::from(info.allow_intrabc) << 1
            | u32::from(info.use_superres) << 2
            | u32::from(info.large_scale_tile) << 3
            | u32::from(info.show_frame) << 4
            | u32::from(pic.loop_restoration.is_enabled()) << 5
            | (info.frame_type as u32) << 8;

        let payload: [u32; PICTURE_STATE_DWORDS] = [
            u32::from(pic.frame_width_minus1) | u32::from(pic.frame_height_minus1) << 16,
            u32::from(pic.current_frame_idx)
                | u32::from(pic.primary_ref_frame) << 8
                | u32::from(pic.order_hint) << 16,
            u32::from(pic.base_qindex)
                | u32::from(pic.cdef_bits) << 8
                | u32::from(pic.interp_filter) << 16,
            u32::from(pic.filter_level[0])
                | u32::from(pic.filter_level[1]) << 8
                | u32::from(pic.filter_level_u) << 16
                | u32::from(pic.filter_level_v) << 24,
            u32::from(pic.tile_cols) | u32::from(pic.tile_rows) << 16,
            flags,
        ];
        cmd.vd_command(Av1VdCommand::PictureState as u32, &payload);
    }
}

impl SubPacket for Av1PictureSubPacket {
    fn calculate_command_size(&self) -> CommandSize {
        CommandSize::new(vd_command_size(PICTURE_STATE_DWORDS), 0)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Programs the tile decoded by a pass and points the engine at its data.
#[derive(Debug, Default)]
pub struct Av1TileSubPacket;

impl Av1TileSubPacket {
    pub fn emit(
        &self,
        cmd: &mut CommandBuffer,
        basic: &Av1BasicFeature,
        pass: u16,
    ) -> PipelineResult<()> {
        let tile = basic.tile_coding().tile_for_pass(pass).ok_or_else(|| {
            PipelineError::InternalConsistency(format!("no tile for pass {}", pass))
        })?;

        cmd.vd_command(
            Av1VdCommand::TileCodingState as u32,
            &[
                u32::from(tile.tile_row) | u32::from(tile.tile_column) << 16,
                u32::from(tile.tile_group_id) | u32::from(tile.tile_num) << 16,
                u32::from(tile.last_in_group) | u32::from(tile.anchor_frame_idx) << 8,
                u32::from(tile.tile_index),
            ],
        );
        cmd.vd_command(Av1VdCommand::BitstreamObject as u32, &[tile.offset, tile.size]);

        Ok(())
    }
}

impl SubPacket for Av1TileSubPacket {
    fn calculate_command_size(&self) -> CommandSize {
        CommandSize::new(
            vd_command_size(TILE_CODING_STATE_DWORDS) + vd_command_size(BITSTREAM_OBJECT_DWORDS),
            0,
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Decodes one tile of the frame per execution.
#[derive(Debug, Default)]
pub struct Av1DecodePacket;

impl Packet for Av1DecodePacket {
    fn submit(
        &mut self,
        cmd: &mut CommandBuffer,
        props: &PacketProperties,
        ctx: &PacketContext,
    ) -> PipelineResult<()> {
        let basic = ctx.feature::<Av1BasicFeature>(FeatureId::BASIC)?;
        log::trace!("decoding pass {} on pipe {}", props.pass, props.pipe);

        ctx.sub_packet::<PredicationSubPacket>(SubPacketId::PREDICATION)?
            .emit(cmd, ctx.features)?;
        ctx.sub_packet::<MarkerSubPacket>(SubPacketId::MARKER)?
            .emit(cmd, ctx.features)?;
        ctx.sub_packet::<Av1PictureSubPacket>(SubPacketId::AV1_PICTURE)?
            .emit(cmd, basic);
        ctx.sub_packet::<Av1TileSubPacket>(SubPacketId::AV1_TILE)?
            .emit(cmd, basic, props.pass)?;

        Ok(())
    }

    fn calculate_command_size(&self, ctx: &PacketContext) -> PipelineResult<CommandSize> {
        [
            SubPacketId::PREDICATION,
            SubPacketId::MARKER,
            SubPacketId::AV1_PICTURE,
            SubPacketId::AV1_TILE,
        ]
        .into_iter()
        .try_fold(CommandSize::default(), |size, id| {
            Ok(size + ctx.sub_packets.command_size(id)?)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::command_buffer::MiOpcode;
    use crate::backend::dummy::DummyGpu;
    use crate::codec::av1::Av1DecodeParams;
    use crate::decoder::av1::basic_feature::tests::key_frame;
    use crate::decoder::av1::Av1;
    use crate::decoder::feature::FeatureManager;
    use crate::decoder::pipeline::PipelineCodec;
    use crate::decoder::status_report::StatusReport;
    use crate::decoder::sub_packet::SubPacketManager;
    use crate::decoder::DecodeSettings;

    fn setup(params: &Av1DecodeParams) -> (FeatureManager<Av1DecodeParams>, SubPacketManager) {
        let mut features = FeatureManager::new();
        crate::decoder::pipeline::register_common_features(&mut features).unwrap();
        Av1::register_features(&mut features).unwrap();
        features.init(&DecodeSettings::default()).unwrap();
        features.prepare(params).unwrap();

        let mut sub_packets = SubPacketManager::new();
        crate::decoder::pipeline::register_common_sub_packets(&mut sub_packets).unwrap();
        Av1::register_sub_packets(&mut sub_packets).unwrap();

        (features, sub_packets)
    }

    fn props(gpu: &DummyGpu, pass: u16) -> PacketProperties {
        let buffer = gpu.create_buffer(StatusReport::buffer_size(1));
        PacketProperties {
            pass,
            pipe: 0,
            immediate_submit: true,
            single_task_phase: false,
            report_status: true,
            status_report: Arc::new(StatusReport::new(buffer, 1).unwrap()),
        }
    }

    #[test]
    fn pass_programs_its_tile() {
        let gpu = DummyGpu::new();
        let params = key_frame(2, 2);
        let (features, sub_packets) = setup(&params);
        let ctx = PacketContext {
            features: &features,
            sub_packets: &sub_packets,
        };

        let mut packet = Av1DecodePacket;
        let mut cmd = CommandBuffer::new(0);
        packet.submit(&mut cmd, &props(&gpu, 2), &ctx).unwrap();

        let size = packet.calculate_command_size(&ctx).unwrap();
        // Neither predication nor marker resources: only those two are left out.
        assert_eq!(cmd.len(), size.command_bytes - 16 - 12);
        assert!(cmd.patches().len() <= size.patch_entries);

        let vd: Vec<_> = cmd
            .commands()
            .filter(|c| c.opcode == MiOpcode::VdCommand)
            .map(|c| c.payload)
            .collect();
        assert_eq!(vd.len(), 3);
        assert_eq!(vd[0][0], Av1VdCommand::PictureState as u32);
        assert_eq!(vd[0][1], 351 | 287 << 16);
        // Tile 2 of the 2x2 grid is at row 1, column 0.
        assert_eq!(vd[1][..2], [Av1VdCommand::TileCodingState as u32, 1]);
        assert_eq!(vd[2], vec![Av1VdCommand::BitstreamObject as u32, 200, 100]);
    }

    #[test]
    fn pass_without_tile_is_an_error() {
        let gpu = DummyGpu::new();
        let (features, sub_packets) = setup(&key_frame(1, 1));
        let ctx = PacketContext {
            features: &features,
            sub_packets: &sub_packets,
        };

        let mut cmd = CommandBuffer::new(0);
        assert!(matches!(
            Av1DecodePacket.submit(&mut cmd, &props(&gpu, 1), &ctx),
            Err(PipelineError::InternalConsistency(_))
        ));
    }
}
