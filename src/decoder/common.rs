// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Features and sub-packets every pipeline registers, whatever its codec.

use std::any::Any;

use crate::backend::CommandBuffer;
use crate::backend::GpuBuffer;
use crate::decoder::feature::Feature;
use crate::decoder::feature::FeatureId;
use crate::decoder::feature::FeatureLookup;
use crate::decoder::packet::CommandSize;
use crate::decoder::packet::PacketProperties;
use crate::decoder::status_report::COMPLETION_TAG_OFFSET;
use crate::decoder::status_report::DECODE_ERROR_STATUS_REG;
use crate::decoder::status_report::DECODE_FRAME_CRC_REG;
use crate::decoder::sub_packet::SubPacket;
use crate::decoder::DecodeParams;
use crate::decoder::MarkerParams;
use crate::decoder::PipelineError;
use crate::decoder::PipelineResult;
use crate::decoder::PredicationParams;

fn check_dword_in_buffer(buffer: &GpuBuffer, offset: u32, what: &str) -> PipelineResult<()> {
    if offset as usize + 4 > buffer.size() {
        return Err(PipelineError::InvalidParameter(format!(
            "{} offset {} is outside of its {} bytes buffer",
            what,
            offset,
            buffer.size()
        )));
    }

    Ok(())
}

/// Keeps the predication resource of the current frame, if any.
#[derive(Debug, Default)]
pub struct PredicationFeature {
    params: Option<PredicationParams>,
}

impl PredicationFeature {
    pub fn params(&self) -> Option<&PredicationParams> {
        self.params.as_ref()
    }
}

impl<P: DecodeParams> Feature<P> for PredicationFeature {
    fn check(&self, params: &P) -> PipelineResult<()> {
        match params.predication() {
            Some(predication) => {
                check_dword_in_buffer(&predication.buffer, predication.offset, "predication")
            }
            None => Ok(()),
        }
    }

    fn update(&mut self, params: &P, _: &dyn FeatureLookup) -> PipelineResult<()> {
        self.params = params.predication().cloned();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Keeps the marker resource of the current frame, if any.
#[derive(Debug, Default)]
pub struct MarkerFeature {
    params: Option<MarkerParams>,
}

impl MarkerFeature {
    pub fn params(&self) -> Option<&MarkerParams> {
        self.params.as_ref()
    }
}

impl<P: DecodeParams> Feature<P> for MarkerFeature {
    fn check(&self, params: &P) -> PipelineResult<()> {
        match params.marker() {
            Some(marker) => check_dword_in_buffer(&marker.buffer, marker.offset, "marker"),
            None => Ok(()),
        }
    }

    fn update(&mut self, params: &P, _: &dyn FeatureLookup) -> PipelineResult<()> {
        self.params = params.marker().cloned();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Skips the rest of the batch according to the frame's predication resource.
#[derive(Debug, Default)]
pub struct PredicationSubPacket;

impl PredicationSubPacket {
    pub fn emit(&self, cmd: &mut CommandBuffer, features: &dyn FeatureLookup) -> PipelineResult<()> {
        let feature = features.get::<PredicationFeature>(FeatureId::PREDICATION)?;
        if let Some(predication) = feature.params() {
            cmd.conditional_batch_buffer_end(
                &predication.buffer,
                predication.offset,
                predication.end_if_nonzero,
            );
        }

        Ok(())
    }
}

impl SubPacket for PredicationSubPacket {
    fn calculate_command_size(&self) -> CommandSize {
        CommandSize::new(16, 1)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Writes a timestamp into the frame's marker resource.
#[derive(Debug, Default)]
pub struct MarkerSubPacket;

impl MarkerSubPacket {
    pub fn emit(&self, cmd: &mut CommandBuffer, features: &dyn FeatureLookup) -> PipelineResult<()> {
        let feature = features.get::<MarkerFeature>(FeatureId::MARKER)?;
        if let Some(marker) = feature.params() {
            cmd.store_timestamp(&marker.buffer, marker.offset);
        }

        Ok(())
    }
}

impl SubPacket for MarkerSubPacket {
    fn calculate_command_size(&self) -> CommandSize {
        CommandSize::new(12, 1)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Stores the decode status of the frame into its status slot, then publishes its completion.
#[derive(Debug, Default)]
pub struct StatusReportSubPacket;

impl StatusReportSubPacket {
    /// Emits the status commands if `props` is the frame's reporting execution.
    pub fn emit(&self, cmd: &mut CommandBuffer, props: &PacketProperties) {
        if !props.report_status {
            return;
        }

        let status = &props.status_report;
        cmd.store_register_mem(
            DECODE_ERROR_STATUS_REG,
            status.buffer(),
            status.error_status_offset() as u32,
        );
        cmd.store_register_mem(
            DECODE_FRAME_CRC_REG,
            status.buffer(),
            status.frame_crc_offset() as u32,
        );
        // The snapshot must land before the tag announces it.
        cmd.flush_dw();
        cmd.store_data_imm(
            status.buffer(),
            COMPLETION_TAG_OFFSET as u32,
            status.next_completion_tag(),
        );
    }
}

impl SubPacket for StatusReportSubPacket {
    fn calculate_command_size(&self) -> CommandSize {
        CommandSize::new(52, 3)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::dummy::DummyGpu;
    use crate::backend::GpuMemory;
    use crate::backend::Submission;
    use crate::decoder::feature::FeatureManager;
    use crate::decoder::status_report::StatusParams;
    use crate::decoder::status_report::StatusReport;

    #[derive(Default)]
    struct Params {
        predication: Option<PredicationParams>,
        marker: Option<MarkerParams>,
    }

    impl DecodeParams for Params {
        fn data_size(&self) -> u32 {
            0
        }

        fn predication(&self) -> Option<&PredicationParams> {
            self.predication.as_ref()
        }

        fn marker(&self) -> Option<&MarkerParams> {
            self.marker.as_ref()
        }
    }

    fn features() -> FeatureManager<Params> {
        let mut features = FeatureManager::new();
        features
            .register(FeatureId::PREDICATION, Box::<PredicationFeature>::default())
            .unwrap();
        features
            .register(FeatureId::MARKER, Box::<MarkerFeature>::default())
            .unwrap();
        features
    }

    #[test]
    fn resources_must_hold_a_dword() {
        let gpu = DummyGpu::new();
        let mut features = features();
        let params = Params {
            marker: Some(MarkerParams {
                buffer: gpu.create_buffer(8),
                offset: 6,
            }),
            ..Default::default()
        };

        assert!(matches!(
            features.prepare(&params),
            Err(PipelineError::InvalidParameter(_))
        ));
    }

    #[test]
    fn fragments_are_executed_by_the_gpu() {
        let gpu = DummyGpu::new();
        let mut context = gpu.context();
        let mut features = features();
        let predicate = gpu.create_buffer(4);
        let marker = gpu.create_buffer(16);
        let params = Params {
            predication: Some(PredicationParams {
                buffer: predicate.clone(),
                offset: 0,
                end_if_nonzero: true,
            }),
            marker: Some(MarkerParams {
                buffer: marker.clone(),
                offset: 8,
            }),
        };
        features.prepare(&params).unwrap();

        let record = |cmd: &mut CommandBuffer| {
            PredicationSubPacket.emit(cmd, &features).unwrap();
            MarkerSubPacket.emit(cmd, &features).unwrap();
            cmd.batch_buffer_end();
        };

        let mut cmd = CommandBuffer::new(0);
        record(&mut cmd);
        assert_eq!(
            cmd.len(),
            PredicationSubPacket.calculate_command_size().command_bytes
                + MarkerSubPacket.calculate_command_size().command_bytes
                + 4
        );
        context
            .submit(Submission {
                index: 0,
                buffers: vec![cmd],
                epilogue: None,
            })
            .unwrap();
        gpu.retire_all();
        assert_eq!(marker.read_u32(8), 1);

        // Predicate set: the marker is skipped.
        predicate.write_u32(0, 1);
        let mut cmd = CommandBuffer::new(0);
        record(&mut cmd);
        context
            .submit(Submission {
                index: 1,
                buffers: vec![cmd],
                epilogue: None,
            })
            .unwrap();
        gpu.retire_all();
        assert_eq!(marker.read_u32(8), 1);
    }

    #[test]
    fn status_is_written_only_when_reporting() {
        let gpu = DummyGpu::new();
        let mut context = gpu.context();
        let status = Arc::new(
            StatusReport::new(gpu.create_buffer(StatusReport::buffer_size(2)), 2).unwrap(),
        );
        status
            .init(StatusParams {
                feedback_number: 3,
                frame_index: 0,
            })
            .unwrap();
        gpu.set_register(DECODE_FRAME_CRC_REG, 0x1234);

        let mut props = PacketProperties {
            pass: 0,
            pipe: 0,
            immediate_submit: true,
            single_task_phase: false,
            report_status: false,
            status_report: status.clone(),
        };
        let mut cmd = CommandBuffer::new(0);
        StatusReportSubPacket.emit(&mut cmd, &props);
        assert!(cmd.is_empty());

        props.report_status = true;
        StatusReportSubPacket.emit(&mut cmd, &props);
        assert_eq!(
            cmd.len(),
            StatusReportSubPacket.calculate_command_size().command_bytes
        );
        assert_eq!(cmd.patches().len(), 3);
        status.reset();

        context
            .submit(Submission {
                index: 0,
                buffers: vec![cmd],
                epilogue: None,
            })
            .unwrap();
        assert_eq!(status.completed_count(), 0);
        gpu.retire_all();
        assert_eq!(status.completed_count(), 1);

        let reports = status.get_report(4).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].feedback_number, 3);
        assert_eq!(reports[0].snapshot.frame_crc, 0x1234);
        assert!(reports[0].hardware_fault().is_ok());
    }
}
