// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The per-frame orchestration of a decode pipeline.
//!
//! A frame goes through [`PipeMode::Begin`], [`PipeMode::Process`] and [`PipeMode::End`], each
//! one being a [`DecodePipeline::prepare`] call followed by a [`DecodePipeline::execute`] call:
//!
//! * `Begin` resets the per-frame state of the sub-pipelines.
//! * `Process` validates and consumes the frame parameters, then activates and submits the
//!   packets of the frame.
//! * `End` marks the frame as submitted in the status report.
//!
//! Submission never waits for the GPU. Completion is observed by polling the status report.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::backend::Allocator;
use crate::backend::GpuContext;
use crate::decoder::activation::ActivationList;
use crate::decoder::activation::PacketActivationRecord;
use crate::decoder::common::MarkerFeature;
use crate::decoder::common::MarkerSubPacket;
use crate::decoder::common::PredicationFeature;
use crate::decoder::common::PredicationSubPacket;
use crate::decoder::common::StatusReportSubPacket;
use crate::decoder::feature::FeatureId;
use crate::decoder::feature::FeatureLookup;
use crate::decoder::feature::FeatureManager;
use crate::decoder::packet::PacketContext;
use crate::decoder::packet::PacketList;
use crate::decoder::packet::PacketProperties;
use crate::decoder::status_report::StatusParams;
use crate::decoder::status_report::StatusReport;
use crate::decoder::status_report::StatusReportData;
use crate::decoder::sub_packet::SubPacketId;
use crate::decoder::sub_packet::SubPacketManager;
use crate::decoder::sub_pipeline::SubPipelineManager;
use crate::decoder::task::Task;
use crate::decoder::DecodeParams;
use crate::decoder::DecodeSettings;
use crate::decoder::PipeMode;
use crate::decoder::PipelineError;
use crate::decoder::PipelineResult;

/// Codec-specific part of a pipeline: what it registers, and how it turns the updated features
/// into decode passes.
pub trait PipelineCodec {
    type Params: DecodeParams + 'static;

    fn register_features(features: &mut FeatureManager<Self::Params>) -> PipelineResult<()>;

    fn register_sub_packets(sub_packets: &mut SubPacketManager) -> PipelineResult<()>;

    fn register_packets(packets: &mut PacketList) -> PipelineResult<()>;

    fn register_sub_pipelines(
        pre: &mut SubPipelineManager<Self::Params>,
        post: &mut SubPipelineManager<Self::Params>,
    );

    /// Activates the hardware decode packet once per pass of the current call.
    fn activate_decode_packets(
        settings: &DecodeSettings,
        features: &dyn FeatureLookup,
        activations: &mut ActivationList,
    ) -> PipelineResult<()>;

    /// Whether the current call completes the frame's bitstream.
    fn is_complete_bitstream(features: &dyn FeatureLookup) -> PipelineResult<bool>;

    /// Number the caller recognizes the frame by in status reports.
    fn feedback_number(params: &Self::Params) -> u32;
}

pub(crate) fn register_common_features<P: DecodeParams + 'static>(
    features: &mut FeatureManager<P>,
) -> PipelineResult<()> {
    features.register(FeatureId::PREDICATION, Box::<PredicationFeature>::default())?;
    features.register(FeatureId::MARKER, Box::<MarkerFeature>::default())
}

pub(crate) fn register_common_sub_packets(
    sub_packets: &mut SubPacketManager,
) -> PipelineResult<()> {
    sub_packets.register(SubPacketId::PREDICATION, Box::<PredicationSubPacket>::default())?;
    sub_packets.register(SubPacketId::MARKER, Box::<MarkerSubPacket>::default())?;
    sub_packets.register(SubPacketId::STATUS_REPORT, Box::<StatusReportSubPacket>::default())
}

pub struct DecodePipeline<C: PipelineCodec> {
    settings: DecodeSettings,

    features: FeatureManager<C::Params>,
    sub_packets: SubPacketManager,
    packets: PacketList,
    pre_sub_pipelines: SubPipelineManager<C::Params>,
    post_sub_pipelines: SubPipelineManager<C::Params>,

    activations: ActivationList,
    /// Records executed by the last `execute_active_packets` call.
    last_activations: Vec<PacketActivationRecord>,
    task: Task,

    allocator: Box<dyn Allocator>,
    status_report: Arc<StatusReport>,
    /// A status record was initialized for the frame and still has to be submitted.
    status_pending: bool,
    /// The frame parameters went through `Process` preparation and await execution.
    frame_prepared: bool,
    frame_count: u32,

    _codec: PhantomData<C>,
}

impl<C: PipelineCodec> DecodePipeline<C> {
    /// Creates a pipeline and initializes all its components. The status buffer is obtained from
    /// `allocator` and given back to it when the pipeline is dropped.
    pub fn new(
        settings: DecodeSettings,
        mut allocator: Box<dyn Allocator>,
        context: Box<dyn GpuContext>,
    ) -> PipelineResult<Self> {
        settings.validate()?;

        let mut features = FeatureManager::new();
        register_common_features(&mut features)?;
        C::register_features(&mut features)?;

        let mut sub_packets = SubPacketManager::new();
        register_common_sub_packets(&mut sub_packets)?;
        C::register_sub_packets(&mut sub_packets)?;

        let mut packets = PacketList::new();
        C::register_packets(&mut packets)?;

        let mut pre_sub_pipelines = SubPipelineManager::new("pre");
        let mut post_sub_pipelines = SubPipelineManager::new("post");
        C::register_sub_pipelines(&mut pre_sub_pipelines, &mut post_sub_pipelines);

        features.init(&settings)?;
        sub_packets.init(&settings)?;
        pre_sub_pipelines.init(&settings, &mut packets)?;
        post_sub_pipelines.init(&settings, &mut packets)?;
        packets.init(&settings)?;

        let depth = settings.status_report_depth;
        let buffer = allocator
            .allocate(StatusReport::buffer_size(depth), "status report")
            .map_err(|source| PipelineError::AllocationFailure {
                what: "status report buffer".into(),
                source,
            })?;
        let status_report = match StatusReport::new(Arc::clone(&buffer), depth) {
            Ok(status_report) => Arc::new(status_report),
            Err(e) => {
                allocator.release(buffer);
                return Err(e);
            }
        };

        log::debug!(
            "pipeline created: {} features, {} packets, {}+{} sub-pipelines",
            features.len(),
            packets.len(),
            pre_sub_pipelines.len(),
            post_sub_pipelines.len()
        );

        Ok(Self {
            settings,
            features,
            sub_packets,
            packets,
            pre_sub_pipelines,
            post_sub_pipelines,
            activations: ActivationList::new(),
            last_activations: Vec::new(),
            task: Task::new(context),
            allocator,
            status_report,
            status_pending: false,
            frame_prepared: false,
            frame_count: 0,
            _codec: PhantomData,
        })
    }

    /// Prepares the `mode` phase of the current frame. `params` is required by
    /// [`PipeMode::Process`] only.
    pub fn prepare(&mut self, mode: PipeMode, params: Option<&C::Params>) -> PipelineResult<()> {
        match mode {
            PipeMode::Begin => {
                log::debug!("frame {}: begin", self.frame_count);
                self.activations.clear();
                self.frame_prepared = false;
                // A record left by a frame that never reached `End` is reused by this one.
                self.status_pending = false;
                self.pre_sub_pipelines.reset();
                self.post_sub_pipelines.reset();
                Ok(())
            }
            PipeMode::Process => {
                let params = params.ok_or(PipelineError::NullReference("frame parameters"))?;
                self.prepare_process(params)
            }
            PipeMode::End => Ok(()),
        }
    }

    fn prepare_process(&mut self, params: &C::Params) -> PipelineResult<()> {
        self.frame_prepared = false;
        self.features.prepare(params)?;
        self.pre_sub_pipelines.prepare(params, &self.features)?;
        self.post_sub_pipelines.prepare(params, &self.features)?;

        if C::is_complete_bitstream(&self.features)? && !self.status_pending {
            self.status_report.init(StatusParams {
                feedback_number: C::feedback_number(params),
                frame_index: self.frame_count,
            })?;
            self.status_pending = true;
        }

        self.frame_prepared = true;
        Ok(())
    }

    /// Executes the `mode` phase of the current frame.
    pub fn execute(&mut self, mode: PipeMode) -> PipelineResult<()> {
        match mode {
            PipeMode::Begin => Ok(()),
            PipeMode::Process => {
                if !self.frame_prepared {
                    return Err(PipelineError::NullReference("prepared frame"));
                }
                self.frame_prepared = false;

                let result = self.activate_and_execute();
                if let Err(e) = &result {
                    log::warn!("frame {} failed: {}", self.frame_count, e);
                    self.status_pending = false;
                    self.activations.clear();
                    self.task.discard();
                }
                result
            }
            PipeMode::End => {
                if self.status_pending {
                    self.status_report.reset();
                    self.status_pending = false;
                    self.frame_count = self.frame_count.wrapping_add(1);
                }
                log::debug!("frame end, {} frames submitted", self.frame_count);
                Ok(())
            }
        }
    }

    fn activate_and_execute(&mut self) -> PipelineResult<()> {
        self.pre_sub_pipelines.drain_into(&mut self.activations);
        C::activate_decode_packets(&self.settings, &self.features, &mut self.activations)?;
        self.post_sub_pipelines.drain_into(&mut self.activations);
        self.execute_active_packets()
    }

    /// Runs the three phases of a frame with `params`.
    pub fn decode_frame(&mut self, params: &C::Params) -> PipelineResult<()> {
        self.prepare(PipeMode::Begin, None)?;
        self.execute(PipeMode::Begin)?;
        self.prepare(PipeMode::Process, Some(params))?;
        self.execute(PipeMode::Process)?;
        self.prepare(PipeMode::End, None)?;
        self.execute(PipeMode::End)
    }

    /// Records every activated packet into the task, in activation order, and submits at each
    /// immediate boundary. The last record is always a boundary, and its submission carries the
    /// frame's status in its epilogue. The activation list is empty afterwards.
    pub fn execute_active_packets(&mut self) -> PipelineResult<()> {
        let records = self.activations.take();
        let Some(last) = records.len().checked_sub(1) else {
            if self.status_pending {
                log::warn!("no packet to report the status of frame {}", self.frame_count);
                self.status_pending = false;
            }
            self.last_activations.clear();
            return Ok(());
        };

        let ctx = PacketContext {
            features: &self.features,
            sub_packets: &self.sub_packets,
        };

        for (i, record) in records.iter().enumerate() {
            let props = PacketProperties {
                pass: record.pass,
                pipe: record.pipe,
                immediate_submit: record.immediate_submit,
                single_task_phase: self.settings.single_task_phase_supported,
                report_status: self.status_pending && i == last,
                status_report: Arc::clone(&self.status_report),
            };

            let packet = self.packets.get_mut(record.packet_id)?;
            packet.prepare(&ctx)?;
            self.task.add_packet(packet, &props, &ctx)?;

            if props.report_status {
                ctx.sub_packet::<StatusReportSubPacket>(SubPacketId::STATUS_REPORT)?
                    .emit(self.task.epilogue(), &props);
            }

            if record.immediate_submit {
                self.task.submit()?;
            }
        }

        self.last_activations = records;
        Ok(())
    }

    pub fn settings(&self) -> &DecodeSettings {
        &self.settings
    }

    pub fn features(&self) -> &FeatureManager<C::Params> {
        &self.features
    }

    /// Records executed for the last frame.
    pub fn last_activations(&self) -> &[PacketActivationRecord] {
        &self.last_activations
    }

    pub fn pending_activations(&self) -> usize {
        self.activations.len()
    }

    /// Number of frames whose status has been recorded.
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn status_report(&self) -> Arc<StatusReport> {
        Arc::clone(&self.status_report)
    }

    /// Returns up to `count` completed frames not reported yet.
    pub fn get_status_report(&self, count: usize) -> PipelineResult<Vec<StatusReportData>> {
        self.status_report.get_report(count)
    }

    /// Number of completed frames waiting to be reported.
    pub fn completed_report_count(&self) -> PipelineResult<u32> {
        let completed = self.status_report.completed_count();
        let reported = self.status_report.reported_count();
        completed.checked_sub(reported).ok_or_else(|| {
            log::error!("{} frames reported but only {} completed", reported, completed);
            PipelineError::InternalConsistency(format!(
                "{} frames reported but only {} completed",
                reported, completed
            ))
        })
    }
}

impl<C: PipelineCodec> Drop for DecodePipeline<C> {
    fn drop(&mut self) {
        self.allocator
            .release(Arc::clone(self.status_report.buffer()));
    }
}
