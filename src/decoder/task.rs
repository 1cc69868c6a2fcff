// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Accumulation of packets into command buffers and their submission.

use crate::backend::CommandBuffer;
use crate::backend::GpuContext;
use crate::backend::Submission;
use crate::decoder::packet::Packet;
use crate::decoder::packet::PacketContext;
use crate::decoder::packet::PacketProperties;
use crate::decoder::PipelineResult;

/// Records packets into one command buffer per pipe, and hands the accumulated buffers to the GPU
/// context when asked to.
pub struct Task {
    context: Box<dyn GpuContext>,
    /// Buffers recorded since the last submission, in order of first use of their pipe.
    pending: Vec<CommandBuffer>,
    epilogue: Option<CommandBuffer>,
    pending_packets: usize,
    submissions: u64,
}

impl Task {
    pub fn new(context: Box<dyn GpuContext>) -> Self {
        Self {
            context,
            pending: Vec::new(),
            epilogue: None,
            pending_packets: 0,
            submissions: 0,
        }
    }

    fn buffer_for_pipe(&mut self, pipe: usize) -> &mut CommandBuffer {
        let index = match self.pending.iter().position(|cmd| cmd.pipe() == pipe) {
            Some(index) => index,
            None => {
                self.pending.push(CommandBuffer::new(pipe));
                self.pending.len() - 1
            }
        };

        &mut self.pending[index]
    }

    /// Records `packet` into the command buffer of the pipe given by `props`.
    pub fn add_packet(
        &mut self,
        packet: &mut dyn Packet,
        props: &PacketProperties,
        ctx: &PacketContext,
    ) -> PipelineResult<()> {
        let size = packet.calculate_command_size(ctx)?;
        let cmd = self.buffer_for_pipe(props.pipe as usize);
        cmd.reserve(size.command_bytes, size.patch_entries);

        let start_len = cmd.len();
        let start_patches = cmd.patches().len();
        packet.submit(cmd, props, ctx)?;

        let written = cmd.len() - start_len;
        let patches = cmd.patches().len() - start_patches;
        if written > size.command_bytes || patches > size.patch_entries {
            log::warn!(
                "packet wrote {} bytes and {} patches, but announced at most {} and {}",
                written,
                patches,
                size.command_bytes,
                size.patch_entries
            );
        }

        self.pending_packets += 1;
        Ok(())
    }

    /// Command buffer of the next submission that runs after all its pipe buffers.
    pub fn epilogue(&mut self) -> &mut CommandBuffer {
        self.epilogue.get_or_insert_with(|| CommandBuffer::new(0))
    }

    /// Drops everything recorded since the previous submission.
    pub fn discard(&mut self) {
        if self.pending_packets > 0 || self.epilogue.is_some() {
            log::debug!("discarding {} recorded packets", self.pending_packets);
        }
        self.pending.clear();
        self.epilogue = None;
        self.pending_packets = 0;
    }

    /// Hands everything recorded since the previous submission to the GPU context as one
    /// submission. Does nothing if nothing was recorded.
    pub fn submit(&mut self) -> PipelineResult<()> {
        if self.pending_packets == 0 && self.epilogue.is_none() {
            log::trace!("nothing to submit");
            return Ok(());
        }

        let mut buffers = std::mem::take(&mut self.pending);
        let mut epilogue = self.epilogue.take();
        for cmd in buffers.iter_mut().chain(epilogue.iter_mut()) {
            cmd.batch_buffer_end();
        }

        log::trace!(
            "submission {}: {} packets on {} pipes",
            self.submissions,
            self.pending_packets,
            buffers.len()
        );

        self.pending_packets = 0;
        let index = self.submissions;
        self.submissions += 1;
        self.context.submit(Submission {
            index,
            buffers,
            epilogue,
        })?;

        Ok(())
    }

    /// Number of packets recorded and not submitted yet.
    pub fn pending_packets(&self) -> usize {
        self.pending_packets
    }

    pub fn submission_count(&self) -> u64 {
        self.submissions
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::dummy::DummyGpu;
    use crate::decoder::feature::FeatureManager;
    use crate::decoder::packet::CommandSize;
    use crate::decoder::status_report::StatusReport;
    use crate::decoder::sub_packet::SubPacketManager;

    /// Writes `dwords` opaque dwords but announces `announced` bytes.
    struct Filler {
        dwords: usize,
        announced: usize,
    }

    impl Packet for Filler {
        fn submit(
            &mut self,
            cmd: &mut CommandBuffer,
            props: &PacketProperties,
            _: &PacketContext,
        ) -> PipelineResult<()> {
            cmd.vd_command(props.pass as u32, &vec![0; self.dwords]);
            Ok(())
        }

        fn calculate_command_size(&self, _: &PacketContext) -> PipelineResult<CommandSize> {
            Ok(CommandSize::new(self.announced, 0))
        }
    }

    fn props(gpu: &DummyGpu, pass: u16, pipe: u8) -> PacketProperties {
        let buffer = gpu.create_buffer(StatusReport::buffer_size(1));
        PacketProperties {
            pass,
            pipe,
            immediate_submit: false,
            single_task_phase: false,
            report_status: false,
            status_report: Arc::new(StatusReport::new(buffer, 1).unwrap()),
        }
    }

    #[test]
    fn packets_are_grouped_per_pipe_until_submitted() {
        let gpu = DummyGpu::new();
        let mut task = Task::new(gpu.context());
        let features = FeatureManager::<u32>::new();
        let sub_packets = SubPacketManager::new();
        let ctx = PacketContext {
            features: &features,
            sub_packets: &sub_packets,
        };
        let mut packet = Filler {
            dwords: 1,
            announced: 16,
        };

        // Nothing recorded, nothing submitted.
        task.submit().unwrap();
        assert!(gpu.submitted().is_empty());

        task.add_packet(&mut packet, &props(&gpu, 0, 0), &ctx).unwrap();
        task.add_packet(&mut packet, &props(&gpu, 1, 1), &ctx).unwrap();
        task.add_packet(&mut packet, &props(&gpu, 2, 0), &ctx).unwrap();
        assert_eq!(task.pending_packets(), 3);
        task.submit().unwrap();
        task.add_packet(&mut packet, &props(&gpu, 3, 0), &ctx).unwrap();
        task.submit().unwrap();

        let submitted = gpu.submitted();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].pipes, vec![0, 1]);
        assert_eq!(submitted[1].pipes, vec![0]);
        assert_eq!(task.submission_count(), 2);

        gpu.retire_all();
        let passes: Vec<_> = gpu.vd_commands().iter().map(|c| (c.pipe, c.kind)).collect();
        assert_eq!(passes, vec![(0, 0), (0, 2), (1, 1), (0, 3)]);
    }

    #[test]
    fn rejected_submission_is_propagated() {
        let gpu = DummyGpu::new();
        gpu.reject_submissions(true);
        let mut task = Task::new(gpu.context());
        let features = FeatureManager::<u32>::new();
        let sub_packets = SubPacketManager::new();
        let ctx = PacketContext {
            features: &features,
            sub_packets: &sub_packets,
        };
        let mut packet = Filler {
            dwords: 8,
            // Under-announced on purpose, only a warning.
            announced: 4,
        };

        task.add_packet(&mut packet, &props(&gpu, 0, 0), &ctx).unwrap();
        assert!(task.submit().is_err());
        assert_eq!(task.pending_packets(), 0);
    }

    #[test]
    fn epilogue_runs_after_the_pipes() {
        let gpu = DummyGpu::new();
        let mut task = Task::new(gpu.context());
        let features = FeatureManager::<u32>::new();
        let sub_packets = SubPacketManager::new();
        let ctx = PacketContext {
            features: &features,
            sub_packets: &sub_packets,
        };
        let mut packet = Filler {
            dwords: 0,
            announced: 8,
        };

        task.add_packet(&mut packet, &props(&gpu, 0, 0), &ctx).unwrap();
        task.epilogue().vd_command(9, &[]);
        task.add_packet(&mut packet, &props(&gpu, 1, 1), &ctx).unwrap();
        task.submit().unwrap();

        // The epilogue is not one of the pipes.
        assert_eq!(gpu.submitted()[0].pipes, vec![0, 1]);
        gpu.retire_all();
        let kinds: Vec<_> = gpu.vd_commands().iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![0, 1, 9]);
    }

    #[test]
    fn discarded_work_is_never_submitted() {
        let gpu = DummyGpu::new();
        let mut task = Task::new(gpu.context());
        let features = FeatureManager::<u32>::new();
        let sub_packets = SubPacketManager::new();
        let ctx = PacketContext {
            features: &features,
            sub_packets: &sub_packets,
        };
        let mut packet = Filler {
            dwords: 1,
            announced: 16,
        };

        task.add_packet(&mut packet, &props(&gpu, 0, 0), &ctx).unwrap();
        task.epilogue().flush_dw();
        task.discard();
        assert_eq!(task.pending_packets(), 0);

        task.submit().unwrap();
        assert!(gpu.submitted().is_empty());
    }
}
