// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Packets, the units writing hardware commands.

use std::any::Any;
use std::collections::BTreeMap;
use std::ops::Add;
use std::sync::Arc;

use crate::backend::CommandBuffer;
use crate::decoder::feature::FeatureId;
use crate::decoder::feature::FeatureLookup;
use crate::decoder::status_report::StatusReport;
use crate::decoder::sub_packet::SubPacketId;
use crate::decoder::sub_packet::SubPacketManager;
use crate::decoder::DecodeSettings;
use crate::decoder::PipelineError;
use crate::decoder::PipelineResult;

/// Identifier of a packet within the pipeline's [`PacketList`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketId(pub u32);

impl PacketId {
    /// Hardware decode packet, activated once per pass.
    pub const DECODE: PacketId = PacketId(0x10);
    pub const FILM_GRAIN_GET_RANDOM_VALUES: PacketId = PacketId(0x20);
    pub const FILM_GRAIN_REGRESS_PHASE1: PacketId = PacketId(0x21);
    pub const FILM_GRAIN_REGRESS_PHASE2: PacketId = PacketId(0x22);
    pub const FILM_GRAIN_APPLY_NOISE: PacketId = PacketId(0x23);
}

/// Worst-case space a packet needs in a command buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommandSize {
    pub command_bytes: usize,
    pub patch_entries: usize,
}

impl CommandSize {
    pub const fn new(command_bytes: usize, patch_entries: usize) -> Self {
        Self {
            command_bytes,
            patch_entries,
        }
    }
}

impl Add for CommandSize {
    type Output = CommandSize;

    fn add(self, rhs: CommandSize) -> CommandSize {
        CommandSize {
            command_bytes: self.command_bytes + rhs.command_bytes,
            patch_entries: self.patch_entries + rhs.patch_entries,
        }
    }
}

/// Properties of one execution of a packet, filled from its activation record and from the
/// pipeline's shared state.
#[derive(Clone, Debug)]
pub struct PacketProperties {
    pub pass: u16,
    pub pipe: u8,
    pub immediate_submit: bool,
    pub single_task_phase: bool,
    /// Set on the frame's last execution when the frame's status must be reported.
    pub report_status: bool,
    pub status_report: Arc<StatusReport>,
}

/// What a packet can see of the pipeline while it executes.
#[derive(Clone, Copy)]
pub struct PacketContext<'a> {
    pub features: &'a dyn FeatureLookup,
    pub sub_packets: &'a SubPacketManager,
}

impl<'a> PacketContext<'a> {
    pub fn feature<T: Any>(&self, id: FeatureId) -> PipelineResult<&'a T> {
        self.features.get(id)
    }

    pub fn sub_packet<T: Any>(&self, id: SubPacketId) -> PipelineResult<&'a T> {
        self.sub_packets.get(id)
    }
}

/// A command-buffer fragment builder.
pub trait Packet {
    fn init(&mut self, _settings: &DecodeSettings) -> PipelineResult<()> {
        Ok(())
    }

    /// Called before every execution of the packet, once the features are updated.
    fn prepare(&mut self, _ctx: &PacketContext) -> PipelineResult<()> {
        Ok(())
    }

    /// Writes the packet's commands for the execution described by `props` into `cmd`.
    fn submit(
        &mut self,
        cmd: &mut CommandBuffer,
        props: &PacketProperties,
        ctx: &PacketContext,
    ) -> PipelineResult<()>;

    /// Upper bound of what [`Packet::submit`] writes.
    fn calculate_command_size(&self, ctx: &PacketContext) -> PipelineResult<CommandSize>;
}

/// Every packet of a pipeline, by id.
#[derive(Default)]
pub struct PacketList {
    packets: BTreeMap<PacketId, Box<dyn Packet>>,
}

impl PacketList {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn register(&mut self, id: PacketId, packet: Box<dyn Packet>) -> PipelineResult<()> {
        if self.packets.contains_key(&id) {
            return Err(PipelineError::InvalidParameter(format!(
                "packet {:?} registered twice",
                id
            )));
        }

        self.packets.insert(id, packet);
        Ok(())
    }

    pub fn init(&mut self, settings: &DecodeSettings) -> PipelineResult<()> {
        for packet in self.packets.values_mut() {
            packet.init(settings)?;
        }

        Ok(())
    }

    pub fn get_mut(&mut self, id: PacketId) -> PipelineResult<&mut (dyn Packet + 'static)> {
        self.packets
            .get_mut(&id)
            .map(|packet| packet.as_mut())
            .ok_or_else(|| PipelineError::NotFound(format!("packet {:?}", id)))
    }

    pub fn contains(&self, id: PacketId) -> bool {
        self.packets.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}
