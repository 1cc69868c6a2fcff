// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Sub-packets: small command fragments shared between packets.
//!
//! Sub-packets never appear in the activation list. Packets look them up by id and call their
//! concrete methods to emit the fragment.

use std::any::Any;

use crate::decoder::packet::CommandSize;
use crate::decoder::DecodeSettings;
use crate::decoder::PipelineError;
use crate::decoder::PipelineResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubPacketId(pub u32);

impl SubPacketId {
    pub const PREDICATION: SubPacketId = SubPacketId(0);
    pub const MARKER: SubPacketId = SubPacketId(1);
    pub const STATUS_REPORT: SubPacketId = SubPacketId(2);
    pub const AV1_PICTURE: SubPacketId = SubPacketId(0x100);
    pub const AV1_TILE: SubPacketId = SubPacketId(0x101);
}

pub trait SubPacket: Any {
    fn init(&mut self, _settings: &DecodeSettings) -> PipelineResult<()> {
        Ok(())
    }

    /// Upper bound of what one emission of the fragment writes.
    fn calculate_command_size(&self) -> CommandSize;

    fn as_any(&self) -> &dyn Any;
}

/// Registry of sub-packets, fixed once the pipeline is created.
#[derive(Default)]
pub struct SubPacketManager {
    sub_packets: Vec<(SubPacketId, Box<dyn SubPacket>)>,
}

impl SubPacketManager {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn register(&mut self, id: SubPacketId, sub_packet: Box<dyn SubPacket>) -> PipelineResult<()> {
        if self.sub_packets.iter().any(|(entry_id, _)| *entry_id == id) {
            return Err(PipelineError::InvalidParameter(format!(
                "sub-packet {:?} registered twice",
                id
            )));
        }

        self.sub_packets.push((id, sub_packet));
        Ok(())
    }

    pub fn init(&mut self, settings: &DecodeSettings) -> PipelineResult<()> {
        for (_, sub_packet) in self.sub_packets.iter_mut() {
            sub_packet.init(settings)?;
        }

        Ok(())
    }

    pub fn get<T: Any>(&self, id: SubPacketId) -> PipelineResult<&T> {
        self.sub_packets
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .ok_or_else(|| PipelineError::NotFound(format!("sub-packet {:?}", id)))?
            .1
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| {
                PipelineError::NotFound(format!(
                    "sub-packet {:?} of type {}",
                    id,
                    std::any::type_name::<T>()
                ))
            })
    }

    /// Size of one emission of sub-packet `id`.
    pub fn command_size(&self, id: SubPacketId) -> PipelineResult<CommandSize> {
        self.sub_packets
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, sub_packet)| sub_packet.calculate_command_size())
            .ok_or_else(|| PipelineError::NotFound(format!("sub-packet {:?}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fragment(usize);

    impl SubPacket for Fragment {
        fn calculate_command_size(&self) -> CommandSize {
            CommandSize::new(self.0, 1)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn registry() {
        let mut manager = SubPacketManager::new();
        manager.register(SubPacketId::MARKER, Box::new(Fragment(12))).unwrap();

        assert_eq!(manager.get::<Fragment>(SubPacketId::MARKER).unwrap().0, 12);
        assert_eq!(
            manager.command_size(SubPacketId::MARKER).unwrap(),
            CommandSize::new(12, 1)
        );
        assert!(matches!(
            manager.get::<Fragment>(SubPacketId::PREDICATION),
            Err(PipelineError::NotFound(_))
        ));
        assert!(matches!(
            manager.register(SubPacketId::MARKER, Box::new(Fragment(4))),
            Err(PipelineError::InvalidParameter(_))
        ));
    }
}
