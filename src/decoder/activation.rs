// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-frame list of packets to execute.

use crate::decoder::packet::PacketId;

/// Request to execute a packet once during the current frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketActivationRecord {
    /// Packet to execute. The packet itself stays owned by the pipeline's packet list.
    pub packet_id: PacketId,
    /// Whether the work accumulated so far must be handed to the GPU right after this packet.
    pub immediate_submit: bool,
    pub pass: u16,
    pub pipe: u8,
}

/// Ordered sequence of [`PacketActivationRecord`]s, filled while a frame is prepared and drained
/// when it is executed.
#[derive(Debug, Default)]
pub struct ActivationList {
    records: Vec<PacketActivationRecord>,
}

impl ActivationList {
    pub fn new() -> Self {
        Default::default()
    }

    /// Appends an activation of `packet_id`. The same packet may be activated several times, e.g.
    /// once per pass.
    pub fn activate(&mut self, packet_id: PacketId, immediate_submit: bool, pass: u16, pipe: u8) {
        log::trace!(
            "activating packet {:?} (pass {}, pipe {}, immediate: {})",
            packet_id,
            pass,
            pipe,
            immediate_submit
        );

        self.records.push(PacketActivationRecord {
            packet_id,
            immediate_submit,
            pass,
            pipe,
        });
    }

    /// Moves all the records of `other` to the end of this list.
    pub fn append(&mut self, other: &mut ActivationList) {
        self.records.append(&mut other.records);
    }

    /// Forces the last record to be submitted immediately, so the frame's work is always flushed
    /// to the hardware. Does nothing on an empty list.
    pub fn finalize(&mut self) {
        if let Some(last) = self.records.last_mut() {
            last.immediate_submit = true;
        }
    }

    /// Finalizes the list and returns its records, leaving it empty.
    pub fn take(&mut self) -> Vec<PacketActivationRecord> {
        self.finalize();
        std::mem::take(&mut self.records)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn records(&self) -> &[PacketActivationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
