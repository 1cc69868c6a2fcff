// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Asynchronous tracking of the frames handed to the GPU.
//!
//! The status buffer is written by the hardware. It starts with the completion tag, which the
//! last command of every frame sets to the number of frames submitted so far, followed by one slot
//! per ring entry receiving the decode status registers of the frame using it:
//!
//! ```text
//! 0       completion tag
//! 8 + 16n slot n: error status, frame CRC
//! ```
//!
//! The caller polls [`StatusReport::completed_count`] and collects completed frames with
//! [`StatusReport::get_report`]. Neither blocks.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use enumn::N;

use crate::backend::GpuBuffer;
use crate::decoder::PipelineError;
use crate::decoder::PipelineResult;

pub const COMPLETION_TAG_OFFSET: usize = 0;
const SLOTS_OFFSET: usize = 8;
const SLOT_SIZE: usize = 16;
const ERROR_STATUS_OFFSET: usize = 0;
const FRAME_CRC_OFFSET: usize = 4;

/// Register holding the error status of the last decoded frame.
pub const DECODE_ERROR_STATUS_REG: u32 = 0x1c2b8;
/// Register holding the CRC of the last decoded frame.
pub const DECODE_FRAME_CRC_REG: u32 = 0x1c2bc;

/// Identification of a frame in its status record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusParams {
    /// Number the caller uses to recognize the frame.
    pub feedback_number: u32,
    /// Index of the frame in the pipeline's frame counter.
    pub frame_index: u32,
}

#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ReportStatus {
    Complete = 0,
    Error = 1,
}

/// Values the hardware stored for a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HardwareSnapshot {
    pub error_status: u32,
    pub frame_crc: u32,
}

/// Status of one completed frame, as returned to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusReportData {
    pub feedback_number: u32,
    pub frame_index: u32,
    pub status: ReportStatus,
    pub snapshot: HardwareSnapshot,
}

impl StatusReportData {
    /// Returns the hardware error of this frame, if any.
    pub fn hardware_fault(&self) -> PipelineResult<()> {
        match self.status {
            ReportStatus::Complete => Ok(()),
            ReportStatus::Error => Err(PipelineError::HardwareFault {
                feedback_number: self.feedback_number,
                status: self.snapshot.error_status,
            }),
        }
    }
}

#[derive(Debug)]
pub struct StatusReport {
    buffer: GpuBuffer,
    depth: usize,
    records: Mutex<Vec<StatusParams>>,
    /// Frames handed to the GPU.
    submitted: AtomicU32,
    /// Frames known to be complete.
    completed: AtomicU32,
    /// Frames returned by `get_report`, or skipped because their record was overwritten.
    reported: AtomicU32,
    /// Index of the oldest frame whose record is still in the ring.
    first_valid: AtomicU32,
}

impl StatusReport {
    /// Size of the status buffer needed to track `depth` frames.
    pub fn buffer_size(depth: usize) -> usize {
        SLOTS_OFFSET + depth * SLOT_SIZE
    }

    /// Creates a report tracking up to `depth` unreported frames, using `buffer` as status buffer.
    pub fn new(buffer: GpuBuffer, depth: usize) -> PipelineResult<Self> {
        if depth == 0 || buffer.size() < Self::buffer_size(depth) {
            return Err(PipelineError::InvalidParameter(format!(
                "status buffer of {} bytes cannot track {} frames",
                buffer.size(),
                depth
            )));
        }

        Ok(Self {
            buffer,
            depth,
            records: Mutex::new(vec![Default::default(); depth]),
            submitted: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            reported: AtomicU32::new(0),
            first_valid: AtomicU32::new(0),
        })
    }

    pub fn buffer(&self) -> &GpuBuffer {
        &self.buffer
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    fn slot(&self, index: u32) -> usize {
        index as usize % self.depth
    }

    /// Byte offset in the status buffer of the slot of the frame being submitted.
    pub fn current_slot_offset(&self) -> usize {
        SLOTS_OFFSET + self.slot(self.submitted_count()) * SLOT_SIZE
    }

    pub fn error_status_offset(&self) -> usize {
        self.current_slot_offset() + ERROR_STATUS_OFFSET
    }

    pub fn frame_crc_offset(&self) -> usize {
        self.current_slot_offset() + FRAME_CRC_OFFSET
    }

    /// Value the completion tag takes once the frame being submitted is done.
    pub fn next_completion_tag(&self) -> u32 {
        self.submitted_count().wrapping_add(1)
    }

    /// Associates `params` with the frame about to be submitted.
    pub fn init(&self, params: StatusParams) -> PipelineResult<()> {
        let submitted = self.submitted_count();
        let mut records = self
            .records
            .lock()
            .map_err(|_| PipelineError::InternalConsistency("status records poisoned".into()))?;
        let depth = self.depth;

        let oldest = self.reported_count().max(self.first_valid.load(Ordering::Acquire));
        if submitted.wrapping_sub(oldest) as usize >= depth {
            let overwritten = submitted - depth as u32;
            log::warn!(
                "status report ring full, overwriting the record of frame {}",
                overwritten
            );
            self.first_valid.store(overwritten + 1, Ordering::Release);
        }

        records[submitted as usize % depth] = params;
        log::trace!("status record {} initialized with {:?}", submitted, params);
        Ok(())
    }

    /// Marks the frame initialized by the last [`StatusReport::init`] as submitted.
    pub fn reset(&self) {
        let submitted = self.submitted.fetch_add(1, Ordering::Release) + 1;
        log::trace!("{} frames submitted", submitted);
    }

    pub fn submitted_count(&self) -> u32 {
        self.submitted.load(Ordering::Acquire)
    }

    /// Polls the completion tag. The returned value never decreases.
    pub fn completed_count(&self) -> u32 {
        let tag = self.buffer.read_u32(COMPLETION_TAG_OFFSET);
        let known = tag.min(self.submitted_count());
        let previous = self.completed.fetch_max(known, Ordering::AcqRel);
        previous.max(known)
    }

    pub fn reported_count(&self) -> u32 {
        self.reported.load(Ordering::Acquire)
    }

    /// Returns up to `count` frames that completed since the last call, oldest first. Completed
    /// frames whose record was overwritten are skipped.
    pub fn get_report(&self, count: usize) -> PipelineResult<Vec<StatusReportData>> {
        let completed = self.completed_count();
        let reported = self.reported_count();
        if reported > completed {
            log::error!("{} frames reported but only {} completed", reported, completed);
            return Err(PipelineError::InternalConsistency(format!(
                "{} frames reported but only {} completed",
                reported, completed
            )));
        }

        let records = self
            .records
            .lock()
            .map_err(|_| PipelineError::InternalConsistency("status records poisoned".into()))?;
        let depth = self.depth;
        let start = self
            .first_valid
            .load(Ordering::Acquire)
            .clamp(reported, completed);
        if start > reported {
            log::warn!(
                "{} completed frames lost their status record",
                start - reported
            );
        }
        let available = (completed - start) as usize;

        let reports: Vec<_> = (start..)
            .take(count.min(available))
            .map(|index| {
                let slot = index as usize % depth;
                let offset = SLOTS_OFFSET + slot * SLOT_SIZE;
                let snapshot = HardwareSnapshot {
                    error_status: self.buffer.read_u32(offset + ERROR_STATUS_OFFSET),
                    frame_crc: self.buffer.read_u32(offset + FRAME_CRC_OFFSET),
                };
                let params = records[slot];
                let status = if snapshot.error_status != 0 {
                    log::warn!(
                        "frame {} decoded with error status {:#x}",
                        params.feedback_number,
                        snapshot.error_status
                    );
                    ReportStatus::Error
                } else {
                    ReportStatus::Complete
                };

                StatusReportData {
                    feedback_number: params.feedback_number,
                    frame_index: params.frame_index,
                    status,
                    snapshot,
                }
            })
            .collect();

        self.reported
            .store(start + reports.len() as u32, Ordering::Release);
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::dummy::DummyMemory;

    fn report(depth: usize) -> (Arc<DummyMemory>, StatusReport) {
        let memory = Arc::new(DummyMemory::new(1, StatusReport::buffer_size(depth)));
        let report = StatusReport::new(memory.clone(), depth).unwrap();
        (memory, report)
    }

    /// Submits a frame and returns the offset of its slot.
    fn submit(report: &StatusReport, feedback_number: u32) -> usize {
        report
            .init(StatusParams {
                feedback_number,
                frame_index: report.submitted_count(),
            })
            .unwrap();
        let offset = report.current_slot_offset();
        report.reset();
        offset
    }

    #[test]
    fn undersized_buffer_is_rejected() {
        let memory = Arc::new(DummyMemory::new(1, 16));
        assert!(matches!(
            StatusReport::new(memory, 4),
            Err(PipelineError::InvalidParameter(_))
        ));
    }

    #[test]
    fn frames_are_reported_once() {
        let (memory, report) = report(4);
        submit(&report, 10);
        submit(&report, 11);
        submit(&report, 12);
        assert_eq!(report.submitted_count(), 3);
        assert_eq!(report.completed_count(), 0);
        assert!(report.get_report(8).unwrap().is_empty());

        memory.write_u32(COMPLETION_TAG_OFFSET, 2);
        let reports = report.get_report(8).unwrap();
        assert_eq!(
            reports.iter().map(|r| r.feedback_number).collect::<Vec<_>>(),
            vec![10, 11]
        );
        assert_eq!(reports[1].frame_index, 1);
        assert_eq!(report.reported_count(), 2);
        assert!(report.get_report(8).unwrap().is_empty());

        memory.write_u32(COMPLETION_TAG_OFFSET, 3);
        let reports = report.get_report(1).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].feedback_number, 12);
    }

    #[test]
    fn completed_count_is_monotonic_and_bounded() {
        let (memory, report) = report(4);
        submit(&report, 0);
        submit(&report, 1);

        // A tag beyond what was submitted cannot be trusted.
        memory.write_u32(COMPLETION_TAG_OFFSET, 7);
        assert_eq!(report.completed_count(), 2);

        // Nor can it go backwards.
        memory.write_u32(COMPLETION_TAG_OFFSET, 1);
        assert_eq!(report.completed_count(), 2);
        assert!(report.reported_count() <= report.completed_count());
    }

    #[test]
    fn hardware_errors_are_reported() {
        let (memory, report) = report(2);
        let offset = submit(&report, 5);
        memory.write_u32(offset + ERROR_STATUS_OFFSET, 0x40);
        memory.write_u32(offset + FRAME_CRC_OFFSET, 0xdead);
        memory.write_u32(COMPLETION_TAG_OFFSET, 1);

        let reports = report.get_report(1).unwrap();
        assert_eq!(reports[0].status, ReportStatus::Error);
        assert_eq!(reports[0].snapshot.frame_crc, 0xdead);
        assert!(matches!(
            reports[0].hardware_fault(),
            Err(PipelineError::HardwareFault {
                feedback_number: 5,
                status: 0x40
            })
        ));
    }

    #[test]
    fn overwritten_records_are_skipped() {
        let (memory, report) = report(2);
        for feedback_number in 10..13 {
            let offset = submit(&report, feedback_number);
            memory.write_u32(offset + FRAME_CRC_OFFSET, feedback_number);
        }
        memory.write_u32(COMPLETION_TAG_OFFSET, 3);

        let reports = report.get_report(8).unwrap();
        assert_eq!(
            reports
                .iter()
                .map(|r| (r.feedback_number, r.snapshot.frame_crc))
                .collect::<Vec<_>>(),
            vec![(11, 11), (12, 12)]
        );
        // The lost frame counts as consumed, and nothing comes back twice.
        assert_eq!(report.reported_count(), 3);
        assert!(report.get_report(8).unwrap().is_empty());
        assert!(report.reported_count() <= report.completed_count());
    }

    #[test]
    fn overwritten_record_of_a_pending_frame_is_skipped_once_complete() {
        let (memory, report) = report(2);
        for feedback_number in 20..23 {
            submit(&report, feedback_number);
        }

        // Nothing completed yet: nothing can be skipped.
        assert!(report.get_report(8).unwrap().is_empty());
        assert_eq!(report.reported_count(), 0);

        memory.write_u32(COMPLETION_TAG_OFFSET, 1);
        assert!(report.get_report(8).unwrap().is_empty());
        assert_eq!(report.reported_count(), 1);

        memory.write_u32(COMPLETION_TAG_OFFSET, 3);
        let reports = report.get_report(8).unwrap();
        assert_eq!(
            reports.iter().map(|r| r.feedback_number).collect::<Vec<_>>(),
            vec![21, 22]
        );
    }

    #[test]
    fn ring_wraps_around() {
        let (memory, report) = report(2);
        for frame in 0..5 {
            submit(&report, 100 + frame);
            memory.write_u32(COMPLETION_TAG_OFFSET, frame + 1);
            let reports = report.get_report(1).unwrap();
            assert_eq!(reports[0].feedback_number, 100 + frame);
            assert!(reports[0].hardware_fault().is_ok());
        }
    }
}
