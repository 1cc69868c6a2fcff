// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The decode pipeline and its building blocks.
//!
//! A [`DecodePipeline`] is assembled from features, sub-packets, packets and sub-pipelines that a
//! [`PipelineCodec`](pipeline::PipelineCodec) registers at creation time. Each frame then goes
//! through the [`PipeMode::Begin`], [`PipeMode::Process`] and [`PipeMode::End`] phases.

pub mod activation;
pub mod av1;
pub mod common;
pub mod feature;
pub mod packet;
pub mod pipeline;
pub mod status_report;
pub mod sub_packet;
pub mod sub_pipeline;
pub mod task;

use std::str::FromStr;

use enumn::N;
use thiserror::Error;

use crate::backend::BackendError;
use crate::backend::GpuBuffer;

pub use pipeline::DecodePipeline;

/// Error returned by the pipeline and its components.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("{0} is required but was never provided")]
    NullReference(&'static str),
    #[error("{0} is not registered")]
    NotFound(String),
    #[error("failed to allocate {what}")]
    AllocationFailure {
        what: String,
        #[source]
        source: BackendError,
    },
    #[error("internal consistency violated: {0}")]
    InternalConsistency(String),
    #[error("hardware reported error status {status:#x} for frame {feedback_number}")]
    HardwareFault { feedback_number: u32, status: u32 },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Static configuration of a pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeSettings {
    /// Maximum coded width of the stream.
    pub width: u32,
    /// Maximum coded height of the stream.
    pub height: u32,
    /// Number of video decode engines the frame passes can be spread on.
    pub num_vdbox: u8,
    /// Keep every pass on the first engine.
    pub disable_scalability: bool,
    /// Submit all the passes of a frame at once instead of once per round of pipes.
    pub single_task_phase_supported: bool,
    /// Number of frames the status report can track before recycling its slots.
    pub status_report_depth: usize,
}

impl Default for DecodeSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            num_vdbox: 1,
            disable_scalability: false,
            single_task_phase_supported: false,
            status_report_depth: 128,
        }
    }
}

impl DecodeSettings {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::InvalidParameter(format!(
                "invalid resolution {}x{}",
                self.width, self.height
            )));
        }
        if self.num_vdbox == 0 {
            return Err(PipelineError::InvalidParameter(
                "at least one decode engine is needed".into(),
            ));
        }
        if self.status_report_depth == 0 {
            return Err(PipelineError::InvalidParameter(
                "status report depth cannot be zero".into(),
            ));
        }

        Ok(())
    }
}

/// Phase of the per-frame lifecycle a prepare or execute call belongs to.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum PipeMode {
    /// Start of a frame: per-frame state of the sub-pipelines is reset.
    Begin = 0,
    /// Validation of the frame parameters, then activation and submission of the packets.
    Process = 1,
    /// The frame is queued and its status record released.
    End = 2,
}

impl FromStr for PipeMode {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "begin" | "Begin" => Ok(PipeMode::Begin),
            "process" | "Process" => Ok(PipeMode::Process),
            "end" | "End" => Ok(PipeMode::End),
            _ => Err("unrecognized pipe mode. Valid values: begin, process, end"),
        }
    }
}

/// Predication resource of a frame: the frame's packets are skipped depending on the dword at
/// `offset` in `buffer`.
#[derive(Clone, Debug)]
pub struct PredicationParams {
    pub buffer: GpuBuffer,
    pub offset: u32,
    /// Skip if the dword is non-zero, otherwise skip if it is zero.
    pub end_if_nonzero: bool,
}

/// Marker resource of a frame: a GPU timestamp is written at `offset` in `buffer`.
#[derive(Clone, Debug)]
pub struct MarkerParams {
    pub buffer: GpuBuffer,
    pub offset: u32,
}

/// Codec-independent view of a frame's parameter block.
pub trait DecodeParams {
    /// Size in bytes of the bitstream buffer.
    fn data_size(&self) -> u32;

    fn predication(&self) -> Option<&PredicationParams> {
        None
    }

    fn marker(&self) -> Option<&MarkerParams> {
        None
    }
}
