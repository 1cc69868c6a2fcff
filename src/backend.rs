// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Collaborators of the decode pipeline.
//!
//! A backend is whatever sits between this crate and the hardware: it hands out GPU-addressable
//! memory and accepts command buffers for execution. This module only defines the interfaces the
//! pipeline relies on, plus the command buffer format the packets write into.

pub mod command_buffer;
#[cfg(test)]
pub(crate) mod dummy;

use std::fmt::Debug;
use std::sync::Arc;

use thiserror::Error;

pub use command_buffer::CommandBuffer;

/// Error returned by backend methods.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("not enough resources to proceed with the operation now")]
    OutOfResources,
    #[error("the GPU context rejected submission {0}")]
    SubmissionRejected(u64),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type returned by backend methods.
pub type BackendResult<T> = Result<T, BackendError>;

/// A piece of memory the GPU can read from and write to.
///
/// The contents may be written by the hardware at any time, so reads always return the most
/// recently published value and never block.
pub trait GpuMemory: Debug + Send + Sync {
    /// Identifier used to reference this memory from command buffers.
    fn handle(&self) -> u32;

    /// Size of the memory in bytes.
    fn size(&self) -> usize;

    /// Reads the little-endian dword at `offset`. Out of range reads return 0.
    fn read_u32(&self, offset: usize) -> u32;
}

/// Shared handle to GPU memory.
pub type GpuBuffer = Arc<dyn GpuMemory>;

/// Hands out and takes back GPU memory.
pub trait Allocator {
    /// Allocates `size` bytes of zeroed GPU memory. `name` is only used for debugging.
    fn allocate(&mut self, size: usize, name: &str) -> BackendResult<GpuBuffer>;

    /// Gives `buffer` back to the allocator.
    fn release(&mut self, buffer: GpuBuffer);
}

/// One batch of work handed to the GPU: one command buffer per hardware pipe taking part in it.
#[derive(Debug)]
pub struct Submission {
    /// Monotonic index of the submission within its task.
    pub index: u64,
    pub buffers: Vec<CommandBuffer>,
    /// Runs once every buffer of `buffers` has completed. A batch ended early by predication does
    /// not skip it.
    pub epilogue: Option<CommandBuffer>,
}

/// A GPU context accepting command buffers.
///
/// `submit` returns as soon as the work is queued. Execution happens asynchronously and is only
/// observable through memory the commands write to.
pub trait GpuContext {
    fn submit(&mut self, submission: Submission) -> BackendResult<()>;
}
