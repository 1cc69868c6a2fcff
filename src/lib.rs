// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-frame orchestration for fixed-function video decode engines.
//!
//! Given the parameters of a compressed frame, a [`decoder::DecodePipeline`] validates them
//! through its features, lets its sub-pipelines and the codec decide which packets to activate,
//! records those packets into command buffers and hands them to a GPU context. Completion is
//! tracked asynchronously through the pipeline's [`decoder::status_report::StatusReport`].
//!
//! The hardware-facing collaborators (GPU memory allocation and command submission) are
//! abstracted in the [`backend`] module.

pub mod backend;
pub mod codec;
pub mod decoder;

pub use decoder::DecodePipeline;
pub use decoder::DecodeSettings;
pub use decoder::PipeMode;
pub use decoder::PipelineError;
pub use decoder::PipelineResult;
