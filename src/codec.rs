// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-frame parameter blocks handed to the pipeline, one module per codec.
//!
//! These are the already-parsed syntax elements an entry point extracts from the bitstream. The
//! pipeline never parses bitstream syntax itself.

pub mod av1;
