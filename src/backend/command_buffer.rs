// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Command buffers packets record into.
//!
//! Every command is a header dword followed by its payload, all little-endian. The header holds
//! the opcode in its upper half and the number of payload dwords in its lower half. Only the
//! generic memory/flow-control commands are interpreted here; the payloads of [`MiOpcode::VdCommand`]
//! and [`MiOpcode::KernelDispatch`] belong to the engine they target.

use std::io::Cursor;

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use bytes::BufMut;
use bytes::BytesMut;
use enumn::N;

use crate::backend::GpuBuffer;

#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum MiOpcode {
    Noop = 0,
    /// Payload: buffer handle, offset, value.
    StoreDataImm = 1,
    /// Payload: register, buffer handle, offset.
    StoreRegisterMem = 2,
    /// Payload: buffer handle, offset, end-if-nonzero flag.
    ConditionalBatchBufferEnd = 3,
    /// Payload: buffer handle, offset.
    StoreTimestamp = 4,
    FlushDw = 5,
    BatchBufferEnd = 6,
    /// Payload: engine command kind, then opaque dwords.
    VdCommand = 0x10,
    /// Payload: kernel id, then opaque dwords.
    KernelDispatch = 0x11,
}

/// A reference from a command buffer to a GPU buffer, to be resolved at submission time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatchEntry {
    pub handle: u32,
    /// Byte offset in the command buffer of the dword holding the handle.
    pub location: usize,
}

/// A decoded command, as returned by [`CommandBuffer::commands`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub opcode: MiOpcode,
    pub payload: Vec<u32>,
}

/// Command buffer for a single hardware pipe.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    pipe: usize,
    data: BytesMut,
    patches: Vec<PatchEntry>,
}

impl CommandBuffer {
    pub fn new(pipe: usize) -> Self {
        Self {
            pipe,
            data: BytesMut::new(),
            patches: Vec::new(),
        }
    }

    /// The pipe this buffer will execute on.
    pub fn pipe(&self) -> usize {
        self.pipe
    }

    /// Size of the recorded commands in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn patches(&self) -> &[PatchEntry] {
        &self.patches
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Makes room for `bytes` more bytes and `patches` more patch-list entries.
    pub fn reserve(&mut self, bytes: usize, patches: usize) {
        self.data.reserve(bytes);
        self.patches.reserve(patches);
    }

    /// Writes a raw command. Prefer the typed helpers below.
    pub fn emit(&mut self, opcode: MiOpcode, payload: &[u32]) {
        let header = ((opcode as u32) << 16) | (payload.len() as u32 & 0xffff);
        self.data.put_u32_le(header);
        for dword in payload {
            self.data.put_u32_le(*dword);
        }
    }

    fn emit_with_buffer(&mut self, opcode: MiOpcode, leading: &[u32], buffer: &GpuBuffer, tail: &[u32]) {
        let location = self.data.len() + 4 * (1 + leading.len());
        self.patches.push(PatchEntry {
            handle: buffer.handle(),
            location,
        });

        let mut payload = Vec::with_capacity(leading.len() + 1 + tail.len());
        payload.extend_from_slice(leading);
        payload.push(buffer.handle());
        payload.extend_from_slice(tail);
        self.emit(opcode, &payload);
    }

    pub fn store_data_imm(&mut self, buffer: &GpuBuffer, offset: u32, value: u32) {
        self.emit_with_buffer(MiOpcode::StoreDataImm, &[], buffer, &[offset, value]);
    }

    pub fn store_register_mem(&mut self, register: u32, buffer: &GpuBuffer, offset: u32) {
        self.emit_with_buffer(MiOpcode::StoreRegisterMem, &[register], buffer, &[offset]);
    }

    /// Ends the batch early if the dword at `offset` in `buffer` is non-zero (`end_if_nonzero`)
    /// or zero (`!end_if_nonzero`).
    pub fn conditional_batch_buffer_end(
        &mut self,
        buffer: &GpuBuffer,
        offset: u32,
        end_if_nonzero: bool,
    ) {
        self.emit_with_buffer(
            MiOpcode::ConditionalBatchBufferEnd,
            &[],
            buffer,
            &[offset, end_if_nonzero as u32],
        );
    }

    pub fn store_timestamp(&mut self, buffer: &GpuBuffer, offset: u32) {
        self.emit_with_buffer(MiOpcode::StoreTimestamp, &[], buffer, &[offset]);
    }

    pub fn flush_dw(&mut self) {
        self.emit(MiOpcode::FlushDw, &[]);
    }

    pub fn batch_buffer_end(&mut self) {
        self.emit(MiOpcode::BatchBufferEnd, &[]);
    }

    pub fn vd_command(&mut self, kind: u32, payload: &[u32]) {
        let mut dwords = Vec::with_capacity(payload.len() + 1);
        dwords.push(kind);
        dwords.extend_from_slice(payload);
        self.emit(MiOpcode::VdCommand, &dwords);
    }

    pub fn kernel_dispatch(&mut self, kernel: u32, payload: &[u32]) {
        let mut dwords = Vec::with_capacity(payload.len() + 1);
        dwords.push(kernel);
        dwords.extend_from_slice(payload);
        self.emit(MiOpcode::KernelDispatch, &dwords);
    }

    /// Iterates over the recorded commands. Iteration stops at the first malformed command.
    pub fn commands(&self) -> CommandIter<'_> {
        CommandIter {
            cursor: Cursor::new(&self.data[..]),
        }
    }
}

/// Iterator over the commands of a [`CommandBuffer`].
pub struct CommandIter<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> CommandIter<'a> {
    fn read_command(&mut self) -> std::io::Result<Option<Command>> {
        let header = self.cursor.read_u32::<LittleEndian>()?;
        let Some(opcode) = MiOpcode::n(header >> 16) else {
            log::warn!("unknown command opcode {:#x}", header >> 16);
            return Ok(None);
        };

        let len = (header & 0xffff) as usize;
        let mut payload = Vec::with_capacity(len);
        for _ in 0..len {
            payload.push(self.cursor.read_u32::<LittleEndian>()?);
        }

        Ok(Some(Command { opcode, payload }))
    }
}

impl<'a> Iterator for CommandIter<'a> {
    type Item = Command;

    fn next(&mut self) -> Option<Command> {
        if self.cursor.position() as usize >= self.cursor.get_ref().len() {
            return None;
        }

        match self.read_command() {
            Ok(command) => command,
            Err(e) => {
                log::warn!("truncated command buffer: {}", e);
                None
            }
        }
    }
}
