// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This file contains a dummy backend whose only purpose is to let the pipeline
//! run so we can test it in isolation.
//!
//! Submissions are queued and only executed when the test retires them, which mimics the
//! asynchronous nature of real hardware. Executing a submission interprets the generic memory
//! commands so that status buffers get written the same way the hardware would. A conditional
//! batch buffer end only ends the command buffer it is in.

use std::cell::Cell;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::Mutex;

use byteorder::ByteOrder;
use byteorder::LittleEndian;

use crate::backend::command_buffer::MiOpcode;
use crate::backend::CommandBuffer;
use crate::backend::Allocator;
use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::backend::GpuBuffer;
use crate::backend::GpuContext;
use crate::backend::GpuMemory;
use crate::backend::Submission;

#[derive(Debug)]
pub struct DummyMemory {
    handle: u32,
    data: Mutex<Vec<u8>>,
}

impl DummyMemory {
    pub fn new(handle: u32, size: usize) -> Self {
        Self {
            handle,
            data: Mutex::new(vec![0; size]),
        }
    }

    pub fn write_u32(&self, offset: usize, value: u32) {
        let mut data = self.data.lock().unwrap();
        if offset + 4 <= data.len() {
            LittleEndian::write_u32(&mut data[offset..offset + 4], value);
        }
    }
}

impl GpuMemory for DummyMemory {
    fn handle(&self) -> u32 {
        self.handle
    }

    fn size(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    fn read_u32(&self, offset: usize) -> u32 {
        let data = self.data.lock().unwrap();
        if offset + 4 <= data.len() {
            LittleEndian::read_u32(&data[offset..offset + 4])
        } else {
            0
        }
    }
}

type MemoryMap = Rc<RefCell<BTreeMap<u32, Arc<DummyMemory>>>>;

/// What the dummy GPU saw of a submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionInfo {
    pub index: u64,
    /// Pipes of the command buffers in the submission.
    pub pipes: Vec<usize>,
}

/// A VD command executed by the dummy GPU, along with the pipe it ran on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutedVdCommand {
    pub pipe: usize,
    pub kind: u32,
    pub payload: Vec<u32>,
}

#[derive(Default)]
struct GpuState {
    pending: VecDeque<Submission>,
    submitted: Vec<SubmissionInfo>,
    registers: BTreeMap<u32, u32>,
    timestamp: u32,
    vd_commands: Vec<ExecutedVdCommand>,
    kernels: Vec<u32>,
    reject_submissions: bool,
}

/// Dummy GPU shared between the test and the pipeline under test.
#[derive(Clone, Default)]
pub struct DummyGpu {
    state: Rc<RefCell<GpuState>>,
    memory: MemoryMap,
    next_handle: Rc<Cell<u32>>,
    released: Rc<Cell<usize>>,
}

impl DummyGpu {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn context(&self) -> Box<dyn GpuContext> {
        Box::new(DummyContext { gpu: self.clone() })
    }

    pub fn allocator(&self) -> Box<dyn Allocator> {
        Box::new(DummyAllocator {
            gpu: self.clone(),
            fail: false,
        })
    }

    /// An allocator that never has memory to give.
    pub fn failing_allocator(&self) -> Box<dyn Allocator> {
        Box::new(DummyAllocator {
            gpu: self.clone(),
            fail: true,
        })
    }

    /// Allocates a buffer directly, e.g. to be passed as a predication or marker resource.
    pub fn create_buffer(&self, size: usize) -> Arc<DummyMemory> {
        let handle = self.next_handle.get() + 1;
        self.next_handle.set(handle);
        let memory = Arc::new(DummyMemory::new(handle, size));
        self.memory.borrow_mut().insert(handle, Arc::clone(&memory));
        memory
    }

    pub fn set_register(&self, register: u32, value: u32) {
        self.state.borrow_mut().registers.insert(register, value);
    }

    pub fn reject_submissions(&self, reject: bool) {
        self.state.borrow_mut().reject_submissions = reject;
    }

    pub fn submitted(&self) -> Vec<SubmissionInfo> {
        self.state.borrow().submitted.clone()
    }

    pub fn pending(&self) -> usize {
        self.state.borrow().pending.len()
    }

    pub fn vd_commands(&self) -> Vec<ExecutedVdCommand> {
        self.state.borrow().vd_commands.clone()
    }

    pub fn kernels(&self) -> Vec<u32> {
        self.state.borrow().kernels.clone()
    }

    pub fn released_buffers(&self) -> usize {
        self.released.get()
    }

    /// Executes up to `count` pending submissions, oldest first. Returns how many were executed.
    pub fn retire(&self, count: usize) -> usize {
        let mut retired = 0;
        while retired < count {
            let Some(submission) = self.state.borrow_mut().pending.pop_front() else {
                break;
            };
            self.execute(&submission);
            retired += 1;
        }
        retired
    }

    pub fn retire_all(&self) -> usize {
        self.retire(usize::MAX)
    }

    fn buffer(&self, handle: u32) -> Option<Arc<DummyMemory>> {
        self.memory.borrow().get(&handle).cloned()
    }

    fn execute(&self, submission: &Submission) {
        for cmd in submission.buffers.iter().chain(submission.epilogue.iter()) {
            self.execute_buffer(cmd);
        }
    }

    fn execute_buffer(&self, cmd: &CommandBuffer) {
        for command in cmd.commands() {
            let p = &command.payload;
            match command.opcode {
                MiOpcode::StoreDataImm => {
                    if let Some(mem) = self.buffer(p[0]) {
                        mem.write_u32(p[1] as usize, p[2]);
                    }
                }
                MiOpcode::StoreRegisterMem => {
                    let value = *self.state.borrow().registers.get(&p[0]).unwrap_or(&0);
                    if let Some(mem) = self.buffer(p[1]) {
                        mem.write_u32(p[2] as usize, value);
                    }
                }
                MiOpcode::ConditionalBatchBufferEnd => {
                    let value = self.buffer(p[0]).map(|m| m.read_u32(p[1] as usize));
                    if (value.unwrap_or(0) != 0) == (p[2] != 0) {
                        return;
                    }
                }
                MiOpcode::StoreTimestamp => {
                    let timestamp = {
                        let mut state = self.state.borrow_mut();
                        state.timestamp += 1;
                        state.timestamp
                    };
                    if let Some(mem) = self.buffer(p[0]) {
                        mem.write_u32(p[1] as usize, timestamp);
                    }
                }
                MiOpcode::VdCommand => {
                    self.state.borrow_mut().vd_commands.push(ExecutedVdCommand {
                        pipe: cmd.pipe(),
                        kind: p[0],
                        payload: p[1..].to_vec(),
                    });
                }
                MiOpcode::KernelDispatch => self.state.borrow_mut().kernels.push(p[0]),
                MiOpcode::BatchBufferEnd => return,
                MiOpcode::Noop | MiOpcode::FlushDw => (),
            }
        }
    }
}

struct DummyContext {
    gpu: DummyGpu,
}

impl GpuContext for DummyContext {
    fn submit(&mut self, submission: Submission) -> BackendResult<()> {
        let mut state = self.gpu.state.borrow_mut();
        if state.reject_submissions {
            return Err(BackendError::SubmissionRejected(submission.index));
        }

        state.submitted.push(SubmissionInfo {
            index: submission.index,
            pipes: submission.buffers.iter().map(|b| b.pipe()).collect(),
        });
        state.pending.push_back(submission);
        Ok(())
    }
}

struct DummyAllocator {
    gpu: DummyGpu,
    fail: bool,
}

impl Allocator for DummyAllocator {
    fn allocate(&mut self, size: usize, name: &str) -> BackendResult<GpuBuffer> {
        if self.fail {
            return Err(BackendError::OutOfResources);
        }

        log::trace!("allocating {} bytes for {}", size, name);
        Ok(self.gpu.create_buffer(size))
    }

    fn release(&mut self, buffer: GpuBuffer) {
        self.gpu.memory.borrow_mut().remove(&buffer.handle());
        self.gpu.released.set(self.gpu.released.get() + 1);
    }
}
