use super::{CursorState, MAX_STACK_DEPTH, StackCursor, StackEntry};
use crate::{CpuState, MemoryReader, Symbolicator};

const WORD: usize = std::mem::size_of::<usize>();

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Step {
    InstructionPointer,
    LinkRegister,
    /// The address of the next `{previous, return_address}` frame record
    Frame(usize),
    Done,
}

/// Unwinds a live stack by following the chain of frame records starting at
/// the frame pointer.
///
/// Every read of stack memory goes through a [`MemoryReader`], so a corrupt
/// chain ends the walk instead of faulting.
pub struct FrameWalkCursor<'a> {
    cpu: CpuState,
    memory: &'a dyn MemoryReader,
    symbolicator: &'a dyn Symbolicator,
    next: Step,
    state: CursorState,
}

impl<'a> FrameWalkCursor<'a> {
    pub fn new(
        cpu: &CpuState,
        memory: &'a dyn MemoryReader,
        symbolicator: &'a dyn Symbolicator,
    ) -> Self {
        Self::with_max_depth(cpu, memory, symbolicator, MAX_STACK_DEPTH)
    }

    pub fn with_max_depth(
        cpu: &CpuState,
        memory: &'a dyn MemoryReader,
        symbolicator: &'a dyn Symbolicator,
        max_depth: usize,
    ) -> Self {
        Self {
            cpu: *cpu,
            memory,
            symbolicator,
            next: Step::InstructionPointer,
            state: CursorState::new(max_depth),
        }
    }

    /// Reads the `{previous, return_address}` record at `address`
    fn read_frame(&self, address: usize) -> Option<(usize, usize)> {
        let mut record = [0u8; WORD * 2];
        if !self.memory.copy(address, &mut record) {
            return None;
        }

        let (previous, return_address) = record.split_at(WORD);
        Some((
            usize::from_ne_bytes(previous.try_into().ok()?),
            usize::from_ne_bytes(return_address.try_into().ok()?),
        ))
    }

    fn record(&mut self, address: usize) -> bool {
        if self.state.record(address) {
            true
        } else {
            self.next = Step::Done;
            false
        }
    }
}

impl StackCursor for FrameWalkCursor<'_> {
    fn reset(&mut self) {
        self.state.reset();
        self.next = Step::InstructionPointer;
    }

    fn advance(&mut self) -> bool {
        loop {
            match self.next {
                Step::InstructionPointer => {
                    let ip = self.cpu.instruction_address();
                    if ip == 0 {
                        self.next = Step::Done;
                        return false;
                    }

                    self.next = Step::LinkRegister;
                    return self.record(ip);
                }
                Step::LinkRegister => {
                    self.next = Step::Frame(self.cpu.frame_pointer());

                    let lr = self.cpu.link_register();
                    if lr != 0 {
                        return self.record(lr);
                    }
                }
                Step::Frame(address) => {
                    let Some((previous, return_address)) = self.read_frame(address) else {
                        self.next = Step::Done;
                        return false;
                    };

                    // The outermost frame record is zeroed
                    if previous == 0 || return_address == 0 {
                        self.next = Step::Done;
                        return false;
                    }

                    self.next = Step::Frame(previous);
                    return self.record(return_address);
                }
                Step::Done => return false,
            }
        }
    }

    fn symbolicate(&mut self) {
        self.state.symbolicate(self.symbolicator);
    }

    fn entry(&self) -> &StackEntry {
        &self.state.entry
    }

    fn depth(&self) -> usize {
        self.state.depth
    }

    fn has_given_up(&self) -> bool {
        self.state.given_up
    }
}
