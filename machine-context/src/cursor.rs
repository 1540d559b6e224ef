use crate::{Symbolicator, cpu::normalize_instruction_pointer};
use std::ffi::CStr;

mod backtrace;
mod frame_walk;

pub use backtrace::BacktraceCursor;
pub use frame_walk::FrameWalkCursor;

/// The default maximum number of frames a cursor produces before giving up
pub const MAX_STACK_DEPTH: usize = 150;

/// A single frame of a stack
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StackEntry {
    /// The address the frame is executing, stripped of any pointer
    /// authentication bits
    pub instruction_address: usize,
    pub image_address: usize,
    pub image_name: Option<&'static CStr>,
    pub symbol_address: usize,
    pub symbol_name: Option<&'static CStr>,
}

/// Iterates the frames of a stack, innermost first.
///
/// A cursor is created for one thread and is not shared.
pub trait StackCursor {
    /// Restarts iteration from the innermost frame
    fn reset(&mut self);
    /// Moves to the next frame, returning false at the end of the stack or
    /// if the maximum depth was reached, see [`Self::has_given_up`]
    fn advance(&mut self) -> bool;
    /// Fills in the image and symbol of the current entry, best effort
    fn symbolicate(&mut self);
    /// The current entry, only valid after [`Self::advance`] returned true
    fn entry(&self) -> &StackEntry;
    /// The number of frames produced so far
    fn depth(&self) -> usize;
    /// True if iteration stopped at the maximum depth rather than the end of
    /// the stack
    fn has_given_up(&self) -> bool;
}

/// Iteration state common to every cursor
#[derive(Clone, Debug)]
struct CursorState {
    entry: StackEntry,
    depth: usize,
    max_depth: usize,
    given_up: bool,
}

impl CursorState {
    fn new(max_depth: usize) -> Self {
        Self {
            entry: StackEntry::default(),
            depth: 0,
            max_depth,
            given_up: false,
        }
    }

    fn reset(&mut self) {
        self.entry = StackEntry::default();
        self.depth = 0;
        self.given_up = false;
    }

    /// Makes `address` the current frame, called only when the stack has
    /// another frame
    fn record(&mut self, address: usize) -> bool {
        if self.depth >= self.max_depth {
            self.given_up = true;
            return false;
        }

        self.entry = StackEntry {
            instruction_address: normalize_instruction_pointer(address),
            ..Default::default()
        };
        self.depth += 1;
        true
    }

    fn symbolicate(&mut self, symbolicator: &dyn Symbolicator) {
        // Every frame but the first is a return address, which points at the
        // instruction after the call
        let address = if self.depth > 1 {
            self.entry.instruction_address.saturating_sub(1)
        } else {
            self.entry.instruction_address
        };

        let info = symbolicator.lookup(address).unwrap_or_default();
        self.entry.image_address = info.image_address;
        self.entry.image_name = info.image_name;
        self.entry.symbol_address = info.symbol_address;
        self.entry.symbol_name = info.symbol_name;
    }
}
