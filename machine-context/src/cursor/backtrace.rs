use super::{CursorState, MAX_STACK_DEPTH, StackCursor, StackEntry};
use crate::Symbolicator;

/// Some address collection routines terminate the list with this value
/// instead of a real return address
const BOGUS_ADDRESS: usize = 1;

/// Replays a list of return addresses collected ahead of time
pub struct BacktraceCursor<'a> {
    addresses: &'a [usize],
    skip: usize,
    symbolicator: &'a dyn Symbolicator,
    state: CursorState,
}

impl<'a> BacktraceCursor<'a> {
    /// Creates a cursor over `addresses`, ignoring the first `skip` of them
    pub fn new(addresses: &'a [usize], skip: usize, symbolicator: &'a dyn Symbolicator) -> Self {
        Self::with_max_depth(addresses, skip, symbolicator, MAX_STACK_DEPTH)
    }

    pub fn with_max_depth(
        addresses: &'a [usize],
        skip: usize,
        symbolicator: &'a dyn Symbolicator,
        max_depth: usize,
    ) -> Self {
        Self {
            addresses,
            skip,
            symbolicator,
            state: CursorState::new(max_depth),
        }
    }
}

impl StackCursor for BacktraceCursor<'_> {
    fn reset(&mut self) {
        self.state.reset();
    }

    fn advance(&mut self) -> bool {
        let Some(index) = self.skip.checked_add(self.state.depth) else {
            return false;
        };

        // A null entry ends the list the same way the bogus address does
        match self.addresses.get(index) {
            Some(&address) if address > BOGUS_ADDRESS => self.state.record(address),
            _ => false,
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

#[cfg(test)]
mod test {
    use super::*;
    use crate::SymbolInfo;

    struct Table;

    impl Symbolicator for Table {
        fn lookup(&self, address: usize) -> Option<SymbolInfo> {
            (address & 0xfff != 0xfff).then_some(SymbolInfo {
                image_address: address & !0xfff,
                image_name: Some(c"libtest.so"),
                symbol_address: address & !0xf,
                symbol_name: Some(c"function"),
            })
        }
    }

    fn collect(cursor: &mut dyn StackCursor) -> Vec<usize> {
        let mut frames = Vec::new();
        let mut depth = 0;
        while cursor.advance() {
            assert_eq!(cursor.depth(), depth + 1);
            depth = cursor.depth();
            frames.push(cursor.entry().instruction_address);
        }
        frames
    }

    #[test]
    fn stops_at_bogus_address() {
        let addresses = [0x1000, 0x2000, 1, 0x3000];
        let mut cursor = BacktraceCursor::new(&addresses, 0, &Table);

        assert_eq!(collect(&mut cursor), [0x1000, 0x2000]);
        assert!(!cursor.has_given_up());
        assert!(!cursor.advance());
    }

    #[test]
    fn stops_at_null_address() {
        let addresses = [0x1000, 0, 0x3000];
        let mut cursor = BacktraceCursor::new(&addresses, 0, &Table);

        assert_eq!(collect(&mut cursor), [0x1000]);
        assert!(!cursor.has_given_up());

        let mut leading = BacktraceCursor::new(&[0, 0x1000], 0, &Table);
        assert!(collect(&mut leading).is_empty());
    }

    #[test]
    fn skips_and_resets() {
        let addresses = [0x1000, 0x2000, 0x3000];
        let mut cursor = BacktraceCursor::new(&addresses, 1, &Table);

        assert_eq!(collect(&mut cursor), [0x2000, 0x3000]);
        cursor.reset();
        assert_eq!(cursor.depth(), 0);
        assert_eq!(collect(&mut cursor), [0x2000, 0x3000]);

        let mut past_end = BacktraceCursor::new(&addresses, 10, &Table);
        assert!(collect(&mut past_end).is_empty());
    }

    #[test]
    fn gives_up_at_max_depth() {
        let addresses: Vec<usize> = (1..=20).map(|i| i * 0x100).collect();

        let mut exact = BacktraceCursor::with_max_depth(&addresses, 0, &Table, 20);
        assert_eq!(collect(&mut exact).len(), 20);
        assert!(!exact.has_given_up());

        let mut short = BacktraceCursor::with_max_depth(&addresses, 0, &Table, 5);
        assert_eq!(collect(&mut short).len(), 5);
        assert!(short.has_given_up());

        short.reset();
        assert!(!short.has_given_up());
    }

    #[test]
    fn symbolicates_return_addresses() {
        // The second frame is looked up at address - 1, which the table
        // doesn't know about
        let addresses = [0x1fff, 0x2000];
        let mut cursor = BacktraceCursor::new(&addresses, 0, &Table);

        assert!(cursor.advance());
        cursor.symbolicate();
        assert_eq!(cursor.entry().symbol_name, None);
        assert_eq!(cursor.entry().image_address, 0);

        assert!(cursor.advance());
        cursor.symbolicate();
        assert_eq!(cursor.entry().symbol_name, None);

        let addresses = [0x1234, 0x2345];
        let mut cursor = BacktraceCursor::new(&addresses, 0, &Table);
        assert!(cursor.advance());
        assert!(cursor.advance());
        cursor.symbolicate();
        let entry = cursor.entry();
        assert_eq!(entry.instruction_address, 0x2345);
        assert_eq!(entry.symbol_address, 0x2340);
        assert_eq!(entry.image_address, 0x2000);
        assert_eq!(entry.image_name, Some(c"libtest.so"));
    }
}
