bitflags::bitflags! {
    /// The categories of monitors that detect failures or contribute
    /// information to reports.
    ///
    /// The values are part of the report compatibility surface and never
    /// change.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct MonitorKind: u32 {
        /// Mach exceptions
        const MACH_EXCEPTION = 0x01;
        /// Fatal POSIX signals
        const SIGNAL = 0x02;
        /// Uncaught C++ exceptions
        const CPP_EXCEPTION = 0x04;
        /// Uncaught exceptions of a managed language runtime
        const NS_EXCEPTION = 0x08;
        /// A watched thread that stopped responding
        const MAIN_THREAD_DEADLOCK = 0x10;
        /// Exceptions reported by user code
        const USER_REPORTED = 0x20;
        /// Injects system information
        const SYSTEM = 0x40;
        /// Tracks and injects application lifecycle state
        const APPLICATION_STATE = 0x80;
        /// Injects the last deallocated exception object
        const ZOMBIE = 0x100;
    }
}

struct Classification {
    kind: MonitorKind,
    name: &'static str,
    /// Interferes with an attached debugger, which handles the same faults
    debugger_unsafe: bool,
    /// Only does async-signal-safe work when an event is handled
    async_safe: bool,
    /// Not part of the minimal production set
    optional: bool,
    experimental: bool,
    /// Needed for every report to be complete
    required: bool,
    /// Needed to write reports manually
    manual: bool,
}

#[rustfmt::skip]
const CLASSIFICATIONS: &[Classification] = &[
    Classification { kind: MonitorKind::MACH_EXCEPTION, name: "MachException", debugger_unsafe: true, async_safe: true, optional: false, experimental: false, required: false, manual: false },
    Classification { kind: MonitorKind::SIGNAL, name: "Signal", debugger_unsafe: true, async_safe: true, optional: false, experimental: false, required: false, manual: false },
    Classification { kind: MonitorKind::CPP_EXCEPTION, name: "CPPException", debugger_unsafe: true, async_safe: false, optional: false, experimental: false, required: false, manual: false },
    Classification { kind: MonitorKind::NS_EXCEPTION, name: "NSException", debugger_unsafe: true, async_safe: false, optional: false, experimental: false, required: false, manual: false },
    Classification { kind: MonitorKind::MAIN_THREAD_DEADLOCK, name: "MainThreadDeadlock", debugger_unsafe: false, async_safe: false, optional: false, experimental: true, required: false, manual: false },
    Classification { kind: MonitorKind::USER_REPORTED, name: "UserReported", debugger_unsafe: false, async_safe: false, optional: false, experimental: false, required: false, manual: true },
    Classification { kind: MonitorKind::SYSTEM, name: "System", debugger_unsafe: false, async_safe: false, optional: false, experimental: false, required: true, manual: true },
    Classification { kind: MonitorKind::APPLICATION_STATE, name: "ApplicationState", debugger_unsafe: false, async_safe: false, optional: false, experimental: false, required: true, manual: true },
    Classification { kind: MonitorKind::ZOMBIE, name: "Zombie", debugger_unsafe: false, async_safe: false, optional: true, experimental: false, required: false, manual: false },
];

#[derive(Copy, Clone)]
enum Trait {
    Any,
    DebuggerUnsafe,
    AsyncSafe,
    Optional,
    Experimental,
    Required,
    Manual,
}

const fn having(t: Trait) -> MonitorKind {
    let mut bits = 0;
    let mut i = 0;
    while i < CLASSIFICATIONS.len() {
        let c = &CLASSIFICATIONS[i];
        let has = match t {
            Trait::Any => true,
            Trait::DebuggerUnsafe => c.debugger_unsafe,
            Trait::AsyncSafe => c.async_safe,
            Trait::Optional => c.optional,
            Trait::Experimental => c.experimental,
            Trait::Required => c.required,
            Trait::Manual => c.manual,
        };
        if has {
            bits |= c.kind.bits();
        }
        i += 1;
    }
    MonitorKind::from_bits_retain(bits)
}

impl MonitorKind {
    pub const ALL: Self = having(Trait::Any);
    pub const EXPERIMENTAL: Self = having(Trait::Experimental);
    pub const DEBUGGER_UNSAFE: Self = having(Trait::DebuggerUnsafe);
    pub const DEBUGGER_SAFE: Self = Self::ALL.difference(Self::DEBUGGER_UNSAFE);
    pub const ASYNC_SAFE: Self = having(Trait::AsyncSafe);
    pub const ASYNC_UNSAFE: Self = Self::ALL.difference(Self::ASYNC_SAFE);
    pub const OPTIONAL: Self = having(Trait::Optional);
    pub const PRODUCTION_SAFE: Self = Self::ALL.difference(Self::EXPERIMENTAL);
    pub const PRODUCTION_SAFE_MINIMAL: Self = Self::PRODUCTION_SAFE.difference(Self::OPTIONAL);
    pub const REQUIRED: Self = having(Trait::Required);
    pub const MANUAL: Self = Self::REQUIRED.union(having(Trait::Manual));

    /// The name of a single monitor kind, `None` for combinations
    pub fn name(self) -> Option<&'static str> {
        CLASSIFICATIONS
            .iter()
            .find(|c| c.kind == self)
            .map(|c| c.name)
    }
}

impl std::fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return f.write_str("None");
        }

        for (i, kind) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            f.write_str(kind.name().unwrap_or("Unknown"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_kind_is_classified() {
        let mut seen = MonitorKind::empty();
        for c in CLASSIFICATIONS {
            assert_eq!(c.kind.bits().count_ones(), 1);
            assert!(!seen.intersects(c.kind));
            seen |= c.kind;
        }
        assert_eq!(seen, MonitorKind::all());
        assert_eq!(MonitorKind::ALL, MonitorKind::all());
    }

    #[test]
    fn derived_sets() {
        assert_eq!(MonitorKind::ALL.bits(), 0x1ff);
        assert_eq!(MonitorKind::EXPERIMENTAL, MonitorKind::MAIN_THREAD_DEADLOCK);
        assert_eq!(MonitorKind::DEBUGGER_UNSAFE.bits(), 0x0f);
        assert_eq!(MonitorKind::DEBUGGER_SAFE.bits(), 0x1f0);
        assert_eq!(
            MonitorKind::ASYNC_SAFE,
            MonitorKind::MACH_EXCEPTION | MonitorKind::SIGNAL
        );
        assert_eq!(MonitorKind::ASYNC_UNSAFE.bits(), 0x1fc);
        assert_eq!(MonitorKind::PRODUCTION_SAFE.bits(), 0x1ef);
        assert_eq!(MonitorKind::PRODUCTION_SAFE_MINIMAL.bits(), 0x0ef);
        assert_eq!(
            MonitorKind::REQUIRED,
            MonitorKind::SYSTEM | MonitorKind::APPLICATION_STATE
        );
        assert_eq!(
            MonitorKind::MANUAL,
            MonitorKind::REQUIRED | MonitorKind::USER_REPORTED
        );
    }

    #[test]
    fn names() {
        assert_eq!(MonitorKind::CPP_EXCEPTION.name(), Some("CPPException"));
        assert_eq!(MonitorKind::REQUIRED.name(), None);
        assert_eq!(
            MonitorKind::REQUIRED.to_string(),
            "System | ApplicationState"
        );
        assert_eq!(MonitorKind::empty().to_string(), "None");
    }
}
