//! Describes memory that registers and stack words of the crashed thread
//! point at.

use crate::{
    IntrospectionRules, ObjectDescriber, ReportWriter,
    describe::{FieldValue, ObjectContents, ObjectKind},
    fields::{self, mem_type},
    writer::NameBuf,
};
use machine_context::{MachineContext, MemoryReader, cpu::STACK_GROW_DIRECTION};
use std::fmt::Write as _;

/// The maximum number of objects written for a single notable address,
/// including the ones it references
pub const DEFAULT_MEMORY_SEARCH_DEPTH: usize = 15;
/// Words scanned towards the base of the stack
const NOTABLE_BACK_DISTANCE: usize = 20;
/// Words scanned past the stack pointer
const NOTABLE_FORWARD_DISTANCE: usize = 10;
/// Strings shorter than this aren't considered notable
const MIN_STRING_LENGTH: usize = 4;
const MAX_STRING_LENGTH: usize = 500;

const WORD: usize = std::mem::size_of::<usize>();

/// The `[low, high)` range of stack memory `back` words towards the base and
/// `forward` words past the stack pointer, clamped to the address space
pub(crate) fn stack_window(sp: usize, back: usize, forward: usize) -> (usize, usize) {
    let back = back.saturating_mul(WORD);
    let forward = forward.saturating_mul(WORD);
    if STACK_GROW_DIRECTION < 0 {
        (sp.saturating_sub(forward), sp.saturating_add(back))
    } else {
        (sp.saturating_sub(back), sp.saturating_add(forward))
    }
}

/// Reads a nul terminated UTF-8 string of at least [`MIN_STRING_LENGTH`]
/// printable characters
fn read_string<'b>(
    memory: &dyn MemoryReader,
    address: usize,
    buf: &'b mut [u8; MAX_STRING_LENGTH],
) -> Option<&'b str> {
    if address == 0 || address.checked_add(MAX_STRING_LENGTH).is_none() {
        return None;
    }

    let copied = memory.copy_max_possible(address, buf);
    let len = buf[..copied].iter().position(|b| *b == 0)?;
    if len < MIN_STRING_LENGTH {
        return None;
    }

    let s = std::str::from_utf8(&buf[..len]).ok()?;
    s.chars()
        .all(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .then_some(s)
}

/// Finds the first `0x` prefixed hex number in a string
fn extract_hex_value(s: &str) -> Option<usize> {
    let start = s.find("0x").or_else(|| s.find("0X"))? + 2;
    let digits = &s[start..];
    let end = digits
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(digits.len());
    usize::from_str_radix(&digits[..end], 16).ok()
}

pub(crate) struct Introspector<'a> {
    pub memory: &'a dyn MemoryReader,
    pub rules: &'a IntrospectionRules,
    pub describer: Option<&'a dyn ObjectDescriber>,
}

impl Introspector<'_> {
    fn is_notable(&self, address: usize) -> bool {
        if address == 0 {
            return false;
        }

        if let Some(describer) = self.describer {
            if describer.zombie_class_name(address).is_some()
                || describer.describe(address).is_some()
            {
                return true;
            }
        }

        let mut buf = [0u8; MAX_STRING_LENGTH];
        read_string(self.memory, address, &mut buf).is_some()
    }

    /// Writes what lives at `address`, decrementing `limit` for it and every
    /// object it references that is also written
    pub(crate) fn write_memory_contents(
        &self,
        w: &mut dyn ReportWriter,
        key: Option<&str>,
        address: usize,
        limit: &mut usize,
    ) {
        *limit = limit.saturating_sub(1);

        w.begin_object(key);
        w.add_unsigned(Some(fields::ADDRESS), address as u64);

        if let Some(describer) = self.describer {
            if let Some(zombie) = describer.zombie_class_name(address) {
                w.add_string(Some(fields::LAST_DEALLOC_OBJECT), Some(&zombie));
            }
        }

        if !self.write_object(w, address, limit) {
            let mut buf = [0u8; MAX_STRING_LENGTH];
            if address == 0 {
                w.add_string(Some(fields::TYPE), Some(mem_type::NULL_POINTER));
            } else if let Some(s) = read_string(self.memory, address, &mut buf) {
                w.add_string(Some(fields::TYPE), Some(mem_type::STRING));
                w.add_string(Some(fields::VALUE), Some(s));
            } else {
                w.add_string(Some(fields::TYPE), Some(mem_type::UNKNOWN));
            }
        }

        w.end_container();
    }

    /// Writes an object the describer recognizes, returning false if it
    /// doesn't
    fn write_object(&self, w: &mut dyn ReportWriter, address: usize, limit: &mut usize) -> bool {
        let Some(description) = self.describer.and_then(|d| d.describe(address)) else {
            return false;
        };

        let class_name = description.class_name.as_deref();
        let kind = match description.kind {
            ObjectKind::Class => mem_type::CLASS,
            ObjectKind::Object => mem_type::OBJECT,
            ObjectKind::Block => mem_type::BLOCK,
        };
        w.add_string(Some(fields::TYPE), Some(kind));
        w.add_string(Some(fields::CLASS), class_name);

        if description.kind != ObjectKind::Object
            || class_name.is_some_and(|c| self.rules.is_restricted(c))
        {
            return true;
        }

        match description.contents {
            ObjectContents::None => {}
            ObjectContents::Value(value) => self.write_field(w, Some(fields::VALUE), value, limit),
            ObjectContents::Text(text) => w.add_string(Some(fields::VALUE), Some(&text)),
            ObjectContents::FirstObject(first) => {
                if *limit > 0 {
                    self.write_memory_contents(w, Some(fields::FIRST_OBJECT), first, limit);
                }
            }
            ObjectContents::Ivars(ivars) => {
                if *limit > 0 {
                    w.begin_object(Some(fields::IVARS));
                    for ivar in &ivars {
                        self.write_field(w, Some(&ivar.name), ivar.value, limit);
                    }
                    w.end_container();
                }
            }
        }

        true
    }

    fn write_field(
        &self,
        w: &mut dyn ReportWriter,
        key: Option<&str>,
        value: FieldValue,
        limit: &mut usize,
    ) {
        match value {
            FieldValue::Signed(v) => w.add_integer(key, v),
            FieldValue::Unsigned(v) => w.add_unsigned(key, v),
            FieldValue::Float(v) => w.add_float(key, v),
            FieldValue::Bool(v) => w.add_boolean(key, v),
            FieldValue::Reference(address) => {
                if *limit > 0 {
                    self.write_memory_contents(w, key, address, limit);
                } else {
                    w.add_unsigned(key, address as u64);
                }
            }
        }
    }

    pub(crate) fn write_if_notable(&self, w: &mut dyn ReportWriter, key: &str, address: usize) {
        if self.is_notable(address) {
            let mut limit = DEFAULT_MEMORY_SEARCH_DEPTH;
            self.write_memory_contents(w, Some(key), address, &mut limit);
        }
    }

    /// Writes the object referenced by a hex address embedded in `text`, if
    /// there is one
    pub(crate) fn write_referenced_by_string(
        &self,
        w: &mut dyn ReportWriter,
        key: &str,
        text: Option<&str>,
    ) {
        let Some(address) = text.and_then(extract_hex_value) else {
            return;
        };

        let mut limit = DEFAULT_MEMORY_SEARCH_DEPTH;
        self.write_memory_contents(w, Some(key), address, &mut limit);
    }

    /// Writes every register and nearby stack word that points at something
    /// recognizable
    pub(crate) fn write_notable_addresses(
        &self,
        w: &mut dyn ReportWriter,
        key: &str,
        ctx: &MachineContext,
    ) {
        w.begin_object(Some(key));

        for (name, value) in ctx.cpu.named_registers() {
            self.write_if_notable(w, name, value as usize);
        }

        let sp = ctx.cpu.stack_pointer();
        if sp != 0 {
            let (low, high) = stack_window(sp, NOTABLE_BACK_DISTANCE, NOTABLE_FORWARD_DISTANCE);
            let words = NOTABLE_BACK_DISTANCE + NOTABLE_FORWARD_DISTANCE;
            for address in (low..high).step_by(WORD).take(words) {
                let Some(value) = self.memory.read_word(address) else {
                    continue;
                };

                let mut name = NameBuf::new();
                if write!(name, "stack@{address:#x}").is_ok() {
                    self.write_if_notable(w, name.as_str(), value);
                }
            }
        }

        w.end_container();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        JsonReportWriter,
        describe::{ObjectDescription, ObjectField},
    };
    use machine_context::SafeMemory;
    use std::collections::BTreeMap;

    #[test]
    fn stack_window_is_ordered() {
        let (low, high) = stack_window(0x10000, 20, 10);
        if STACK_GROW_DIRECTION < 0 {
            assert_eq!(low, 0x10000 - 10 * WORD);
            assert_eq!(high, 0x10000 + 20 * WORD);
        } else {
            assert_eq!(low, 0x10000 - 20 * WORD);
            assert_eq!(high, 0x10000 + 10 * WORD);
        }
    }

    #[test]
    fn stack_window_is_clamped() {
        let (low, high) = stack_window(0x10, 20, 10);
        assert_eq!(low, 0);
        assert!(high > low && high - low <= 30 * WORD);

        let (low, high) = stack_window(usize::MAX - 8, 20, 10);
        assert_eq!(high, usize::MAX);
        assert!(high > low && high - low <= 30 * WORD);
    }

    /// Counts reads without ever succeeding
    #[derive(Default)]
    struct CountingMemory(std::sync::atomic::AtomicUsize);

    impl MemoryReader for CountingMemory {
        fn copy(&self, _src: usize, _dst: &mut [u8]) -> bool {
            self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            false
        }
    }

    #[test]
    fn stack_scan_near_the_address_space_edges() {
        use machine_context::CpuState;

        let rules = IntrospectionRules::default();
        for sp in [0x10, usize::MAX - 8] {
            let memory = CountingMemory::default();
            let intro = Introspector {
                memory: &memory,
                rules: &rules,
                describer: None,
            };

            let ctx = MachineContext::from_cpu_state(1, CpuState::from_frame(0, sp, 0, 0), true);
            let registers = ctx.cpu.named_registers().count();

            let mut w = JsonReportWriter::new(Vec::new(), false);
            w.begin_object(None);
            intro.write_notable_addresses(&mut w, "notable_addresses", &ctx);
            w.end_encode();

            // Registers are never notable here so only the stack words are read
            let reads = memory.0.load(std::sync::atomic::Ordering::Relaxed);
            assert!(reads <= registers + 30, "{reads} reads for sp {sp:#x}");

            let out: serde_json::Value = serde_json::from_slice(&w.into_inner()).unwrap();
            assert!(out["notable_addresses"].as_object().unwrap().is_empty());
        }
    }

    #[test]
    fn hex_values() {
        assert_eq!(extract_hex_value("bad access at 0x7fAb0!"), Some(0x7fab0));
        assert_eq!(extract_hex_value("*** -[Foo bar]: 0X10"), Some(0x10));
        assert_eq!(extract_hex_value("no address"), None);
        assert_eq!(extract_hex_value("ends with 0x"), None);
    }

    #[test]
    fn strings() {
        let mut buf = [0u8; MAX_STRING_LENGTH];
        let good = b"a readable string\0";
        let short = b"abc\0";
        let control = b"bell\x07\0";
        let unterminated = [b'x'; 600];

        let read = |data: &[u8], buf: &mut [u8; MAX_STRING_LENGTH]| {
            read_string(&SafeMemory, data.as_ptr() as usize, buf).map(str::to_owned)
        };

        assert_eq!(read(good, &mut buf).as_deref(), Some("a readable string"));
        assert_eq!(read(short, &mut buf), None);
        assert_eq!(read(control, &mut buf), None);
        assert_eq!(read(&unterminated, &mut buf), None);
        assert_eq!(read_string(&SafeMemory, 0, &mut buf), None);
    }

    /// A runtime with a handful of objects at made up addresses
    struct Runtime(BTreeMap<usize, ObjectDescription>);

    impl ObjectDescriber for Runtime {
        fn describe(&self, address: usize) -> Option<ObjectDescription> {
            self.0.get(&address).cloned()
        }

        fn zombie_class_name(&self, address: usize) -> Option<String> {
            (address == 0xdead).then(|| "Freed".to_owned())
        }
    }

    fn object(class: &str, contents: ObjectContents) -> ObjectDescription {
        ObjectDescription {
            kind: ObjectKind::Object,
            class_name: Some(class.to_owned()),
            contents,
        }
    }

    fn write(intro: &Introspector<'_>, address: usize, limit: usize) -> serde_json::Value {
        let mut w = JsonReportWriter::new(Vec::new(), false);
        w.begin_object(None);
        let mut limit = limit;
        intro.write_memory_contents(&mut w, Some("obj"), address, &mut limit);
        w.end_encode();
        let out: serde_json::Value = serde_json::from_slice(&w.into_inner()).unwrap();
        out["obj"].clone()
    }

    #[test]
    fn describes_objects() {
        let mut objects = BTreeMap::new();
        objects.insert(0x100, object("Number", ObjectContents::Value(FieldValue::Signed(-4))));
        objects.insert(0x200, object("Array", ObjectContents::FirstObject(0x100)));
        objects.insert(
            0x300,
            object(
                "Node",
                ObjectContents::Ivars(vec![
                    ObjectField {
                        name: "next".to_owned(),
                        value: FieldValue::Reference(0x300),
                    },
                    ObjectField {
                        name: "flag".to_owned(),
                        value: FieldValue::Bool(true),
                    },
                ]),
            ),
        );
        objects.insert(0x400, object("Secret", ObjectContents::Text("hunter2".to_owned())));
        objects.insert(
            0x500,
            ObjectDescription {
                kind: ObjectKind::Class,
                class_name: Some("Meta".to_owned()),
                contents: ObjectContents::None,
            },
        );

        let runtime = Runtime(objects);
        let rules = IntrospectionRules {
            enabled: true,
            restricted_classes: vec!["Secret".to_owned()],
        };
        let intro = Introspector {
            memory: &SafeMemory,
            rules: &rules,
            describer: Some(&runtime),
        };

        let number = write(&intro, 0x100, DEFAULT_MEMORY_SEARCH_DEPTH);
        assert_eq!(number["type"], "objc_object");
        assert_eq!(number["class"], "Number");
        assert_eq!(number["value"], -4);

        let array = write(&intro, 0x200, DEFAULT_MEMORY_SEARCH_DEPTH);
        assert_eq!(array["first_object"]["address"], 0x100);
        assert_eq!(array["first_object"]["value"], -4);

        // A self referencing object stops once the budget is spent
        let mut node = write(&intro, 0x300, 3);
        for _ in 0..2 {
            assert_eq!(node["ivars"]["flag"], true);
            node = node["ivars"]["next"].clone();
        }
        assert_eq!(node["address"], 0x300);
        assert!(node.get("ivars").is_none());

        let secret = write(&intro, 0x400, DEFAULT_MEMORY_SEARCH_DEPTH);
        assert_eq!(secret["class"], "Secret");
        assert!(secret.get("value").is_none());

        assert_eq!(write(&intro, 0x500, 1)["type"], "objc_class");

        let zombie = write(&intro, 0xdead, 1);
        assert_eq!(zombie["last_deallocated_obj"], "Freed");
        assert_eq!(zombie["type"], "unknown");

        assert_eq!(write(&intro, 0, 1)["type"], "null_pointer");
    }

    #[test]
    fn notable_addresses() {
        let text = b"notable text\0";
        let rules = IntrospectionRules::default();
        let intro = Introspector {
            memory: &SafeMemory,
            rules: &rules,
            describer: None,
        };

        assert!(intro.is_notable(text.as_ptr() as usize));
        assert!(!intro.is_notable(0));
        assert!(!intro.is_notable(8));

        let mut w = JsonReportWriter::new(Vec::new(), false);
        w.begin_object(None);
        intro.write_if_notable(&mut w, "rdi", text.as_ptr() as usize);
        intro.write_if_notable(&mut w, "rsi", 8);
        intro.write_referenced_by_string(
            &mut w,
            "referenced_object",
            Some(&format!("object at {:#x} freed", text.as_ptr() as usize)),
        );
        w.end_encode();

        let out: serde_json::Value = serde_json::from_slice(&w.into_inner()).unwrap();
        assert_eq!(out["rdi"]["type"], "string");
        assert_eq!(out["rdi"]["value"], "notable text");
        assert!(out.get("rsi").is_none());
        assert_eq!(out["referenced_object"]["value"], "notable text");
    }
}
