use crate::{
    BufferedFileSink, CrashEvent, Error, EventKind, ImageEnumerator, JsonReportWriter,
    LoadedImages, ReportConfig, ReportWriter,
    event::SystemFacts,
    fields::{self, exc_type, report_type},
    images::BinaryImage,
    introspect::{Introspector, stack_window},
    signals,
};
use machine_context::{
    BacktraceCursor, DlSymbolicator, FrameWalkCursor, MachineContext, MemoryReader, SafeMemory,
    StackCursor, StackEntry, Symbolicator, ThreadControl, cpu::STACK_GROW_DIRECTION,
};
use std::path::{Path, PathBuf};

/// The version of the report format
pub const REPORT_VERSION: &str = "3.3.0";

/// Words of the crashed thread's stack dumped towards the stack base
const STACK_PUSHED_DISTANCE: usize = 20;
/// Words of the crashed thread's stack dumped past the stack pointer
const STACK_POPPED_DISTANCE: usize = 10;
const STACK_DUMP_SIZE: usize =
    (STACK_PUSHED_DISTANCE + STACK_POPPED_DISTANCE) * std::mem::size_of::<usize>();

/// The collaborators used to gather what is written to a report
#[derive(Copy, Clone)]
pub struct ReportEnvironment<'a> {
    pub threads: &'a dyn ThreadControl,
    pub memory: &'a dyn MemoryReader,
    pub symbolicator: &'a dyn Symbolicator,
    pub images: &'a dyn ImageEnumerator,
    pub config: &'a ReportConfig,
}

impl<'a> ReportEnvironment<'a> {
    /// Uses the production memory reader, symbolicator and image enumerator
    pub fn new(threads: &'a dyn ThreadControl, config: &'a ReportConfig) -> Self {
        Self {
            threads,
            memory: &SafeMemory,
            symbolicator: &DlSymbolicator,
            images: &LoadedImages,
            config,
        }
    }

    fn introspector(&self) -> Introspector<'a> {
        Introspector {
            memory: self.memory,
            rules: &self.config.introspection,
            describer: self.config.describer.as_deref(),
        }
    }
}

/// The cursor used for a single thread
enum ThreadCursor<'a> {
    Backtrace(BacktraceCursor<'a>),
    FrameWalk(FrameWalkCursor<'a>),
}

impl ThreadCursor<'_> {
    #[inline]
    fn inner(&self) -> &dyn StackCursor {
        match self {
            Self::Backtrace(c) => c,
            Self::FrameWalk(c) => c,
        }
    }

    #[inline]
    fn inner_mut(&mut self) -> &mut dyn StackCursor {
        match self {
            Self::Backtrace(c) => c,
            Self::FrameWalk(c) => c,
        }
    }
}

impl StackCursor for ThreadCursor<'_> {
    fn reset(&mut self) {
        self.inner_mut().reset();
    }

    fn advance(&mut self) -> bool {
        self.inner_mut().advance()
    }

    fn symbolicate(&mut self) {
        self.inner_mut().symbolicate();
    }

    fn entry(&self) -> &StackEntry {
        self.inner().entry()
    }

    fn depth(&self) -> usize {
        self.inner().depth()
    }

    fn has_given_up(&self) -> bool {
        self.inner().has_given_up()
    }
}

/// Writes a full report of `event` to `path`.
///
/// Only failing to create the file is an error, anything that can't be
/// gathered or written after that is logged and skipped.
pub fn write_standard_report(
    event: &CrashEvent<'_>,
    env: &ReportEnvironment<'_>,
    path: &Path,
) -> Result<(), Error> {
    log::info!("writing crash report to {}", path.display());

    let sink = BufferedFileSink::create(path)?;
    let mut w = JsonReportWriter::new(sink, env.config.pretty_print);
    write_standard_sections(&mut w, event, env);
    w.end_encode();
    w.flush();
    Ok(())
}

/// Writes every section of a full report as a single object, flushing after
/// each top level section
pub fn write_standard_sections(
    w: &mut dyn ReportWriter,
    event: &CrashEvent<'_>,
    env: &ReportEnvironment<'_>,
) {
    w.begin_object(None);

    write_report_info(w, event, report_type::STANDARD);
    w.flush();

    write_binary_images(w, env.images);
    w.flush();

    write_process_state(w, event, env);
    w.flush();

    write_system_info(w, event);
    w.flush();

    w.begin_object(Some(fields::CRASH));
    write_error(w, event, env);
    w.flush();
    write_all_threads(w, event, env, env.config.introspection.enabled);
    w.end_container();
    w.flush();

    write_user_section(w, event, env.config);
    w.flush();

    write_debug_info(w, env.config);
    w.end_container();
    w.flush();
}

/// The path the report being replaced by a recrash report is moved to
pub fn recrash_backup_path(path: &Path) -> Result<PathBuf, Error> {
    if path.file_name().is_none() {
        return Err(Error::InvalidPath(path.to_owned()));
    }
    Ok(path.with_extension("old"))
}

/// Writes a minimal report for a crash that happened while `path` was being
/// written, embedding what was written before the crash.
pub fn write_recrash_report(
    event: &CrashEvent<'_>,
    env: &ReportEnvironment<'_>,
    path: &Path,
) -> Result<(), Error> {
    log::info!("writing recrash report to {}", path.display());

    let backup = recrash_backup_path(path)?;
    if let Err(err) = std::fs::rename(path, &backup) {
        log::error!(
            "could not rename {} to {}: {err}",
            path.display(),
            backup.display()
        );
    }

    let sink = BufferedFileSink::create(path)?;
    let mut w = JsonReportWriter::new(sink, env.config.pretty_print);
    w.begin_object(None);

    if !w.add_json_file(Some(fields::RECRASH_REPORT), &backup, false) {
        w.add_boolean(Some(fields::INCOMPLETE), true);
    }
    w.end_container();
    w.flush();

    if let Err(err) = std::fs::remove_file(&backup) {
        log::error!("could not remove {}: {err}", backup.display());
    }

    write_report_info(&mut w, event, report_type::MINIMAL);
    w.flush();

    w.begin_object(Some(fields::CRASH));
    write_error(&mut w, event, env);
    w.flush();
    if let Some(ctx) = event.context.as_deref() {
        let index = ctx.index_of_thread(ctx.thread).unwrap_or_default();
        write_thread(&mut w, Some(fields::CRASHED_THREAD), event, env, ctx, index, false);
    }
    w.end_container();

    w.end_encode();
    w.flush();
    Ok(())
}

fn write_report_info(w: &mut dyn ReportWriter, event: &CrashEvent<'_>, kind: &str) {
    let mut buf = [0u8; uuid::fmt::Hyphenated::LENGTH];
    let id: &str = event.id.hyphenated().encode_upper(&mut buf);

    w.begin_object(Some(fields::REPORT));
    w.add_string(Some(fields::VERSION), Some(REPORT_VERSION));
    w.add_string(Some(fields::ID), Some(id));
    w.add_string(Some(fields::PROCESS_NAME), event.process_name());
    w.add_integer(Some(fields::TIMESTAMP), event.timestamp);
    w.add_string(Some(fields::TYPE), Some(kind));
    w.end_container();
}

fn write_binary_image(w: &mut dyn ReportWriter, image: &BinaryImage<'_>) {
    w.begin_object(None);
    w.add_unsigned(Some(fields::IMAGE_ADDRESS), image.address);
    w.add_unsigned(Some(fields::IMAGE_VM_ADDRESS), image.vm_address);
    w.add_unsigned(Some(fields::IMAGE_SIZE), image.size);
    w.add_string(Some(fields::NAME), Some(image.name));
    w.add_uuid(Some(fields::UUID), image.uuid.as_ref());
    w.add_integer(Some(fields::CPU_TYPE), image.cpu_type);
    w.add_integer(Some(fields::CPU_SUBTYPE), image.cpu_subtype);
    w.add_unsigned(Some(fields::IMAGE_MAJOR_VERSION), image.major_version);
    w.add_unsigned(Some(fields::IMAGE_MINOR_VERSION), image.minor_version);
    w.add_unsigned(Some(fields::IMAGE_REVISION_VERSION), image.revision_version);
    w.end_container();
}

fn write_binary_images(w: &mut dyn ReportWriter, images: &dyn ImageEnumerator) {
    w.begin_array(Some(fields::BINARY_IMAGES));
    images.for_each_image(&mut |image: &BinaryImage<'_>| write_binary_image(w, image));
    w.end_container();
}

fn write_process_state(w: &mut dyn ReportWriter, event: &CrashEvent<'_>, env: &ReportEnvironment<'_>) {
    w.begin_object(Some(fields::PROCESS_STATE));

    if let Some(dangling) = event.dangling.as_deref().filter(|d| d.address != 0) {
        w.begin_object(Some(fields::LAST_DEALLOCED_NSEXCEPTION));
        w.add_unsigned(Some(fields::ADDRESS), dangling.address as u64);
        w.add_string(Some(fields::NAME), Some(&dangling.name));
        w.add_string(Some(fields::REASON), Some(&dangling.reason));
        env.introspector()
            .write_referenced_by_string(w, fields::REFERENCED_OBJECT, Some(&dangling.reason));
        w.end_container();
    }

    w.end_container();
}

fn write_system_facts(w: &mut dyn ReportWriter, facts: &SystemFacts) {
    fn s(v: &Option<String>) -> Option<&str> {
        v.as_deref()
    }

    w.add_string(Some(fields::SYSTEM_NAME), s(&facts.system_name));
    w.add_string(Some(fields::SYSTEM_VERSION), s(&facts.system_version));
    w.add_string(Some(fields::MACHINE), s(&facts.machine));
    w.add_string(Some(fields::MODEL), s(&facts.model));
    w.add_string(Some(fields::KERNEL_VERSION), s(&facts.kernel_version));
    w.add_string(Some(fields::OS_VERSION), s(&facts.os_version));
    w.add_boolean(Some(fields::JAILBROKEN), facts.is_jailbroken);
    w.add_string(Some(fields::BOOT_TIME), s(&facts.boot_time));
    w.add_string(Some(fields::APP_START_TIME), s(&facts.app_start_time));
    w.add_string(Some(fields::EXECUTABLE_PATH), s(&facts.executable_path));
    w.add_string(Some(fields::EXECUTABLE), s(&facts.executable_name));
    w.add_string(Some(fields::BUNDLE_ID), s(&facts.bundle_id));
    w.add_string(Some(fields::BUNDLE_NAME), s(&facts.bundle_name));
    w.add_string(Some(fields::BUNDLE_VERSION), s(&facts.bundle_version));
    w.add_string(Some(fields::BUNDLE_SHORT_VERSION), s(&facts.bundle_short_version));
    w.add_string(Some(fields::APP_UUID), s(&facts.app_id));
    w.add_string(Some(fields::CPU_ARCH), s(&facts.cpu_arch));
    w.add_integer(Some(fields::CPU_TYPE), facts.cpu_type);
    w.add_integer(Some(fields::CPU_SUBTYPE), facts.cpu_subtype);
    w.add_integer(Some(fields::BINARY_CPU_TYPE), facts.binary_cpu_type);
    w.add_integer(Some(fields::BINARY_CPU_SUBTYPE), facts.binary_cpu_subtype);
    w.add_string(Some(fields::TIME_ZONE), s(&facts.time_zone));
    w.add_string(Some(fields::PROCESS_NAME), s(&facts.process_name));
    w.add_integer(Some(fields::PROCESS_ID), facts.process_id);
    w.add_integer(Some(fields::PARENT_PROCESS_ID), facts.parent_process_id);
    w.add_string(Some(fields::DEVICE_APP_HASH), s(&facts.device_app_hash));
    w.add_string(Some(fields::BUILD_TYPE), s(&facts.build_type));
    w.add_integer(Some(fields::STORAGE), facts.storage_size as i64);
}

fn write_system_info(w: &mut dyn ReportWriter, event: &CrashEvent<'_>) {
    w.begin_object(Some(fields::SYSTEM));

    let facts = event.system.as_deref();
    if let Some(facts) = facts {
        write_system_facts(w, facts);
    }

    w.begin_object(Some(fields::MEMORY));
    let size = match event.memory.size {
        0 => facts.map_or(0, |f| f.memory_size),
        size => size,
    };
    w.add_unsigned(Some(fields::SIZE), size);
    w.add_unsigned(Some(fields::USABLE), event.memory.usable);
    w.add_unsigned(Some(fields::FREE), event.memory.free);
    w.end_container();

    let app = &event.app_state;
    w.begin_object(Some(fields::APP_STATS));
    w.add_boolean(Some(fields::APP_ACTIVE), app.is_active);
    w.add_boolean(Some(fields::APP_IN_FG), app.is_in_foreground);
    w.add_integer(Some(fields::LAUNCHES_SINCE_CRASH), app.launches_since_last_crash);
    w.add_integer(Some(fields::SESSIONS_SINCE_CRASH), app.sessions_since_last_crash);
    w.add_float(Some(fields::ACTIVE_TIME_SINCE_CRASH), app.active_duration_since_last_crash);
    w.add_float(Some(fields::BG_TIME_SINCE_CRASH), app.background_duration_since_last_crash);
    w.add_integer(Some(fields::SESSIONS_SINCE_LAUNCH), app.sessions_since_launch);
    w.add_float(Some(fields::ACTIVE_TIME_SINCE_LAUNCH), app.active_duration_since_launch);
    w.add_float(Some(fields::BG_TIME_SINCE_LAUNCH), app.background_duration_since_launch);
    w.end_container();

    w.end_container();
}

fn write_error(w: &mut dyn ReportWriter, event: &CrashEvent<'_>, env: &ReportEnvironment<'_>) {
    w.begin_object(Some(fields::ERROR));

    if let EventKind::Mach { mach, .. } = event.kind {
        w.begin_object(Some(fields::MACH));
        w.add_unsigned(Some(fields::EXCEPTION), mach.exception as u64);
        if let Some(name) = signals::mach_exception_name(mach.exception) {
            w.add_string(Some(fields::EXCEPTION_NAME), Some(name));
        }
        w.add_integer(Some(fields::CODE), mach.code);
        if let Some(name) = signals::kern_return_name(mach.code).filter(|_| mach.code != 0) {
            w.add_string(Some(fields::CODE_NAME), Some(name));
        }
        w.add_integer(Some(fields::SUBCODE), mach.subcode);
        w.end_container();
    }

    if let Some(signal) = event.signal_info() {
        w.begin_object(Some(fields::SIGNAL));
        w.add_unsigned(Some(fields::SIGNAL), signal.signum as u64);
        if let Some(name) = signals::signal_name(signal.signum) {
            w.add_string(Some(fields::NAME), Some(name));
        }
        w.add_integer(Some(fields::CODE), signal.code as i64);
        if let Some(name) = signals::signal_code_name(signal.signum, signal.code) {
            w.add_string(Some(fields::CODE_NAME), Some(name));
        }
        w.end_container();
    }

    w.add_unsigned(Some(fields::ADDRESS), event.fault_address as u64);
    if let Some(reason) = event.reason {
        w.add_string(Some(fields::REASON), Some(reason));
    }

    match event.kind {
        EventKind::Deadlock => w.add_string(Some(fields::TYPE), Some(exc_type::DEADLOCK)),
        EventKind::Mach { .. } => w.add_string(Some(fields::TYPE), Some(exc_type::MACH)),
        EventKind::Signal(_) => w.add_string(Some(fields::TYPE), Some(exc_type::SIGNAL)),
        EventKind::CppException { name } => {
            w.add_string(Some(fields::TYPE), Some(exc_type::CPP_EXCEPTION));
            w.begin_object(Some(fields::CPP_EXCEPTION));
            w.add_string(Some(fields::NAME), Some(name));
            w.end_container();
        }
        EventKind::LanguageException { name, user_info } => {
            w.add_string(Some(fields::TYPE), Some(exc_type::NSEXCEPTION));
            w.begin_object(Some(fields::NSEXCEPTION));
            w.add_string(Some(fields::NAME), Some(name));
            w.add_string(Some(fields::USER_INFO), user_info);
            env.introspector()
                .write_referenced_by_string(w, fields::REFERENCED_OBJECT, event.reason);
            w.end_container();
        }
        EventKind::User(report) => {
            w.add_string(Some(fields::TYPE), Some(exc_type::USER));
            w.begin_object(Some(fields::USER_REPORTED));
            w.add_string(Some(fields::NAME), Some(report.name));
            if let Some(language) = report.language {
                w.add_string(Some(fields::LANGUAGE), Some(language));
            }
            if let Some(line) = report.line_of_code {
                w.add_string(Some(fields::LINE_OF_CODE), Some(line));
            }
            if let Some(backtrace) = report.custom_backtrace_json {
                w.add_json(Some(fields::BACKTRACE), backtrace.as_bytes(), true);
            }
            w.end_container();
        }
        EventKind::System | EventKind::ApplicationState | EventKind::Zombie => {
            log::error!("{:?} monitors shouldn't be able to cause events", event.kind);
        }
    }

    w.end_container();
}

/// Picks how the stack of `ctx` is unwound, the offending thread uses the
/// backtrace captured with the event when there is one
fn cursor_for<'a>(
    event: &'a CrashEvent<'_>,
    env: &ReportEnvironment<'a>,
    ctx: &MachineContext,
) -> ThreadCursor<'a> {
    let is_offending = event.context.as_deref().is_some_and(|o| o.thread == ctx.thread);

    match event.backtrace {
        Some(addresses) if is_offending => {
            ThreadCursor::Backtrace(BacktraceCursor::new(addresses, 0, env.symbolicator))
        }
        _ => ThreadCursor::FrameWalk(FrameWalkCursor::new(&ctx.cpu, env.memory, env.symbolicator)),
    }
}

fn write_backtrace(w: &mut dyn ReportWriter, cursor: &mut dyn StackCursor) {
    w.begin_object(Some(fields::BACKTRACE));
    w.begin_array(Some(fields::CONTENTS));

    while cursor.advance() {
        cursor.symbolicate();
        let entry = cursor.entry();

        w.begin_object(None);
        if entry.image_address != 0 {
            if let Some(name) = entry.image_name.and_then(|n| n.to_str().ok()) {
                let name = name.rsplit('/').next().unwrap_or(name);
                w.add_string(Some(fields::OBJECT_NAME), Some(name));
            }
            w.add_unsigned(Some(fields::OBJECT_ADDR), entry.image_address as u64);
            if let Some(symbol) = entry.symbol_name.and_then(|n| n.to_str().ok()) {
                w.add_string(Some(fields::SYMBOL_NAME), Some(symbol));
            }
            w.add_unsigned(Some(fields::SYMBOL_ADDR), entry.symbol_address as u64);
        }
        w.add_unsigned(Some(fields::INSTRUCTION_ADDR), entry.instruction_address as u64);
        w.end_container();
    }

    w.end_container();
    w.add_integer(Some(fields::SKIPPED), 0);
    w.end_container();
}

fn write_registers(w: &mut dyn ReportWriter, ctx: &MachineContext) {
    w.begin_object(Some(fields::REGISTERS));

    w.begin_object(Some(fields::BASIC));
    for (name, value) in ctx.cpu.named_registers() {
        w.add_unsigned(Some(name), value);
    }
    w.end_container();

    if ctx.has_valid_exception_registers() {
        w.begin_object(Some(fields::EXCEPTION));
        for (name, value) in ctx.cpu.named_exception_registers() {
            w.add_unsigned(Some(name), value);
        }
        w.end_container();
    }

    w.end_container();
}

fn write_stack_contents(
    w: &mut dyn ReportWriter,
    memory: &dyn MemoryReader,
    ctx: &MachineContext,
    is_overflow: bool,
) {
    let sp = ctx.cpu.stack_pointer();
    if sp == 0 {
        return;
    }

    let (low, high) = stack_window(sp, STACK_PUSHED_DISTANCE, STACK_POPPED_DISTANCE);

    w.begin_object(Some(fields::STACK));
    w.add_string(
        Some(fields::GROW_DIRECTION),
        Some(if STACK_GROW_DIRECTION > 0 { "+" } else { "-" }),
    );
    w.add_unsigned(Some(fields::DUMP_START), low as u64);
    w.add_unsigned(Some(fields::DUMP_END), high as u64);
    w.add_unsigned(Some(fields::STACK_PTR), sp as u64);
    w.add_boolean(Some(fields::OVERFLOW), is_overflow);

    let mut contents = [0u8; STACK_DUMP_SIZE];
    let contents = &mut contents[..(high - low).min(STACK_DUMP_SIZE)];
    if memory.copy(low, contents) {
        w.add_data(Some(fields::CONTENTS), contents);
    } else {
        w.add_string(Some(fields::ERROR), Some("Stack contents not accessible"));
    }

    w.end_container();
}

fn write_thread(
    w: &mut dyn ReportWriter,
    key: Option<&str>,
    event: &CrashEvent<'_>,
    env: &ReportEnvironment<'_>,
    ctx: &MachineContext,
    index: usize,
    write_notable_addresses: bool,
) {
    log::debug!(
        "writing thread {} (index {index}), crashed: {}",
        ctx.thread,
        ctx.is_crashed_context
    );

    let mut cursor = cursor_for(event, env, ctx);

    w.begin_object(key);

    write_backtrace(w, &mut cursor);
    if ctx.can_have_cpu_state() {
        write_registers(w, ctx);
    }

    w.add_integer(Some(fields::INDEX), index as i64);

    let mut name = [0u8; 128];
    if let Some(name) = env.threads.thread_name(ctx.thread, &mut name) {
        w.add_string(Some(fields::NAME), Some(name));
    }
    let mut queue = [0u8; 128];
    if let Some(queue) = env.threads.queue_name(ctx.thread, &mut queue) {
        w.add_string(Some(fields::DISPATCH_QUEUE), Some(queue));
    }

    w.add_boolean(Some(fields::CRASHED), ctx.is_crashed_context);
    w.add_boolean(
        Some(fields::CURRENT_THREAD),
        ctx.thread == env.threads.current_thread(),
    );

    if ctx.is_crashed_context {
        write_stack_contents(w, env.memory, ctx, cursor.has_given_up());
        if write_notable_addresses {
            env.introspector()
                .write_notable_addresses(w, fields::NOTABLE_ADDRESSES, ctx);
        }
    }

    w.end_container();
}

fn write_all_threads(
    w: &mut dyn ReportWriter,
    event: &CrashEvent<'_>,
    env: &ReportEnvironment<'_>,
    write_notable_addresses: bool,
) {
    w.begin_array(Some(fields::THREADS));

    if let Some(offending) = event.context.as_deref() {
        let threads = offending.threads.as_slice();
        log::debug!("writing {} threads", threads.len());

        if threads.is_empty() {
            write_thread(w, None, event, env, offending, 0, write_notable_addresses);
        }

        for (index, &thread) in threads.iter().enumerate() {
            if thread == offending.thread {
                write_thread(w, None, event, env, offending, index, write_notable_addresses);
            } else {
                let ctx = MachineContext::for_thread(env.threads, thread, false);
                write_thread(w, None, event, env, &ctx, index, write_notable_addresses);
            }
        }
    }

    w.end_container();
}

fn write_user_section(w: &mut dyn ReportWriter, event: &CrashEvent<'_>, config: &ReportConfig) {
    let spliced = config.with_user_info(|info| {
        info.map(|json| w.add_json(Some(fields::USER), json, false))
            .is_some()
    });
    if !spliced {
        w.begin_object(Some(fields::USER));
    }

    if let Some(callback) = &config.user_section {
        w.flush();
        if !event.is_user_reported() {
            callback(w);
        }
    }

    w.end_container();
}

fn write_debug_info(w: &mut dyn ReportWriter, config: &ReportConfig) {
    w.begin_object(Some(fields::DEBUG));

    if let Some(path) = &config.console_log_path {
        w.begin_array(Some(fields::CONSOLE_LOG));
        let res = config
            .console_log
            .read_lines(path, &mut |line: &str| w.add_string(None, Some(line)));
        if let Err(err) = res {
            log::warn!("could not read console log {}: {err}", path.display());
        }
        w.end_container();
    }

    w.end_container();
}
