//! The names used in reports.
//!
//! These are part of the compatibility surface of the report format, and must
//! not change.

pub mod report_type {
    pub const MINIMAL: &str = "minimal";
    pub const STANDARD: &str = "standard";
    pub const CUSTOM: &str = "custom";
}

pub mod mem_type {
    pub const BLOCK: &str = "objc_block";
    pub const CLASS: &str = "objc_class";
    pub const NULL_POINTER: &str = "null_pointer";
    pub const OBJECT: &str = "objc_object";
    pub const STRING: &str = "string";
    pub const UNKNOWN: &str = "unknown";
}

pub mod exc_type {
    pub const CPP_EXCEPTION: &str = "cpp_exception";
    pub const DEADLOCK: &str = "deadlock";
    pub const MACH: &str = "mach";
    pub const NSEXCEPTION: &str = "nsexception";
    pub const SIGNAL: &str = "signal";
    pub const USER: &str = "user";
}

// Common
pub const ADDRESS: &str = "address";
pub const CONTENTS: &str = "contents";
pub const EXCEPTION: &str = "exception";
pub const FIRST_OBJECT: &str = "first_object";
pub const INDEX: &str = "index";
pub const IVARS: &str = "ivars";
pub const LANGUAGE: &str = "language";
pub const NAME: &str = "name";
pub const USER_INFO: &str = "userInfo";
pub const REFERENCED_OBJECT: &str = "referenced_object";
pub const TYPE: &str = "type";
pub const UUID: &str = "uuid";
pub const VALUE: &str = "value";
pub const ERROR: &str = "error";
pub const JSON_DATA: &str = "json_data";

// Memory descriptions
pub const CLASS: &str = "class";
pub const LAST_DEALLOC_OBJECT: &str = "last_deallocated_obj";

// Backtrace frames
pub const INSTRUCTION_ADDR: &str = "instruction_addr";
pub const LINE_OF_CODE: &str = "line_of_code";
pub const OBJECT_ADDR: &str = "object_addr";
pub const OBJECT_NAME: &str = "object_name";
pub const SYMBOL_ADDR: &str = "symbol_addr";
pub const SYMBOL_NAME: &str = "symbol_name";

// Stack dump
pub const DUMP_END: &str = "dump_end";
pub const DUMP_START: &str = "dump_start";
pub const GROW_DIRECTION: &str = "grow_direction";
pub const OVERFLOW: &str = "overflow";
pub const STACK_PTR: &str = "stack_pointer";

// Threads
pub const BACKTRACE: &str = "backtrace";
pub const BASIC: &str = "basic";
pub const CRASHED: &str = "crashed";
pub const CURRENT_THREAD: &str = "current_thread";
pub const DISPATCH_QUEUE: &str = "dispatch_queue";
pub const NOTABLE_ADDRESSES: &str = "notable_addresses";
pub const REGISTERS: &str = "registers";
pub const SKIPPED: &str = "skipped";
pub const STACK: &str = "stack";

// Binary images
pub const CPU_SUBTYPE: &str = "cpu_subtype";
pub const CPU_TYPE: &str = "cpu_type";
pub const IMAGE_ADDRESS: &str = "image_addr";
pub const IMAGE_VM_ADDRESS: &str = "image_vmaddr";
pub const IMAGE_SIZE: &str = "image_size";
pub const IMAGE_MAJOR_VERSION: &str = "major_version";
pub const IMAGE_MINOR_VERSION: &str = "minor_version";
pub const IMAGE_REVISION_VERSION: &str = "revision_version";

// Memory
pub const FREE: &str = "free";
pub const USABLE: &str = "usable";

// Error
pub const CODE: &str = "code";
pub const CODE_NAME: &str = "code_name";
pub const CPP_EXCEPTION: &str = "cpp_exception";
pub const EXCEPTION_NAME: &str = "exception_name";
pub const MACH: &str = "mach";
pub const NSEXCEPTION: &str = "nsexception";
pub const REASON: &str = "reason";
pub const SIGNAL: &str = "signal";
pub const SUBCODE: &str = "subcode";
pub const USER_REPORTED: &str = "user_reported";

// Process state
pub const LAST_DEALLOCED_NSEXCEPTION: &str = "last_dealloced_nsexception";
pub const PROCESS_STATE: &str = "process";

// App stats
pub const ACTIVE_TIME_SINCE_CRASH: &str = "active_time_since_last_crash";
pub const ACTIVE_TIME_SINCE_LAUNCH: &str = "active_time_since_launch";
pub const APP_ACTIVE: &str = "application_active";
pub const APP_IN_FG: &str = "application_in_foreground";
pub const BG_TIME_SINCE_CRASH: &str = "background_time_since_last_crash";
pub const BG_TIME_SINCE_LAUNCH: &str = "background_time_since_launch";
pub const LAUNCHES_SINCE_CRASH: &str = "launches_since_last_crash";
pub const SESSIONS_SINCE_CRASH: &str = "sessions_since_last_crash";
pub const SESSIONS_SINCE_LAUNCH: &str = "sessions_since_launch";

// Report
pub const CRASH: &str = "crash";
pub const DEBUG: &str = "debug";
pub const DIAGNOSIS: &str = "diagnosis";
pub const ID: &str = "id";
pub const PROCESS_NAME: &str = "process_name";
pub const REPORT: &str = "report";
pub const TIMESTAMP: &str = "timestamp";
pub const VERSION: &str = "version";

pub const CRASHED_THREAD: &str = "crashed_thread";

pub const APP_STATS: &str = "application_stats";
pub const BINARY_IMAGES: &str = "binary_images";
pub const SYSTEM: &str = "system";
pub const MEMORY: &str = "memory";
pub const THREADS: &str = "threads";
pub const USER: &str = "user";
pub const CONSOLE_LOG: &str = "console_log";

pub const INCOMPLETE: &str = "incomplete";
pub const RECRASH_REPORT: &str = "recrash_report";

// System
pub const APP_START_TIME: &str = "app_start_time";
pub const APP_UUID: &str = "app_uuid";
pub const BOOT_TIME: &str = "boot_time";
pub const BUNDLE_ID: &str = "CFBundleIdentifier";
pub const BUNDLE_NAME: &str = "CFBundleName";
pub const BUNDLE_SHORT_VERSION: &str = "CFBundleShortVersionString";
pub const BUNDLE_VERSION: &str = "CFBundleVersion";
pub const CPU_ARCH: &str = "cpu_arch";
pub const BINARY_CPU_TYPE: &str = "binary_cpu_type";
pub const BINARY_CPU_SUBTYPE: &str = "binary_cpu_subtype";
pub const DEVICE_APP_HASH: &str = "device_app_hash";
pub const EXECUTABLE: &str = "CFBundleExecutable";
pub const EXECUTABLE_PATH: &str = "CFBundleExecutablePath";
pub const JAILBROKEN: &str = "jailbroken";
pub const KERNEL_VERSION: &str = "kernel_version";
pub const MACHINE: &str = "machine";
pub const MODEL: &str = "model";
pub const OS_VERSION: &str = "os_version";
pub const PARENT_PROCESS_ID: &str = "parent_process_id";
pub const PROCESS_ID: &str = "process_id";
pub const SIZE: &str = "size";
pub const STORAGE: &str = "storage";
pub const SYSTEM_NAME: &str = "system_name";
pub const SYSTEM_VERSION: &str = "system_version";
pub const TIME_ZONE: &str = "time_zone";
pub const BUILD_TYPE: &str = "build_type";
