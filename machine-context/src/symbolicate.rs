use std::ffi::CStr;

/// What is known about the code at an address
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SymbolInfo {
    /// Load address of the image containing the address
    pub image_address: usize,
    /// Path of the image containing the address
    pub image_name: Option<&'static CStr>,
    /// Start address of the nearest preceding symbol
    pub symbol_address: usize,
    pub symbol_name: Option<&'static CStr>,
}

/// Resolves code addresses to images and symbols, best effort
pub trait Symbolicator: Send + Sync {
    fn lookup(&self, address: usize) -> Option<SymbolInfo>;
}

/// Resolves addresses with the dynamic loader's `dladdr`.
///
/// Strings returned point into loader owned memory that lives as long as the
/// image is loaded, which for a crashing process is the rest of its life.
#[derive(Copy, Clone, Default)]
pub struct DlSymbolicator;

#[cfg(unix)]
impl Symbolicator for DlSymbolicator {
    fn lookup(&self, address: usize) -> Option<SymbolInfo> {
        // SAFETY: dladdr only inspects loader data structures
        unsafe {
            let mut info: libc::Dl_info = std::mem::zeroed();
            if libc::dladdr(address as *const libc::c_void, &mut info) == 0 {
                return None;
            }

            let name = |p: *const libc::c_char| (!p.is_null()).then(|| CStr::from_ptr(p));

            Some(SymbolInfo {
                image_address: info.dli_fbase as usize,
                image_name: name(info.dli_fname),
                symbol_address: info.dli_saddr as usize,
                symbol_name: name(info.dli_sname),
            })
        }
    }
}

#[cfg(not(unix))]
impl Symbolicator for DlSymbolicator {
    fn lookup(&self, _address: usize) -> Option<SymbolInfo> {
        None
    }
}
