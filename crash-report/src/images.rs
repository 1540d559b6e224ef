//! Enumeration of the executable images mapped into the process.

/// An image mapped into the process
#[derive(Copy, Clone, Debug, Default)]
pub struct BinaryImage<'a> {
    /// The address the image was loaded at
    pub address: u64,
    /// The address the image prefers to be loaded at
    pub vm_address: u64,
    pub size: u64,
    pub name: &'a str,
    /// The build id of ELF images, or the `LC_UUID` of mach-o images
    pub uuid: Option<[u8; 16]>,
    pub cpu_type: i64,
    pub cpu_subtype: i64,
    pub major_version: u64,
    pub minor_version: u64,
    pub revision_version: u64,
}

/// Enumerates images without allocating, so it can be used while writing a
/// crash report
pub trait ImageEnumerator: Send + Sync {
    fn for_each_image(&self, f: &mut dyn FnMut(&BinaryImage<'_>));
}

/// The images the dynamic loader knows about
pub struct LoadedImages;

cfg_if::cfg_if! {
    if #[cfg(all(any(target_os = "linux", target_os = "android"), target_pointer_width = "64"))] {
        const NT_GNU_BUILD_ID: u32 = 3;

        // ELF images are described with the equivalent mach-o cpu types
        #[cfg(target_arch = "x86_64")]
        const CPU_TYPE: (i64, i64) = (0x0100_0007, 3);
        #[cfg(target_arch = "aarch64")]
        const CPU_TYPE: (i64, i64) = (0x0100_000c, 0);
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        const CPU_TYPE: (i64, i64) = (0, 0);

        /// Copies up to 16 bytes of an identifier, zero padding shorter ones
        fn to_uuid(id: &[u8]) -> [u8; 16] {
            let mut uuid = [0u8; 16];
            let len = id.len().min(16);
            uuid[..len].copy_from_slice(&id[..len]);
            uuid
        }

        struct Visit<'f> {
            f: &'f mut dyn FnMut(&BinaryImage<'_>),
            exe: &'f str,
        }

        /// Finds the GNU build id in a note segment
        fn find_build_id(mut notes: &[u8]) -> Option<&[u8]> {
            const HEADER: usize = 12;
            let align = |n: usize| (n + 3) & !3;
            let read = |b: &[u8], at: usize| {
                u32::from_ne_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
            };

            while notes.len() >= HEADER {
                let name_size = read(notes, 0) as usize;
                let desc_size = read(notes, 4) as usize;
                let kind = read(notes, 8);

                let desc_start = HEADER + align(name_size);
                let next = desc_start + align(desc_size);
                if desc_start + desc_size > notes.len() {
                    return None;
                }

                if kind == NT_GNU_BUILD_ID && &notes[HEADER..HEADER + name_size] == b"GNU\0" {
                    return Some(&notes[desc_start..desc_start + desc_size]);
                }

                notes = notes.get(next..)?;
            }

            None
        }

        unsafe extern "C" fn visit_image(
            info: *mut libc::dl_phdr_info,
            _size: libc::size_t,
            data: *mut libc::c_void,
        ) -> libc::c_int {
            // SAFETY: the pointers are valid for the duration of the callback
            let (info, visit) = unsafe { (&*info, &mut *data.cast::<Visit<'_>>()) };

            let headers: &[libc::Elf64_Phdr] = if info.dlpi_phdr.is_null() {
                &[]
            } else {
                // SAFETY: the loader guarantees dlpi_phnum headers
                unsafe { std::slice::from_raw_parts(info.dlpi_phdr, info.dlpi_phnum as usize) }
            };

            let base = info.dlpi_addr as u64;
            let mut low = u64::MAX;
            let mut high = 0;
            let mut uuid = None;

            for header in headers {
                match header.p_type {
                    libc::PT_LOAD => {
                        low = low.min(header.p_vaddr);
                        high = high.max(header.p_vaddr + header.p_memsz);
                    }
                    libc::PT_NOTE if uuid.is_none() => {
                        // SAFETY: note segments are mapped and read only
                        let notes = unsafe {
                            std::slice::from_raw_parts(
                                (base + header.p_vaddr) as *const u8,
                                header.p_memsz as usize,
                            )
                        };
                        uuid = find_build_id(notes).map(to_uuid);
                    }
                    _ => {}
                }
            }

            if low > high {
                return 0;
            }

            let name = if info.dlpi_name.is_null() {
                ""
            } else {
                // SAFETY: the loader gives us a nul terminated path
                unsafe { std::ffi::CStr::from_ptr(info.dlpi_name) }
                    .to_str()
                    .unwrap_or_default()
            };

            let image = BinaryImage {
                address: base + low,
                vm_address: low,
                size: high - low,
                // The main executable is reported without a name
                name: if name.is_empty() { visit.exe } else { name },
                uuid,
                cpu_type: CPU_TYPE.0,
                cpu_subtype: CPU_TYPE.1,
                ..Default::default()
            };

            (visit.f)(&image);
            0
        }

        impl ImageEnumerator for LoadedImages {
            fn for_each_image(&self, f: &mut dyn FnMut(&BinaryImage<'_>)) {
                let mut exe = [0u8; 512];
                // SAFETY: syscall, the buffer is never nul terminated
                let len = unsafe {
                    libc::readlink(c"/proc/self/exe".as_ptr(), exe.as_mut_ptr().cast(), exe.len())
                };
                let exe = usize::try_from(len)
                    .ok()
                    .and_then(|len| std::str::from_utf8(&exe[..len]).ok())
                    .unwrap_or_default();

                let mut visit = Visit { f, exe };
                // SAFETY: the callback only lives as long as this call
                unsafe {
                    libc::dl_iterate_phdr(Some(visit_image), (&mut visit as *mut Visit<'_>).cast());
                }
            }
        }
    } else if #[cfg(target_os = "macos")] {
        const MH_MAGIC_64: u32 = 0xfeed_facf;
        const LC_SEGMENT_64: u32 = 0x19;
        const LC_UUID: u32 = 0x1b;
        const LC_ID_DYLIB: u32 = 0xd;

        unsafe extern "C" {
            fn _dyld_image_count() -> u32;
            fn _dyld_get_image_header(index: u32) -> *const u8;
            fn _dyld_get_image_name(index: u32) -> *const libc::c_char;
            fn _dyld_get_image_vmaddr_slide(index: u32) -> isize;
        }

        /// Reads a value out of a loaded mach-o image
        #[inline]
        unsafe fn read<T: Copy>(at: *const u8) -> T {
            // SAFETY: the caller guarantees the image is mapped
            unsafe { at.cast::<T>().read_unaligned() }
        }

        impl ImageEnumerator for LoadedImages {
            fn for_each_image(&self, f: &mut dyn FnMut(&BinaryImage<'_>)) {
                // SAFETY: dyld calls, the headers of loaded images are mapped
                // for as long as the image is loaded
                unsafe {
                    for index in 0.._dyld_image_count() {
                        let header = _dyld_get_image_header(index);
                        if header.is_null() || read::<u32>(header) != MH_MAGIC_64 {
                            continue;
                        }

                        let name = _dyld_get_image_name(index);
                        let name = if name.is_null() {
                            ""
                        } else {
                            std::ffi::CStr::from_ptr(name).to_str().unwrap_or_default()
                        };

                        let mut image = BinaryImage {
                            address: header as u64,
                            name,
                            cpu_type: read::<i32>(header.add(4)) as i64,
                            cpu_subtype: read::<i32>(header.add(8)) as i64,
                            ..Default::default()
                        };

                        let command_count = read::<u32>(header.add(16));
                        let mut command = header.add(32);
                        for _ in 0..command_count {
                            let kind = read::<u32>(command);
                            let size = read::<u32>(command.add(4)) as usize;
                            match kind {
                                LC_SEGMENT_64 => {
                                    let segment: [u8; 16] = read(command.add(8));
                                    let vm_address = read::<u64>(command.add(24));
                                    let vm_size = read::<u64>(command.add(32));
                                    if segment.starts_with(b"__TEXT\0") {
                                        image.vm_address = vm_address;
                                        image.size = vm_size;
                                    }
                                }
                                LC_UUID => image.uuid = Some(read(command.add(8))),
                                LC_ID_DYLIB => {
                                    let version = read::<u32>(command.add(16)) as u64;
                                    image.major_version = version >> 16;
                                    image.minor_version = (version >> 8) & 0xff;
                                    image.revision_version = version & 0xff;
                                }
                                _ => {}
                            }

                            if size == 0 {
                                break;
                            }
                            command = command.add(size);
                        }

                        if image.vm_address == 0 {
                            image.vm_address =
                                (image.address as i64 - _dyld_get_image_vmaddr_slide(index) as i64) as u64;
                        }

                        f(&image);
                    }
                }
            }
        }
    } else {
        impl ImageEnumerator for LoadedImages {
            fn for_each_image(&self, _f: &mut dyn FnMut(&BinaryImage<'_>)) {
                log::debug!("binary images can't be enumerated on this platform");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[cfg(all(any(target_os = "linux", target_os = "android"), target_pointer_width = "64"))]
    #[test]
    fn finds_build_id_note() {
        let uuid = to_uuid(&[1, 2, 3]);
        assert_eq!(&uuid[..4], &[1, 2, 3, 0]);
        assert_eq!(to_uuid(&[7; 20]), [7; 16]);

        let mut notes = Vec::new();
        // An unrelated note first
        notes.extend_from_slice(&5u32.to_ne_bytes());
        notes.extend_from_slice(&4u32.to_ne_bytes());
        notes.extend_from_slice(&1u32.to_ne_bytes());
        notes.extend_from_slice(b"ABCD\0\0\0\0");
        notes.extend_from_slice(&[9; 4]);
        notes.extend_from_slice(&4u32.to_ne_bytes());
        notes.extend_from_slice(&20u32.to_ne_bytes());
        notes.extend_from_slice(&NT_GNU_BUILD_ID.to_ne_bytes());
        notes.extend_from_slice(b"GNU\0");
        notes.extend_from_slice(&[0xab; 20]);

        assert_eq!(find_build_id(&notes), Some(&[0xab; 20][..]));
        assert_eq!(find_build_id(&notes[..notes.len() - 1]), None);
    }

    #[cfg(any(
        all(any(target_os = "linux", target_os = "android"), target_pointer_width = "64"),
        target_os = "macos"
    ))]
    #[test]
    fn contains_this_function() {
        let address = contains_this_function as usize as u64;
        let mut found = None;
        LoadedImages.for_each_image(&mut |image: &BinaryImage<'_>| {
            if (image.address..image.address + image.size).contains(&address) {
                found = Some(image.name.to_owned());
            }
        });

        let name = found.expect("no image contains the test function");
        assert!(!name.is_empty());
    }
}
