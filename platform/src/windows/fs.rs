// Windows-native filesystem collaborator
//
// Maps FileSystemOps onto the Win32 surface the engine assumes: CreateFileW
// for attribute-access handles, DeviceIoControl for reparse buffers,
// GetFinalPathNameByHandleW for the authoritative final path, and
// FindFirstFileW for case-exact directory lookups.

use log::{debug, trace};
use std::ffi::OsStr;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::ptr::null_mut;

use wincanon_core::error::ResolveError;
use wincanon_core::fs::{FileAttributes, FileSystemOps};
use wincanon_core::reparse::{self, IO_REPARSE_TAG_SYMLINK, MAXIMUM_REPARSE_DATA_BUFFER_SIZE};

use winapi::shared::minwindef::DWORD;
use winapi::shared::winerror::{
    ERROR_ACCESS_DENIED, ERROR_CANT_RESOLVE_FILENAME, ERROR_FILE_NOT_FOUND, ERROR_INVALID_LEVEL,
    ERROR_NOT_A_REPARSE_POINT, ERROR_PATH_NOT_FOUND,
};
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::fileapi::{
    CreateFileW, FindClose, FindFirstFileW, GetFileInformationByHandle,
    GetFinalPathNameByHandleW, GetFullPathNameW, GetVolumeInformationW,
    BY_HANDLE_FILE_INFORMATION, OPEN_EXISTING,
};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::ioapiset::DeviceIoControl;
use winapi::um::minwinbase::WIN32_FIND_DATAW;
use winapi::um::winbase::{FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OPEN_REPARSE_POINT};
use winapi::um::winioctl::FSCTL_GET_REPARSE_POINT;
use winapi::um::winnt::{
    FILE_ATTRIBUTE_DIRECTORY, FILE_ATTRIBUTE_REPARSE_POINT, FILE_READ_ATTRIBUTES,
    FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, FILE_SUPPORTS_REPARSE_POINTS, HANDLE,
};

/// Owned Win32 handle. Released through FileSystemOps::close.
pub struct NativeHandle(HANDLE);

/// FileSystemOps over real Win32 volumes.
pub struct NativeFileSystem {
    supports_links: bool,
}

impl NativeFileSystem {
    /// A filesystem instance that assumes reparse-point support; the
    /// engine still verifies attributes object by object.
    pub fn new() -> Self {
        NativeFileSystem {
            supports_links: true,
        }
    }

    /// Query the volume holding `root` (e.g. `C:\`) for reparse-point
    /// support and carry the answer as an instance property.
    pub fn for_volume(root: &str) -> Self {
        let wide = to_wide(root);
        let mut flags: DWORD = 0;
        let ok = unsafe {
            GetVolumeInformationW(
                wide.as_ptr(),
                null_mut(),
                0,
                null_mut(),
                null_mut(),
                &mut flags,
                null_mut(),
                0,
            )
        };
        if ok == 0 {
            debug!(
                "GetVolumeInformationW({root}) failed with error {}, assuming link support",
                unsafe { GetLastError() }
            );
            return Self::new();
        }
        NativeFileSystem {
            supports_links: flags & FILE_SUPPORTS_REPARSE_POINTS != 0,
        }
    }
}

impl Default for NativeFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystemOps for NativeFileSystem {
    type Handle = NativeHandle;

    fn supports_links(&self) -> bool {
        self.supports_links
    }

    fn open_for_attribute_access(
        &self,
        path: &str,
        follow_links: bool,
    ) -> Result<NativeHandle, ResolveError> {
        let wide = to_wide(path);
        let mut flags = FILE_FLAG_BACKUP_SEMANTICS;
        if !follow_links {
            flags |= FILE_FLAG_OPEN_REPARSE_POINT;
        }
        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                FILE_READ_ATTRIBUTES,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                null_mut(),
                OPEN_EXISTING,
                flags,
                null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(last_error(path));
        }
        trace!("opened {path} (follow_links: {follow_links})");
        Ok(NativeHandle(handle))
    }

    fn query_attributes(&self, handle: &NativeHandle) -> Result<FileAttributes, ResolveError> {
        let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };
        if unsafe { GetFileInformationByHandle(handle.0, &mut info) } == 0 {
            return Err(ResolveError::Io(io::Error::last_os_error()));
        }

        // the reparse attribute alone is not enough; only the symlink tag
        // makes a link
        let mut is_symbolic_link = false;
        if info.dwFileAttributes & FILE_ATTRIBUTE_REPARSE_POINT != 0 {
            match self.read_reparse_buffer(handle) {
                Ok(buffer) => {
                    is_symbolic_link = reparse::reparse_tag(&buffer)? == IO_REPARSE_TAG_SYMLINK
                }
                Err(ResolveError::NotAReparsePoint) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(FileAttributes {
            is_symbolic_link,
            is_directory: info.dwFileAttributes & FILE_ATTRIBUTE_DIRECTORY != 0,
            attributes: info.dwFileAttributes,
        })
    }

    fn read_reparse_buffer(&self, handle: &NativeHandle) -> Result<Vec<u8>, ResolveError> {
        let mut buffer = vec![0u8; MAXIMUM_REPARSE_DATA_BUFFER_SIZE];
        let mut returned: DWORD = 0;
        let ok = unsafe {
            DeviceIoControl(
                handle.0,
                FSCTL_GET_REPARSE_POINT,
                null_mut(),
                0,
                buffer.as_mut_ptr() as *mut _,
                buffer.len() as DWORD,
                &mut returned,
                null_mut(),
            )
        };
        if ok == 0 {
            let code = unsafe { GetLastError() };
            return Err(match code {
                ERROR_NOT_A_REPARSE_POINT => ResolveError::NotAReparsePoint,
                _ => ResolveError::Io(io::Error::from_raw_os_error(code as i32)),
            });
        }
        buffer.truncate(returned as usize);
        Ok(buffer)
    }

    fn final_path_by_handle(&self, handle: &NativeHandle) -> Result<String, ResolveError> {
        let mut capacity: DWORD = 260;
        loop {
            let mut buffer = vec![0u16; capacity as usize];
            let len =
                unsafe { GetFinalPathNameByHandleW(handle.0, buffer.as_mut_ptr(), capacity, 0) };
            if len == 0 {
                let code = unsafe { GetLastError() };
                return Err(match code {
                    ERROR_INVALID_LEVEL => ResolveError::UnsupportedLevel,
                    _ => ResolveError::Io(io::Error::from_raw_os_error(code as i32)),
                });
            }
            if len >= capacity {
                // buffer too small, len is the size needed
                capacity = len + 1;
                continue;
            }
            return utf16_to_string(&buffer[..len as usize]);
        }
    }

    fn full_path_name(&self, path: &str) -> Result<String, ResolveError> {
        let wide = to_wide(path);
        let needed = unsafe { GetFullPathNameW(wide.as_ptr(), 0, null_mut(), null_mut()) };
        if needed == 0 {
            return Err(last_error(path));
        }
        let mut buffer = vec![0u16; needed as usize];
        let len =
            unsafe { GetFullPathNameW(wide.as_ptr(), needed, buffer.as_mut_ptr(), null_mut()) };
        if len == 0 || len >= needed {
            return Err(last_error(path));
        }
        utf16_to_string(&buffer[..len as usize])
    }

    fn find_first(&self, pattern: &str) -> Result<String, ResolveError> {
        let wide = to_wide(pattern);
        let mut data: WIN32_FIND_DATAW = unsafe { std::mem::zeroed() };
        let handle = unsafe { FindFirstFileW(wide.as_ptr(), &mut data) };
        if handle == INVALID_HANDLE_VALUE {
            return Err(last_error(pattern));
        }
        unsafe {
            FindClose(handle);
        }
        let len = data
            .cFileName
            .iter()
            .position(|&unit| unit == 0)
            .unwrap_or(data.cFileName.len());
        utf16_to_string(&data.cFileName[..len])
    }

    fn close(&self, handle: NativeHandle) {
        if unsafe { CloseHandle(handle.0) } == 0 {
            debug!("CloseHandle failed with error {}", unsafe { GetLastError() });
        }
    }
}

fn to_wide(text: &str) -> Vec<u16> {
    OsStr::new(text)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

fn utf16_to_string(units: &[u16]) -> Result<String, ResolveError> {
    String::from_utf16(units)
        .map_err(|_| ResolveError::Other("path is not valid UTF-16".to_string()))
}

fn last_error(path: &str) -> ResolveError {
    let code = unsafe { GetLastError() };
    match code {
        ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND => ResolveError::NotFound(path.to_string()),
        ERROR_ACCESS_DENIED => ResolveError::AccessDenied(path.to_string()),
        ERROR_NOT_A_REPARSE_POINT => ResolveError::NotAReparsePoint,
        ERROR_INVALID_LEVEL => ResolveError::UnsupportedLevel,
        ERROR_CANT_RESOLVE_FILENAME => ResolveError::TooManyLinks(path.to_string()),
        _ => ResolveError::Io(io::Error::from_raw_os_error(code as i32)),
    }
}
