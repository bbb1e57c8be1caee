//! Deferred deletion at next reboot.
//!
//! On Windows this is a delayed rename to nothing, which the session manager
//! carries out at boot. Scheduling it requires administrator rights.

use std::io;
use std::path::Path;

use super::RealRuntime;

impl RealRuntime {
    #[tracing::instrument(skip(self))]
    pub(crate) fn delete_on_reboot_impl(&self, path: &Path) -> io::Result<()> {
        schedule_delete(path)
    }
}

#[cfg(windows)]
fn schedule_delete(path: &Path) -> io::Result<()> {
    use windows_sys::Win32::Storage::FileSystem::{MOVEFILE_DELAY_UNTIL_REBOOT, MoveFileExW};

    let source = wide_path(path);
    // SAFETY: `source` is NUL-terminated and outlives the call; a null
    // destination asks for deletion.
    let ok = unsafe { MoveFileExW(source.as_ptr(), std::ptr::null(), MOVEFILE_DELAY_UNTIL_REBOOT) };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(windows)]
fn wide_path(path: &Path) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;

    path.as_os_str().encode_wide().chain(std::iter::once(0)).collect()
}

#[cfg(not(windows))]
fn schedule_delete(path: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!(
            "cannot schedule {} for deletion at reboot on this platform",
            path.display()
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(windows)]
    fn test_wide_path_is_nul_terminated() {
        let wide = wide_path(Path::new(r"\\?\C:\app\a.dll"));
        assert_eq!(wide.last(), Some(&0));
        assert_eq!(String::from_utf16(&wide[..wide.len() - 1]).unwrap(), r"\\?\C:\app\a.dll");
    }

    #[test]
    #[cfg(not(windows))]
    fn test_delete_on_reboot_is_unsupported() {
        use crate::runtime::Runtime;

        let err = RealRuntime
            .delete_on_reboot(Path::new("/tmp/whatever"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }
}
