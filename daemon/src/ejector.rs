/// Safe eject of a removable volume: lock, dismount, clear removal prevention,
/// eject media.
///
/// The sequence runs against a [`VolumeDevice`] obtained from a
/// [`DeviceOpener`] and scoped to a single [`VolumeEjector::eject`] call; the
/// device is dropped (and its OS handle closed) on every exit path.  Every
/// failure is logged and reported as `false`; nothing propagates.
///
/// On non-Windows platforms the system opener always fails with
/// [`Error::Unsupported`], so `eject` returns `false`.
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

#[cfg_attr(not(windows), allow(dead_code))]
pub const FSCTL_LOCK_VOLUME: u32 = 0x0009_0018;
#[cfg_attr(not(windows), allow(dead_code))]
pub const FSCTL_DISMOUNT_VOLUME: u32 = 0x0009_0020;
#[cfg_attr(not(windows), allow(dead_code))]
pub const IOCTL_STORAGE_MEDIA_REMOVAL: u32 = 0x002D_4804;
#[cfg_attr(not(windows), allow(dead_code))]
pub const IOCTL_STORAGE_EJECT_MEDIA: u32 = 0x002D_4808;

/// Lock attempts before giving up on a busy volume.
pub const LOCK_ATTEMPTS: u32 = 10;
/// Pause between lock attempts.
pub const LOCK_RETRY_DELAY: Duration = Duration::from_millis(500);

/// An open, exclusively scoped handle to a volume device.
pub trait VolumeDevice {
    fn lock(&mut self) -> Result<()>;
    fn dismount(&mut self) -> Result<()>;
    fn set_removal_prevention(&mut self, prevent: bool) -> Result<()>;
    fn eject_media(&mut self) -> Result<()>;
}

/// Opens a [`VolumeDevice`] for a drive prefix such as `E:`.
pub trait DeviceOpener: Send + Sync {
    fn open(&self, drive: &str) -> Result<Box<dyn VolumeDevice>>;
}

/// Raw device path for a drive prefix: `E:` or `E:\Databases` become `\\.\E:`.
#[cfg_attr(not(windows), allow(dead_code))]
pub fn device_path(drive: &str) -> Result<String> {
    match drive.chars().next() {
        Some(letter) if letter.is_ascii_alphabetic() => Ok(format!(r"\\.\{letter}:")),
        _ => Err(Error::InvalidArgument(format!(
            "'{drive}' does not start with a drive letter"
        ))),
    }
}

pub struct VolumeEjector {
    opener: Arc<dyn DeviceOpener>,
    lock_attempts: u32,
    lock_retry_delay: Duration,
}

impl VolumeEjector {
    pub fn new(opener: Arc<dyn DeviceOpener>) -> Self {
        Self {
            opener,
            lock_attempts: LOCK_ATTEMPTS,
            lock_retry_delay: LOCK_RETRY_DELAY,
        }
    }

    /// Ejector bound to the platform's device layer.
    pub fn system() -> Self {
        #[cfg(windows)]
        {
            Self::new(Arc::new(imp::Win32DeviceOpener))
        }
        #[cfg(not(windows))]
        {
            Self::new(Arc::new(UnsupportedOpener))
        }
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn with_lock_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.lock_attempts = attempts;
        self.lock_retry_delay = delay;
        self
    }

    /// Runs the full safe-eject sequence.  Returns `true` only if the media
    /// eject request itself succeeded.
    pub fn eject(&self, drive: &str) -> bool {
        match self.try_eject(drive) {
            Ok(()) => {
                info!(drive, "Ejected");
                true
            }
            Err(e) => {
                error!(drive, "Failed to eject: {e}");
                false
            }
        }
    }

    fn try_eject(&self, drive: &str) -> Result<()> {
        let mut device = self.opener.open(drive)?;

        self.lock(device.as_mut(), drive)?;
        // A volume that is locked but still mounted must not be ejected.
        device.dismount()?;
        if let Err(e) = device.set_removal_prevention(false) {
            warn!(drive, "Could not clear removal prevention: {e}");
        }
        device.eject_media()
    }

    fn lock(&self, device: &mut dyn VolumeDevice, drive: &str) -> Result<()> {
        for attempt in 1..=self.lock_attempts {
            match device.lock() {
                Ok(()) => {
                    debug!(drive, attempt, "Volume locked");
                    return Ok(());
                }
                Err(e) => {
                    debug!(drive, attempt, "Lock attempt failed: {e}");
                    if attempt < self.lock_attempts {
                        std::thread::sleep(self.lock_retry_delay);
                    }
                }
            }
        }
        Err(Error::DeviceBusy {
            drive: drive.to_string(),
            attempts: self.lock_attempts,
        })
    }
}

#[cfg(not(windows))]
struct UnsupportedOpener;

#[cfg(not(windows))]
impl DeviceOpener for UnsupportedOpener {
    fn open(&self, _drive: &str) -> Result<Box<dyn VolumeDevice>> {
        Err(Error::Unsupported("Volume eject"))
    }
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use std::ffi::c_void;

    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{CloseHandle, GENERIC_READ, GENERIC_WRITE, HANDLE};
    use windows::Win32::Storage::FileSystem::{
        CreateFileW, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
    };
    use windows::Win32::System::IO::DeviceIoControl;

    use super::{
        device_path, DeviceOpener, VolumeDevice, FSCTL_DISMOUNT_VOLUME, FSCTL_LOCK_VOLUME,
        IOCTL_STORAGE_EJECT_MEDIA, IOCTL_STORAGE_MEDIA_REMOVAL,
    };
    use crate::error::{Error, Result};

    /// Owned volume handle; closed when dropped.
    struct VolumeHandle {
        handle: HANDLE,
        path: String,
    }

    impl VolumeHandle {
        fn control(&self, operation: &'static str, code: u32, input: Option<&[u8]>) -> Result<()> {
            let mut returned = 0u32;
            unsafe {
                DeviceIoControl(
                    self.handle,
                    code,
                    input.map(|b| b.as_ptr() as *const c_void),
                    input.map_or(0, |b| b.len() as u32),
                    None,
                    0,
                    Some(&mut returned),
                    None,
                )
            }
            .map_err(|e| Error::os(operation, self.path.as_str(), e))
        }
    }

    impl Drop for VolumeHandle {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseHandle(self.handle);
            }
        }
    }

    impl VolumeDevice for VolumeHandle {
        fn lock(&mut self) -> Result<()> {
            self.control("FSCTL_LOCK_VOLUME", FSCTL_LOCK_VOLUME, None)
        }

        fn dismount(&mut self) -> Result<()> {
            self.control("FSCTL_DISMOUNT_VOLUME", FSCTL_DISMOUNT_VOLUME, None)
        }

        fn set_removal_prevention(&mut self, prevent: bool) -> Result<()> {
            // PREVENT_MEDIA_REMOVAL is a single BOOLEAN.
            let payload = [prevent as u8];
            self.control(
                "IOCTL_STORAGE_MEDIA_REMOVAL",
                IOCTL_STORAGE_MEDIA_REMOVAL,
                Some(&payload),
            )
        }

        fn eject_media(&mut self) -> Result<()> {
            self.control("IOCTL_STORAGE_EJECT_MEDIA", IOCTL_STORAGE_EJECT_MEDIA, None)
        }
    }

    pub struct Win32DeviceOpener;

    impl DeviceOpener for Win32DeviceOpener {
        fn open(&self, drive: &str) -> Result<Box<dyn VolumeDevice>> {
            let path = device_path(drive)?;
            let path_w: Vec<u16> = path.encode_utf16().chain(std::iter::once(0)).collect();
            let handle = unsafe {
                CreateFileW(
                    PCWSTR::from_raw(path_w.as_ptr()),
                    (GENERIC_READ | GENERIC_WRITE).0,
                    FILE_SHARE_READ | FILE_SHARE_WRITE,
                    None,
                    OPEN_EXISTING,
                    FILE_FLAGS_AND_ATTRIBUTES(0),
                    None,
                )
            }
            .map_err(|e| Error::os("CreateFileW", path.as_str(), e))?;
            Ok(Box::new(VolumeHandle { handle, path }))
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
