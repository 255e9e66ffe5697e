/// Process token checks.
///
/// Two questions matter to LinkSleuth: whether the process is elevated (the
/// USN strategy opens the raw volume) and whether its token holds
/// `SeCreateSymbolicLinkPrivilege` (creating symlinks without Developer
/// Mode). Junctions and hardlinks need neither.

/// What the current process token allows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkPrivileges {
    pub elevated: bool,
    pub create_symlinks: bool,
}

/// Whether the current process runs elevated.
pub fn is_elevated() -> bool {
    link_privileges().elevated
}

#[cfg(windows)]
pub fn link_privileges() -> LinkPrivileges {
    match ProcessToken::open() {
        Some(token) => LinkPrivileges {
            elevated: token.is_elevated(),
            create_symlinks: token.holds(windows::core::w!("SeCreateSymbolicLinkPrivilege")),
        },
        None => LinkPrivileges::default(),
    }
}

/// No raw-volume access off Windows; symlinks need no special right.
#[cfg(not(windows))]
pub fn link_privileges() -> LinkPrivileges {
    LinkPrivileges {
        elevated: false,
        create_symlinks: true,
    }
}

#[cfg(windows)]
struct ProcessToken(windows::Win32::Foundation::HANDLE);

#[cfg(windows)]
impl ProcessToken {
    fn open() -> Option<Self> {
        use windows::Win32::Foundation::HANDLE;
        use windows::Win32::Security::TOKEN_QUERY;
        use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

        let mut handle = HANDLE::default();
        unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut handle) }.ok()?;
        Some(Self(handle))
    }

    fn is_elevated(&self) -> bool {
        use windows::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION};

        let mut elevation = TOKEN_ELEVATION::default();
        let mut returned = 0u32;
        let result = unsafe {
            GetTokenInformation(
                self.0,
                TokenElevation,
                Some(&mut elevation as *mut _ as *mut _),
                std::mem::size_of::<TOKEN_ELEVATION>() as u32,
                &mut returned,
            )
        };
        result.is_ok() && elevation.TokenIsElevated != 0
    }

    /// Whether the token lists the named privilege, enabled or not.
    fn holds(&self, name: windows::core::PCWSTR) -> bool {
        use windows::core::PCWSTR;
        use windows::Win32::Foundation::LUID;
        use windows::Win32::Security::{
            GetTokenInformation, LookupPrivilegeValueW, TokenPrivileges, LUID_AND_ATTRIBUTES,
            TOKEN_PRIVILEGES,
        };

        let mut wanted = LUID::default();
        if unsafe { LookupPrivilegeValueW(PCWSTR::null(), name, &mut wanted) }.is_err() {
            return false;
        }

        // First call sizes the buffer.
        let mut needed = 0u32;
        let _ = unsafe { GetTokenInformation(self.0, TokenPrivileges, None, 0, &mut needed) };
        if (needed as usize) < std::mem::size_of::<TOKEN_PRIVILEGES>() {
            return false;
        }

        // u64 words keep the buffer aligned for TOKEN_PRIVILEGES.
        let mut buffer = vec![0u64; (needed as usize).div_ceil(8)];
        let fetched = unsafe {
            GetTokenInformation(
                self.0,
                TokenPrivileges,
                Some(buffer.as_mut_ptr().cast()),
                needed,
                &mut needed,
            )
        };
        if fetched.is_err() {
            return false;
        }

        let privileges = unsafe {
            let header = &*(buffer.as_ptr() as *const TOKEN_PRIVILEGES);
            std::slice::from_raw_parts(
                header.Privileges.as_ptr() as *const LUID_AND_ATTRIBUTES,
                header.PrivilegeCount as usize,
            )
        };
        privileges.iter().any(|entry| {
            entry.Luid.LowPart == wanted.LowPart && entry.Luid.HighPart == wanted.HighPart
        })
    }
}

#[cfg(windows)]
impl Drop for ProcessToken {
    fn drop(&mut self) {
        let _ = unsafe { windows::Win32::Foundation::CloseHandle(self.0) };
    }
}
