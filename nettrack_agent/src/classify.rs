//! System vs third-party process classification.

use crate::types::{ProcessCategory, RawProcess};

const SYSTEM_ACCOUNTS: &[&str] = &[
    "SYSTEM",
    "LOCAL SERVICE",
    "NETWORK SERVICE",
    "root",
    "daemon",
];

// Compared case-insensitively as path prefixes.
const SYSTEM_DIRS: &[&str] = &[
    "c:\\windows\\",
    "/system/",
    "/usr/libexec/",
    "/usr/sbin/",
    "/sbin/",
    "/usr/lib/systemd/",
];

const CORE_PROCESS_NAMES: &[&str] = &[
    "system",
    "svchost",
    "lsass",
    "csrss",
    "wininit",
    "winlogon",
    "services.exe",
    "smss",
    "dwm",
    "spoolsv",
    "launchd",
    "kernel_task",
    "mdnsresponder",
    "systemd",
    "networkmanager",
    "dbus-daemon",
];

pub fn is_system_account(user: &str) -> bool {
    // "NT AUTHORITY\SYSTEM" -> "SYSTEM"
    let account = user.rsplit('\\').next().unwrap_or(user).trim();
    SYSTEM_ACCOUNTS
        .iter()
        .any(|a| a.eq_ignore_ascii_case(account))
}

pub fn is_system_path(exe: &str) -> bool {
    let lower = exe.to_ascii_lowercase();
    SYSTEM_DIRS.iter().any(|d| lower.starts_with(d))
}

pub fn is_core_process_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    CORE_PROCESS_NAMES.iter().any(|n| lower.contains(n))
}

pub fn classify(p: &RawProcess) -> ProcessCategory {
    let by_user = p.user.as_deref().is_some_and(is_system_account);
    let by_path = p.exe.as_deref().is_some_and(is_system_path);
    if by_user || by_path || is_core_process_name(&p.name) {
        ProcessCategory::System
    } else {
        ProcessCategory::ThirdParty
    }
}
