//! Fatal signals the interceptor can trap
//!
//! The [`Signal`] enum is both the display-name table used when building an
//! occurrence and the set of signals the interceptor accepts for
//! registration. Signals unavailable on a platform have no variant there.

use libc::c_int;
use serde::{Deserialize, Serialize};

/// A fatal signal supported on this platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    #[serde(rename = "SIGABRT")]
    Abort,
    #[cfg(unix)]
    #[serde(rename = "SIGBUS")]
    Bus,
    #[serde(rename = "SIGFPE")]
    FloatingPoint,
    #[serde(rename = "SIGILL")]
    IllegalInstruction,
    #[serde(rename = "SIGSEGV")]
    SegmentationViolation,
    #[cfg(unix)]
    #[serde(rename = "SIGTRAP")]
    Trap,
}

impl Signal {
    /// Every signal supported on this platform, which is also the default
    /// handled set.
    pub const ALL: &'static [Signal] = &[
        Signal::Abort,
        #[cfg(unix)]
        Signal::Bus,
        Signal::FloatingPoint,
        Signal::IllegalInstruction,
        Signal::SegmentationViolation,
        #[cfg(unix)]
        Signal::Trap,
    ];

    /// Raw signal number
    pub fn number(self) -> c_int {
        match self {
            Signal::Abort => libc::SIGABRT,
            #[cfg(unix)]
            Signal::Bus => libc::SIGBUS,
            Signal::FloatingPoint => libc::SIGFPE,
            Signal::IllegalInstruction => libc::SIGILL,
            Signal::SegmentationViolation => libc::SIGSEGV,
            #[cfg(unix)]
            Signal::Trap => libc::SIGTRAP,
        }
    }

    /// Human-readable name reported as the occurrence message
    pub fn display_name(self) -> &'static str {
        match self {
            Signal::Abort => "SIGABRT (Aborted)",
            #[cfg(unix)]
            Signal::Bus => "SIGBUS (Bus Error)",
            Signal::FloatingPoint => "SIGFPE (Floating-point Exception)",
            Signal::IllegalInstruction => "SIGILL (Illegal Instruction)",
            Signal::SegmentationViolation => "SIGSEGV (Segmentation Violation)",
            #[cfg(unix)]
            Signal::Trap => "SIGTRAP (Debugger Trap)",
        }
    }

    /// Look up a supported signal by number
    pub fn from_number(number: c_int) -> Option<Signal> {
        Signal::ALL.iter().copied().find(|s| s.number() == number)
    }
}

/// Display name for any signal number, falling back to `Signal N`
pub fn signal_name(number: c_int) -> String {
    match Signal::from_number(number) {
        Some(signal) => signal.display_name().to_string(),
        None => format!("Signal {}", number),
    }
}

/// Default handled signals for this platform
pub fn default_handled_signals() -> Vec<Signal> {
    Signal::ALL.to_vec()
}
