//! Panic and fatal-signal interception
//!
//! [`Interceptor::hook`] installs two independent triggers that share the
//! client's record pipeline:
//!
//! - **Panic hook.** The previously installed hook is saved and ours runs in
//!   front of it: record the panic, then always call the previous hook with
//!   the same info.
//! - **Signal handlers.** For each configured [`Signal`] the previous
//!   disposition is saved and replaced. When one fires, every saved
//!   disposition is put back first (so a second fault while recording kills
//!   the process), the occurrence is recorded, and the same signal is raised
//!   again so the original disposition runs once the handler returns.
//!
//! The signal handler reaches its state through an atomic pointer published
//! at hook time, and process context is snapshotted when the client is
//! created, so the handler reads neither the environment nor the host. It
//! still captures a backtrace, allocates and writes a file. A fault raised
//! inside the allocator or while another backtrace is being rendered can
//! therefore hang instead of terminating.
//!
//! Handlers run on the faulting thread's own stack. A stack overflow leaves
//! no room to record, so it terminates with SIGSEGV and is not queued.
//!
//! Failures while recording are swallowed: the original fault always
//! proceeds.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;

use libc::c_int;

use crate::client::SquashClient;
use crate::error::{Error, Result};
use crate::occurrence::{capture_current_frames, RawFrame, PANIC_CLASS};
use crate::signals::Signal;

/// Set while an interceptor owns the process-wide hooks
static HOOKED: AtomicBool = AtomicBool::new(false);

/// State the signal handler reads; null when no handler state is published.
/// Published states are never freed.
static SIGNAL_STATE: AtomicPtr<SignalState> = AtomicPtr::new(ptr::null_mut());

struct SignalState {
    client: Arc<SquashClient>,
    saved: Vec<(c_int, disposition::Saved)>,
}

impl SignalState {
    fn restore_all(&self) {
        for (signum, saved) in &self.saved {
            disposition::restore(*signum, saved);
        }
    }
}

/// Installed panic hook and signal handlers; dropping it uninstalls them
pub struct Interceptor {
    client: Arc<SquashClient>,
    signals: Vec<Signal>,
    restore_panic_hook: Option<Box<dyn FnOnce() + Send>>,
}

impl Interceptor {
    /// Install the panic hook and signal handlers for `client`
    ///
    /// Fails without touching any hook when a required configuration field
    /// is missing or another interceptor is already installed.
    pub fn hook(client: Arc<SquashClient>) -> Result<Self> {
        client.config().require_hookable()?;

        if HOOKED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyHooked);
        }

        let signals = dedup(&client.config().handled_signals);
        let saved = match install_signal_handlers(&signals) {
            Ok(saved) => saved,
            Err(e) => {
                HOOKED.store(false, Ordering::Release);
                return Err(Error::Io(e));
            }
        };

        let state = Box::new(SignalState {
            client: Arc::clone(&client),
            saved,
        });
        SIGNAL_STATE.store(Box::into_raw(state), Ordering::Release);

        let restore_panic_hook = install_panic_hook(Arc::clone(&client));

        tracing::debug!(
            signals = ?signals,
            folder = %client.queue().folder().display(),
            "Squash interceptor hooked"
        );

        Ok(Self {
            client,
            signals,
            restore_panic_hook: Some(restore_panic_hook),
        })
    }

    pub fn client(&self) -> &Arc<SquashClient> {
        &self.client
    }

    /// Signals currently trapped
    pub fn handled_signals(&self) -> &[Signal] {
        &self.signals
    }

    /// Put back the previous panic hook and signal dispositions
    pub fn unhook(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(restore_panic_hook) = self.restore_panic_hook.take() else {
            return;
        };

        let state = SIGNAL_STATE.swap(ptr::null_mut(), Ordering::AcqRel);
        if !state.is_null() {
            // SAFETY: the pointer came from Box::into_raw in hook() and is
            // never freed. A handler on another thread may still be reading
            // it, so it stays allocated for the life of the process.
            let state = unsafe { &*state };
            state.restore_all();
        }

        // The panic hook cannot be swapped from a panicking thread. Ours stays
        // installed, and so does the claim on the process-wide slot.
        if std::thread::panicking() {
            tracing::warn!("Squash interceptor dropped while panicking; panic hook left in place");
            return;
        }
        restore_panic_hook();

        HOOKED.store(false, Ordering::Release);
        tracing::debug!("Squash interceptor unhooked");
    }
}

impl Drop for Interceptor {
    fn drop(&mut self) {
        self.release();
    }
}

fn dedup(signals: &[Signal]) -> Vec<Signal> {
    let mut unique = Vec::with_capacity(signals.len());
    for signal in signals {
        if !unique.contains(signal) {
            unique.push(*signal);
        }
    }
    unique
}

fn install_signal_handlers(signals: &[Signal]) -> io::Result<Vec<(c_int, disposition::Saved)>> {
    let mut saved = Vec::with_capacity(signals.len());
    for signal in signals {
        match disposition::install(signal.number(), handle_signal) {
            Ok(previous) => saved.push((signal.number(), previous)),
            Err(e) => {
                for (signum, previous) in &saved {
                    disposition::restore(*signum, previous);
                }
                return Err(e);
            }
        }
    }
    Ok(saved)
}

/// Chain a recording hook in front of the current panic hook; returns the
/// action that puts the previous hook back.
fn install_panic_hook(client: Arc<SquashClient>) -> Box<dyn FnOnce() + Send> {
    let previous = Arc::new(panic::take_hook());
    let chained = Arc::clone(&previous);

    panic::set_hook(Box::new(move |info| {
        if !client.is_disabled() && !client.is_ignored(PANIC_CLASS) {
            let message = payload_message(info.payload());
            let location = info
                .location()
                .map(|l| RawFrame::new(l.file(), l.line(), "<panic location>"));
            let frames = capture_current_frames();
            let occurrence = client.builder().from_panic(message, location, &frames);
            match client.record(occurrence) {
                Ok(id) => tracing::debug!(uuid = %id, "Recorded panic"),
                Err(e) => tracing::warn!(error = %e, "Failed to record panic"),
            }
        }
        (chained)(info);
    }));

    Box::new(move || {
        drop(panic::take_hook());
        match Arc::try_unwrap(previous) {
            Ok(hook) => panic::set_hook(hook),
            Err(shared) => panic::set_hook(Box::new(move |info| (shared)(info))),
        }
    })
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

extern "C" fn handle_signal(signum: c_int) {
    let state = SIGNAL_STATE.load(Ordering::Acquire);

    if state.is_null() {
        disposition::reset_default(signum);
    } else {
        // SAFETY: published by hook() and only freed after being unpublished.
        let state = unsafe { &*state };
        state.restore_all();
        let _ = panic::catch_unwind(AssertUnwindSafe(|| {
            let _ = state.client.record_signal(signum);
        }));
    }

    // SAFETY: raise is async-signal-safe. The signal is blocked until this
    // handler returns, then the restored disposition handles it.
    unsafe {
        libc::raise(signum);
    }
}

/// Current disposition of `signal`, for inspection
#[cfg(unix)]
pub fn current_disposition(signal: Signal) -> io::Result<libc::sighandler_t> {
    // SAFETY: a null new action only queries the current one.
    let mut current: libc::sigaction = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::sigaction(signal.number(), ptr::null(), &mut current) };
    if rc == 0 {
        Ok(current.sa_sigaction)
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
mod disposition {
    use std::io;
    use std::ptr;

    use libc::c_int;

    pub type Saved = libc::sigaction;

    pub fn install(signum: c_int, handler: extern "C" fn(c_int)) -> io::Result<Saved> {
        // SAFETY: both structs are fully initialised before sigaction reads
        // them; the handler only performs async-signal-safe work up front.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handler as libc::sighandler_t;
            // No SA_ONSTACK: std's per-thread alternate stacks are too small
            // to capture a backtrace and write a record.
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);

            let mut previous: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(signum, &action, &mut previous) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(previous)
        }
    }

    pub fn restore(signum: c_int, saved: &Saved) {
        // SAFETY: `saved` was produced by sigaction for this signal.
        unsafe {
            libc::sigaction(signum, saved, ptr::null_mut());
        }
    }

    pub fn reset_default(signum: c_int) {
        // SAFETY: SIG_DFL is always a valid disposition.
        unsafe {
            libc::signal(signum, libc::SIG_DFL);
        }
    }
}

#[cfg(windows)]
mod disposition {
    use std::io;

    use libc::c_int;

    pub type Saved = libc::sighandler_t;

    pub fn install(signum: c_int, handler: extern "C" fn(c_int)) -> io::Result<Saved> {
        // SAFETY: signal() accepts any handler with the C ABI.
        let previous = unsafe { libc::signal(signum, handler as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
        Ok(previous)
    }

    pub fn restore(signum: c_int, saved: &Saved) {
        // SAFETY: `saved` is the handler signal() returned for this signal.
        unsafe {
            libc::signal(signum, *saved);
        }
    }

    pub fn reset_default(signum: c_int) {
        // SAFETY: SIG_DFL is always a valid disposition.
        unsafe {
            libc::signal(signum, libc::SIG_DFL);
        }
    }
}
