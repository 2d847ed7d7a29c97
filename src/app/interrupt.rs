use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_interrupt(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Routes SIGINT into a flag the dispatch loop polls, so the dashboard can
/// stop cleanly and give the cursor back.
#[cfg(unix)]
pub fn install() {
    let handler = on_interrupt as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
}

#[cfg(not(unix))]
pub fn install() {}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}
