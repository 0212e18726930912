use std::time::Duration;

/// Sleeps with sub-millisecond resolution where the platform allows it.
///
/// Callers pacing frames without a blocking display (headless runs, dummy
/// scanners) need better than the scheduler's default sleep granularity.
pub fn precise_sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    #[cfg(target_os = "linux")]
    linux_sleep(duration);
    #[cfg(windows)]
    windows_sleep(duration);
    #[cfg(target_os = "macos")]
    macos_sleep(duration);
    #[cfg(not(any(target_os = "linux", windows, target_os = "macos")))]
    std::thread::sleep(duration);
}

#[cfg(target_os = "linux")]
fn linux_sleep(duration: Duration) {
    use libc::{clock_nanosleep, timespec, CLOCK_MONOTONIC};

    let request = timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    };
    unsafe {
        clock_nanosleep(CLOCK_MONOTONIC, 0, &request, std::ptr::null_mut());
    }
}

#[cfg(windows)]
fn windows_sleep(duration: Duration) {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Threading::{
        CreateWaitableTimerW, SetWaitableTimer, WaitForSingleObject, INFINITE,
    };

    // Negative due time = relative, in 100 ns ticks.
    let due = -((duration.as_nanos() / 100) as i64);
    unsafe {
        if let Ok(timer) = CreateWaitableTimerW(None, true, None) {
            if SetWaitableTimer(timer, &due, 0, None, None, false).is_ok() {
                WaitForSingleObject(timer, INFINITE);
            }
            let _ = CloseHandle(timer);
        } else {
            std::thread::sleep(duration);
        }
    }
}

#[cfg(target_os = "macos")]
fn macos_sleep(duration: Duration) {
    use mach2::mach_time::{mach_absolute_time, mach_timebase_info, mach_timebase_info_data_t};

    // Short waits spin on the mach clock; anything longer trusts the kernel.
    if duration.as_nanos() < 100_000 {
        unsafe {
            let start = mach_absolute_time();
            let mut timebase = mach_timebase_info_data_t { numer: 0, denom: 0 };
            mach_timebase_info(&mut timebase);
            let ticks =
                duration.as_nanos() as u64 * timebase.denom as u64 / timebase.numer as u64;
            while mach_absolute_time() - start < ticks {
                std::hint::spin_loop();
            }
        }
    } else {
        std::thread::sleep(duration);
    }
}
