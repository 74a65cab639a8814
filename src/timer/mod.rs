/*
 * Timer Subsystem (component C)
 *
 * Owns the periodic tick: `ticks[cpu]` counters, wall-clock time, short
 * busy-wait delays via the PIT reload trick, and the sleep/alarm wakeup
 * list. The tick ISR itself is installed through the interrupt manager
 * (component B) on the BSP's PIT vector and each AP's local-APIC timer
 * vector, all configured to the same rate `HZ`.
 */

pub mod wakeup;

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use spin::Mutex;
use x86_64::instructions::port::Port;

use crate::arch::x86_64::context::MAX_CPUS;
use crate::error::{KResult, KernelError};

/// Ticks per wall-clock second. Matches the PIT programming the teacher's
/// `drivers::system::pic::init_pit` already used.
pub const HZ: u32 = 100;
/// Cadence (in ticks) of the sleep/alarm sweep.
const WAKEUP_SWEEP_PERIOD: u64 = (HZ / 2) as u64;
/// Cadence (in ticks) of the TCP protocol-stack tick hook.
const TCP_HZ: u32 = 10;
/// Cadence (in ticks) of the per-CPU ECB sweep.
const SEM_CHECK: u64 = 10;
/// Default scheduler quantum, `HZ/10` ≈ 100ms at `HZ=100` -> 10 ticks.
pub const DEFAULT_QUANTUM_TICKS: u32 = HZ / 10;

const PIT_BASE_FREQ: u32 = 1_193_182;

static TICKS: [AtomicU64; MAX_CPUS] = [
    AtomicU64::new(0),
    AtomicU64::new(0),
    AtomicU64::new(0),
    AtomicU64::new(0),
];

/// Unix-epoch seconds at boot, set once from the RTC/BOOTBOOT datetime;
/// `time()`/`gettimeofday()` add elapsed BSP ticks on top of this.
static BOOT_EPOCH_SECS: AtomicU64 = AtomicU64::new(0);

type TcpTickHook = fn(u64);
static TCP_TICK_HOOK: Mutex<Option<TcpTickHook>> = Mutex::new(None);
static IP_TICK_HOOK: Mutex<Option<TcpTickHook>> = Mutex::new(None);

/// Register the (external, out-of-scope) TCP/IP protocol-stack tick
/// hooks. Steps 5 of the tick handler call these if present.
pub fn register_protocol_hooks(tcp: Option<TcpTickHook>, ip: Option<TcpTickHook>) {
    *TCP_TICK_HOOK.lock() = tcp;
    *IP_TICK_HOOK.lock() = ip;
}

pub fn init(boot_epoch_secs: u64) {
    BOOT_EPOCH_SECS.store(boot_epoch_secs, Ordering::SeqCst);
    crate::drivers::system::pic::init_pit(HZ);
    log::info!("timer: HZ={}, quantum={} ticks", HZ, DEFAULT_QUANTUM_TICKS);
}

/// Ticks elapsed on the given CPU since boot.
pub fn ticks(cpu: usize) -> u64 {
    TICKS[cpu].load(Ordering::Relaxed)
}

/// Busy-wait for `n` ticks of the BSP's clock (used by code with no
/// thread to block, e.g. very early boot).
pub fn wait_ticks(n: u64) {
    let start = ticks(0);
    while ticks(0) - start < n {
        x86_64::instructions::hlt();
    }
}

/// Busy-wait for `n` ticks of the calling CPU's own clock.
pub fn wait_ticks_local(n: u64) {
    let cpu = crate::arch::x86_64::context::current_cpu_id();
    let start = ticks(cpu);
    while ticks(cpu) - start < n {
        x86_64::instructions::hlt();
    }
}

/// Wall-clock time, seconds since the Unix epoch.
pub fn time() -> u64 {
    BOOT_EPOCH_SECS.load(Ordering::Relaxed) + ticks(0) / HZ as u64
}

/// `(seconds, microseconds)` since the Unix epoch.
pub fn gettimeofday() -> (u64, u32) {
    let t = ticks(0);
    let secs = BOOT_EPOCH_SECS.load(Ordering::Relaxed) + t / HZ as u64;
    let ticks_into_sec = t % HZ as u64;
    let micros = (ticks_into_sec * 1_000_000) / HZ as u64;
    (secs, micros as u32)
}

/// Assert the delay fits the PIT reload trick's range before using it;
/// panics like the original helper this is grounded on, since a caller
/// asking for an out-of-range delay is a programming error, not a
/// recoverable runtime condition.
fn assert_delay_in_range(n: u32) {
    assert!(
        n as u64 <= (u32::MAX as u64) / PIT_BASE_FREQ as u64,
        "delay {} exceeds PIT reload range",
        n
    );
}

/// Busy-wait `us` microseconds using the PIT channel-2 reload trick.
pub fn udelay(us: u32) {
    assert_delay_in_range(us);
    pit_spin(us as u64, 1_000_000);
}

/// Busy-wait `ms` milliseconds using the PIT channel-2 reload trick.
pub fn mdelay(ms: u32) {
    assert_delay_in_range(ms);
    pit_spin(ms as u64, 1_000);
}

/// Reload PIT channel 2 with a one-shot count and spin until it expires.
/// `unit_hz` is 1_000_000 for udelay, 1_000 for mdelay.
fn pit_spin(units: u64, unit_hz: u64) {
    let count = ((PIT_BASE_FREQ as u64 * units) / unit_hz).max(1).min(0xffff) as u16;
    unsafe {
        let mut command = Port::<u8>::new(0x43);
        let mut channel2 = Port::<u8>::new(0x42);
        let mut port_61 = Port::<u8>::new(0x61);

        // Channel 2, lo/hi access, mode 0 (interrupt on terminal count).
        command.write(0xb0u8);
        channel2.write((count & 0xff) as u8);
        channel2.write((count >> 8) as u8);

        let gate = port_61.read();
        port_61.write((gate & 0xfd) | 0x01);
        loop {
            let status = port_61.read();
            if status & 0x20 != 0 {
                break;
            }
            core::hint::spin_loop();
        }
        port_61.write(gate);
    }
}

/// `sleep(s)`: allocates a wakeup record, inserts it into the shared
/// list, then downs an interruptible semaphore. Returns `Ok(0)` if the
/// sleep completed normally, `Ok(remaining)` seconds if interrupted by a
/// signal before expiry.
pub fn sleep(seconds: u32) -> KResult<u32> {
    wakeup::sleep(seconds)
}

/// `alarm(s)`: replace/cancel/install a SIGALRM wakeup for the calling
/// process, returning the previous alarm's remaining seconds.
pub fn alarm(seconds: u32) -> KResult<u32> {
    wakeup::alarm(seconds)
}

/// Arm an event-control-block timeout on the calling CPU.
pub fn arm_ecb(handle: crate::sync::ecb::EcbHandle, ticks: u32) -> KResult<()> {
    crate::sync::ecb::arm(handle, ticks)
}

/// Cancel a previously armed ECB timeout.
pub fn cancel_ecb(handle: crate::sync::ecb::EcbHandle) {
    crate::sync::ecb::cancel(handle);
}

static TICK_COUNTER_FOR_SWEEPS: AtomicU32 = AtomicU32::new(0);

/// Periodic tick handler, installed on the PIT vector (BSP) and each AP's
/// local-APIC timer vector, all at rate `HZ`. Runs the six documented
/// steps in order.
pub fn on_tick(cpu: usize) {
    // 1. process-manager tick hook (quantum decrement / reschedule marker)
    crate::scheduler::process::ProcessManager::on_tick(cpu);

    // 2. scheduler tick
    crate::scheduler::scheduler_manager::do_tick(cpu);

    // 3. atomic-increment ticks[c]
    let t = TICKS[cpu].fetch_add(1, Ordering::Relaxed) + 1;

    if cpu == 0 {
        let sweep_counter = TICK_COUNTER_FOR_SWEEPS.fetch_add(1, Ordering::Relaxed) + 1;

        // 4. wakeup-timer sweep, period HZ/2
        if t % WAKEUP_SWEEP_PERIOD == 0 {
            wakeup::sweep(t);
        }

        // 5. protocol-stack tick hooks, period HZ/TCP_HZ and HZ
        if sweep_counter % (HZ / TCP_HZ) as u32 == 0 {
            if let Some(hook) = *TCP_TICK_HOOK.lock() {
                hook(t);
            }
        }
        if t % HZ as u64 == 0 {
            if let Some(hook) = *IP_TICK_HOOK.lock() {
                hook(t);
            }
        }
    }

    // 6. per-CPU ECB sweep, period SEM_CHECK
    if t % SEM_CHECK == 0 {
        crate::sync::ecb::sweep(cpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_range_check_matches_pit_reload_bound() {
        let max_ok = (u32::MAX as u64 / PIT_BASE_FREQ as u64) as u32;
        assert_delay_in_range(max_ok);
    }

    #[test]
    #[should_panic]
    fn delay_range_check_rejects_values_beyond_pit_reload_bound() {
        let too_big = (u32::MAX as u64 / PIT_BASE_FREQ as u64) as u32 + 10;
        assert_delay_in_range(too_big);
    }

    #[test]
    fn gettimeofday_microseconds_are_below_one_second() {
        BOOT_EPOCH_SECS.store(0, Ordering::SeqCst);
        TICKS[0].store(37, Ordering::SeqCst);
        let (_secs, micros) = gettimeofday();
        assert!(micros < 1_000_000);
    }
}
