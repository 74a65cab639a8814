/*
 * Synchronization Primitives (component G)
 *
 * Spinlocks, counting semaphores, and event control blocks (ECBs) — the
 * kernel's three building blocks for "block then wake". Every blocking
 * point elsewhere in the core (sleep, work-queue workers, ECB-timed
 * waits) is expressed in terms of these.
 */

pub mod ecb;
pub mod semaphore;

/// Short-hold spinlock for kernel data structures, matching the style the
/// rest of the tree already uses via the `spin` crate directly; re-exported
/// here so call sites that only need "a lock" don't have to know which
/// crate backs it.
pub type Spinlock<T> = spin::Mutex<T>;
