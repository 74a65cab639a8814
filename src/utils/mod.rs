/*
 * Kernel Utilities and Support Functions
 *
 * This module contains various utility functions, macros, and support
 * code used throughout the kernel. It provides common functionality
 * like logging, text output, and debugging macros.
 *
 * Why this is important:
 * - Provides essential debugging and logging infrastructure
 * - Implements kernel-specific versions of common operations
 * - Enables consistent formatting and output across the kernel
 * - Provides macros for simplified kernel development
 * - Forms the support infrastructure for kernel debugging
 *
 * Key components:
 * - debug: IRQ-safe logging and the structured kernel logger
 * - io: serial writer, print macros, and the framebuffer console
 * - ui: shell and line editing on top of the TTY layer
 * - system: reboot and an alternate atomic-counter timer
 * - timer: uptime/scheduler-tick tracking wired to the PIT IRQ
 */

pub mod debug;
pub mod io;
pub mod ui;
pub mod system;
pub mod timer;
pub mod reboot;
