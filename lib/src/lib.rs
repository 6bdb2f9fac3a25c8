#![no_std]

pub mod clock;
pub mod klog;
pub mod spinlock;
pub mod testing;

pub use spinlock::{IrqMutex, IrqMutexGuard};
