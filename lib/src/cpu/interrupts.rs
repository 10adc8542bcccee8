//! Interrupt flag management: irqsave/irqrestore.
//!
//! On bare-metal x86_64 this manipulates RFLAGS.IF. Hosted builds (unit tests,
//! user-space simulation) have no interrupt flag to mask and the calls are
//! no-ops that still hand out a flags word so callers stay target-agnostic.

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod imp {
    use x86_64::instructions::interrupts;
    use x86_64::registers::rflags::{self, RFlags};

    #[inline(always)]
    pub fn save_flags_cli() -> u64 {
        let flags = rflags::read_raw();
        interrupts::disable();
        flags
    }

    #[inline(always)]
    pub fn restore_flags(flags: u64) {
        if flags & RFlags::INTERRUPT_FLAG.bits() != 0 {
            interrupts::enable();
        }
    }

    #[inline(always)]
    pub fn are_interrupts_enabled() -> bool {
        interrupts::are_enabled()
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod imp {
    #[inline(always)]
    pub fn save_flags_cli() -> u64 {
        0
    }

    #[inline(always)]
    pub fn restore_flags(_flags: u64) {}

    #[inline(always)]
    pub fn are_interrupts_enabled() -> bool {
        true
    }
}

/// Save the interrupt flag and disable interrupts (irqsave pattern).
/// Returns the saved flags word for [`restore_flags`].
#[inline(always)]
pub fn save_flags_cli() -> u64 {
    imp::save_flags_cli()
}

/// Restore the interrupt flag from a word returned by [`save_flags_cli`].
/// Only re-enables interrupts if they were enabled when it was saved.
#[inline(always)]
pub fn restore_flags(flags: u64) {
    imp::restore_flags(flags)
}

#[inline(always)]
pub fn are_interrupts_enabled() -> bool {
    imp::are_interrupts_enabled()
}
