//! Trap Glue
//!
//! The last step between the assembly entry stub and [`dispatch`]: carry
//! out whatever the handler decided. Only the `Return` outcome comes back
//! to the stub; every other outcome hands the CPU to the scheduler for
//! good.

use alloc::format;
use alloc::sync::Arc;

use crate::kernel::Kernel;
use crate::process::Process;

use super::{dispatch, SyscallOutcome, TrapFrame};

/// Interrupt vector of the system call gate (user-callable, DPL 3).
pub const SYSCALL_VECTOR: u8 = 48;

/// Handle a system call trap taken by a thread of `current`.
///
/// On return the result is in `frame.eax`.
pub fn handle_trap(kernel: &Kernel, current: &Arc<Process>, frame: &mut TrapFrame) {
    match dispatch(kernel, current, frame) {
        SyscallOutcome::Return(value) => frame.eax = value as u32,
        SyscallOutcome::EnterUser(context) => kernel.sched.switch_to_user(context),
        SyscallOutcome::Exit => kernel.sched.stop(),
        SyscallOutcome::Shutdown => kernel.sched.shutdown(),
        SyscallOutcome::Fatal(e) => {
            log::error!("process {}: {}", current.pid(), e);
            kernel.sched.halt(&format!("{}", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::numbers::{SYS_EXIT, SYS_SEM};
    use crate::testing::Fixture;

    #[test]
    fn test_result_in_eax() {
        let fx = Fixture::new();
        let p = fx.init_process();
        let mut frame = fx.frame(&p, SYS_SEM, &[5]);
        handle_trap(&fx.kernel, &p, &mut frame);
        assert_eq!(frame.eax, 0x2000_0000);

        let mut frame = fx.frame(&p, 99, &[]);
        handle_trap(&fx.kernel, &p, &mut frame);
        assert_eq!(frame.eax, 0xFFFF_FFFF);
    }

    #[test]
    #[should_panic(expected = "stop")]
    fn test_exit_stops_thread() {
        let fx = Fixture::new();
        let p = fx.init_process();
        let mut frame = fx.frame(&p, SYS_EXIT, &[0]);
        handle_trap(&fx.kernel, &p, &mut frame);
    }
}
