/*
 * Interrupt Descriptor Table (IDT) Implementation
 *
 * The Interrupt Descriptor Table (IDT) is a critical data structure in x86_64 architecture
 * that defines how the CPU should handle interrupts and exceptions. It's essentially a table
 * of function pointers that the CPU uses to determine which code to execute when specific
 * events occur.
 *
 * Why IDT is Important:
 * 1. Exception Handling: When the CPU encounters errors like division by zero, page faults,
 *    or general protection faults, it needs to know what code to execute to handle these
 *    situations gracefully instead of crashing.
 *
 * 2. Interrupt Processing: Hardware devices (the timer, in this kernel) need to notify
 *    the CPU when they need attention. The IDT defines handlers for these hardware interrupts.
 *
 * 3. Memory Protection: The IDT helps enforce privilege levels and memory protection by
 *    defining which code can handle which types of interrupts.
 *
 * Structure:
 * - The IDT contains up to 256 entries (0-255)
 * - Each entry is 16 bytes and describes an interrupt gate, trap gate, or task gate
 * - Entries 0-31 are reserved for CPU exceptions (divide error, page fault, etc.)
 * - Entries 32-255 are available for hardware interrupts and software interrupts
 */

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame};

use crate::drivers::system::pic::PIC_1_OFFSET;

const TIMER_INTERRUPT_ID: u8 = PIC_1_OFFSET;
const YIELD_INTERRUPT_ID: u8 = 0x81;

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();

        idt.divide_error.set_handler_fn(divide_error_handler);
        idt.debug.set_handler_fn(debug_handler);
        idt.non_maskable_interrupt.set_handler_fn(nmi_handler);
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.overflow.set_handler_fn(overflow_handler);
        idt.bound_range_exceeded.set_handler_fn(bound_range_exceeded_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.device_not_available.set_handler_fn(device_not_available_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(crate::arch::x86_64::gdt::DOUBLE_FAULT_IST_INDEX);
        }
        idt.invalid_tss.set_handler_fn(invalid_tss_handler);
        idt.segment_not_present.set_handler_fn(segment_not_present_handler);
        idt.stack_segment_fault.set_handler_fn(stack_segment_fault_handler);
        idt.general_protection_fault.set_handler_fn(general_protection_fault_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.x87_floating_point.set_handler_fn(x87_floating_point_handler);
        idt.alignment_check.set_handler_fn(alignment_check_handler);
        idt.machine_check.set_handler_fn(machine_check_handler);
        idt.simd_floating_point.set_handler_fn(simd_floating_point_handler);
        idt.virtualization.set_handler_fn(virtualization_handler);
        idt.security_exception.set_handler_fn(security_exception_handler);

        // Voluntary yield, triggered by `int 0x81` from kernel code that
        // wants a context switch without waiting for the next timer tick.
        idt[YIELD_INTERRUPT_ID as usize].set_handler_fn(yield_interrupt_handler);

        // IRQ0, remapped by the PIC to PIC_1_OFFSET.
        idt[TIMER_INTERRUPT_ID as usize].set_handler_fn(timer_interrupt_handler);

        idt
    };
}

/// Initialize the Interrupt Descriptor Table
///
/// This function sets up the IDT with handlers for common CPU exceptions.
/// It must be called early in the boot process before interrupts are enabled.
pub fn init() {
    log::info!("Loading IDT...");
    IDT.load();
    log::info!("IDT loaded successfully");
}

extern "x86-interrupt" fn divide_error_handler(_stack_frame: InterruptStackFrame) {
    panic!("divide error");
}

extern "x86-interrupt" fn debug_handler(_stack_frame: InterruptStackFrame) {}

extern "x86-interrupt" fn nmi_handler(_stack_frame: InterruptStackFrame) {
    panic!("non-maskable interrupt");
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    log::info!("breakpoint: {:#?}", stack_frame);
}

extern "x86-interrupt" fn overflow_handler(_stack_frame: InterruptStackFrame) {
    panic!("overflow exception");
}

extern "x86-interrupt" fn bound_range_exceeded_handler(_stack_frame: InterruptStackFrame) {
    panic!("bound range exceeded");
}

extern "x86-interrupt" fn invalid_opcode_handler(stack_frame: InterruptStackFrame) {
    panic!("invalid opcode at {:?}", stack_frame.instruction_pointer);
}

extern "x86-interrupt" fn device_not_available_handler(_stack_frame: InterruptStackFrame) {
    panic!("device not available");
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("double fault: {:#?}", stack_frame);
}

extern "x86-interrupt" fn invalid_tss_handler(_stack_frame: InterruptStackFrame, error_code: u64) {
    panic!("invalid TSS, error code {:#x}", error_code);
}

extern "x86-interrupt" fn segment_not_present_handler(
    _stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    panic!("segment not present, error code {:#x}", error_code);
}

extern "x86-interrupt" fn stack_segment_fault_handler(
    _stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    panic!("stack segment fault, error code {:#x}", error_code);
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    panic!(
        "general protection fault, error code {:#x}, rip {:?}",
        error_code, stack_frame.instruction_pointer
    );
}

/// Page fault handler: hands the fault straight to kernel-core's page
/// subsystem, which knows whether the address is a lazy UNINIT entry,
/// a stack-growth candidate, or genuinely invalid.
extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: x86_64::structures::idt::PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;
    use x86_64::structures::idt::PageFaultErrorCode;

    let fault_addr = match Cr2::read() {
        Ok(addr) => addr,
        Err(_) => panic!("invalid fault address in CR2"),
    };
    let is_user = error_code.contains(PageFaultErrorCode::USER_MODE);
    let user_rsp = stack_frame.stack_pointer.as_u64();

    kernel_core::irq::enter_interrupt_context();
    let outcome = kernel_core::Sched::with_current_mut(|thread| {
        let space = thread.address_space.unwrap_or(0);
        kernel_core::vm::handle_fault(
            space,
            &mut thread.spt,
            fault_addr.as_u64() as usize,
            user_rsp,
            is_user,
        )
    });
    kernel_core::irq::leave_interrupt_context();

    match outcome {
        Ok(_) => (),
        Err(e) => panic!(
            "unrecoverable page fault at {:?}: {}",
            fault_addr, e
        ),
    }
}

extern "x86-interrupt" fn x87_floating_point_handler(_stack_frame: InterruptStackFrame) {
    panic!("x87 floating point exception");
}

extern "x86-interrupt" fn alignment_check_handler(
    _stack_frame: InterruptStackFrame,
    _error_code: u64,
) {
    panic!("alignment check exception");
}

extern "x86-interrupt" fn machine_check_handler(_stack_frame: InterruptStackFrame) -> ! {
    panic!("machine check exception");
}

extern "x86-interrupt" fn simd_floating_point_handler(_stack_frame: InterruptStackFrame) {
    panic!("SIMD floating point exception");
}

extern "x86-interrupt" fn virtualization_handler(_stack_frame: InterruptStackFrame) {
    panic!("virtualization exception");
}

extern "x86-interrupt" fn security_exception_handler(
    _stack_frame: InterruptStackFrame,
    _error_code: u64,
) {
    panic!("security exception");
}

// Hardware interrupt handlers

extern "x86-interrupt" fn timer_interrupt_handler(_stack_frame: InterruptStackFrame) {
    kernel_core::irq::enter_interrupt_context();
    crate::utils::timer::on_timer_interrupt();
    kernel_core::irq::leave_interrupt_context();
    crate::drivers::system::pic::notify_end_of_interrupt(TIMER_INTERRUPT_ID);
}

extern "x86-interrupt" fn yield_interrupt_handler(_stack_frame: InterruptStackFrame) {
    kernel_core::irq::enter_interrupt_context();
    kernel_core::Sched::yield_now();
    kernel_core::irq::leave_interrupt_context();
}
