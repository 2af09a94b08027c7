use pic8259::ChainedPics;
use spin::Mutex;
use x86_64::instructions::port::Port;

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

/// Initialize the 8259 PICs, remapping both to vectors above the CPU
/// exception range and masking everything but the timer (IRQ0).
pub fn init_pic() {
    unsafe {
        PICS.lock().initialize();
    }
    unsafe {
        let mut master_data = Port::<u8>::new(0x21);
        let mut slave_data = Port::<u8>::new(0xA1);
        master_data.write(0xFEu8); // unmask IRQ0 (timer) only
        slave_data.write(0xFFu8); // mask everything on the slave PIC
    }
    log::info!("PIC remapped to {}/{}", PIC_1_OFFSET, PIC_2_OFFSET);
}

/// Sends end-of-interrupt for the given vector, routed through whichever
/// PIC owns it.
pub fn notify_end_of_interrupt(interrupt_id: u8) {
    unsafe {
        PICS.lock().notify_end_of_interrupt(interrupt_id);
    }
}

pub fn init_pit(frequency_hz: u32) {
    let pit_frequency: u32 = 1_193_182; // Hz - PIT base frequency
    let divisor: u16 = (pit_frequency / frequency_hz) as u16;

    log::info!(
        "Initializing PIT with {}Hz (divisor: {})",
        frequency_hz,
        divisor
    );

    unsafe {
        let mut command = Port::<u8>::new(0x43);
        let mut channel0 = Port::<u8>::new(0x40);

        // Channel 0, access mode lo/hi, mode 3 (square wave), binary
        command.write(0x36u8);

        // Write divisor in two parts: low byte first, then high byte
        channel0.write((divisor & 0xFF) as u8); // low byte
        channel0.write((divisor >> 8) as u8); // high byte
    }

    log::info!("PIT configured for {}Hz timer interrupts", frequency_hz);
}
