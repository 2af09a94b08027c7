/*
 * 16550 UART driver
 *
 * Minimal polling driver for the COM-port UART: enough to get log output
 * off the box, nothing else (no receive path, no interrupt-driven FIFO).
 */

use x86_64::instructions::port::Port;

const LINE_STATUS_OFFSET: u16 = 5;
const LINE_STATUS_THRE: u8 = 0x20; // transmitter holding register empty

pub struct SerialPort {
    data: Port<u8>,
    int_enable: Port<u8>,
    line_control: Port<u8>,
    modem_control: Port<u8>,
    line_status: Port<u8>,
}

impl SerialPort {
    pub const fn new(base: u16) -> Self {
        Self {
            data: Port::new(base),
            int_enable: Port::new(base + 1),
            line_control: Port::new(base + 3),
            modem_control: Port::new(base + 4),
            line_status: Port::new(base + LINE_STATUS_OFFSET),
        }
    }

    pub fn init(&mut self) {
        unsafe {
            self.int_enable.write(0x00); // disable interrupts
            self.line_control.write(0x80); // enable DLAB to set baud divisor
            self.data.write(0x03); // divisor low byte: 38400 baud
            self.int_enable.write(0x00); // divisor high byte
            self.line_control.write(0x03); // 8 bits, no parity, one stop bit
            self.modem_control.write(0x0B); // IRQs disabled, RTS/DSR set
        }
    }

    fn line_status(&mut self) -> u8 {
        unsafe { self.line_status.read() }
    }

    pub fn write(&mut self, byte: u8) {
        while self.line_status() & LINE_STATUS_THRE == 0 {}
        unsafe { self.data.write(byte) };
    }
}
