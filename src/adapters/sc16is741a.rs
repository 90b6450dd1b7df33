//! SC16IS741A SPI-to-UART bridge transport.
//!
//! The modem UART sits behind an NXP SC16IS741A on the SPI bus. Every
//! access is one SPI transaction: an address byte followed by data.
//!
//! ```text
//!   address byte:  R/W̅ │ A3 A2 A1 A0 │ CH1 CH0 │ x
//!                  bit7 │  bits 6..3  │ bits 2..1│ bit0
//! ```
//!
//! The scratchpad register doubles as the bridge health probe: a value
//! written must read back unchanged.

use embedded_hal::spi::{Operation, SpiDevice};
use log::{debug, warn};

use crate::ports::Transport;

mod reg {
    pub const RHR_THR: u8 = 0x00;
    pub const DLL: u8 = 0x00;
    pub const DLH: u8 = 0x01;
    pub const FCR: u8 = 0x02;
    pub const LCR: u8 = 0x03;
    pub const LSR: u8 = 0x05;
    pub const SPR: u8 = 0x07;
    pub const TXLVL: u8 = 0x08;
    pub const RXLVL: u8 = 0x09;
}

const READ: u8 = 0x80;
const LCR_DIVISOR_LATCH: u8 = 0x80;
const LCR_8N1: u8 = 0x03;
const FCR_ENABLE_RESET: u8 = 0x07;
const LSR_TX_EMPTY: u8 = 0x40;
const SCRATCH_PROBE: u8 = 0x55;
const FLUSH_POLLS: u16 = 1000;

/// Bridge crystal on the LTEm board.
pub const DEFAULT_XTAL_HZ: u32 = 7_372_800;

const fn address(register: u8, read: bool) -> u8 {
    let rw = if read { READ } else { 0 };
    rw | (register << 3)
}

pub struct Sc16is741a<SPI> {
    spi: SPI,
}

impl<SPI: SpiDevice> Sc16is741a<SPI> {
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }

    pub fn release(self) -> SPI {
        self.spi
    }

    pub fn read_register(&mut self, register: u8) -> Result<u8, SPI::Error> {
        let mut value = [0u8; 1];
        self.spi.transaction(&mut [
            Operation::Write(&[address(register, true)]),
            Operation::Read(&mut value),
        ])?;
        Ok(value[0])
    }

    pub fn write_register(&mut self, register: u8, value: u8) -> Result<(), SPI::Error> {
        self.spi.write(&[address(register, false), value])
    }

    /// Program 8N1 at `baud` from a `xtal_hz` clock and reset both FIFOs.
    pub fn init(&mut self, baud: u32, xtal_hz: u32) -> Result<(), SPI::Error> {
        let divisor = (xtal_hz / (16 * baud.max(1))).clamp(1, u32::from(u16::MAX)) as u16;
        let [dll, dlh] = divisor.to_le_bytes();
        self.write_register(reg::LCR, LCR_DIVISOR_LATCH)?;
        self.write_register(reg::DLL, dll)?;
        self.write_register(reg::DLH, dlh)?;
        self.write_register(reg::LCR, LCR_8N1)?;
        self.write_register(reg::FCR, FCR_ENABLE_RESET)?;
        debug!("BRIDGE: init baud={} divisor={}", baud, divisor);
        Ok(())
    }
}

impl<SPI: SpiDevice> Transport for Sc16is741a<SPI> {
    type Error = SPI::Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let level = usize::from(self.read_register(reg::RXLVL)?);
        let n = level.min(buf.len());
        if n == 0 {
            return Ok(0);
        }
        self.spi.transaction(&mut [
            Operation::Write(&[address(reg::RHR_THR, true)]),
            Operation::Read(&mut buf[..n]),
        ])?;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        let space = usize::from(self.read_register(reg::TXLVL)?);
        let n = space.min(data.len());
        if n == 0 {
            return Ok(0);
        }
        self.spi.transaction(&mut [
            Operation::Write(&[address(reg::RHR_THR, false)]),
            Operation::Write(&data[..n]),
        ])?;
        Ok(n)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        for _ in 0..FLUSH_POLLS {
            if self.read_register(reg::LSR)? & LSR_TX_EMPTY != 0 {
                return Ok(());
            }
        }
        warn!("BRIDGE: TX FIFO did not drain");
        Ok(())
    }

    fn available(&mut self) -> bool {
        self.read_register(reg::RXLVL).is_ok_and(|level| level > 0)
    }

    fn comm_ready(&mut self) -> bool {
        self.write_register(reg::SPR, SCRATCH_PROBE).is_ok()
            && matches!(self.read_register(reg::SPR), Ok(SCRATCH_PROBE))
    }
}
