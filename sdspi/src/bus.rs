//! Full-duplex byte transport over a Linux SPI character device.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;

use log::trace;

#[cfg(target_env = "musl")]
type IoctlRequest = libc::c_int;
#[cfg(not(target_env = "musl"))]
type IoctlRequest = libc::c_ulong;

// from include/uapi/linux/spi/spidev.h
const SPI_IOC_WR_MODE: IoctlRequest = 0x4001_6b01;
const SPI_IOC_WR_BITS_PER_WORD: IoctlRequest = 0x4001_6b03;
const SPI_IOC_WR_MAX_SPEED_HZ: IoctlRequest = 0x4004_6b04;
const SPI_IOC_MESSAGE_1: IoctlRequest = 0x4020_6b00;

fn check(result: libc::c_int) -> io::Result<libc::c_int> {
    if result == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result)
    }
}

// struct spi_ioc_transfer
#[repr(C)]
#[derive(Default)]
struct SpiTransfer {
    tx_buf: u64,
    rx_buf: u64,
    len: u32,
    speed_hz: u32,
    delay_usecs: u16,
    bits_per_word: u8,
    cs_change: u8,
    tx_nbits: u8,
    rx_nbits: u8,
    pad: u16,
}

/// Byte-paired SPI exchange: for every byte clocked out, one byte is
/// clocked in at the same instant.
pub trait SpiBus {
    /// Exchange two equal-length buffers in one full-duplex transaction.
    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()>;

    /// Clock `tx` out and discard whatever the card answers with.
    fn send(&mut self, tx: &[u8]) -> io::Result<()> {
        let mut rx = vec![0xff; tx.len()];
        self.exchange(tx, &mut rx)?;
        trace!("TX {:02x?}", tx);
        Ok(())
    }

    /// Clock 0xFF out until the card starts answering, then collect the
    /// rest of `rx` one byte per clock.
    ///
    /// Only the first position polls; once a non-0xFF byte arrives, every
    /// later position reads exactly one byte. This is the SD-over-SPI
    /// response-start contract, not a convenience.
    fn receive(&mut self, rx: &mut [u8]) -> io::Result<()> {
        for position in 0..rx.len() {
            loop {
                let mut byte = [0xff];
                self.exchange(&[0xff], &mut byte)?;
                rx[position] = byte[0];
                if byte[0] != 0xff || position > 0 {
                    break;
                }
            }
        }
        trace!("RX {:02x?}", rx);
        Ok(())
    }
}

/// A `/dev/spidevB.C` character device.
///
/// Opening applies the SPI mode, word size and clock rate ioctls before
/// any exchange; the clock also rides along in every transfer request.
pub struct Spidev {
    file: File,
    path: String,
    speed_hz: u32,
}

impl Spidev {
    pub fn open(path: &str, mode: u8, bits_per_word: u8, speed_hz: u32) -> io::Result<Spidev> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let fd = file.as_raw_fd();
        check(unsafe { libc::ioctl(fd, SPI_IOC_WR_MODE, &mode) })?;
        check(unsafe { libc::ioctl(fd, SPI_IOC_WR_BITS_PER_WORD, &bits_per_word) })?;
        check(unsafe { libc::ioctl(fd, SPI_IOC_WR_MAX_SPEED_HZ, &speed_hz) })?;
        Ok(Spidev {
            file,
            path: path.to_owned(),
            speed_hz,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Change the bus clock for this and every later exchange.
    pub fn set_clock(&mut self, speed_hz: u32) -> io::Result<()> {
        let fd = self.file.as_raw_fd();
        check(unsafe { libc::ioctl(fd, SPI_IOC_WR_MAX_SPEED_HZ, &speed_hz) })?;
        self.speed_hz = speed_hz;
        Ok(())
    }
}

impl SpiBus for Spidev {
    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()> {
        debug_assert_eq!(tx.len(), rx.len());
        let transfer = SpiTransfer {
            tx_buf: tx.as_ptr() as u64,
            rx_buf: rx.as_mut_ptr() as u64,
            len: tx.len() as u32,
            speed_hz: self.speed_hz,
            ..SpiTransfer::default()
        };
        check(unsafe { libc::ioctl(self.file.as_raw_fd(), SPI_IOC_MESSAGE_1, &transfer) })?;
        Ok(())
    }
}
