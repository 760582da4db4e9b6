//! Driver core for SD/MMC cards spoken to over a Linux SPI character
//! device.
//!
//! The crate is the protocol engine behind an interactive shell: it frames
//! 48-bit card commands with their CRC7 tail, clocks them through a
//! full-duplex [`bus::SpiBus`], polls for the card's framed answer and
//! decodes it into one of the typed [`response::Response`] shapes. On top
//! of the single-shot [`card::command`] round-trip, [`transfer`] moves
//! bulk blocks between the card and a regular file with retries and
//! interrupt-safe termination.

pub mod bits;
pub mod bus;
pub mod card;
pub mod crc;
pub mod frame;
pub mod response;
pub mod session;
pub mod transfer;

use core::fmt;
use std::io;

/// GO_IDLE_STATE - software reset into SPI mode
pub const CMD0: u8 = 0;
/// SEND_OP_COND - begin initialisation (MMC flavour)
pub const CMD1: u8 = 1;
/// SWITCH_FUNC - check or switch a card function
pub const CMD6: u8 = 6;
/// SEND_IF_COND - verify the interface operating condition
pub const CMD8: u8 = 8;
/// SEND_CSD - read the Card-Specific Data register
pub const CMD9: u8 = 9;
/// SEND_CID - read the Card Identification register
pub const CMD10: u8 = 10;
/// SET_BLOCKLEN - change the read/write block length
pub const CMD16: u8 = 16;
/// READ_SINGLE_BLOCK - read one data block
pub const CMD17: u8 = 17;
/// WRITE_BLOCK - write one data block
pub const CMD24: u8 = 24;
/// SD_SEND_OP_COND - begin initialisation, announces host capacity
pub const ACMD41: u8 = 41;
/// APP_CMD - escape preceding every application-specific command
pub const CMD55: u8 = 55;
/// READ_OCR - read the Operating Conditions Register
pub const CMD58: u8 = 58;

#[derive(Debug)]
/// Every way a card operation can fail.
pub enum SdError {
    /// The SPI exchange or a device ioctl failed at the OS level.
    Transport(io::Error),
    /// Reading or writing a transfer's source or destination file failed.
    File(io::Error),
    /// The card answered with an R1 state that forbids the rest of the
    /// response from following.
    CardState(response::R1),
    /// A data block response opened with an error token instead of the
    /// block start token.
    BlockToken(response::BlockToken),
    /// The CSD structure version bits select a layout this driver does
    /// not know.
    CsdVersion(u8),
    /// A push source file came up short of its announced block count.
    FileTruncated,
}

/// The result type for card operations.
pub type Result<T> = core::result::Result<T, SdError>;

impl From<io::Error> for SdError {
    fn from(err: io::Error) -> SdError {
        SdError::Transport(err)
    }
}

#[rustfmt::skip]
impl fmt::Display for SdError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SdError::Transport(err)    => write!(f, "{}", err),
            SdError::File(err)         => write!(f, "{}", err),
            SdError::CardState(r1)     => write!(f, "Card state 0x{:02x} ({})", r1.bits(), r1.describe()),
            SdError::BlockToken(token) => write!(f, "Block token ({})", token.describe()),
            SdError::CsdVersion(v)     => write!(f, "Unknown CSD structure version {}", v),
            SdError::FileTruncated     => write!(f, "File truncated"),
        }
    }
}

impl std::error::Error for SdError {}
