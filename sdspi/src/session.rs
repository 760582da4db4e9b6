//! Per-session configuration threaded through every card operation.

/// The tunable state of one interactive session.
///
/// Everything here is a user set-point except `high_capacity`, which the
/// R3 decoder maintains from the last observed OCR and the transfer loops
/// read to pick their address arithmetic.
#[derive(Debug, Clone)]
pub struct Session {
    /// SPI clock in Hz, applied at device open and per exchange.
    pub clock_frequency: u32,
    /// SPI mode byte for the device ioctl.
    pub mode: u8,
    pub bits_per_word: u8,
    /// Negotiated data block length; CMD16 widens it to 32 bits on the
    /// wire.
    pub block_length: u16,
    /// Microseconds slept between attempts of the idle-polling commands.
    pub poll_interval: u32,
    /// Card capacity class from the last OCR read: block-addressed when
    /// set, byte-addressed otherwise.
    pub high_capacity: bool,
    /// Substitute zero-filled blocks for bad blocks on pull instead of
    /// stopping.
    pub fault_tolerant: bool,
    /// Extra attempts a transfer loop grants a misbehaving block.
    pub retry_count: u32,
    /// Decoded responses are rendered after each command.
    pub verbose: bool,
}

impl Default for Session {
    fn default() -> Session {
        Session {
            clock_frequency: 16_000_000,
            mode: 0,
            bits_per_word: 8,
            block_length: 512,
            poll_interval: 1_000_000,
            high_capacity: false,
            fault_tolerant: false,
            retry_count: 0,
            verbose: true,
        }
    }
}
