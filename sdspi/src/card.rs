//! Single-shot command round-trips.
//!
//! Every round-trip is: frame the command, clock the frame out, then read
//! the card's answer with the polling receive and hand it to the decoder
//! the caller asked for. A command's response is fully consumed before
//! the next command is issued; nothing here interleaves.

use std::thread;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use log::debug;

use crate::bus::SpiBus;
use crate::frame;
use crate::response::{
    Block, BlockToken, Cid, Csd, Ocr, Response, ResponseKind, R1, R3, R7, R7Echo, WriteStatus,
    BLOCK_START_TOKEN,
};
use crate::session::Session;
use crate::{Result, SdError, ACMD41, CMD1, CMD55};

/// Register reads come back as a 16-byte data block.
const REGISTER_LEN: usize = 16;
/// The switch-function status block of CMD6 is always 64 bytes.
const STATUS_LEN: usize = 64;

/// Issue one command and decode the card's answer according to
/// `expected`. An R3 answer updates the session's capacity class as a
/// side effect.
pub fn command<B: SpiBus>(
    bus: &mut B,
    session: &mut Session,
    index: u8,
    argument: u32,
    expected: ResponseKind,
) -> Result<Response> {
    bus.send(&frame::serialise(index, argument))?;
    receive_response(bus, session, expected)
}

fn receive_response<B: SpiBus>(
    bus: &mut B,
    session: &mut Session,
    expected: ResponseKind,
) -> Result<Response> {
    match expected {
        ResponseKind::R1 => Ok(Response::R1(receive_r1(bus)?)),
        ResponseKind::R3 => Ok(Response::R3(receive_r3(bus, session)?)),
        ResponseKind::R7 => Ok(Response::R7(receive_r7(bus)?)),
        ResponseKind::Csd => {
            let block = receive_register(bus)?;
            Ok(Response::Csd(Csd::decode(&block.data)?))
        }
        ResponseKind::Cid => {
            let block = receive_register(bus)?;
            Ok(Response::Cid(Cid::decode(&block.data)))
        }
        ResponseKind::Status => Ok(Response::Block(receive_block(bus, STATUS_LEN)?)),
        ResponseKind::Block => Ok(Response::Block(receive_block(
            bus,
            usize::from(session.block_length),
        )?)),
    }
}

fn receive_r1<B: SpiBus>(bus: &mut B) -> Result<R1> {
    let mut byte = [0xff; 1];
    bus.receive(&mut byte)?;
    let r1 = R1::from_bits_truncate(byte[0]);
    debug!("card state 0x{:02x} ({})", byte[0], r1.describe());
    Ok(r1)
}

fn receive_r3<B: SpiBus>(bus: &mut B, session: &mut Session) -> Result<R3> {
    let r1 = receive_r1(bus)?;
    if !r1.is_ready() {
        // the OCR only follows a ready card
        return Ok(R3 { r1, ocr: None });
    }
    let mut raw = [0xff; 4];
    bus.receive(&mut raw)?;
    let ocr = Ocr::decode(&raw);
    session.high_capacity = ocr.high_capacity();
    Ok(R3 { r1, ocr: Some(ocr) })
}

fn receive_r7<B: SpiBus>(bus: &mut B) -> Result<R7> {
    let r1 = receive_r1(bus)?;
    if !r1.is_idle() {
        return Ok(R7 { r1, echo: None });
    }
    let mut raw = [0xff; 4];
    bus.receive(&mut raw)?;
    Ok(R7 {
        r1,
        echo: Some(R7Echo::decode(&raw)),
    })
}

fn receive_register<B: SpiBus>(bus: &mut B) -> Result<Block> {
    let block = receive_block(bus, REGISTER_LEN)?;
    if block.token != BlockToken::Start {
        return Err(SdError::BlockToken(block.token));
    }
    Ok(block)
}

/// Read a data block of `length` payload bytes.
///
/// The card must be ready before a block can follow. The token, payload
/// and trailing checksum are clocked in as one polled read; an error
/// token still consumes the full window but carries no payload.
fn receive_block<B: SpiBus>(bus: &mut B, length: usize) -> Result<Block> {
    let r1 = receive_r1(bus)?;
    if !r1.is_ready() {
        return Err(SdError::CardState(r1));
    }

    let mut raw = vec![0xffu8; 1 + length + 2];
    bus.receive(&mut raw)?;

    let token = BlockToken::from(raw[0]);
    if token != BlockToken::Start {
        debug!("block token 0x{:02x} ({})", raw[0], token.describe());
        return Ok(Block {
            r1,
            token,
            data: Vec::new(),
            checksum: 0,
        });
    }

    let data = raw[1..1 + length].to_vec();
    let checksum = BigEndian::read_u16(&raw[1 + length..]);
    Ok(Block {
        r1,
        token,
        data,
        checksum,
    })
}

/// Clock a data block out behind its start token and collect the card's
/// write status.
///
/// An accepted block opens the busy window: the card holds the line at
/// zero until the write lands, so raw single bytes are read until any
/// non-zero byte releases the bus.
pub fn transmit_block<B: SpiBus>(bus: &mut B, payload: &[u8]) -> Result<WriteStatus> {
    let mut wire = Vec::with_capacity(1 + payload.len());
    wire.push(BLOCK_START_TOKEN);
    wire.extend_from_slice(payload);
    bus.send(&wire)?;

    let mut byte = [0xff; 1];
    bus.receive(&mut byte)?;
    let status = WriteStatus::from(byte[0]);
    debug!("write status 0x{:02x} ({})", byte[0], status.describe());

    if status == WriteStatus::Accepted {
        let mut busy = [0x00; 1];
        while busy[0] == 0x00 {
            bus.exchange(&[0xff], &mut busy)?;
        }
    }
    Ok(status)
}

/// Drive CMD1 until the card leaves the idle state, sleeping the
/// session's poll interval between attempts.
pub fn send_operating_condition<B: SpiBus>(bus: &mut B, session: &mut Session) -> Result<R1> {
    loop {
        if let Response::R1(r1) = command(bus, session, CMD1, 0, ResponseKind::R1)? {
            if r1.is_ready() {
                return Ok(r1);
            }
        }
        sleep_poll_interval(session);
    }
}

/// Drive ACMD41 until the card reports ready. Every attempt is prefixed
/// with CMD55, as application commands require.
pub fn application_operating_condition<B: SpiBus>(
    bus: &mut B,
    session: &mut Session,
    argument: u32,
) -> Result<R1> {
    loop {
        command(bus, session, CMD55, 0, ResponseKind::R1)?;
        if let Response::R1(r1) = command(bus, session, ACMD41, argument, ResponseKind::R1)? {
            if r1.is_ready() {
                return Ok(r1);
            }
        }
        sleep_poll_interval(session);
    }
}

fn sleep_poll_interval(session: &Session) {
    thread::sleep(Duration::from_micros(u64::from(session.poll_interval)));
}
