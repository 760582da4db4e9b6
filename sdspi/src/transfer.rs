//! Bulk block movement between the card and a regular file.
//!
//! Push streams a file onto the card with CMD24, pull streams card blocks
//! into a file with CMD17. Both run one block per round-trip, grant a
//! misbehaving block `retry_count` extra attempts, and poll the interrupt
//! flag once per iteration after the block is fully committed.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{error, warn};

use crate::bus::SpiBus;
use crate::card;
use crate::response::{Response, ResponseKind, WriteStatus};
use crate::session::Session;
use crate::{Result, SdError, CMD17, CMD24};

/// Outcome of a push or pull: blocks moved, blocks requested, and the
/// wall-clock estimate, always at least one second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    pub moved: u64,
    pub total: u64,
    pub seconds: u64,
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn interrupt(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

/// Routes SIGINT into the `INTERRUPTED` flag for the lifetime of a
/// transfer loop. The default disposition comes back on drop.
struct InterruptGuard;

impl InterruptGuard {
    fn install() -> InterruptGuard {
        INTERRUPTED.store(false, Ordering::Relaxed);
        unsafe { libc::signal(libc::SIGINT, interrupt as libc::sighandler_t) };
        InterruptGuard
    }

    /// True once per interruption: observing the flag clears it.
    fn interrupted(&self) -> bool {
        INTERRUPTED.swap(false, Ordering::Relaxed)
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        unsafe { libc::signal(libc::SIGINT, libc::SIG_DFL) };
    }
}

/// Blocks needed to carry the whole file, the last one zero-padded.
fn count_blocks(file: &File, block_length: u16) -> io::Result<u64> {
    let size = file.metadata()?.len();
    let block_length = u64::from(block_length);
    Ok((size + block_length - 1) / block_length)
}

/// Translate a logical block index to its first wire address: block
/// indices on high-capacity cards, byte addresses otherwise.
fn first_address(session: &Session, block: u32) -> u32 {
    if session.high_capacity {
        block
    } else {
        block.wrapping_mul(u32::from(session.block_length))
    }
}

fn next_address(session: &Session, address: u32) -> u32 {
    if session.high_capacity {
        address.wrapping_add(1)
    } else {
        address.wrapping_add(u32::from(session.block_length))
    }
}

/// The logical block index behind a wire address, for warnings.
fn logical_block(session: &Session, address: u32) -> u32 {
    if session.high_capacity {
        address
    } else {
        address / u32::from(session.block_length)
    }
}

/// Read from `file` until `buffer` is full or the file runs out.
fn fill_from(file: &mut File, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let read = file.read(&mut buffer[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

/// Stream a file onto the card one block at a time, starting at the
/// logical block index `block`.
///
/// A block the card rejects is retried while attempts remain; once they
/// run out its index is reported and the loop stops without advancing.
/// Failures after the file is open end the loop with a partial report
/// rather than an error, so the caller can always account for what
/// moved.
pub fn push<B: SpiBus>(
    bus: &mut B,
    session: &mut Session,
    path: &Path,
    block: u32,
) -> Result<TransferReport> {
    let start = Instant::now();
    let mut file = File::open(path).map_err(SdError::File)?;
    let total = count_blocks(&file, session.block_length).map_err(SdError::File)?;

    let mut address = first_address(session, block);
    let guard = InterruptGuard::install();

    let mut moved: u64 = 0;
    let mut retries: u32 = 0;
    let mut buffer = vec![0u8; usize::from(session.block_length)];

    while moved < total {
        buffer.fill(0);
        let length = match fill_from(&mut file, &mut buffer) {
            Ok(length) => length,
            Err(err) => {
                error!("{}", err);
                break;
            }
        };
        if length < buffer.len() && moved + 1 < total {
            error!("{}", SdError::FileTruncated);
            break;
        }

        match card::command(bus, session, CMD24, address, ResponseKind::R1) {
            Ok(Response::R1(r1)) if r1.is_ready() => {}
            Ok(_) => {
                if retries < session.retry_count {
                    retries += 1;
                    continue;
                }
                warn!("Bad Block: {}", logical_block(session, address));
                retries = 0;
                break;
            }
            Err(err) => {
                error!("{}", err);
                break;
            }
        }

        match card::transmit_block(bus, &buffer) {
            Ok(WriteStatus::Accepted) => {}
            Ok(_) => {
                if retries < session.retry_count {
                    retries += 1;
                    continue;
                }
                warn!("Bad Block: {}", logical_block(session, address));
                retries = 0;
                break;
            }
            Err(err) => {
                error!("{}", err);
                break;
            }
        }

        if guard.interrupted() {
            break;
        }

        address = next_address(session, address);
        moved += 1;
    }

    drop(guard);
    Ok(TransferReport {
        moved,
        total,
        seconds: start.elapsed().as_secs() + 1,
    })
}

/// Stream `count` blocks from the card into a file, starting at the
/// logical block index `block`.
///
/// A bad block is retried while attempts remain. Once they run out its
/// index is reported and the loop either stops, or, fault-tolerant,
/// writes a zero-filled substitute and moves on; the substitute counts as
/// one transferred block and the loop never rewinds.
pub fn pull<B: SpiBus>(
    bus: &mut B,
    session: &mut Session,
    block: u32,
    count: u32,
    path: &Path,
) -> Result<TransferReport> {
    let start = Instant::now();
    let mut file = File::create(path).map_err(SdError::File)?;
    let total = u64::from(count);

    let mut address = first_address(session, block);
    let guard = InterruptGuard::install();

    let mut moved: u64 = 0;
    let mut retries: u32 = 0;

    while moved < total {
        let fetched = match card::command(bus, session, CMD17, address, ResponseKind::Block) {
            Ok(Response::Block(block)) if block.is_intact() => Some(block.data),
            Ok(_) | Err(SdError::CardState(_)) => None,
            Err(err) => {
                error!("{}", err);
                break;
            }
        };

        let payload = match fetched {
            Some(data) => data,
            None => {
                if retries < session.retry_count {
                    retries += 1;
                    continue;
                }
                warn!("Bad Block: {}", logical_block(session, address));
                retries = 0;
                if !session.fault_tolerant {
                    break;
                }
                vec![0u8; usize::from(session.block_length)]
            }
        };

        if let Err(err) = file.write_all(&payload) {
            error!("{}", err);
            break;
        }

        if guard.interrupted() {
            break;
        }

        address = next_address(session, address);
        moved += 1;
    }

    drop(guard);
    Ok(TransferReport {
        moved,
        total,
        seconds: start.elapsed().as_secs() + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testing::ScriptedBus;
    use crate::frame;
    use std::fs;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("sdspi-{}-{}", name, std::process::id()));
        path
    }

    fn session() -> Session {
        Session::default()
    }

    /// R1 ready, write accepted, busy released.
    fn script_accepted_write(bus: &mut ScriptedBus) {
        bus.script(&[0x00, 0x05, 0xff]);
    }

    /// R1 ready, block start token, a zero payload and checksum.
    fn script_zero_block(bus: &mut ScriptedBus, length: usize) {
        bus.script(&[0x00, 0xfe]);
        bus.script(&vec![0u8; length]);
        bus.script(&[0x00, 0x00]);
    }

    /// R1 ready, error token, and the rest of the block window.
    fn script_bad_block(bus: &mut ScriptedBus, length: usize) {
        bus.script(&[0x00, 0x01]);
        bus.script(&vec![0u8; length + 2]);
    }

    fn command_frames(bus: &ScriptedBus, index: u8) -> Vec<Vec<u8>> {
        bus.sent
            .iter()
            .filter(|tx| tx.len() == frame::FRAME_LEN && frame::index(tx) == index)
            .cloned()
            .collect()
    }

    fn data_frames(bus: &ScriptedBus) -> Vec<Vec<u8>> {
        bus.sent
            .iter()
            .filter(|tx| tx.first() == Some(&0xfe))
            .cloned()
            .collect()
    }

    #[test]
    fn push_issues_one_write_per_file_block() {
        let path = temp_path("push-count");
        fs::write(&path, vec![0xabu8; 1500]).unwrap();

        let mut session = session();
        session.high_capacity = true;

        let mut bus = ScriptedBus::new();
        for _ in 0..3 {
            script_accepted_write(&mut bus);
        }

        let report = push(&mut bus, &mut session, &path, 5).unwrap();
        assert_eq!(report.moved, 3);
        assert_eq!(report.total, 3);
        assert!(report.seconds >= 1);

        // a 1500 byte file rounds up to three blocks, addressed as
        // consecutive block indices on a high-capacity card
        let writes = command_frames(&bus, CMD24);
        assert_eq!(writes.len(), 3);
        let addresses: Vec<u32> = writes.iter().map(|tx| frame::argument(tx)).collect();
        assert_eq!(addresses, vec![5, 6, 7]);

        // the tail of the last block is zero padding
        let blocks = data_frames(&bus);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[2].len(), 513);
        assert!(blocks[2][1 + 476..].iter().all(|&b| b == 0));
        assert!(blocks[2][1..1 + 476].iter().all(|&b| b == 0xab));

        fs::remove_file(&path).ok();
    }

    #[test]
    fn push_uses_byte_addresses_on_standard_capacity_cards() {
        let path = temp_path("push-sc");
        fs::write(&path, vec![0x11u8; 1024]).unwrap();

        let mut session = session();
        let mut bus = ScriptedBus::new();
        for _ in 0..2 {
            script_accepted_write(&mut bus);
        }

        let report = push(&mut bus, &mut session, &path, 5).unwrap();
        assert_eq!(report.moved, 2);

        let addresses: Vec<u32> = command_frames(&bus, CMD24)
            .iter()
            .map(|tx| frame::argument(tx))
            .collect();
        assert_eq!(addresses, vec![5 * 512, 5 * 512 + 512]);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn push_stops_at_a_rejected_block_without_counting_it() {
        let path = temp_path("push-reject");
        fs::write(&path, vec![0x22u8; 1536]).unwrap();

        let mut session = session();
        session.high_capacity = true;

        let mut bus = ScriptedBus::new();
        script_accepted_write(&mut bus);
        bus.script(&[0x04]); // second CMD24 answers Illegal Command

        let report = push(&mut bus, &mut session, &path, 0).unwrap();
        assert_eq!(report.moved, 1);
        assert_eq!(report.total, 3);

        // the failing block was addressed but its data never sent
        assert_eq!(command_frames(&bus, CMD24).len(), 2);
        assert_eq!(data_frames(&bus).len(), 1);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn push_retries_a_rejected_block() {
        let path = temp_path("push-retry");
        fs::write(&path, vec![0x33u8; 512]).unwrap();

        let mut session = session();
        session.high_capacity = true;
        session.retry_count = 1;

        let mut bus = ScriptedBus::new();
        bus.script(&[0x04]); // first attempt rejected
        script_accepted_write(&mut bus); // retry lands

        let report = push(&mut bus, &mut session, &path, 9).unwrap();
        assert_eq!(report.moved, 1);

        let addresses: Vec<u32> = command_frames(&bus, CMD24)
            .iter()
            .map(|tx| frame::argument(tx))
            .collect();
        assert_eq!(addresses, vec![9, 9]);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn push_reports_nothing_moved_for_an_empty_file() {
        let path = temp_path("push-empty");
        fs::write(&path, b"").unwrap();

        let mut bus = ScriptedBus::new();
        let report = push(&mut bus, &mut session(), &path, 0).unwrap();
        assert_eq!(report.moved, 0);
        assert_eq!(report.total, 0);
        assert!(bus.sent.is_empty());

        fs::remove_file(&path).ok();
    }

    #[test]
    fn pull_writes_every_block_to_the_file() {
        let path = temp_path("pull-zeros");

        let mut session = session();
        session.high_capacity = true;

        let mut bus = ScriptedBus::new();
        for _ in 0..3 {
            script_zero_block(&mut bus, 512);
        }

        let report = pull(&mut bus, &mut session, 2, 3, &path).unwrap();
        assert_eq!(report.moved, 3);
        assert_eq!(report.total, 3);

        let contents = fs::read(&path).unwrap();
        assert_eq!(contents.len(), 3 * 512);
        assert!(contents.iter().all(|&b| b == 0));

        let addresses: Vec<u32> = command_frames(&bus, CMD17)
            .iter()
            .map(|tx| frame::argument(tx))
            .collect();
        assert_eq!(addresses, vec![2, 3, 4]);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn fault_tolerant_pull_substitutes_zero_blocks() {
        let path = temp_path("pull-tolerant");

        let mut session = session();
        session.high_capacity = true;
        session.fault_tolerant = true;

        let mut bus = ScriptedBus::new();
        script_bad_block(&mut bus, 512);
        script_bad_block(&mut bus, 512);

        let report = pull(&mut bus, &mut session, 0, 2, &path).unwrap();
        // every substituted block counts as one transferred block
        assert_eq!(report.moved, 2);

        let contents = fs::read(&path).unwrap();
        assert_eq!(contents.len(), 2 * 512);
        assert!(contents.iter().all(|&b| b == 0));

        // the address advanced past the substitution instead of rewinding
        let addresses: Vec<u32> = command_frames(&bus, CMD17)
            .iter()
            .map(|tx| frame::argument(tx))
            .collect();
        assert_eq!(addresses, vec![0, 1]);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn intolerant_pull_stops_at_the_first_bad_block() {
        let path = temp_path("pull-intolerant");

        let mut session = session();
        session.high_capacity = true;

        let mut bus = ScriptedBus::new();
        script_zero_block(&mut bus, 512);
        script_bad_block(&mut bus, 512);

        let report = pull(&mut bus, &mut session, 0, 3, &path).unwrap();
        assert_eq!(report.moved, 1);
        assert_eq!(report.total, 3);
        assert_eq!(fs::read(&path).unwrap().len(), 512);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn pull_retries_before_giving_up() {
        let path = temp_path("pull-retry");

        let mut session = session();
        session.high_capacity = true;
        session.retry_count = 1;

        let mut bus = ScriptedBus::new();
        script_bad_block(&mut bus, 512);
        script_zero_block(&mut bus, 512);

        let report = pull(&mut bus, &mut session, 7, 1, &path).unwrap();
        assert_eq!(report.moved, 1);

        let addresses: Vec<u32> = command_frames(&bus, CMD17)
            .iter()
            .map(|tx| frame::argument(tx))
            .collect();
        assert_eq!(addresses, vec![7, 7]);

        fs::remove_file(&path).ok();
    }
}
