//! Interactive shell for driving SD/MMC cards over a SPI character
//! device.
//!
//! Reads one command per line from the prompt, frames it through the
//! `sdspi` protocol core, and renders the decoded response. A failing
//! command never tears down the session; `bye` or end of input leaves.

mod parser;
mod render;

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::anyhow;
use log::debug;

use sdspi::bus::Spidev;
use sdspi::card;
use sdspi::response::{Response, ResponseKind};
use sdspi::session::Session;
use sdspi::transfer;
use sdspi::{CMD0, CMD10, CMD16, CMD17, CMD58, CMD6, CMD8, CMD9};

use parser::Command;

struct Shell {
    session: Session,
    device: Option<Spidev>,
}

fn main() {
    env_logger::init();

    let mut shell = Shell {
        session: Session::default(),
        device: None,
    };

    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("sdmmc/spi> ");
        let _ = io::stdout().flush();

        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                eprintln!("{}\n", err);
                break;
            }
        }

        match parser::parse(&line) {
            Ok(Command::Bye) => break,
            Ok(command) => {
                if let Err(err) = shell.dispatch(command) {
                    eprintln!("{}\n", err);
                }
            }
            Err(err) => eprintln!("{}\n", err),
        }
    }
}

impl Shell {
    fn dispatch(&mut self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Help => render::commands(),
            Command::Verbose => self.session.verbose = true,
            Command::Quiet => self.session.verbose = false,
            Command::Session => render::session(&self.session, self.device.as_ref()),
            Command::Clock(hz) => self.set_clock(hz)?,
            Command::Open(path) => self.open(&path)?,
            Command::Close => self.device = None,
            Command::Cmd0 => self.single(CMD0, 0, ResponseKind::R1)?,
            Command::Cmd1 => self.poll_operating_condition()?,
            Command::Cmd6(condition) => self.single(CMD6, condition, ResponseKind::Status)?,
            Command::Cmd8(condition) => self.single(CMD8, condition, ResponseKind::R7)?,
            Command::Cmd9 => self.single(CMD9, 0, ResponseKind::Csd)?,
            Command::Cmd10 => self.single(CMD10, 0, ResponseKind::Cid)?,
            Command::Cmd16(length) => self.set_block_length(length)?,
            Command::Cmd17(address) => self.single(CMD17, address, ResponseKind::Block)?,
            Command::Cmd58 => self.single(CMD58, 0, ResponseKind::R3)?,
            Command::Acmd41(condition) => self.poll_application_condition(condition)?,
            Command::FaultTolerant(enabled) => self.session.fault_tolerant = enabled,
            Command::Retry(count) => self.session.retry_count = count,
            Command::Push { file, block } => self.push(&file, block)?,
            Command::Pull { block, count, file } => self.pull(block, count, &file)?,
            // handled by the prompt loop
            Command::Bye => {}
        }
        Ok(())
    }

    fn open_device(
        device: &mut Option<Spidev>,
    ) -> anyhow::Result<&mut Spidev> {
        device.as_mut().ok_or_else(|| anyhow!("No device open"))
    }

    fn single(&mut self, index: u8, argument: u32, expected: ResponseKind) -> anyhow::Result<()> {
        let Shell { session, device } = self;
        let bus = Self::open_device(device)?;
        let response = card::command(bus, session, index, argument, expected)?;
        if session.verbose {
            render::command(index, argument);
            render::response(&response);
        }
        Ok(())
    }

    fn set_clock(&mut self, hz: u32) -> anyhow::Result<()> {
        self.session.clock_frequency = hz;
        if let Some(device) = self.device.as_mut() {
            device.set_clock(hz)?;
        }
        Ok(())
    }

    fn open(&mut self, path: &str) -> anyhow::Result<()> {
        let session = &self.session;
        let device = Spidev::open(
            path,
            session.mode,
            session.bits_per_word,
            session.clock_frequency,
        )?;
        // a freshly acquired handle replaces and closes any prior one
        self.device = Some(device);
        debug!("opened {}", path);
        Ok(())
    }

    fn set_block_length(&mut self, length: u16) -> anyhow::Result<()> {
        self.session.block_length = length;
        self.single(CMD16, u32::from(length), ResponseKind::R1)
    }

    fn poll_operating_condition(&mut self) -> anyhow::Result<()> {
        let Shell { session, device } = self;
        let bus = Self::open_device(device)?;
        let r1 = card::send_operating_condition(bus, session)?;
        if session.verbose {
            render::card_state(r1);
        }
        Ok(())
    }

    fn poll_application_condition(&mut self, condition: u32) -> anyhow::Result<()> {
        let Shell { session, device } = self;
        let bus = Self::open_device(device)?;
        let r1 = card::application_operating_condition(bus, session, condition)?;
        if session.verbose {
            render::card_state(r1);
        }
        Ok(())
    }

    fn push(&mut self, file: &str, block: u32) -> anyhow::Result<()> {
        let Shell { session, device } = self;
        let bus = Self::open_device(device)?;
        let report = transfer::push(bus, session, Path::new(file), block)?;
        println!(
            "Pushed {} of {} block(s) in +-{}s\n",
            report.moved, report.total, report.seconds
        );
        Ok(())
    }

    fn pull(&mut self, block: u32, count: u32, file: &str) -> anyhow::Result<()> {
        let Shell { session, device } = self;
        let bus = Self::open_device(device)?;
        let report = transfer::pull(bus, session, block, count, Path::new(file))?;
        println!(
            "Pulled {} of {} block(s) in +-{}s\n",
            report.moved, report.total, report.seconds
        );
        Ok(())
    }
}
