//! The interactive command grammar.
//!
//! One line is one command: a verb, then whitespace-separated operands.
//! Numeric operands follow `strtoul` base-0 rules: `0x` prefixes hex, a
//! leading `0` octal, anything else decimal.

use core::fmt;

use nom::branch::alt;
use nom::bytes::complete::{tag, take_till1};
use nom::character::complete::{char, digit1, hex_digit1, multispace0, oct_digit0};
use nom::combinator::{map, map_res};
use nom::sequence::preceded;
use nom::IResult;

/// A fully parsed interactive command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Verbose,
    Quiet,
    Bye,
    Session,
    Clock(u32),
    Open(String),
    Close,
    Cmd0,
    Cmd1,
    Cmd6(u32),
    Cmd8(u32),
    Cmd9,
    Cmd10,
    Cmd16(u16),
    Cmd17(u32),
    Cmd58,
    Acmd41(u32),
    FaultTolerant(bool),
    Retry(u32),
    Push { file: String, block: u32 },
    Pull { block: u32, count: u32, file: String },
}

/// What was wrong with the line, in the words the prompt prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseError(pub &'static str);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const UNRECOGNISED: ParseError = ParseError("Unrecognised command");

fn number(input: &str) -> IResult<&str, u32> {
    preceded(
        multispace0,
        alt((
            map_res(
                preceded(alt((tag("0x"), tag("0X"))), hex_digit1),
                |digits| u32::from_str_radix(digits, 16),
            ),
            map_res(preceded(char('0'), oct_digit0), |digits: &str| {
                if digits.is_empty() {
                    Ok(0)
                } else {
                    u32::from_str_radix(digits, 8)
                }
            }),
            map_res(digit1, |digits: &str| digits.parse::<u32>()),
        )),
    )(input)
}

fn filename(input: &str) -> IResult<&str, String> {
    map(
        preceded(multispace0, take_till1(|c: char| c.is_whitespace())),
        str::to_owned,
    )(input)
}

/// A number is only complete when whitespace or the end of the line
/// follows it; `0xzz` or `12kHz` are not numbers.
fn terminated_number<'a>(input: &'a str, complaint: &'static str) -> Result<(&'a str, u32), ParseError> {
    match number(input) {
        Ok((rest, value)) if rest.is_empty() || rest.starts_with(char::is_whitespace) => {
            Ok((rest, value))
        }
        _ => Err(ParseError(complaint)),
    }
}

fn terminated_filename<'a>(input: &'a str) -> Result<(&'a str, String), ParseError> {
    filename(input).map_err(|_| ParseError("Invalid filename"))
}

fn parse_push(operands: &str) -> Result<Command, ParseError> {
    let (rest, file) = terminated_filename(operands)?;
    let (_, block) = terminated_number(rest, "Invalid address")?;
    Ok(Command::Push { file, block })
}

fn parse_pull(operands: &str) -> Result<Command, ParseError> {
    let (rest, block) = terminated_number(operands, "Invalid address")?;
    let (rest, count) = terminated_number(rest, "Invalid count")?;
    let (_, file) = terminated_filename(rest)?;
    Ok(Command::Pull { block, count, file })
}

/// Parse one prompt line into a [`Command`].
pub fn parse(line: &str) -> Result<Command, ParseError> {
    let line = line.trim_end();
    match line {
        "?" => return Ok(Command::Help),
        "verbose" => return Ok(Command::Verbose),
        "quiet" => return Ok(Command::Quiet),
        "bye" => return Ok(Command::Bye),
        "session?" => return Ok(Command::Session),
        "close" => return Ok(Command::Close),
        "cmd0" => return Ok(Command::Cmd0),
        "cmd1" => return Ok(Command::Cmd1),
        "cmd9" => return Ok(Command::Cmd9),
        "cmd10" => return Ok(Command::Cmd10),
        "cmd58" => return Ok(Command::Cmd58),
        "fault tolerant" => return Ok(Command::FaultTolerant(true)),
        "fault intolerant" => return Ok(Command::FaultTolerant(false)),
        _ => {}
    }

    if let Some(operands) = line.strip_prefix("clock ") {
        let (_, hz) = terminated_number(operands, "Invalid clock frequency")?;
        Ok(Command::Clock(hz))
    } else if let Some(operands) = line.strip_prefix("open ") {
        let (_, path) = filename(operands).map_err(|_| ParseError("Invalid device"))?;
        Ok(Command::Open(path))
    } else if let Some(operands) = line.strip_prefix("cmd6 ") {
        let (_, condition) = terminated_number(operands, "Invalid condition")?;
        Ok(Command::Cmd6(condition))
    } else if let Some(operands) = line.strip_prefix("cmd8 ") {
        let (_, condition) = terminated_number(operands, "Invalid condition")?;
        Ok(Command::Cmd8(condition))
    } else if let Some(operands) = line.strip_prefix("cmd16 ") {
        let (_, length) = terminated_number(operands, "Invalid block length")?;
        let length = u16::try_from(length).map_err(|_| ParseError("Invalid block length"))?;
        Ok(Command::Cmd16(length))
    } else if let Some(operands) = line.strip_prefix("cmd17 ") {
        let (_, address) = terminated_number(operands, "Invalid address")?;
        Ok(Command::Cmd17(address))
    } else if let Some(operands) = line.strip_prefix("acmd41 ") {
        let (_, condition) = terminated_number(operands, "Invalid condition")?;
        Ok(Command::Acmd41(condition))
    } else if let Some(operands) = line.strip_prefix("retry ") {
        let (_, count) = terminated_number(operands, "Invalid count")?;
        Ok(Command::Retry(count))
    } else if let Some(operands) = line.strip_prefix("push ") {
        parse_push(operands)
    } else if let Some(operands) = line.strip_prefix("pull ") {
        parse_pull(operands)
    } else {
        Err(UNRECOGNISED)
    }
}
