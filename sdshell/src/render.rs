//! Label/value rendering of decoded responses, the help and session
//! tables, and the hex dump of block payloads.

use sdspi::bus::Spidev;
use sdspi::response::{Block, Cid, Csd, CsdV1, CsdV2, Ocr, Response, R1, R3, R7};
use sdspi::session::Session;
use sdspi::{frame, ACMD41, CMD0, CMD1, CMD10, CMD16, CMD17, CMD24, CMD55, CMD58, CMD6, CMD8, CMD9};

fn display_string(label: &str, value: &str) {
    println!("  {:<32}{}", label, value);
}

fn display_flag(label: &str, value: bool) {
    println!("  {:<32}0x{:02x} ({})", label, u8::from(value), if value { "Yes" } else { "No" });
}

fn display8(label: &str, value: u8) {
    println!("  {:<32}0x{:02x}", label, value);
}

fn describe8(label: &str, value: u8, description: &str) {
    println!("  {:<32}0x{:02x} ({})", label, value, description);
}

fn display16(label: &str, value: u16) {
    println!("  {:<32}0x{:04x}", label, value);
}

fn display32(label: &str, value: u32) {
    println!("  {:<32}0x{:08x}", label, value);
}

fn describe32(label: &str, value: u32, description: &str) {
    println!("  {:<32}0x{:08x} ({})", label, value, description);
}

fn display_version(label: &str, major: u8, minor: u8) {
    println!("  {:<32}{}.{}", label, major, minor);
}

fn display_date(label: &str, year: u8, month: u8) {
    println!("  {:<32}20{:02}/{:02}", label, year, month);
}

fn display_frequency(label: &str, hz: u32) {
    println!("  {:<32}{}Hz", label, hz);
}

fn display_milliseconds(label: &str, ms: u32) {
    println!("  {:<32}{}ms", label, ms);
}

fn display_substring(label: &str, bytes: &[u8]) {
    let text: String = bytes
        .iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
        .collect();
    println!("  {:<32}{}", label, text);
}

/// The `?` table.
pub fn commands() {
    display_string("?", "Display commands");
    display_string("session?", "Display session parameters");
    display_string("verbose", "Be verbose (default)");
    display_string("quiet", "Be quiet");
    display_string("bye", "Leave sdmmc/spi\n");
    display_string("clock FREQUENCY", "Set SPI clock frequency");
    display_string("open FILENAME", "Open SPI device");
    display_string("close", "Close SPI device\n");
    display_string("cmd0", "Go to Idle State");
    display_string("cmd1", "Send Operating Condition");
    display_string("cmd6 FUNCTION", "Check/Switch Function");
    display_string("cmd8 CONDITION", "Send Interface Condition");
    display_string("cmd9", "Read CSD Register");
    display_string("cmd10", "Read CID Register");
    display_string("cmd16 LENGTH", "Set Block Length");
    display_string("cmd17 ADDRESS", "Read Single Block");
    display_string("cmd58", "Read Operating Condition");
    display_string("acmd41 CONDITION", "Send Operating Condition\n");
    display_string("fault tolerant", "Pad and skip block on error");
    display_string("fault intolerant", "Abort on block error");
    display_string("retry COUNT", "Set block retry count\n");
    display_string("push FILE BLOCK", "Push blocks to card");
    display_string("pull BLOCK COUNT FILE", "Pull blocks from card\n");
}

/// The `session?` table.
pub fn session(session: &Session, device: Option<&Spidev>) {
    display_string("Device", device.map_or("(none)", Spidev::path));
    display_frequency("Clock Frequency", session.clock_frequency);
    display_milliseconds("Poll Interval", session.poll_interval / 1000);
    display_string("Fault Tolerant?", if session.fault_tolerant { "Yes" } else { "No" });
    display32("Retry Count", session.retry_count);
    display_string("High Capacity?", if session.high_capacity { "Yes" } else { "No" });
    println!();
}

#[rustfmt::skip]
fn describe_command(index: u8) -> &'static str {
    match index {
        CMD0   => "Go to Idle State",
        CMD1   => "Send Operating Condition",
        CMD6   => "Check / Switch Card Function",
        CMD8   => "Send Interface Condition",
        CMD9   => "Read CSD Register",
        CMD10  => "Read CID Register",
        CMD16  => "Set Block Length",
        CMD17  => "Read Single Block",
        CMD24  => "Write Single Block",
        ACMD41 => "Send Operating Condition",
        CMD55  => "Begin Application Specific Command",
        CMD58  => "Read Operating Condition",
        _      => "Unknown",
    }
}

/// Echo a just-issued command the way it went over the wire.
pub fn command(index: u8, argument: u32) {
    let frame = frame::serialise(index, argument);
    describe8("Command Type", index, describe_command(index));
    display32("Command Data", argument);
    display8("Command Checksum", frame::checksum(&frame));
    println!();
}

pub fn response(response: &Response) {
    match response {
        Response::R1(r1) => card_state(*r1),
        Response::R3(r3) => operating_condition(r3),
        Response::R7(r7) => interface_condition(r7),
        Response::Csd(csd) => card_specific_data(csd),
        Response::Cid(cid) => card_identification(cid),
        Response::Block(block) => data_block(block),
    }
}

pub fn card_state(r1: R1) {
    describe8("Card State", r1.bits(), r1.describe());
    println!();
}

#[rustfmt::skip]
fn operating_condition(r3: &R3) {
    card_state(r3.r1);
    let ocr = match r3.ocr {
        Some(ocr) => ocr,
        None => return,
    };

    if ocr.power_up_complete() {
        describe32("OCR", Ocr::BUSY, "Busy");
    } else {
        describe32("OCR", 0, "Idle");
    }

    if ocr.high_capacity() {
        describe32("", Ocr::CCS, "High Capacity");
    } else {
        describe32("", 0, "Standard Capacity");
    }

    const WINDOWS: [(u32, &str); 10] = [
        (Ocr::VOLTAGE_3V6, "3.5V - 3.6V OK"),
        (Ocr::VOLTAGE_3V5, "3.4V - 3.5V OK"),
        (Ocr::VOLTAGE_3V4, "3.3V - 3.4V OK"),
        (Ocr::VOLTAGE_3V3, "3.2V - 3.3V OK"),
        (Ocr::VOLTAGE_3V2, "3.1V - 3.2V OK"),
        (Ocr::VOLTAGE_3V1, "3.0V - 3.1V OK"),
        (Ocr::VOLTAGE_3V0, "2.9V - 3.0V OK"),
        (Ocr::VOLTAGE_2V9, "2.8V - 2.9V OK"),
        (Ocr::VOLTAGE_2V8, "2.7V - 2.8V OK"),
        (Ocr::VOLTAGE_LOW, "Low Voltage OK"),
    ];
    for (window, label) in WINDOWS {
        if ocr.0 & window != 0 {
            describe32("", window, label);
        }
    }
    println!();
}

fn interface_condition(r7: &R7) {
    card_state(r7.r1);
    let echo = match r7.echo {
        Some(echo) => echo,
        None => return,
    };

    let voltage = match echo.voltage {
        1 => "2.7V - 3.6V",
        2 => "Low Voltage",
        _ => "Unknown",
    };
    describe8("Voltage Accepted", echo.voltage, voltage);
    display8("Check Pattern", echo.pattern);
    println!();
}

fn card_specific_data(csd: &Csd) {
    match csd {
        Csd::V1(csd) => card_specific_data_v1(csd),
        Csd::V2(csd) => card_specific_data_v2(csd),
    }
}

fn card_specific_data_v1(csd: &CsdV1) {
    display_version("CSD Version", 1, 0);
    display8("TAAC", csd.taac);
    display8("NSAC", csd.nsac);
    display8("Maximum Transfer Rate", csd.transfer_rate);
    display16("Command Classes", csd.ccc);
    display8("Maximum Read Block Length", csd.read_block_length);
    display_flag("Partial Block Reads?", csd.read_block_partial);
    display_flag("Write Block Misalignment?", csd.write_block_misalign);
    display_flag("Read Block Misalignment?", csd.read_block_misalign);
    display_flag("DSR Implemented?", csd.dsr);
    display16("Device Size", csd.device_size);
    display8("Max Read Current @ min(Vdd)", csd.read_current_vdd_min);
    display8("Max Read Current @ max(Vdd)", csd.read_current_vdd_max);
    display8("Max Write Current @ min(Vdd)", csd.write_current_vdd_min);
    display8("Max Write Current @ max(Vdd)", csd.write_current_vdd_max);
    display8("Device Size Multiplier", csd.device_size_multiplier);
    display_flag("Erase Block Enabled?", csd.erase_block_enable);
    display8("Erase Sector Size", csd.erase_sector_size);
    display8("Write Protect Group Size", csd.wp_group_size);
    display_flag("Write Protect Group Enabled?", csd.wp_group_enable);
    display8("Write Speed Factor", csd.write_speed_factor);
    display8("Max Write Block Length", csd.write_block_length);
    display_flag("Partial Block Writes?", csd.write_block_partial);
    display_flag("File Format Group?", csd.file_format_group);
    display_flag("Copy?", csd.copy);
    display_flag("Permanent Write Protection?", csd.wp_permanent);
    display_flag("Temporary Write Protection?", csd.wp_temporary);
    display8("File Format", csd.file_format);
    display8("CSD Checksum", csd.checksum);
    println!();
}

fn card_specific_data_v2(csd: &CsdV2) {
    display_version("CSD Version", 2, 0);
    display8("TAAC", csd.taac);
    display8("NSAC", csd.nsac);
    display8("Maximum Transfer Rate", csd.transfer_rate);
    display16("Command Classes", csd.ccc);
    display8("Maximum Read Block Length", csd.read_block_length);
    display_flag("Partial Block Reads?", csd.read_block_partial);
    display_flag("Write Block Misalignment?", csd.write_block_misalign);
    display_flag("Read Block Misalignment?", csd.read_block_misalign);
    display_flag("DSR Implemented?", csd.dsr);
    display32("Device Size (Block Count)", csd.device_size);
    display_flag("Erase Block Enabled?", csd.erase_block_enable);
    display8("Erase Sector Size", csd.erase_sector_size);
    display8("Write Protect Group Size", csd.wp_group_size);
    display_flag("Write Protect Group Enabled?", csd.wp_group_enable);
    display8("Write Speed Factor", csd.write_speed_factor);
    display8("Max Write Block Length", csd.write_block_length);
    display_flag("Partial Block Writes?", csd.write_block_partial);
    display_flag("File Format Group?", csd.file_format_group);
    display_flag("Copy?", csd.copy);
    display_flag("Permanent Write Protection?", csd.wp_permanent);
    display_flag("Temporary Write Protection?", csd.wp_temporary);
    display8("File Format", csd.file_format);
    display8("CSD Checksum", csd.checksum);
    println!();
}

fn card_identification(cid: &Cid) {
    display8("Manufacturer", cid.manufacturer);
    display_substring("OEM/Application", &cid.oem);
    display_substring("Product", &cid.product);
    display_version("Revision", cid.major_revision, cid.minor_revision);
    display32("Serial Number", cid.serial_number);
    display8("Reserved", cid.reserved);
    display_date("Manufactured", cid.year, cid.month);
    display8("Checksum", cid.checksum);
    println!();
}

fn data_block(block: &Block) {
    describe8("Token", block.token.byte(), block.token.describe());
    println!();
    if block.data.is_empty() {
        return;
    }
    display16("Checksum (received)", block.checksum);
    display16("Checksum (calculated)", block.computed_checksum());
    println!();
    dump(&block.data);
}

/// Offset, hex pairs, then printable ASCII, sixteen bytes per row.
pub fn dump(buffer: &[u8]) {
    for (row, chunk) in buffer.chunks(16).enumerate() {
        print!("  {:08x}: ", row * 16);
        for index in 0..16 {
            match chunk.get(index) {
                Some(byte) => print!("{:02x}", byte),
                None => print!("  "),
            }
            if index % 2 == 1 {
                print!(" ");
            }
        }
        print!(" ");
        for &byte in chunk {
            print!("{}", if byte.is_ascii_graphic() || byte == b' ' { byte as char } else { '.' });
        }
        println!();
    }
    println!();
}
