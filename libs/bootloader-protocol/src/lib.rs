#![no_std]

//! Framed packet protocol spoken between the host and the bootloader over a
//! byte-level serial link.
//!
//! Wire format: `[0x5A][packet type]` followed, for Command/Data packets, by
//! `[length: u16 LE][crc16: u16 LE][payload: length bytes]`. Sync packet
//! types (Ack/Nak/AckAbort/Ping/PingResponse) carry only the two header
//! bytes. The CRC covers the header and length fields (skipping the CRC
//! field itself) plus the payload.

use halfwing_crc16::Crc16;
use heapless::Vec;

#[cfg(test)]
extern crate std;

pub const START_BYTE: u8 = 0x5A;

/// Largest Command/Data payload either side may send.
pub const MAX_PACKET_PAYLOAD: usize = 32;

/// Start byte, packet type, length and CRC of a Command/Data packet.
pub const FRAMING_HEADER_LEN: usize = 6;

pub const FRAMING_PACKET_MAX_LEN: usize = FRAMING_HEADER_LEN + MAX_PACKET_PAYLOAD;

/// Per-byte read budget; multi-byte reads scale this by the byte count.
pub const DEFAULT_BYTE_READ_TIMEOUT_MS: u32 = 10;

/// Stray (non-start) bytes tolerated while scanning for a packet boundary.
pub const MAX_START_BYTE_READ_COUNT: u32 = 2;

/// Settling time before a write that immediately follows another write, so
/// the receiver can get back into its read routine.
pub const BACK_TO_BACK_WRITE_DELAY_MS: u32 = 100;

pub const SERIAL_PROTOCOL_VERSION_MAJOR: u8 = 1;
pub const SERIAL_PROTOCOL_VERSION_MINOR: u8 = 2;
pub const SERIAL_PROTOCOL_VERSION_BUGFIX: u8 = 0;
pub const SERIAL_PROTOCOL_VERSION_NAME: u8 = b'P';

/// Fixed ping response: header, version quad, options, then the CRC of the
/// preceding eight bytes (0xEAAA, CRC-16/XMODEM). Recalculate if the version
/// or options ever change.
pub const PING_RESPONSE: [u8; 10] = [
    START_BYTE,
    0xA7,
    SERIAL_PROTOCOL_VERSION_BUGFIX,
    SERIAL_PROTOCOL_VERSION_MINOR,
    SERIAL_PROTOCOL_VERSION_MAJOR,
    SERIAL_PROTOCOL_VERSION_NAME,
    0x00,
    0x00,
    0xAA,
    0xEA,
];

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FramingPacketType {
    Ack = 0xA1,
    Nak = 0xA2,
    AckAbort = 0xA3,
    Command = 0xA4,
    Data = 0xA5,
    Ping = 0xA6,
    PingResponse = 0xA7,
}

impl FramingPacketType {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0xA1 => Some(Self::Ack),
            0xA2 => Some(Self::Nak),
            0xA3 => Some(Self::AckAbort),
            0xA4 => Some(Self::Command),
            0xA5 => Some(Self::Data),
            0xA6 => Some(Self::Ping),
            0xA7 => Some(Self::PingResponse),
            _ => None,
        }
    }
}

/// Payload-bearing packet class expected by a read or produced by a write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketKind {
    Command,
    Data,
}

impl PacketKind {
    const fn framing_type(self) -> FramingPacketType {
        match self {
            PacketKind::Command => FramingPacketType::Command,
            PacketKind::Data => FramingPacketType::Data,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// No start byte or payload byte arrived within the read budget.
    Timeout,
    /// A Command/Data packet of the wrong class arrived.
    UnexpectedPacketType(u8),
    /// Something other than Ack/Nak/AckAbort arrived while waiting for an
    /// acknowledgement.
    UnexpectedSync(u8),
    /// The peer cancelled the exchange with AckAbort.
    Aborted,
    PayloadTooLarge,
    /// Transport-level write/read failure that is not a timeout.
    Io,
}

/// Blocking byte-level serial transport under the packet engine.
///
/// `read` fills the whole buffer or fails; a `timeout_ms` of the transport's
/// choosing elapsing maps to `Error::Timeout`.
pub trait LinkIo {
    fn write(&mut self, bytes: &[u8]) -> Result<(), Error>;
    fn read(&mut self, buffer: &mut [u8], timeout_ms: u32) -> Result<(), Error>;
    fn delay_ms(&mut self, duration_ms: u32);
}

struct FramingDataHeader {
    packet_type: u8,
    length: u16,
    crc16: u16,
}

/// Packet engine for one host link. Owns all protocol state for the session:
/// deferred acknowledgements, the back-to-back write flag and the last
/// transmitted packet (kept verbatim for Nak retransmission).
pub struct PacketEngine<Io> {
    io: Io,
    ack_needed: bool,
    ack_abort_needed: bool,
    back_to_back_write: bool,
    tx_packet: Vec<u8, FRAMING_PACKET_MAX_LEN>,
    rx_data: [u8; MAX_PACKET_PAYLOAD],
}

impl<Io: LinkIo> PacketEngine<Io> {
    pub fn new(io: Io) -> Self {
        Self {
            io,
            ack_needed: false,
            ack_abort_needed: false,
            back_to_back_write: false,
            tx_packet: Vec::new(),
            rx_data: [0; MAX_PACKET_PAYLOAD],
        }
    }

    pub fn io(&self) -> &Io {
        &self.io
    }

    pub fn into_inner(self) -> Io {
        self.io
    }

    pub const fn max_packet_size(&self) -> usize {
        MAX_PACKET_PAYLOAD
    }

    /// Read the next valid Command/Data packet and return its payload.
    ///
    /// Sends any deferred acknowledgement first. Pings arriving while
    /// scanning are answered inline and scanning resumes. A CRC mismatch
    /// Naks the packet and waits for the retransmission; the caller only
    /// sees packets whose CRC checked out.
    pub fn read_packet(&mut self, kind: PacketKind) -> Result<&[u8], Error> {
        self.back_to_back_write = false;
        self.send_deferred_ack()?;

        let length = loop {
            // Clear the scratch area so unsent trailing fields default to
            // zero.
            self.rx_data = [0; MAX_PACKET_PAYLOAD];

            let packet = self.read_data_packet(kind)?;
            let length = packet.length as usize;

            let mut crc = Crc16::new();
            crc.update(&[START_BYTE, packet.packet_type]);
            crc.update(&packet.length.to_le_bytes());
            crc.update(&self.rx_data[..length]);
            if crc.finalize() == packet.crc16 {
                break length;
            }

            self.send_sync(FramingPacketType::Nak)?;
        };

        // Ack is owed for this packet, deferred to the next boundary.
        self.ack_needed = true;
        Ok(&self.rx_data[..length])
    }

    /// Build, transmit and confirm one Command/Data packet.
    ///
    /// Retransmits the identical wire bytes for as long as the peer Naks;
    /// each wait is still bounded by the underlying read timeout. AckAbort
    /// from the peer surfaces as [`Error::Aborted`] so the caller can unwind
    /// the transaction.
    pub fn write_packet(&mut self, payload: &[u8], kind: PacketKind) -> Result<(), Error> {
        if payload.len() > MAX_PACKET_PAYLOAD {
            return Err(Error::PayloadTooLarge);
        }

        self.send_deferred_ack()?;

        if self.back_to_back_write {
            self.back_to_back_write = false;
            self.io.delay_ms(BACK_TO_BACK_WRITE_DELAY_MS);
        }

        let packet_type = kind.framing_type().as_u8();
        let length = payload.len() as u16;

        let mut crc = Crc16::new();
        crc.update(&[START_BYTE, packet_type]);
        crc.update(&length.to_le_bytes());
        crc.update(payload);
        let crc16 = crc.finalize();

        // Retained verbatim so a Nak can be answered with the exact bytes.
        self.tx_packet.clear();
        let _ = self.tx_packet.push(START_BYTE);
        let _ = self.tx_packet.push(packet_type);
        let _ = self.tx_packet.extend_from_slice(&length.to_le_bytes());
        let _ = self.tx_packet.extend_from_slice(&crc16.to_le_bytes());
        let _ = self.tx_packet.extend_from_slice(payload);

        self.io.write(&self.tx_packet)?;
        self.wait_for_ack_packet()
    }

    /// Abandon the exchange the last read packet belonged to. The pending
    /// Ack becomes an AckAbort, sent at the next read/write boundary.
    pub fn abort(&mut self) {
        debug_assert!(self.ack_needed);
        self.ack_needed = false;
        self.ack_abort_needed = true;
    }

    /// Flush a deferred Ack/AckAbort; call when tearing the session down.
    pub fn finalize(&mut self) -> Result<(), Error> {
        self.send_deferred_ack()
    }

    /// Answer a ping with the fixed version record. Suppressed while an
    /// acknowledgement or abort is pending so a pong never interleaves into
    /// an in-progress handshake.
    pub fn send_ping_response(&mut self) -> Result<(), Error> {
        if self.ack_needed || self.ack_abort_needed {
            return Ok(());
        }
        self.io.write(&PING_RESPONSE)
    }

    fn send_deferred_ack(&mut self) -> Result<(), Error> {
        if self.ack_needed {
            self.ack_needed = false;
            self.send_sync(FramingPacketType::Ack)
        } else if self.ack_abort_needed {
            self.ack_abort_needed = false;
            self.send_sync(FramingPacketType::AckAbort)
        } else {
            Ok(())
        }
    }

    fn send_sync(&mut self, packet_type: FramingPacketType) -> Result<(), Error> {
        self.back_to_back_write = true;
        self.io.write(&[START_BYTE, packet_type.as_u8()])
    }

    fn wait_for_ack_packet(&mut self) -> Result<(), Error> {
        loop {
            let packet_type = self.read_header()?;
            match FramingPacketType::from_u8(packet_type) {
                Some(FramingPacketType::Ack) => return Ok(()),
                Some(FramingPacketType::AckAbort) => return Err(Error::Aborted),
                Some(FramingPacketType::Nak) => {
                    self.io.write(&self.tx_packet)?;
                }
                _ => return Err(Error::UnexpectedSync(packet_type)),
            }
        }
    }

    fn read_data_packet(&mut self, kind: PacketKind) -> Result<FramingDataHeader, Error> {
        let packet_type = loop {
            let packet_type = self.read_header()?;
            if packet_type == FramingPacketType::Ping.as_u8() {
                self.send_ping_response()?;
                continue;
            }
            break packet_type;
        };

        if packet_type != kind.framing_type().as_u8() {
            return Err(Error::UnexpectedPacketType(packet_type));
        }

        let length = self.read_u16()?.min(MAX_PACKET_PAYLOAD as u16);
        let crc16 = self.read_u16()?;

        if length > 0 {
            let count = length as usize;
            self.io
                .read(&mut self.rx_data[..count], DEFAULT_BYTE_READ_TIMEOUT_MS * count as u32)?;
        }

        Ok(FramingDataHeader {
            packet_type,
            length,
            crc16,
        })
    }

    fn read_header(&mut self) -> Result<u8, Error> {
        self.read_start_byte()?;
        let mut packet_type = [0u8; 1];
        self.io.read(&mut packet_type, DEFAULT_BYTE_READ_TIMEOUT_MS)?;
        Ok(packet_type[0])
    }

    fn read_start_byte(&mut self) -> Result<(), Error> {
        let mut stray_count = 0u32;
        loop {
            let mut byte = [0u8; 1];
            self.io.read(&mut byte, DEFAULT_BYTE_READ_TIMEOUT_MS)?;
            if byte[0] == START_BYTE {
                return Ok(());
            }

            stray_count += 1;
            if stray_count > MAX_START_BYTE_READ_COUNT {
                return Err(Error::Timeout);
            }

            // A stray byte usually means the peer is still finishing a
            // long-running command; wait one byte time before rescanning.
            self.io.delay_ms(DEFAULT_BYTE_READ_TIMEOUT_MS);
        }
    }

    fn read_u16(&mut self) -> Result<u16, Error> {
        let mut bytes = [0u8; 2];
        self.io.read(&mut bytes, DEFAULT_BYTE_READ_TIMEOUT_MS * 2)?;
        Ok(u16::from_le_bytes(bytes))
    }
}

/// Recompute the CRC a conforming peer would put in a Command/Data packet.
pub fn framing_packet_crc(kind: PacketKind, payload: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(&[START_BYTE, kind.framing_type().as_u8()]);
    crc.update(&(payload.len() as u16).to_le_bytes());
    crc.update(payload);
    crc.finalize()
}
