use halfwing_crc16::Crc16;
use heapless::Vec;

/// Largest payload an I2C slave message may carry.
pub const I2C_MESSAGE_MAX_PAYLOAD: usize = 62;

/// CRC-protected message exchanged with module slaves. The CRC covers a
/// length byte followed by the payload, so a short or garbled transfer never
/// validates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct I2cMessage {
    pub data: Vec<u8, I2C_MESSAGE_MAX_PAYLOAD>,
    pub crc: u16,
}

impl I2cMessage {
    pub const fn new() -> Self {
        Self {
            data: Vec::new(),
            crc: 0,
        }
    }

    /// Build a sealed message from a command payload.
    pub fn from_payload(payload: &[u8]) -> Self {
        let mut message = Self::new();
        let _ = message.data.extend_from_slice(payload);
        message.seal();
        message
    }

    pub fn computed_crc(&self) -> u16 {
        let mut crc = Crc16::new();
        crc.update(&[self.data.len() as u8]);
        crc.update(&self.data);
        crc.finalize()
    }

    pub fn seal(&mut self) {
        self.crc = self.computed_crc();
    }

    pub fn is_valid(&self) -> bool {
        self.crc == self.computed_crc()
    }
}

/// Asynchronous bus operations available to the drivers.
///
/// All three are fire-and-forget requests: the call only schedules the
/// transfer and must not block. Completion (and, for reads, the arrival of
/// response bytes in the caller's message) is reported out of band by the
/// bus layer before the driver's next update runs.
pub trait BusTransport {
    /// Schedule a raw register write, e.g. to an LED controller.
    fn issue_write(&mut self, address: u8, bytes: &[u8]);

    /// Schedule the transmission of a CRC-sealed slave message.
    fn issue_write_message(&mut self, address: u8, message: &I2cMessage);

    /// Schedule a read of the slave's pending message into `message`.
    fn issue_read_message(&mut self, address: u8, message: &mut I2cMessage);
}
