use halfwing_bootloader_protocol::{
    Error, LinkIo, PacketEngine, PacketKind, PING_RESPONSE, START_BYTE,
};

struct CaptureLink {
    rx: Vec<u8>,
    tx: Vec<u8>,
}

impl LinkIo for CaptureLink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.tx.extend_from_slice(bytes);
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8], _timeout_ms: u32) -> Result<(), Error> {
        for slot in buffer.iter_mut() {
            if self.rx.is_empty() {
                return Err(Error::Timeout);
            }
            *slot = self.rx.remove(0);
        }
        Ok(())
    }

    fn delay_ms(&mut self, _duration_ms: u32) {}
}

fn hexdump(bytes: &[u8]) {
    for (i, b) in bytes.iter().enumerate() {
        print!("{:02x} ", b);
        if (i + 1) % 16 == 0 {
            println!();
        }
    }
    println!();
}

fn main() {
    // Peer acks the write immediately.
    let link = CaptureLink {
        rx: vec![START_BYTE, 0xA1],
        tx: Vec::new(),
    };

    let mut engine = PacketEngine::new(link);
    engine
        .write_packet(&[0x01, 0x02, 0x03, 0x04], PacketKind::Command)
        .unwrap();

    println!("command packet with 4-byte payload:");
    hexdump(&engine.into_inner().tx);

    println!("ping response record:");
    hexdump(&PING_RESPONSE);
}
