use halfwing_bootloader_protocol::{Error, LinkIo, PacketEngine, PacketKind, START_BYTE};

/// Scripted peer: Naks the first transmission, acks the retry.
struct ScriptedLink {
    rx: Vec<u8>,
    tx: Vec<u8>,
    transmissions: usize,
}

impl LinkIo for ScriptedLink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.transmissions += 1;
        println!("tx #{}: {} bytes", self.transmissions, bytes.len());
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

    fn delay_ms(&mut self, duration_ms: u32) {
        println!("delay {} ms", duration_ms);
    }
}

fn main() {
    let link = ScriptedLink {
        rx: vec![START_BYTE, 0xA2, START_BYTE, 0xA1], // Nak, then Ack
        tx: Vec::new(),
        transmissions: 0,
    };

    let mut engine = PacketEngine::new(link);
    match engine.write_packet(b"halfwing", PacketKind::Data) {
        Ok(()) => println!("write confirmed after retransmission"),
        Err(err) => println!("write failed: {:?}", err),
    }
}
