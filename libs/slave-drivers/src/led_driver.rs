use heapless::Vec;

use crate::bus::BusTransport;
use crate::driver::{SharedBusState, SlaveDriver, UpdateStatus};
use crate::registry::SlaveId;
use crate::{I2C_ADDRESS_LED_DRIVER_LEFT, I2C_ADDRESS_LED_DRIVER_RIGHT};

pub const LED_DRIVER_LED_COUNT: usize = 144;

/// PWM bytes pushed per bus operation; one register byte precedes them on
/// the wire.
pub const PWM_UPDATE_CHUNK_SIZE: usize = 63;

const PWM_COMMAND_MAX_LEN: usize = PWM_UPDATE_CHUNK_SIZE + 1;

// Controller register map: a page-select register picks the active frame,
// the function frame holds the shutdown control, frame 1 holds the
// LED-enable bitmask and the PWM table.
const REGISTER_FRAME: u8 = 0xFD;
const FRAME_FUNCTION: u8 = 0x0B;
const FRAME_1: u8 = 0x00;
const FUNCTION_REGISTER_SHUTDOWN: u8 = 0x0A;
const SHUTDOWN_MODE_NORMAL: u8 = 0x01;
const FRAME_REGISTER_LED_CONTROL_FIRST: u8 = 0x00;
const FRAME_REGISTER_PWM_FIRST: u8 = 0x24;

const LED_CONTROL_REGISTER_COUNT: usize = 18;

// Enable exactly the LED positions that physically exist. The right half
// has key backlights only; the left half interleaves its display rows and
// carries the ISO key's extra position.
const LED_CONTROL_MASK_RIGHT: [u8; LED_CONTROL_REGISTER_COUNT] = [
    0b01111111, // key row 1
    0b00000000, // no display
    0b01111111, // key row 2
    0b00000000, // no display
    0b01111111, // key row 3
    0b00000000, // no display
    0b01111111, // key row 4
    0b00000000, // no display
    0b01111010, // key row 5
    0b00000000, // no display
    0b00000000, // key row 6
    0b00000000, // no display
    0b00000000, // key row 7
    0b00000000, // no display
    0b00000000, // key row 8
    0b00000000, // no display
    0b00000000, // key row 9
    0b00000000, // no display
];
const LED_CONTROL_MASK_LEFT: [u8; LED_CONTROL_REGISTER_COUNT] = [
    0b01111111, // key row 1
    0b00111111, // display row 1
    0b01011111, // key row 2
    0b00111111, // display row 2
    0b01011111, // key row 3
    0b00111111, // display row 3
    0b01111111, // key row 4, ISO key included
    0b00011111, // display row 4
    0b00101111, // key row 5
    0b00011111, // display row 5
    0b00000000, // key row 6
    0b00011111, // display row 6
    0b00000000, // key row 7
    0b00011111, // display row 7
    0b00000000, // key row 8
    0b00011111, // display row 8
    0b00000000, // key row 9
    0b00011111, // display row 9
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedDriverId {
    Right = 0,
    Left = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedDriverPhase {
    SetFunctionFrame,
    SetShutdownModeNormal,
    SetFrame1,
    InitLedControlRegisters,
    InitLedValues,
    Initialized,
}

/// Drive state of one LED controller.
///
/// `source_led_values` is what producers want shown, `target_led_values`
/// what the controller last confirmed; the steady-state phase only touches
/// the bus where the two differ.
pub struct LedDriverState {
    phase: LedDriverPhase,
    i2c_address: u8,
    slave_id: SlaveId,
    led_index: usize,
    source_led_values: [u8; LED_DRIVER_LED_COUNT],
    target_led_values: [u8; LED_DRIVER_LED_COUNT],
    control_mask: &'static [u8; LED_CONTROL_REGISTER_COUNT],
}

impl LedDriverState {
    pub fn new(id: LedDriverId) -> Self {
        let (i2c_address, slave_id, control_mask) = match id {
            LedDriverId::Right => (
                I2C_ADDRESS_LED_DRIVER_RIGHT,
                SlaveId::RightLedDriver,
                &LED_CONTROL_MASK_RIGHT,
            ),
            LedDriverId::Left => (
                I2C_ADDRESS_LED_DRIVER_LEFT,
                SlaveId::LeftLedDriver,
                &LED_CONTROL_MASK_LEFT,
            ),
        };
        Self {
            phase: LedDriverPhase::SetFunctionFrame,
            i2c_address,
            slave_id,
            led_index: 0,
            source_led_values: [0xFF; LED_DRIVER_LED_COUNT],
            target_led_values: [0x00; LED_DRIVER_LED_COUNT],
            control_mask,
        }
    }

    pub fn phase(&self) -> LedDriverPhase {
        self.phase
    }

    /// Request a brightness for one LED; pushed by a later update.
    pub fn set_led(&mut self, index: usize, brightness: u8) {
        if index < LED_DRIVER_LED_COUNT {
            self.source_led_values[index] = brightness;
        }
    }

    /// Request one brightness for the whole panel.
    pub fn set_all_leds(&mut self, brightness: u8) {
        self.source_led_values = [brightness; LED_DRIVER_LED_COUNT];
    }

    /// Incremental sync: transmit the next contiguous run of changed PWM
    /// values, at most one chunk per call, starting the scan at the rolling
    /// cursor so no region of the table is starved.
    fn sync_led_values<B: BusTransport>(&mut self, bus: &mut B) -> UpdateStatus {
        let last_chunk_start = LED_DRIVER_LED_COUNT - PWM_UPDATE_CHUNK_SIZE;
        let mut start = self.led_index.min(last_chunk_start);

        let mut scanned = 0;
        while scanned < LED_DRIVER_LED_COUNT
            && self.source_led_values[start] == self.target_led_values[start]
        {
            scanned += 1;
            start += 1;
            if start >= LED_DRIVER_LED_COUNT {
                start = 0;
            }
        }
        if scanned == LED_DRIVER_LED_COUNT {
            // Fully synced; rewind the cursor for the next pass.
            self.led_index = 0;
            return UpdateStatus::Idle;
        }

        // Extend to the last change inside one chunk window. Unchanged
        // positions in between ride along to keep the transfer contiguous.
        let window = PWM_UPDATE_CHUNK_SIZE.min(LED_DRIVER_LED_COUNT - start);
        let mut end = start;
        for index in start..start + window {
            if self.source_led_values[index] != self.target_led_values[index] {
                end = index;
            }
        }

        let mut command: Vec<u8, PWM_COMMAND_MAX_LEN> = Vec::new();
        let _ = command.push(FRAME_REGISTER_PWM_FIRST + start as u8);
        let _ = command.extend_from_slice(&self.source_led_values[start..=end]);
        bus.issue_write(self.i2c_address, &command);

        // Everything transmitted counts as confirmed, ride-alongs included.
        self.target_led_values[start..=end]
            .copy_from_slice(&self.source_led_values[start..=end]);

        self.led_index = if end + 1 >= LED_DRIVER_LED_COUNT { 0 } else { end + 1 };
        UpdateStatus::Transferred
    }
}

impl SlaveDriver for LedDriverState {
    fn init(&mut self) {
        self.phase = LedDriverPhase::SetFunctionFrame;
        self.led_index = 0;
        self.source_led_values = [0xFF; LED_DRIVER_LED_COUNT];
        self.target_led_values = [0x00; LED_DRIVER_LED_COUNT];
    }

    fn update<B: BusTransport>(
        &mut self,
        bus: &mut B,
        shared: &mut SharedBusState,
    ) -> UpdateStatus {
        match self.phase {
            LedDriverPhase::SetFunctionFrame => {
                // The controller sits on its parent module's board; while
                // that module is unplugged there is nothing to talk to.
                if !shared.is_connected(self.slave_id) {
                    return UpdateStatus::Idle;
                }
                bus.issue_write(self.i2c_address, &[REGISTER_FRAME, FRAME_FUNCTION]);
                self.phase = LedDriverPhase::SetShutdownModeNormal;
                UpdateStatus::Transferred
            }
            LedDriverPhase::SetShutdownModeNormal => {
                bus.issue_write(
                    self.i2c_address,
                    &[FUNCTION_REGISTER_SHUTDOWN, SHUTDOWN_MODE_NORMAL],
                );
                self.phase = LedDriverPhase::SetFrame1;
                UpdateStatus::Transferred
            }
            LedDriverPhase::SetFrame1 => {
                bus.issue_write(self.i2c_address, &[REGISTER_FRAME, FRAME_1]);
                self.phase = LedDriverPhase::InitLedControlRegisters;
                UpdateStatus::Transferred
            }
            LedDriverPhase::InitLedControlRegisters => {
                let mut command: Vec<u8, { LED_CONTROL_REGISTER_COUNT + 1 }> = Vec::new();
                let _ = command.push(FRAME_REGISTER_LED_CONTROL_FIRST);
                let _ = command.extend_from_slice(self.control_mask);
                bus.issue_write(self.i2c_address, &command);
                self.phase = LedDriverPhase::InitLedValues;
                UpdateStatus::Transferred
            }
            LedDriverPhase::InitLedValues => {
                let start = self.led_index;
                let count = PWM_UPDATE_CHUNK_SIZE.min(LED_DRIVER_LED_COUNT - start);
                let mut command: Vec<u8, PWM_COMMAND_MAX_LEN> = Vec::new();
                let _ = command.push(FRAME_REGISTER_PWM_FIRST + start as u8);
                let _ = command.extend_from_slice(&self.source_led_values[start..start + count]);
                bus.issue_write(self.i2c_address, &command);

                self.led_index += PWM_UPDATE_CHUNK_SIZE;
                if self.led_index >= LED_DRIVER_LED_COUNT {
                    self.led_index = 0;
                    self.phase = LedDriverPhase::Initialized;
                }
                UpdateStatus::Transferred
            }
            LedDriverPhase::Initialized => self.sync_led_values(bus),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::I2cMessage;
    use std::vec::Vec as StdVec;

    struct MockBus {
        writes: StdVec<(u8, StdVec<u8>)>,
    }

    impl MockBus {
        fn new() -> Self {
            Self { writes: StdVec::new() }
        }
    }

    impl BusTransport for MockBus {
        fn issue_write(&mut self, address: u8, bytes: &[u8]) {
            self.writes.push((address, bytes.to_vec()));
        }

        fn issue_write_message(&mut self, _address: u8, _message: &I2cMessage) {}

        fn issue_read_message(&mut self, _address: u8, _message: &mut I2cMessage) {}
    }

    fn connected_shared() -> SharedBusState {
        let mut shared = SharedBusState::new();
        shared.set_connected(SlaveId::RightLedDriver, true);
        shared.set_connected(SlaveId::LeftLedDriver, true);
        shared
    }

    /// Drive a fresh driver through power-up and the first full sync so
    /// source == target and the cursor is back at zero.
    fn initialized_driver(bus: &mut MockBus, shared: &mut SharedBusState) -> LedDriverState {
        let mut state = LedDriverState::new(LedDriverId::Right);
        while state.phase() != LedDriverPhase::Initialized {
            state.update(bus, shared);
        }
        while state.update(bus, shared) != UpdateStatus::Idle {}
        bus.writes.clear();
        state
    }

    #[test]
    fn power_up_sequence_configures_the_controller() {
        let mut bus = MockBus::new();
        let mut shared = connected_shared();
        let mut state = LedDriverState::new(LedDriverId::Right);

        for _ in 0..4 {
            assert_eq!(state.update(&mut bus, &mut shared), UpdateStatus::Transferred);
        }

        assert_eq!(bus.writes[0].0, I2C_ADDRESS_LED_DRIVER_RIGHT);
        assert_eq!(bus.writes[0].1, [REGISTER_FRAME, FRAME_FUNCTION]);
        assert_eq!(bus.writes[1].1, [FUNCTION_REGISTER_SHUTDOWN, SHUTDOWN_MODE_NORMAL]);
        assert_eq!(bus.writes[2].1, [REGISTER_FRAME, FRAME_1]);
        assert_eq!(bus.writes[3].1[0], FRAME_REGISTER_LED_CONTROL_FIRST);
        assert_eq!(&bus.writes[3].1[1..], &LED_CONTROL_MASK_RIGHT);
    }

    #[test]
    fn bulk_push_covers_the_whole_table_in_chunks() {
        let mut bus = MockBus::new();
        let mut shared = connected_shared();
        let mut state = LedDriverState::new(LedDriverId::Right);

        for _ in 0..4 {
            state.update(&mut bus, &mut shared);
        }
        bus.writes.clear();

        while state.phase() == LedDriverPhase::InitLedValues {
            state.update(&mut bus, &mut shared);
        }

        let starts: StdVec<usize> = bus
            .writes
            .iter()
            .map(|(_, bytes)| (bytes[0] - FRAME_REGISTER_PWM_FIRST) as usize)
            .collect();
        assert_eq!(starts, [0, 63, 126]);

        let mut covered = 0;
        for (_, bytes) in &bus.writes {
            assert!(bytes.len() <= PWM_UPDATE_CHUNK_SIZE + 1);
            covered += bytes.len() - 1;
        }
        assert_eq!(covered, LED_DRIVER_LED_COUNT);
    }

    #[test]
    fn single_changed_led_is_sent_alone() {
        let mut bus = MockBus::new();
        let mut shared = connected_shared();
        let mut state = initialized_driver(&mut bus, &mut shared);

        state.set_led(5, 0x80);
        assert_eq!(state.update(&mut bus, &mut shared), UpdateStatus::Transferred);

        assert_eq!(bus.writes.len(), 1);
        assert_eq!(bus.writes[0].1, [FRAME_REGISTER_PWM_FIRST + 5, 0x80]);
    }

    #[test]
    fn contiguous_run_pulls_unchanged_positions_along() {
        let mut bus = MockBus::new();
        let mut shared = connected_shared();
        let mut state = initialized_driver(&mut bus, &mut shared);

        state.set_led(10, 0x20);
        state.set_led(13, 0x30);
        state.update(&mut bus, &mut shared);

        assert_eq!(bus.writes.len(), 1);
        let bytes = &bus.writes[0].1;
        assert_eq!(bytes[0], FRAME_REGISTER_PWM_FIRST + 10);
        assert_eq!(bytes.len(), 1 + 4); // positions 10..=13 inclusive

        // The whole run is confirmed, so nothing is left to send.
        assert_eq!(state.update(&mut bus, &mut shared), UpdateStatus::Idle);
    }

    #[test]
    fn full_table_change_converges_within_the_chunk_bound() {
        let mut bus = MockBus::new();
        let mut shared = connected_shared();
        let mut state = initialized_driver(&mut bus, &mut shared);

        state.set_all_leds(0x42);

        let bound = LED_DRIVER_LED_COUNT.div_ceil(PWM_UPDATE_CHUNK_SIZE);
        let mut transfers = 0;
        while state.update(&mut bus, &mut shared) == UpdateStatus::Transferred {
            transfers += 1;
            assert!(transfers <= bound);
        }
        assert_eq!(transfers, bound);

        for (_, bytes) in &bus.writes {
            assert!(bytes.len() <= PWM_UPDATE_CHUNK_SIZE + 1);
        }
    }

    #[test]
    fn change_at_the_wrap_point_is_not_starved() {
        let mut bus = MockBus::new();
        let mut shared = connected_shared();
        let mut state = initialized_driver(&mut bus, &mut shared);

        state.set_led(LED_DRIVER_LED_COUNT - 1, 0x11);
        assert_eq!(state.update(&mut bus, &mut shared), UpdateStatus::Transferred);

        assert_eq!(
            bus.writes[0].1,
            [FRAME_REGISTER_PWM_FIRST + (LED_DRIVER_LED_COUNT - 1) as u8, 0x11]
        );
    }

    #[test]
    fn absent_companion_stalls_power_up() {
        let mut bus = MockBus::new();
        let mut shared = connected_shared();
        shared.set_connected(SlaveId::LeftLedDriver, false);

        let mut state = LedDriverState::new(LedDriverId::Left);
        assert_eq!(state.update(&mut bus, &mut shared), UpdateStatus::Idle);
        assert_eq!(state.phase(), LedDriverPhase::SetFunctionFrame);
        assert!(bus.writes.is_empty());

        // Plugging the module back in lets the sequence proceed.
        shared.set_connected(SlaveId::LeftLedDriver, true);
        assert_eq!(state.update(&mut bus, &mut shared), UpdateStatus::Transferred);
        assert_eq!(state.phase(), LedDriverPhase::SetShutdownModeNormal);
    }

    #[test]
    fn left_panel_mask_enables_display_rows() {
        let mut bus = MockBus::new();
        let mut shared = connected_shared();
        let mut state = LedDriverState::new(LedDriverId::Left);

        for _ in 0..4 {
            state.update(&mut bus, &mut shared);
        }
        assert_eq!(bus.writes[3].0, I2C_ADDRESS_LED_DRIVER_LEFT);
        assert_eq!(&bus.writes[3].1[1..], &LED_CONTROL_MASK_LEFT);
    }
}
