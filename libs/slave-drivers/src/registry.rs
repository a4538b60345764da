use crate::bus::BusTransport;
use crate::driver::{SharedBusState, SlaveDriver, UpdateStatus};
use crate::key_states::KeyStateTable;
use crate::led_driver::{LedDriverId, LedDriverState};
use crate::module_driver::{ModuleDriverId, ModuleDriverState, ModuleFeatures};

pub const SLAVE_COUNT: usize = 5;

/// Every physical slave on the fabric, in scheduling order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlaveId {
    LeftKeyboardHalf = 0,
    LeftAddon = 1,
    RightAddon = 2,
    RightLedDriver = 3,
    LeftLedDriver = 4,
}

impl SlaveId {
    const fn module(self) -> Option<ModuleDriverId> {
        match self {
            SlaveId::LeftKeyboardHalf => Some(ModuleDriverId::LeftKeyboardHalf),
            SlaveId::LeftAddon => Some(ModuleDriverId::LeftAddon),
            SlaveId::RightAddon => Some(ModuleDriverId::RightAddon),
            _ => None,
        }
    }

    const fn led_driver(self) -> Option<LedDriverId> {
        match self {
            SlaveId::RightLedDriver => Some(LedDriverId::Right),
            SlaveId::LeftLedDriver => Some(LedDriverId::Left),
            _ => None,
        }
    }
}

/// Owns every slave's drive state plus the state they share. The tick
/// scheduler stays outside: it decides who runs when and merely indexes in
/// here by slave id.
pub struct SlaveRegistry {
    modules: [ModuleDriverState; 3],
    led_drivers: [LedDriverState; 2],
    shared: SharedBusState,
}

impl SlaveRegistry {
    pub fn new() -> Self {
        Self {
            modules: [
                ModuleDriverState::new(ModuleDriverId::LeftKeyboardHalf),
                ModuleDriverState::new(ModuleDriverId::LeftAddon),
                ModuleDriverState::new(ModuleDriverId::RightAddon),
            ],
            led_drivers: [
                LedDriverState::new(LedDriverId::Right),
                LedDriverState::new(LedDriverId::Left),
            ],
            shared: SharedBusState::new(),
        }
    }

    /// Bring a slave up: reset its driver and mark it connected.
    pub fn init(&mut self, id: SlaveId) {
        if let Some(module) = id.module() {
            self.modules[module as usize].init();
        } else if let Some(led) = id.led_driver() {
            self.led_drivers[led as usize].init();
        }
        self.shared.set_connected(id, true);
    }

    /// Run one phase step of the slave's driver.
    pub fn update<B: BusTransport>(&mut self, id: SlaveId, bus: &mut B) -> UpdateStatus {
        let Self {
            modules,
            led_drivers,
            shared,
        } = self;
        if let Some(module) = id.module() {
            modules[module as usize].update(bus, shared)
        } else if let Some(led) = id.led_driver() {
            led_drivers[led as usize].update(bus, shared)
        } else {
            UpdateStatus::Idle
        }
    }

    /// React to an externally detected fault. Losing the left half also
    /// takes its LED controller off the bus.
    pub fn disconnect(&mut self, id: SlaveId) {
        self.shared.set_connected(id, false);
        if id == SlaveId::LeftKeyboardHalf {
            self.shared.set_connected(SlaveId::LeftLedDriver, false);
        }
    }

    pub fn is_connected(&self, id: SlaveId) -> bool {
        self.shared.is_connected(id)
    }

    pub fn key_states(&self) -> &KeyStateTable {
        &self.shared.key_states
    }

    pub fn module_features(&self, id: ModuleDriverId) -> &ModuleFeatures {
        self.modules[id as usize].features()
    }

    pub fn set_test_led(&mut self, id: ModuleDriverId, on: bool) {
        self.modules[id as usize].set_test_led(on);
    }

    pub fn set_led_pwm_brightness(&mut self, id: ModuleDriverId, brightness: u8) {
        self.modules[id as usize].set_led_pwm_brightness(brightness);
    }

    pub fn set_led(&mut self, id: LedDriverId, index: usize, brightness: u8) {
        self.led_drivers[id as usize].set_led(index, brightness);
    }

    /// Flood both panels with one brightness.
    pub fn set_leds(&mut self, brightness: u8) {
        for driver in &mut self.led_drivers {
            driver.set_all_leds(brightness);
        }
    }
}

impl Default for SlaveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::I2cMessage;
    use crate::led_driver::LedDriverPhase;
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

        fn issue_write_message(&mut self, address: u8, message: &I2cMessage) {
            self.writes.push((address, message.data.to_vec()));
        }

        fn issue_read_message(&mut self, _address: u8, _message: &mut I2cMessage) {}
    }

    const ALL_SLAVES: [SlaveId; SLAVE_COUNT] = [
        SlaveId::LeftKeyboardHalf,
        SlaveId::LeftAddon,
        SlaveId::RightAddon,
        SlaveId::RightLedDriver,
        SlaveId::LeftLedDriver,
    ];

    #[test]
    fn init_marks_the_slave_connected() {
        let mut registry = SlaveRegistry::new();
        for id in ALL_SLAVES {
            assert!(!registry.is_connected(id));
            registry.init(id);
            assert!(registry.is_connected(id));
        }
    }

    #[test]
    fn losing_the_left_half_disconnects_its_led_driver() {
        let mut registry = SlaveRegistry::new();
        for id in ALL_SLAVES {
            registry.init(id);
        }

        registry.disconnect(SlaveId::LeftKeyboardHalf);

        assert!(!registry.is_connected(SlaveId::LeftKeyboardHalf));
        assert!(!registry.is_connected(SlaveId::LeftLedDriver));
        // The rest of the fabric is untouched.
        assert!(registry.is_connected(SlaveId::RightLedDriver));
        assert!(registry.is_connected(SlaveId::LeftAddon));
    }

    #[test]
    fn disconnected_left_led_driver_stalls_until_reinit() {
        let mut registry = SlaveRegistry::new();
        for id in ALL_SLAVES {
            registry.init(id);
        }
        registry.disconnect(SlaveId::LeftKeyboardHalf);

        let mut bus = MockBus::new();
        assert_eq!(
            registry.update(SlaveId::LeftLedDriver, &mut bus),
            UpdateStatus::Idle
        );
        assert!(bus.writes.is_empty());

        // Reconnect brings the power-up sequence back.
        registry.init(SlaveId::LeftKeyboardHalf);
        registry.init(SlaveId::LeftLedDriver);
        assert_eq!(
            registry.update(SlaveId::LeftLedDriver, &mut bus),
            UpdateStatus::Transferred
        );
    }

    #[test]
    fn updates_route_to_the_right_driver() {
        let mut registry = SlaveRegistry::new();
        for id in ALL_SLAVES {
            registry.init(id);
        }

        let mut bus = MockBus::new();
        registry.update(SlaveId::LeftKeyboardHalf, &mut bus);
        registry.update(SlaveId::RightLedDriver, &mut bus);

        assert_eq!(bus.writes.len(), 2);
        assert_eq!(bus.writes[0].0, crate::I2C_ADDRESS_LEFT_KEYBOARD_HALF_FIRMWARE);
        assert_eq!(bus.writes[1].0, crate::I2C_ADDRESS_LED_DRIVER_RIGHT);
    }

    #[test]
    fn set_leds_floods_both_panels() {
        let mut registry = SlaveRegistry::new();
        for id in ALL_SLAVES {
            registry.init(id);
        }

        let mut bus = MockBus::new();
        // Drive the right panel to steady state.
        while registry.led_drivers[0].phase() != LedDriverPhase::Initialized {
            registry.update(SlaveId::RightLedDriver, &mut bus);
        }
        while registry.update(SlaveId::RightLedDriver, &mut bus) != UpdateStatus::Idle {}

        registry.set_leds(0x55);
        assert_eq!(
            registry.update(SlaveId::RightLedDriver, &mut bus),
            UpdateStatus::Transferred
        );
    }
}
