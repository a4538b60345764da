use crate::bus::{BusTransport, I2cMessage};
use crate::driver::{SharedBusState, SlaveDriver, UpdateStatus};
use crate::{
    I2C_ADDRESS_LEFT_ADDON_BOOTLOADER, I2C_ADDRESS_LEFT_ADDON_FIRMWARE,
    I2C_ADDRESS_LEFT_KEYBOARD_HALF_BOOTLOADER, I2C_ADDRESS_LEFT_KEYBOARD_HALF_FIRMWARE,
    I2C_ADDRESS_RIGHT_ADDON_BOOTLOADER, I2C_ADDRESS_RIGHT_ADDON_FIRMWARE,
};

pub const MAX_PWM_BRIGHTNESS: u8 = 0xFF;

/// Commands understood by module slaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlaveCommand {
    RequestProperty = 0,
    RequestKeyStates = 1,
    SetTestLed = 2,
    SetLedPwmBrightness = 3,
}

impl SlaveCommand {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlaveProperty {
    Features = 0,
}

impl SlaveProperty {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModuleDriverId {
    LeftKeyboardHalf = 0,
    LeftAddon = 1,
    RightAddon = 2,
}

/// Capability descriptor a module reports once per connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModuleFeatures {
    pub protocol_version: u8,
    pub module_id: u8,
    pub key_count: u8,
    pub pointer_count: u8,
}

impl ModuleFeatures {
    /// Decode from a feature response payload; missing trailing fields
    /// default to zero.
    pub fn from_payload(payload: &[u8]) -> Self {
        let byte = |index: usize| payload.get(index).copied().unwrap_or(0);
        Self {
            protocol_version: byte(0),
            module_id: byte(1),
            key_count: byte(2),
            pointer_count: byte(3),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModuleDriverPhase {
    RequestFeatures,
    ReceiveFeatures,
    ProcessFeatures,
    RequestKeyStates,
    ReceiveKeyStates,
    ProcessKeyStates,
    SetTestLed,
    SetPwmBrightness,
}

/// Values producers ask the module to show, and their last-confirmed
/// counterparts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModuleVars {
    pub test_led_on: bool,
    pub led_pwm_brightness: u8,
}

/// Drive state of one keyboard-half or add-on module.
pub struct ModuleDriverState {
    id: ModuleDriverId,
    phase: ModuleDriverPhase,
    firmware_i2c_address: u8,
    bootloader_i2c_address: u8,
    source_vars: ModuleVars,
    target_vars: ModuleVars,
    features: ModuleFeatures,
    rx_message: I2cMessage,
}

impl ModuleDriverState {
    pub fn new(id: ModuleDriverId) -> Self {
        let (firmware_i2c_address, bootloader_i2c_address) = match id {
            ModuleDriverId::LeftKeyboardHalf => (
                I2C_ADDRESS_LEFT_KEYBOARD_HALF_FIRMWARE,
                I2C_ADDRESS_LEFT_KEYBOARD_HALF_BOOTLOADER,
            ),
            ModuleDriverId::LeftAddon => {
                (I2C_ADDRESS_LEFT_ADDON_FIRMWARE, I2C_ADDRESS_LEFT_ADDON_BOOTLOADER)
            }
            ModuleDriverId::RightAddon => {
                (I2C_ADDRESS_RIGHT_ADDON_FIRMWARE, I2C_ADDRESS_RIGHT_ADDON_BOOTLOADER)
            }
        };
        Self {
            id,
            phase: ModuleDriverPhase::RequestFeatures,
            firmware_i2c_address,
            bootloader_i2c_address,
            source_vars: ModuleVars::default(),
            target_vars: ModuleVars::default(),
            features: ModuleFeatures::default(),
            rx_message: I2cMessage::new(),
        }
    }

    pub fn phase(&self) -> ModuleDriverPhase {
        self.phase
    }

    pub fn firmware_i2c_address(&self) -> u8 {
        self.firmware_i2c_address
    }

    /// Address the module answers on while held in its bootloader; the
    /// firmware-update flow talks to this one.
    pub fn bootloader_i2c_address(&self) -> u8 {
        self.bootloader_i2c_address
    }

    pub fn features(&self) -> &ModuleFeatures {
        &self.features
    }

    /// Slot this module owns in the key-state table; slot 0 is the primary
    /// half's.
    pub fn key_state_slot(&self) -> usize {
        self.id as usize + 1
    }

    pub fn set_test_led(&mut self, on: bool) {
        self.source_vars.test_led_on = on;
    }

    pub fn set_led_pwm_brightness(&mut self, brightness: u8) {
        self.source_vars.led_pwm_brightness = brightness;
    }
}

impl SlaveDriver for ModuleDriverState {
    fn init(&mut self) {
        // Deliberately mismatched shadows so the first pass pushes both the
        // test LED and the backlight brightness.
        self.source_vars.test_led_on = true;
        self.target_vars.test_led_on = false;
        self.source_vars.led_pwm_brightness = MAX_PWM_BRIGHTNESS;
        self.target_vars.led_pwm_brightness = 0;
        self.phase = ModuleDriverPhase::RequestFeatures;
    }

    fn update<B: BusTransport>(
        &mut self,
        bus: &mut B,
        shared: &mut SharedBusState,
    ) -> UpdateStatus {
        let address = self.firmware_i2c_address;
        match self.phase {
            ModuleDriverPhase::RequestFeatures => {
                let command = I2cMessage::from_payload(&[
                    SlaveCommand::RequestProperty.as_u8(),
                    SlaveProperty::Features.as_u8(),
                ]);
                bus.issue_write_message(address, &command);
                self.phase = ModuleDriverPhase::ReceiveFeatures;
                UpdateStatus::Transferred
            }
            ModuleDriverPhase::ReceiveFeatures => {
                bus.issue_read_message(address, &mut self.rx_message);
                self.phase = ModuleDriverPhase::ProcessFeatures;
                UpdateStatus::Transferred
            }
            ModuleDriverPhase::ProcessFeatures => {
                if self.rx_message.is_valid() {
                    self.features = ModuleFeatures::from_payload(&self.rx_message.data);
                }
                self.phase = ModuleDriverPhase::RequestKeyStates;
                UpdateStatus::NoTransfer
            }
            ModuleDriverPhase::RequestKeyStates => {
                let command = I2cMessage::from_payload(&[SlaveCommand::RequestKeyStates.as_u8()]);
                bus.issue_write_message(address, &command);
                self.phase = ModuleDriverPhase::ReceiveKeyStates;
                UpdateStatus::Transferred
            }
            ModuleDriverPhase::ReceiveKeyStates => {
                bus.issue_read_message(address, &mut self.rx_message);
                self.phase = ModuleDriverPhase::ProcessKeyStates;
                UpdateStatus::Transferred
            }
            ModuleDriverPhase::ProcessKeyStates => {
                if self.rx_message.is_valid() {
                    shared.key_states.set_from_bits(
                        self.key_state_slot(),
                        &self.rx_message.data,
                        self.features.key_count as usize,
                    );
                }
                self.phase = ModuleDriverPhase::SetTestLed;
                UpdateStatus::NoTransfer
            }
            ModuleDriverPhase::SetTestLed => {
                let status = if self.source_vars.test_led_on == self.target_vars.test_led_on {
                    UpdateStatus::NoTransfer
                } else {
                    let command = I2cMessage::from_payload(&[
                        SlaveCommand::SetTestLed.as_u8(),
                        self.source_vars.test_led_on as u8,
                    ]);
                    bus.issue_write_message(address, &command);
                    self.target_vars.test_led_on = self.source_vars.test_led_on;
                    UpdateStatus::Transferred
                };
                self.phase = ModuleDriverPhase::SetPwmBrightness;
                status
            }
            ModuleDriverPhase::SetPwmBrightness => {
                let status = if self.source_vars.led_pwm_brightness
                    == self.target_vars.led_pwm_brightness
                {
                    UpdateStatus::NoTransfer
                } else {
                    let command = I2cMessage::from_payload(&[
                        SlaveCommand::SetLedPwmBrightness.as_u8(),
                        self.source_vars.led_pwm_brightness,
                    ]);
                    bus.issue_write_message(address, &command);
                    self.target_vars.led_pwm_brightness = self.source_vars.led_pwm_brightness;
                    UpdateStatus::Transferred
                };
                self.phase = ModuleDriverPhase::RequestKeyStates;
                status
            }
        }
    }
}
