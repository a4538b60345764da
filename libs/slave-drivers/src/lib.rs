#![no_std]

//! Cooperative drivers for the I2C slave fabric: keyboard halves, add-on
//! modules and the LED controllers behind them.
//!
//! Each driver is a phase state machine advanced one step per scheduler
//! tick. An update issues at most one asynchronous bus operation and returns
//! immediately; transfer completion is the bus layer's business. Invalid
//! slave responses are dropped silently — the cyclic phase sequence itself
//! is the retry mechanism.

#[cfg(test)]
extern crate std;

mod bus;
mod driver;
mod key_states;
mod led_driver;
mod module_driver;
mod registry;

pub use bus::{BusTransport, I2cMessage, I2C_MESSAGE_MAX_PAYLOAD};
pub use driver::{SharedBusState, SlaveDriver, UpdateStatus};
pub use key_states::{
    unpack_key_bits, KeyStateTable, KEY_STATE_SLOT_COUNT, MAX_KEY_COUNT_PER_SLOT,
};
pub use led_driver::{
    LedDriverId, LedDriverPhase, LedDriverState, LED_DRIVER_LED_COUNT, PWM_UPDATE_CHUNK_SIZE,
};
pub use module_driver::{
    ModuleDriverId, ModuleDriverPhase, ModuleDriverState, ModuleFeatures, SlaveCommand,
    SlaveProperty, MAX_PWM_BRIGHTNESS,
};
pub use registry::{SlaveId, SlaveRegistry, SLAVE_COUNT};

// Fixed bus addresses of the fabric members. Each module exposes a second
// address while held in its bootloader.
pub const I2C_ADDRESS_LEFT_KEYBOARD_HALF_FIRMWARE: u8 = 0x10;
pub const I2C_ADDRESS_LEFT_KEYBOARD_HALF_BOOTLOADER: u8 = 0x11;
pub const I2C_ADDRESS_LEFT_ADDON_FIRMWARE: u8 = 0x20;
pub const I2C_ADDRESS_LEFT_ADDON_BOOTLOADER: u8 = 0x21;
pub const I2C_ADDRESS_RIGHT_ADDON_FIRMWARE: u8 = 0x30;
pub const I2C_ADDRESS_RIGHT_ADDON_BOOTLOADER: u8 = 0x31;
pub const I2C_ADDRESS_LED_DRIVER_RIGHT: u8 = 0x74;
pub const I2C_ADDRESS_LED_DRIVER_LEFT: u8 = 0x77;
