//! Appliance and hardware adapters (FPP REST/MQTT, GPIO button, PWM LED)

pub mod fpp;
pub mod gpio;
pub mod handle;
pub mod led;
pub mod mqtt;
pub mod traits;

pub use handle::*;
pub use traits::*;
