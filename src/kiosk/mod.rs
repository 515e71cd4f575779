pub mod controller;
pub mod screen;

pub use controller::{KioskController, KioskHandle, KioskParts};
pub use screen::{KioskCommand, KioskEvent, Screen, StatusLine};
