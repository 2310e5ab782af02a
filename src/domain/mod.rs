//! Pure domain logic for the Nutrient Tank Controller (§3, §4).
//!
//! Every type here is hardware-free: actuators and sensors are reached only
//! through the port traits in [`crate::ports`], mirroring the teacher
//! firmware's "zero I/O in the application core" layering.

pub mod pump_guard;
pub mod pump_unit;
pub mod recipe;
pub mod tank_level;
pub mod tank_sensors;
