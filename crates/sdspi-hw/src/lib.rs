//! Hardware definitions for the Commander X16 SD card interface.

pub mod memory_map;
pub mod mmio;
pub mod sd;
pub mod specs;
