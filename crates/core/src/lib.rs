//! pathfinder-core
//!
//! Locates the IOCTL dispatch handler of a Windows kernel driver and the call paths from it
//! to memory-mapping APIs and privileged instructions.
//!
//! The engine works on decompiler output through the [`backends::DecompilerOracle`] trait, so
//! it can be driven by a live decompiler session or by an exported fixture database.

pub mod analysis;
pub mod backends;
pub mod db;
pub mod model;
pub mod services;
