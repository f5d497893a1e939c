//! IOCTL code decoding and fuzzing seed derivation.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{ComparisonOp, ComparisonRecord};

/// `FILE_DEVICE_*` names for device types 1 through 54.
const DEVICE_TYPES: &[&str] = &[
    "BEEP",
    "CD_ROM",
    "CD_ROM_FILE_SYSTEM",
    "CONTROLLER",
    "DATALINK",
    "DFS",
    "DISK",
    "DISK_FILE_SYSTEM",
    "FILE_SYSTEM",
    "INPORT_PORT",
    "KEYBOARD",
    "MAILSLOT",
    "MIDI_IN",
    "MIDI_OUT",
    "MOUSE",
    "MULTI_UNC_PROVIDER",
    "NAMED_PIPE",
    "NETWORK",
    "NETWORK_BROWSER",
    "NETWORK_FILE_SYSTEM",
    "NULL",
    "PARALLEL_PORT",
    "PHYSICAL_NETCARD",
    "PRINTER",
    "SCANNER",
    "SERIAL_MOUSE_PORT",
    "SERIAL_PORT",
    "SCREEN",
    "SOUND",
    "STREAMS",
    "TAPE",
    "TAPE_FILE_SYSTEM",
    "TRANSPORT",
    "UNKNOWN",
    "VIDEO",
    "VIRTUAL_DISK",
    "WAVE_IN",
    "WAVE_OUT",
    "8042_PORT",
    "NETWORK_REDIRECTOR",
    "BATTERY",
    "BUS_EXTENDER",
    "MODEM",
    "VDM",
    "MASS_STORAGE",
    "SMB",
    "KS",
    "CHANGER",
    "SMARTCARD",
    "ACPI",
    "DVD",
    "FULLSCREEN_VIDEO",
    "DFS_FILE_SYSTEM",
    "DFS_VOLUME",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferMethod {
    MethodBuffered,
    MethodInDirect,
    MethodOutDirect,
    MethodNeither,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequiredAccess {
    FileAnyAccess,
    FileReadAccess,
    FileWriteAccess,
    ReadWriteAccess,
}

/// Fields of a `CTL_CODE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedIoctl {
    pub code: u32,
    pub device_type: u32,
    /// `FILE_DEVICE_*` suffix for the well-known device types.
    pub device_name: Option<&'static str>,
    pub function: u32,
    pub method: TransferMethod,
    pub access: RequiredAccess,
    /// Vendor-defined code (bit 31).
    pub common: bool,
}

/// Split `code` into its fields. Zero and values wider than 32 bits are not IOCTL codes.
pub fn decode_ioctl(code: u64) -> Option<DecodedIoctl> {
    if code == 0 || code > u64::from(u32::MAX) {
        return None;
    }
    let code = code as u32;
    let device_type = (code >> 16) & 0xFFF;
    let device_name = match device_type {
        1..=54 => DEVICE_TYPES.get(device_type as usize - 1).copied(),
        _ => None,
    };
    let method = match code & 3 {
        0 => TransferMethod::MethodBuffered,
        1 => TransferMethod::MethodInDirect,
        2 => TransferMethod::MethodOutDirect,
        _ => TransferMethod::MethodNeither,
    };
    let access = match (code >> 14) & 3 {
        0 => RequiredAccess::FileAnyAccess,
        1 => RequiredAccess::FileReadAccess,
        2 => RequiredAccess::FileWriteAccess,
        _ => RequiredAccess::ReadWriteAccess,
    };
    Some(DecodedIoctl {
        code,
        device_type,
        device_name,
        function: (code >> 2) & 0xFFF,
        method,
        access,
        common: code >> 31 == 1,
    })
}

impl fmt::Display for DecodedIoctl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device_name {
            Some(name) => writeln!(f, "Device: {name} (0x{:03X})", self.device_type)?,
            None => writeln!(f, "Device: 0x{:03X}", self.device_type)?,
        }
        writeln!(f, "Function: 0x{:03X}", self.function)?;
        writeln!(f, "Access: {:?}", self.access)?;
        writeln!(f, "Method: {:?}", self.method)?;
        write!(f, "Common Bit: {}", u8::from(self.common))
    }
}

/// Candidate codes worth sending to the handler, derived from its comparisons.
///
/// Equality yields the value itself. Range checks also yield the neighbouring code one
/// function step (4) across the bound. Inequality gives no useful candidate.
pub fn seed_candidates<'a>(records: impl IntoIterator<Item = &'a ComparisonRecord>) -> BTreeSet<u32> {
    let mut seeds = BTreeSet::new();
    for record in records {
        let Ok(val) = u32::try_from(record.val) else {
            continue;
        };
        match record.op {
            ComparisonOp::Eq => {
                seeds.insert(val);
            }
            ComparisonOp::Lt | ComparisonOp::Le => {
                seeds.extend(val.checked_sub(4));
                seeds.insert(val);
            }
            ComparisonOp::Gt | ComparisonOp::Ge => {
                seeds.extend(val.checked_add(4));
                seeds.insert(val);
            }
            ComparisonOp::Ne => {}
        }
    }
    seeds.retain(|v| *v != 0);
    seeds
}
