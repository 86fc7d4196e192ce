//! STK500v1 wire constants and command set.
//!
//! Values match the ATmega168 Arduino bootloader (ATmegaBOOT_168).

/// Sync byte (`CRC_EOP`), terminates every request
pub const CRC_EOP: u8 = 0x20;

/// First byte of every response
pub const STK_INSYNC: u8 = 0x14;
/// Last byte of every response
pub const STK_OK: u8 = 0x10;

pub const HW_VER: u8 = 0x02;
pub const SW_MAJOR: u8 = 0x01;
pub const SW_MINOR: u8 = 0x10;

/// Device signature (ATmega328P)
pub const SIGNATURE: [u8; 3] = [0x1E, 0x95, 0x0F];

/// Reported for the programmer type parameter
pub const PROGRAMMER_TYPE: u8 = 0x03;

/// Sign-on string for the starter kit query
pub const STARTER_KIT_ID: &[u8; 7] = b"AVR ISP";

/// ISP instruction reading one signature byte
pub const ISP_READ_SIGNATURE: u8 = 0x30;

/// Fill value for simulated (erased) memory
pub const ERASED: u8 = 0xFF;

pub const PARAMS_LEN: usize = 20;
pub const EXT_PARAMS_LEN: usize = 5;
pub const UNIVERSAL_LEN: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Command {
    /// Synchronise with the programmer
    GetSync = b'0' as isize,

    /// Check whether a starter kit is present
    GetSignOn = b'1' as isize,

    /// Read a programmer parameter
    GetParameter = b'A' as isize,

    /// Set device programming parameters (ignored)
    SetDevice = b'B' as isize,

    /// Set extended device programming parameters (ignored)
    SetDeviceExt = b'E' as isize,

    /// Enter program mode
    EnterProgMode = b'P' as isize,

    /// Read the three device signature bytes
    ReadSign = b'u' as isize,

    /// Execute a raw 4-byte ISP instruction
    Universal = b'V' as isize,

    /// Load a word address for subsequent page operations
    LoadAddress = b'U' as isize,

    /// Read a page of flash or EEPROM
    ReadPage = b't' as isize,

    /// Write a page of flash or EEPROM
    ProgPage = b'd' as isize,

    /// Leave program mode, ending the session
    LeaveProgMode = b'Q' as isize,
}

impl Command {
    /// Decode an opcode byte, `None` for opcodes the bootloader does not handle
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        use Command::*;

        let c = match opcode {
            b'0' => GetSync,
            b'1' => GetSignOn,
            b'A' => GetParameter,
            b'B' => SetDevice,
            b'E' => SetDeviceExt,
            b'P' => EnterProgMode,
            b'u' => ReadSign,
            b'V' => Universal,
            b'U' => LoadAddress,
            b't' => ReadPage,
            b'd' => ProgPage,
            b'Q' => LeaveProgMode,
            _ => return None,
        };

        Some(c)
    }

    pub fn opcode(self) -> u8 {
        self as u8
    }
}

/// Parameter ids accepted by [`Command::GetParameter`]
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Parameter {
    HardwareVersion,
    SoftwareMajor,
    SoftwareMinor,
    ProgrammerType,
    Unknown(u8),
}

impl From<u8> for Parameter {
    fn from(id: u8) -> Self {
        match id {
            0x80 => Parameter::HardwareVersion,
            0x81 => Parameter::SoftwareMajor,
            0x82 => Parameter::SoftwareMinor,
            0x98 => Parameter::ProgrammerType,
            other => Parameter::Unknown(other),
        }
    }
}

impl Parameter {
    /// Value reported for this parameter, zero for anything unknown
    pub fn value(self) -> u8 {
        match self {
            Parameter::HardwareVersion => HW_VER,
            Parameter::SoftwareMajor => SW_MAJOR,
            Parameter::SoftwareMinor => SW_MINOR,
            Parameter::ProgrammerType => PROGRAMMER_TYPE,
            Parameter::Unknown(_) => 0x00,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum MemoryType {
    Flash,
    Eeprom,
}

impl From<u8> for MemoryType {
    fn from(flag: u8) -> Self {
        if flag == b'E' {
            MemoryType::Eeprom
        } else {
            MemoryType::Flash
        }
    }
}

impl core::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MemoryType::Flash => write!(f, "flash"),
            MemoryType::Eeprom => write!(f, "eeprom"),
        }
    }
}
