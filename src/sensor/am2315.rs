//! AM2315 humidity/temperature sensor on a Linux I2C bus
//!
//! The sensor sleeps between measurements. A read is: a wake-up write that the
//! device is expected to NACK, a read-registers command for the four data
//! bytes, a short conversion delay, then an 8-byte response frame:
//!
//! ```text
//! [0x03, 0x04, hum_hi, hum_lo, temp_hi, temp_lo, crc_lo, crc_hi]
//! ```

use super::{SensorError, SensorSource};
use crate::protocol::Reading;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fixed I2C address of the AM2315
pub const AM2315_ADDRESS: u16 = 0x5C;

const READ_REGISTERS: u8 = 0x03;
const DATA_LENGTH: u8 = 0x04;
const FRAME_LENGTH: usize = 8;
const WAKE_DELAY: Duration = Duration::from_millis(2);
const CONVERSION_DELAY: Duration = Duration::from_millis(10);

/// AM2315 driver bound to one I2C bus device node
#[derive(Debug)]
pub struct Am2315 {
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    bus_path: PathBuf,
    #[cfg(target_os = "linux")]
    bus: Option<std::fs::File>,
}

impl Am2315 {
    pub fn new(bus_path: impl AsRef<Path>) -> Self {
        Self {
            bus_path: bus_path.as_ref().to_path_buf(),
            #[cfg(target_os = "linux")]
            bus: None,
        }
    }

    #[cfg(target_os = "linux")]
    fn bus(&mut self) -> Result<&mut std::fs::File, SensorError> {
        if self.bus.is_none() {
            self.bus = Some(linux::open_bus(&self.bus_path, AM2315_ADDRESS)?);
        }
        self.bus
            .as_mut()
            .ok_or_else(|| SensorError::Unavailable("I2C bus not open".to_string()))
    }

    #[cfg(target_os = "linux")]
    fn read_frame(&mut self) -> Result<[u8; FRAME_LENGTH], SensorError> {
        use std::io::{Read, Write};

        let bus = self.bus()?;
        // The device NACKs while asleep; the failed write is what wakes it.
        let _ = bus.write(&[0x00]);
        std::thread::sleep(WAKE_DELAY);

        bus.write_all(&[READ_REGISTERS, 0x00, DATA_LENGTH])?;
        std::thread::sleep(CONVERSION_DELAY);

        let mut frame = [0u8; FRAME_LENGTH];
        bus.read_exact(&mut frame)?;
        Ok(frame)
    }
}

impl SensorSource for Am2315 {
    fn name(&self) -> &str {
        "am2315"
    }

    #[cfg(target_os = "linux")]
    fn read(&mut self) -> Result<Reading, SensorError> {
        match self.read_frame() {
            Ok(frame) => decode_frame(&frame),
            Err(e) => {
                // Reopen on the next cycle in case the bus was reset
                self.bus = None;
                Err(e)
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn read(&mut self) -> Result<Reading, SensorError> {
        Err(SensorError::Unsupported)
    }
}

/// Decode and verify an AM2315 response frame
pub fn decode_frame(frame: &[u8]) -> Result<Reading, SensorError> {
    if frame.len() != FRAME_LENGTH {
        return Err(SensorError::CorruptFrame(format!(
            "expected {FRAME_LENGTH} bytes, got {}",
            frame.len()
        )));
    }
    if frame[0] != READ_REGISTERS || frame[1] != DATA_LENGTH {
        return Err(SensorError::CorruptFrame(format!(
            "unexpected header {:#04x} {:#04x}",
            frame[0], frame[1]
        )));
    }

    let expected = u16::from_le_bytes([frame[6], frame[7]]);
    let actual = crc16_modbus(&frame[..6]);
    if expected != actual {
        return Err(SensorError::CorruptFrame(format!(
            "crc mismatch: frame {expected:#06x}, computed {actual:#06x}"
        )));
    }

    let humidity = f64::from(u16::from_be_bytes([frame[2], frame[3]])) / 10.0;
    let raw_temperature = u16::from_be_bytes([frame[4] & 0x7F, frame[5]]);
    let mut temperature = f64::from(raw_temperature) / 10.0;
    if frame[4] & 0x80 != 0 {
        temperature = -temperature;
    }

    Ok(Reading::new(humidity, temperature))
}

/// CRC-16/MODBUS as used by the AM2315 response frame
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

#[cfg(target_os = "linux")]
mod linux {
    use super::SensorError;
    use std::fs::{File, OpenOptions};
    use std::os::unix::io::AsRawFd;
    use std::path::Path;

    /// `I2C_SLAVE` from linux/i2c-dev.h
    const I2C_SLAVE: u64 = 0x0703;

    pub(super) fn open_bus(path: &Path, address: u16) -> Result<File, SensorError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        // SAFETY: the descriptor is owned by `file` and stays open for the call
        let rc = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                I2C_SLAVE as _,
                libc::c_ulong::from(address),
            )
        };
        if rc < 0 {
            return Err(SensorError::Io(std::io::Error::last_os_error()));
        }
        Ok(file)
    }
}
