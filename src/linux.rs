use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::time::Duration;

use serial_core::{
    BaudRate, CharSize, Error as SerialError, FlowControl, Parity, SerialDevice as _,
    SerialPortSettings as _, StopBits,
};
use linux_embedded_hal::{Delay, Serial};

use crate::{Bootloader, Options};

impl Bootloader<Serial, Delay, IoErrorKind> {
    /// Create a new bootloader instance on a linux serial port or pseudo terminal
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        options: Options,
    ) -> Result<Self, SerialError> {
        // Open port
        let mut port = Serial::open(port.as_ref())?;

        // Apply settings, 8N1 as the Arduino bootloader expects
        let mut settings = port.0.read_settings()?;

        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::Stop1);
        settings.set_baud_rate(BaudRate::from_speed(baud))?;
        settings.set_flow_control(FlowControl::FlowNone);
        settings.set_parity(Parity::ParityNone);

        port.0.write_settings(&settings)?;
        port.0
            .set_timeout(Duration::from_millis(options.read_timeout_ms as u64))?;

        debug!("Opened serial port at {} baud", baud);

        // Return instance
        Ok(Self::new(port, Delay {}, options))
    }
}
