//! STK500v1 Serial Bootloader Emulator.
//!
//! Responds to an AVR programming tool (avrdude `-c arduino`) as if it were
//! the ATmega Arduino bootloader. Memory is not modelled: page reads return
//! erased (0xFF) data and page writes are discarded.

use core::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[macro_use]
extern crate log;

extern crate nb;

extern crate embedded_hal;
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod protocol;
pub mod session;

pub use protocol::Command;
pub use session::{Channel, Reply, Session, State};

/// Serial port usable by the bootloader
pub trait SerialPort<E>: Write<u8, Error = E> + Read<u8, Error = E> {}

impl<T, E> SerialPort<E> for T where T: Write<u8, Error = E> + Read<u8, Error = E> {}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<SerialError: core::fmt::Debug> {
    #[error("serial error: {0:?}")]
    Serial(SerialError),
    #[error("interrupted")]
    Interrupted,
}

impl<SerialError: core::fmt::Debug> From<SerialError> for Error<SerialError> {
    fn from(e: SerialError) -> Self {
        Self::Serial(e)
    }
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Period to wait between polls when no data is available
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1"))]
    pub poll_delay_ms: u32,

    /// Serial port read timeout
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "100"))]
    pub read_timeout_ms: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            poll_delay_ms: 1,
            read_timeout_ms: 100,
        }
    }
}

/// Format a byte for tracing, with its character where printable
pub fn fmt_byte(b: u8) -> String {
    if b.is_ascii_graphic() || b == b' ' {
        format!("{:#04x} ({})", b, b as char)
    } else {
        format!("{:#04x}", b)
    }
}

/// Blocking byte channel over a non-blocking serial port
pub struct Link<P, D, E> {
    port: P,
    delay: D,
    poll_delay_ms: u32,
    shutdown: Option<Arc<AtomicBool>>,
    _err: PhantomData<E>,
}

impl<P, D, E> Link<P, D, E> {
    pub fn new(port: P, delay: D, poll_delay_ms: u32) -> Self {
        Self {
            port,
            delay,
            poll_delay_ms,
            shutdown: None,
            _err: PhantomData,
        }
    }

    fn interrupted(&self) -> bool {
        match &self.shutdown {
            Some(s) => s.load(Ordering::SeqCst),
            None => false,
        }
    }
}

impl<P, D, E> Channel for Link<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    type Error = Error<E>;

    fn read_byte(&mut self) -> Result<u8, Error<E>> {
        loop {
            match self.port.read() {
                Ok(b) => {
                    trace!("getch(): {}", fmt_byte(b));
                    return Ok(b);
                }
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(e)) => return Err(e.into()),
            }

            if self.interrupted() {
                return Err(Error::Interrupted);
            }

            self.delay.delay_ms(self.poll_delay_ms);
        }
    }

    fn write_byte(&mut self, b: u8) -> Result<(), Error<E>> {
        trace!("putch(): {}", fmt_byte(b));
        nb::block!(self.port.write(b))?;
        Ok(())
    }
}

pub struct Bootloader<P, D, E> {
    session: Session,
    link: Link<P, D, E>,
}

impl<P, D, E> Bootloader<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a new bootloader instance
    pub fn new(port: P, delay: D, options: Options) -> Self {
        Self {
            session: Session::new(),
            link: Link::new(port, delay, options.poll_delay_ms),
        }
    }

    /// Abort with [`Error::Interrupted`] once `flag` is set while awaiting data
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.link.shutdown = Some(flag);
        self
    }

    /// Fetch the current session
    pub fn session(&self) -> Session {
        self.session
    }

    /// Serve commands until the programmer leaves program mode
    pub fn run(&mut self) -> Result<(), Error<E>> {
        while !self.session.terminated() {
            self.step()?;
        }

        info!("Session ended");

        Ok(())
    }

    /// Handle a single command, including its response
    pub fn step(&mut self) -> Result<State, Error<E>> {
        let opcode = self.link.read_byte()?;

        let command = match Command::from_opcode(opcode) {
            Some(c) => c,
            None => {
                debug!("Ignoring unknown opcode: {}", fmt_byte(opcode));
                return Ok(self.session.state());
            }
        };

        let (session, reply) = self.session.execute(command, &mut self.link)?;
        self.session = session;

        for b in reply.bytes() {
            self.link.write_byte(*b)?;
        }
        if reply != Reply::Silent {
            nb::block!(self.link.port.flush())?;
        }

        Ok(self.session.state())
    }

    /// Release the underlying serial port
    pub fn into_inner(self) -> P {
        self.link.port
    }
}
