//! Bootloader session state and command handlers.
//!
//! Each handler reads its own argument bytes from the channel, one at a time,
//! and returns the updated [`Session`] along with the [`Reply`] to send.

use crate::protocol::*;

/// Blocking, byte-oriented duplex channel
pub trait Channel {
    type Error;

    /// Read a single byte, blocking until one is available
    fn read_byte(&mut self) -> Result<u8, Self::Error>;

    /// Write a single byte
    fn write_byte(&mut self, b: u8) -> Result<(), Self::Error>;

    /// Read and discard `n` bytes
    fn skip(&mut self, n: usize) -> Result<(), Self::Error> {
        for _ in 0..n {
            self.read_byte()?;
        }
        Ok(())
    }
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    AwaitingCommand,
    SessionEnded,
}

/// Response to a single command
#[derive(Clone, PartialEq, Debug)]
pub enum Reply {
    /// Nothing is written, the sync byte did not match
    Silent,
    /// Complete framed response, including the in-sync and end bytes
    Frame(Vec<u8>),
}

impl Reply {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Reply::Silent => &[],
            Reply::Frame(f) => f,
        }
    }
}

/// Read the sync byte and frame `payload` if it matches
pub fn payload_ack<C: Channel>(channel: &mut C, payload: &[u8]) -> Result<Reply, C::Error> {
    if channel.read_byte()? != CRC_EOP {
        return Ok(Reply::Silent);
    }

    let mut frame = Vec::with_capacity(payload.len() + 2);
    frame.push(STK_INSYNC);
    frame.extend_from_slice(payload);
    frame.push(STK_OK);

    Ok(Reply::Frame(frame))
}

/// Read the sync byte and acknowledge with an empty frame if it matches
pub fn empty_ack<C: Channel>(channel: &mut C) -> Result<Reply, C::Error> {
    payload_ack(channel, &[])
}

/// Session state carried between commands
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Session {
    address: u32,
    state: State,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            address: 0,
            state: State::AwaitingCommand,
        }
    }

    /// Current byte address
    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn terminated(&self) -> bool {
        self.state == State::SessionEnded
    }

    /// Execute a command, consuming its arguments from `channel`
    pub fn execute<C: Channel>(
        self,
        command: Command,
        channel: &mut C,
    ) -> Result<(Session, Reply), C::Error> {
        use Command::*;

        let mut next = self;

        let reply = match command {
            GetSync => {
                debug!("get synchronization");
                empty_ack(channel)?
            }
            GetSignOn => {
                debug!("check if starter kit present");
                payload_ack(channel, STARTER_KIT_ID)?
            }
            GetParameter => {
                let p = Parameter::from(channel.read_byte()?);
                debug!("get parameter value: {:?}", p);
                payload_ack(channel, &[p.value()])?
            }
            SetDevice => {
                debug!("set device programming parameters");
                channel.skip(PARAMS_LEN)?;
                empty_ack(channel)?
            }
            SetDeviceExt => {
                debug!("set extended device programming parameters");
                channel.skip(EXT_PARAMS_LEN)?;
                empty_ack(channel)?
            }
            EnterProgMode => {
                debug!("enter program mode");
                empty_ack(channel)?
            }
            ReadSign => {
                debug!("read signature bytes");
                payload_ack(channel, &SIGNATURE)?
            }
            Universal => {
                debug!("universal command");
                let value = universal(channel)?;
                payload_ack(channel, &[value])?
            }
            LoadAddress => {
                // Little-endian word address
                let lo = channel.read_byte()? as u32;
                let hi = channel.read_byte()? as u32;
                next.address = (lo | hi << 8) * 2;

                debug!("load address: {:#08x} (byte address)", next.address);
                empty_ack(channel)?
            }
            ReadPage => {
                let (len, mem) = page_header(channel)?;
                let reply = payload_ack(channel, &vec![ERASED; len as usize])?;
                if reply != Reply::Silent {
                    debug!("read page of {:#06x} bytes @ {:#08x} from {}", len, self.address, mem);
                }
                reply
            }
            ProgPage => {
                let (len, mem) = page_header(channel)?;

                let mut data = vec![0u8; len as usize];
                for b in data.iter_mut() {
                    *b = channel.read_byte()?;
                }
                trace!("discarding page data: {}", hex::encode(&data));

                let reply = empty_ack(channel)?;
                if reply != Reply::Silent {
                    debug!("write page of {:#06x} bytes @ {:#08x} into {}", len, self.address, mem);
                }
                reply
            }
            LeaveProgMode => {
                debug!("leave program mode");
                next.state = State::SessionEnded;
                empty_ack(channel)?
            }
        };

        Ok((next, reply))
    }
}

/// Consume the four instruction bytes of a universal command, returning the response byte
fn universal<C: Channel>(channel: &mut C) -> Result<u8, C::Error> {
    if channel.read_byte()? != ISP_READ_SIGNATURE {
        channel.skip(UNIVERSAL_LEN - 1)?;
        return Ok(0x00);
    }

    let _ = channel.read_byte()?;
    let index = channel.read_byte()?;
    let _ = channel.read_byte()?;

    let value = match index {
        0 => SIGNATURE[0],
        1 => SIGNATURE[1],
        _ => SIGNATURE[2],
    };

    Ok(value)
}

/// Read a big-endian page length and memory type flag
fn page_header<C: Channel>(channel: &mut C) -> Result<(u16, MemoryType), C::Error> {
    let hi = channel.read_byte()?;
    let lo = channel.read_byte()?;
    let mem = MemoryType::from(channel.read_byte()?);

    Ok((u16::from_be_bytes([hi, lo]), mem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, PartialEq)]
    struct Exhausted;

    struct Buffer {
        input: VecDeque<u8>,
        output: Vec<u8>,
    }

    impl Buffer {
        fn new(input: &[u8]) -> Self {
            Self {
                input: input.iter().cloned().collect(),
                output: vec![],
            }
        }
    }

    impl Channel for Buffer {
        type Error = Exhausted;

        fn read_byte(&mut self) -> Result<u8, Exhausted> {
            self.input.pop_front().ok_or(Exhausted)
        }

        fn write_byte(&mut self, b: u8) -> Result<(), Exhausted> {
            self.output.push(b);
            Ok(())
        }
    }

    fn exec(session: Session, command: Command, input: &[u8]) -> (Session, Reply, usize) {
        let mut b = Buffer::new(input);
        let (s, r) = session.execute(command, &mut b).unwrap();
        (s, r, b.input.len())
    }

    #[test]
    fn framing() {
        let mut b = Buffer::new(&[CRC_EOP, b'x', CRC_EOP]);
        assert_eq!(empty_ack(&mut b), Ok(Reply::Frame(vec![0x14, 0x10])));
        assert_eq!(payload_ack(&mut b, &[0xAA]), Ok(Reply::Silent));
        assert_eq!(payload_ack(&mut b, &[0xAA]), Ok(Reply::Frame(vec![0x14, 0xAA, 0x10])));
        assert_eq!(empty_ack(&mut b), Err(Exhausted));

        assert!(b.output.is_empty());
    }

    #[test]
    fn sign_on() {
        let (_, r, _) = exec(Session::new(), Command::GetSignOn, &[CRC_EOP]);
        assert_eq!(r.bytes(), b"\x14AVR ISP\x10");
    }

    #[test]
    fn parameters() {
        for &(id, v) in &[(0x80, 0x02), (0x81, 0x01), (0x82, 0x10), (0x98, 0x03), (0x42, 0x00)] {
            let (_, r, rem) = exec(Session::new(), Command::GetParameter, &[id, CRC_EOP]);
            assert_eq!(r, Reply::Frame(vec![0x14, v, 0x10]));
            assert_eq!(rem, 0);
        }
    }

    #[test]
    fn device_parameters_discarded() {
        let mut input = vec![0x86; PARAMS_LEN];
        input.push(CRC_EOP);
        let (s, r, rem) = exec(Session::new(), Command::SetDevice, &input);
        assert_eq!(r.bytes(), &[0x14, 0x10]);
        assert_eq!(rem, 0);
        assert_eq!(s, Session::new());

        let (_, r, rem) = exec(Session::new(), Command::SetDeviceExt, &[1, 2, 3, 4, 5, CRC_EOP]);
        assert_eq!(r.bytes(), &[0x14, 0x10]);
        assert_eq!(rem, 0);
    }

    #[test]
    fn universal_signature() {
        for &(index, sig) in &[(0, 0x1E), (1, 0x95), (2, 0x0F), (7, 0x0F)] {
            let (_, r, rem) = exec(
                Session::new(),
                Command::Universal,
                &[0x30, 0xAB, index, 0xCD, CRC_EOP],
            );
            assert_eq!(r.bytes(), &[0x14, sig, 0x10]);
            assert_eq!(rem, 0);
        }
    }

    #[test]
    fn universal_other() {
        let (_, r, rem) = exec(Session::new(), Command::Universal, &[0xAC, 0x53, 0x00, 0x00, CRC_EOP]);
        assert_eq!(r.bytes(), &[0x14, 0x00, 0x10]);
        assert_eq!(rem, 0);
    }

    #[test]
    fn load_address() {
        let (s, r, _) = exec(Session::new(), Command::LoadAddress, &[0x00, 0x01, CRC_EOP]);
        assert_eq!(s.address(), 0x200);
        assert_eq!(r.bytes(), &[0x14, 0x10]);

        let (s, _, _) = exec(s, Command::LoadAddress, &[0x34, 0x12, CRC_EOP]);
        assert_eq!(s.address(), 0x2468);

        let (s, _, _) = exec(s, Command::LoadAddress, &[0xFF, 0xFF, CRC_EOP]);
        assert_eq!(s.address(), 0x1FFFE);
    }

    #[test]
    fn load_address_without_sync() {
        let (s, r, _) = exec(Session::new(), Command::LoadAddress, &[0x10, 0x00, 0x00]);
        assert_eq!(s.address(), 0x20);
        assert_eq!(r, Reply::Silent);
    }

    #[test]
    fn read_page() {
        let (s, _, _) = exec(Session::new(), Command::LoadAddress, &[0x40, 0x00, CRC_EOP]);
        let (_, r, rem) = exec(s, Command::ReadPage, &[0x00, 0x04, b'F', CRC_EOP]);
        assert_eq!(r.bytes(), &[0x14, 0xFF, 0xFF, 0xFF, 0xFF, 0x10]);
        assert_eq!(rem, 0);
    }

    #[test]
    fn read_page_big_endian_length() {
        let (_, r, _) = exec(Session::new(), Command::ReadPage, &[0x01, 0x00, b'E', CRC_EOP]);
        assert_eq!(r.bytes().len(), 256 + 2);
        assert!(r.bytes()[1..257].iter().all(|b| *b == ERASED));
    }

    #[test]
    fn prog_page() {
        let (s, r, rem) = exec(
            Session::new(),
            Command::ProgPage,
            &[0x00, 0x03, b'E', 0x01, 0x02, 0x03, CRC_EOP],
        );
        assert_eq!(r.bytes(), &[0x14, 0x10]);
        assert_eq!(rem, 0);
        assert_eq!(s, Session::new());
    }

    #[test]
    fn leave_prog_mode() {
        let (s, r, _) = exec(Session::new(), Command::LeaveProgMode, &[CRC_EOP]);
        assert!(s.terminated());
        assert_eq!(r.bytes(), &[0x14, 0x10]);

        let (s, r, _) = exec(Session::new(), Command::LeaveProgMode, &[0x00]);
        assert!(s.terminated());
        assert_eq!(r, Reply::Silent);
    }

    #[test]
    fn bad_sync_is_silent() {
        let cases: &[(Command, &[u8])] = &[
            (Command::GetSync, &[0x21]),
            (Command::GetSignOn, &[0x21]),
            (Command::GetParameter, &[0x80, 0x21]),
            (Command::EnterProgMode, &[0x21]),
            (Command::ReadSign, &[0x21]),
            (Command::Universal, &[0x30, 0x00, 0x01, 0x00, 0x21]),
            (Command::ReadPage, &[0x00, 0x02, b'F', 0x21]),
            (Command::ProgPage, &[0x00, 0x01, b'F', 0xAA, 0x21]),
        ];

        for (c, input) in cases {
            let (_, r, rem) = exec(Session::new(), *c, input);
            assert_eq!(r, Reply::Silent, "command {:?}", c);
            assert_eq!(rem, 0, "command {:?}", c);
        }
    }
}
