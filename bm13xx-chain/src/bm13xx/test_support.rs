//! In-memory chain for unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use super::crc::crc5_is_valid;
use crate::hw_trait::Delay;

/// Build a response frame with a valid trailing CRC5.
///
/// CRC5 residue checking does not reduce to "append crc5(payload)", so
/// search for the byte that makes the frame check out.
pub(crate) fn response_frame(value: u32, chip: u8, reg: u8, preamble: bool) -> Vec<u8> {
    let mut body = value.to_be_bytes().to_vec();
    body.push(chip);
    body.push(reg);
    let crc = (0u8..32)
        .find(|crc| {
            let mut candidate = body.clone();
            candidate.push(*crc);
            crc5_is_valid(&candidate)
        })
        .expect("some 5-bit CRC must validate");
    body.push(crc);

    if preamble {
        let mut framed = vec![0xaa, 0x55];
        framed.extend(body);
        framed
    } else {
        body
    }
}

enum Reply {
    Bytes(Vec<u8>),
    Fail(io::ErrorKind),
}

/// Transport that records every write and replays scripted reads.
///
/// Once the script runs out every read times out, like a quiet bus.
pub(crate) struct ScriptedBus {
    preamble: bool,
    replies: VecDeque<Reply>,
    pub written: Vec<Vec<u8>>,
}

impl ScriptedBus {
    pub fn new(preamble: bool) -> Self {
        Self {
            preamble,
            replies: VecDeque::new(),
            written: Vec::new(),
        }
    }

    /// Queue a well-formed register response.
    pub fn reply(&mut self, value: u32, chip: u8, reg: u8) -> &mut Self {
        let frame = response_frame(value, chip, reg, self.preamble);
        self.reply_raw(frame)
    }

    pub fn reply_raw(&mut self, bytes: Vec<u8>) -> &mut Self {
        self.replies.push_back(Reply::Bytes(bytes));
        self
    }

    pub fn timeout(&mut self) -> &mut Self {
        self.fail(io::ErrorKind::TimedOut)
    }

    pub fn fail(&mut self, kind: io::ErrorKind) -> &mut Self {
        self.replies.push_back(Reply::Fail(kind));
        self
    }

    /// Replies not yet consumed.
    pub fn pending(&self) -> usize {
        self.replies.len()
    }
}

impl io::Read for ScriptedBus {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.replies.pop_front() {
            Some(Reply::Bytes(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    self.replies.push_front(Reply::Bytes(bytes[n..].to_vec()));
                }
                Ok(n)
            }
            Some(Reply::Fail(kind)) => Err(io::Error::new(kind, "scripted failure")),
            None => Err(io::Error::new(io::ErrorKind::TimedOut, "bus quiet")),
        }
    }
}

impl io::Write for ScriptedBus {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Delay that returns immediately and remembers what it was asked for.
#[derive(Clone, Default)]
pub(crate) struct RecordingDelay {
    log: Rc<RefCell<Vec<Duration>>>,
}

impl RecordingDelay {
    pub fn recorded(&self) -> Vec<Duration> {
        self.log.borrow().clone()
    }

    pub fn total(&self) -> Duration {
        self.log.borrow().iter().sum()
    }
}

impl Delay for RecordingDelay {
    fn delay(&mut self, duration: Duration) {
        self.log.borrow_mut().push(duration);
    }
}
