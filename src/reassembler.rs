//! Incremental framing of backend messages.
//!
//! The transport hands over byte chunks with arbitrary boundaries. The
//! reassembler copies them into one growable buffer and emits each message
//! exactly once, after its last byte has arrived.

use crate::error::{Error, Result};

/// Initial size of the reassembly buffer.
const INITIAL_CAPACITY: usize = 64 * 1024;

/// Largest declared length accepted before the stream is treated as garbage.
pub const MAX_MESSAGE_LEN: u32 = 1 << 30;

/// Size of the tag byte plus the length field.
const HEADER_LEN: usize = 5;

/// One complete backend message.
///
/// `frame` holds the tag, the 4 length bytes and the body, so offsets into it
/// match the wire layout.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    /// Message type byte
    pub tag: u8,
    /// Declared length (includes the length field itself, excludes the tag)
    pub len: u32,
    /// Full message bytes
    pub frame: &'a [u8],
}

impl<'a> Packet<'a> {
    /// Message body after the length field.
    pub fn payload(&self) -> &'a [u8] {
        &self.frame[HEADER_LEN..]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Tag,
    Length,
    Body,
}

/// Turns a byte stream into discrete [`Packet`]s.
#[derive(Debug)]
pub struct PacketReassembler {
    buf: Vec<u8>,
    state: ReadState,
    /// Bytes of the current message already stored in `buf`
    filled: usize,
    /// Declared length of the current message
    declared: u32,
}

impl PacketReassembler {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    /// Start with a buffer of `capacity` bytes. It grows on demand and never shrinks.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity.max(HEADER_LEN)],
            state: ReadState::Tag,
            filled: 0,
            declared: 0,
        }
    }

    /// Current size of the backing buffer.
    pub fn buffer_len(&self) -> usize {
        self.buf.len()
    }

    /// True when no partial message is pending.
    pub fn is_idle(&self) -> bool {
        self.state == ReadState::Tag
    }

    /// Feed a chunk and call `on_packet` once for every message it completes.
    ///
    /// An error from `on_packet` stops processing and is returned as is. A
    /// declared length below 4 or above [`MAX_MESSAGE_LEN`] is a protocol error;
    /// the stream cannot be resynchronized after that.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_packet: F) -> Result<()>
    where
        F: FnMut(Packet<'_>) -> Result<()>,
    {
        let mut input = chunk;
        while let Some((&first, rest)) = input.split_first() {
            match self.state {
                ReadState::Tag => {
                    self.buf[0] = first;
                    self.filled = 1;
                    self.state = ReadState::Length;
                    input = rest;
                }
                ReadState::Length => {
                    input = self.fill(input, HEADER_LEN);
                    if self.filled < HEADER_LEN {
                        continue;
                    }
                    let declared =
                        u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]);
                    if declared < 4 {
                        return Err(Error::Protocol(format!(
                            "message '{}' declares length {declared} (minimum is 4)",
                            self.buf[0].escape_ascii()
                        )));
                    }
                    if declared > MAX_MESSAGE_LEN {
                        return Err(Error::Protocol(format!(
                            "message '{}' declares length {declared} (maximum is {MAX_MESSAGE_LEN})",
                            self.buf[0].escape_ascii()
                        )));
                    }
                    self.declared = declared;
                    let total = declared as usize + 1;
                    if self.buf.len() < total {
                        self.buf.resize(total, 0);
                    }
                    if total == HEADER_LEN {
                        self.emit(&mut on_packet)?;
                    } else {
                        self.state = ReadState::Body;
                    }
                }
                ReadState::Body => {
                    let total = self.declared as usize + 1;
                    input = self.fill(input, total);
                    if self.filled == total {
                        self.emit(&mut on_packet)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Copy from `input` until `filled` reaches `target`; return what is left.
    fn fill<'i>(&mut self, input: &'i [u8], target: usize) -> &'i [u8] {
        let n = (target - self.filled).min(input.len());
        let (head, rest) = input.split_at(n);
        self.buf[self.filled..self.filled + n].copy_from_slice(head);
        self.filled += n;
        rest
    }

    fn emit<F>(&mut self, on_packet: &mut F) -> Result<()>
    where
        F: FnMut(Packet<'_>) -> Result<()>,
    {
        self.state = ReadState::Tag;
        let total = self.filled;
        self.filled = 0;
        on_packet(Packet {
            tag: self.buf[0],
            len: self.declared,
            frame: &self.buf[..total],
        })
    }
}

impl Default for PacketReassembler {
    fn default() -> Self {
        Self::new()
    }
}
