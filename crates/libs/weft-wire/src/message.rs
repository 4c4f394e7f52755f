//! The layered frame stack a fabric message travels in.
//!
//! A [`Message`] is a stack of byte frames with a movable frame index. Each
//! protocol layer pushes a frame for its header on send and pops it on
//! receive, so layers nest without interpreting each other. Popped frames
//! stay allocated above the index: a later [`Message::push_frame`] re-exposes
//! the most recently hidden frame, which is how a receiver hands a decoded
//! message back down for reply addressing.
//!
//! Codec contract: an operation that pushes a frame and then fails must pop
//! it before returning, so the caller always observes its own frame index on
//! every exit path.

use crate::WireError;

/// One length-prefixed segment of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    payload: Vec<u8>,
}

impl Frame {
    pub fn bytes(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Opens a read cursor over the frame payload.
    pub fn reader(&self) -> FrameReader<'_> {
        FrameReader { buf: &self.payload, pos: 0 }
    }

    /// Opens a write cursor. With `override_content` the existing payload is
    /// discarded first; otherwise writes append.
    pub fn writer(&mut self, override_content: bool) -> FrameWriter<'_> {
        if override_content {
            self.payload.clear();
        }
        FrameWriter { buf: &mut self.payload }
    }
}

/// A message as a stack of frames.
///
/// `frame_index` counts the visible frames; the current frame is the visible
/// top. `frame_count` counts every retained frame, including frames hidden by
/// [`Message::pop_frame`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    frames: Vec<Frame>,
    index: usize,
}

impl Message {
    /// An empty message with no frames.
    pub fn new() -> Self {
        Self::default()
    }

    /// A message with a single payload frame.
    pub fn with_payload(payload: impl Into<Vec<u8>>) -> Self {
        Self { frames: vec![Frame { payload: payload.into() }], index: 1 }
    }

    pub fn frame_index(&self) -> usize {
        self.index
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Makes the next frame current and returns it.
    ///
    /// Re-exposes the most recently popped frame when one is retained;
    /// allocates a fresh frame only at the true top of the stack. Writers
    /// that reuse an exposed frame open it with `override_content`.
    pub fn push_frame(&mut self) -> &mut Frame {
        if self.index == self.frames.len() {
            self.frames.push(Frame::default());
        }
        self.index += 1;
        &mut self.frames[self.index - 1]
    }

    /// Hides the current frame and returns a view of it.
    ///
    /// The frame stays allocated so a later [`Message::push_frame`] exposes
    /// it again. Returns `None` when no frame is visible.
    pub fn pop_frame(&mut self) -> Option<&Frame> {
        if self.index == 0 {
            return None;
        }
        self.index -= 1;
        Some(&self.frames[self.index])
    }

    pub fn current_frame(&self) -> Option<&Frame> {
        self.index.checked_sub(1).map(|i| &self.frames[i])
    }

    pub fn current_frame_mut(&mut self) -> Option<&mut Frame> {
        self.index.checked_sub(1).map(move |i| &mut self.frames[i])
    }

    /// Drops every retained frame above the current index, stripping foreign
    /// protocol layers before the message is re-framed for dispatch.
    pub fn trim(&mut self) {
        self.frames.truncate(self.index);
    }

    /// Serialises the visible frames: `i32` frame count, then each frame
    /// bottom-to-top as an `i32` length prefix and payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let visible = &self.frames[..self.index];
        let total: usize = visible.iter().map(|f| 4 + f.len()).sum();
        let mut buf = Vec::with_capacity(4 + total);
        buf.extend_from_slice(&(self.index as i32).to_le_bytes());
        for frame in visible {
            buf.extend_from_slice(&(frame.len() as i32).to_le_bytes());
            buf.extend_from_slice(&frame.payload);
        }
        buf
    }

    /// Deserialises a message; the frame index is restored to the frame
    /// count, so the outermost frame is current.
    pub fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        let mut pos = 0usize;
        let count = read_i32_at(data, &mut pos)?;
        if count < 0 {
            return Err(WireError::NegativeLength(count));
        }
        let mut frames = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = read_i32_at(data, &mut pos)?;
            if len < 0 {
                return Err(WireError::NegativeLength(len));
            }
            let len = len as usize;
            let end = pos.checked_add(len).filter(|&e| e <= data.len());
            let Some(end) = end else {
                return Err(WireError::MessageTruncated(pos));
            };
            frames.push(Frame { payload: data[pos..end].to_vec() });
            pos = end;
        }
        let index = frames.len();
        Ok(Self { frames, index })
    }
}

fn read_i32_at(data: &[u8], pos: &mut usize) -> Result<i32, WireError> {
    let end = *pos + 4;
    if end > data.len() {
        return Err(WireError::MessageTruncated(*pos));
    }
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[*pos..end]);
    *pos = end;
    Ok(i32::from_le_bytes(raw))
}

/// Little-endian read cursor over a frame payload.
pub struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated { needed: n, remaining: self.remaining() });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i16(&mut self) -> Result<i16, WireError> {
        let raw = self.take(2)?;
        Ok(i16::from_le_bytes([raw[0], raw[1]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        let raw = self.take(4)?;
        Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Reads an `i32` length prefix followed by that many bytes.
    pub fn read_prefixed(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(WireError::NegativeLength(len));
        }
        self.take(len as usize)
    }
}

/// Little-endian write cursor over a frame payload.
pub struct FrameWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl FrameWriter<'_> {
    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn put_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Writes an `i32` length prefix followed by the bytes.
    pub fn put_prefixed(&mut self, bytes: &[u8]) {
        self.put_i32(bytes.len() as i32);
        self.put_bytes(bytes);
    }
}
