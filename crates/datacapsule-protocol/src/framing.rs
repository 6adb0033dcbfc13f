// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

//! Length-prefixed frame codec: a 4-byte big-endian length, then that many
//! payload bytes. The length is validated against the configured maximum
//! before any allocation. Empty frames (length 0) are valid and carry the
//! protocol's coarse failure response.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::DEFAULT_MAX_FRAME_BYTES;

const HEADER_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {size} bytes exceeds limit of {max}")]
    TooLarge { size: usize, max: usize },

    #[error("message codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_bytes: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > self.max_frame_bytes {
            return Err(FrameError::TooLarge {
                size: length,
                max: self.max_frame_bytes,
            });
        }
        let total = HEADER_LEN + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(length).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        if item.len() > self.max_frame_bytes {
            return Err(FrameError::TooLarge {
                size: item.len(),
                max: self.max_frame_bytes,
            });
        }
        dst.reserve(HEADER_LEN + item.len());
        #[allow(clippy::cast_possible_truncation)] // bounded by max_frame_bytes
        dst.put_u32(item.len() as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

/// Serializes one message into a frame payload.
pub fn encode_message<T: Serialize>(message: &T) -> Result<Bytes, FrameError> {
    Ok(Bytes::from(serde_json::to_vec(message)?))
}

/// Decodes a non-empty frame payload into a message.
pub fn decode_message<T: DeserializeOwned>(frame: &[u8]) -> Result<T, FrameError> {
    Ok(serde_json::from_slice(frame)?)
}

/// The coarse failure / rejection frame.
pub fn failure_frame() -> Bytes {
    Bytes::new()
}
