/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

/// Sequential reader over a borrowed payload.
///
/// Every read is bounds checked. A read past the end marks the cursor as failed and from then on
/// every read returns zero or an empty slice, so decoders can chain reads and check `ok()` once
/// at the end. `commit = false` peeks without moving the position.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    payload: &'a [u8],
    position: usize,
    big_endian: bool,
    failed: bool,
    fail_msg: &'static str,
}

impl<'a> ByteCursor<'a> {
    pub fn new(payload: &'a [u8], big_endian: bool) -> Self {
        Self {
            payload,
            position: 0,
            big_endian,
            failed: false,
            fail_msg: "",
        }
    }

    pub fn big_endian(payload: &'a [u8]) -> Self {
        Self::new(payload, true)
    }

    pub fn little_endian(payload: &'a [u8]) -> Self {
        Self::new(payload, false)
    }

    pub fn ok(&self) -> bool {
        !self.failed
    }

    pub fn fail_msg(&self) -> &'static str {
        self.fail_msg
    }

    // the first failure wins
    pub fn set_fail(&mut self, msg: &'static str) {
        if !self.failed {
            self.failed = true;
            self.fail_msg = msg;
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.payload.len() - self.position
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    pub fn seek(&mut self, position: usize) {
        if self.failed {
            return;
        }
        if position > self.payload.len() {
            self.set_fail("seek out of range");
            return;
        }
        self.position = position;
    }

    pub fn skip(&mut self, n: usize) {
        if self.failed {
            return;
        }
        if n > self.remaining() {
            self.set_fail("skip out of range");
            return;
        }
        self.position += n;
    }

    /// Random access by absolute offset, never touches position or fail state.
    pub fn peek_at(&self, offset: usize) -> Option<u8> {
        self.payload.get(offset).copied()
    }

    fn read_array<const N: usize>(&mut self, commit: bool) -> [u8; N] {
        let mut buf = [0u8; N];
        if self.failed {
            return buf;
        }
        if N > self.remaining() {
            self.set_fail("read out of range");
            return buf;
        }
        buf.copy_from_slice(&self.payload[self.position..self.position + N]);
        if commit {
            self.position += N;
        }
        buf
    }

    pub fn read_u8(&mut self, commit: bool) -> u8 {
        self.read_array::<1>(commit)[0]
    }

    pub fn read_u16(&mut self, commit: bool) -> u16 {
        let buf = self.read_array::<2>(commit);
        if self.big_endian {
            u16::from_be_bytes(buf)
        } else {
            u16::from_le_bytes(buf)
        }
    }

    // mysql packet lengths
    pub fn read_u24(&mut self, commit: bool) -> u32 {
        let buf = self.read_array::<3>(commit);
        if self.big_endian {
            u32::from_be_bytes([0, buf[0], buf[1], buf[2]])
        } else {
            u32::from_le_bytes([buf[0], buf[1], buf[2], 0])
        }
    }

    pub fn read_u32(&mut self, commit: bool) -> u32 {
        let buf = self.read_array::<4>(commit);
        if self.big_endian {
            u32::from_be_bytes(buf)
        } else {
            u32::from_le_bytes(buf)
        }
    }

    pub fn read_u64(&mut self, commit: bool) -> u64 {
        let buf = self.read_array::<8>(commit);
        if self.big_endian {
            u64::from_be_bytes(buf)
        } else {
            u64::from_le_bytes(buf)
        }
    }

    pub fn read_bytes(&mut self, n: usize) -> &'a [u8] {
        if self.failed {
            return &[];
        }
        if n > self.remaining() {
            self.set_fail("read bytes out of range");
            return &[];
        }
        let bs = &self.payload[self.position..self.position + n];
        self.position += n;
        bs
    }

    /// Everything left, always succeeds unless the cursor already failed.
    pub fn read_remaining(&mut self) -> &'a [u8] {
        if self.failed {
            return &[];
        }
        let bs = &self.payload[self.position..];
        self.position = self.payload.len();
        bs
    }

    /// Returns the bytes before `delimiter`. With `commit` the delimiter is consumed too.
    pub fn read_until(&mut self, delimiter: &[u8], commit: bool) -> &'a [u8] {
        if self.failed {
            return &[];
        }
        let rest = &self.payload[self.position..];
        let found = if delimiter.is_empty() || delimiter.len() > rest.len() {
            None
        } else {
            rest.windows(delimiter.len()).position(|w| w == delimiter)
        };
        match found {
            Some(index) => {
                if commit {
                    self.position += index + delimiter.len();
                }
                &rest[..index]
            }
            None => {
                self.set_fail("delimiter not found");
                &[]
            }
        }
    }

    /// Little-endian base-128 varint holding at most `BITS` bits.
    ///
    /// The result is truncated to `BITS` and sign extended, so `ff ff ff ff 0f` is `-1` for
    /// `BITS = 32`. Returns `-1` and fails when no terminating byte is found in range, check
    /// `ok()` to tell this from a decoded `-1`.
    pub fn read_varint<const BITS: u32>(&mut self, commit: bool) -> i64 {
        if self.failed {
            return -1;
        }
        let max_bytes = ((BITS + 6) / 7) as usize;
        let mut value = 0u64;
        for i in 0..max_bytes {
            let b = match self.payload.get(self.position + i) {
                Some(b) => *b,
                None => break,
            };
            value |= ((b & 0x7f) as u64).checked_shl(7 * i as u32).unwrap_or(0);
            if b & 0x80 == 0 {
                if commit {
                    self.position += i + 1;
                }
                return sign_extend(value, BITS);
            }
        }
        self.set_fail("varint not terminated");
        -1
    }
}

fn sign_extend(value: u64, bits: u32) -> i64 {
    if bits == 0 || bits >= 64 {
        return value as i64;
    }
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}
