/*
 * Copyright (c) 2025 Yunshan Networks
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

use consts::*;

use crate::bytes::ByteCursor;

/// Length of the hessian2 string starting at the cursor, consuming the tag bytes.
///
/// Returns `None` without moving the cursor when the tag is not a string tag.
fn read_chunk_header(cursor: &mut ByteCursor) -> Option<(u8, usize)> {
    let tag = cursor.read_u8(false);
    if !cursor.ok() {
        return None;
    }
    let len = match tag {
        BC_STRING_DIRECT..=STRING_DIRECT_MAX => {
            cursor.skip(1);
            tag as usize
        }
        BC_STRING_SHORT..=BC_STRING_SHORT_MAX => {
            cursor.skip(1);
            (((tag - BC_STRING_SHORT) as usize) << 8) + cursor.read_u8(true) as usize
        }
        BC_STRING_CHUNK | BC_STRING => {
            cursor.skip(1);
            let hi = cursor.read_u8(true) as usize;
            let lo = cursor.read_u8(true) as usize;
            (hi << 8) + lo
        }
        _ => return None,
    };
    if cursor.ok() {
        Some((tag, len))
    } else {
        None
    }
}

/// Reads one hessian2 string, following `R` chunks until the final chunk.
///
/// Lengths count characters, multi-byte utf-8 sequences are followed accordingly.
/// A truncated string returns what is present.
pub fn read_string(cursor: &mut ByteCursor) -> Option<String> {
    let mut result = Vec::new();
    loop {
        let (tag, chars) = read_chunk_header(cursor)?;
        let mut taken = 0;
        while taken < chars && cursor.remaining() > 0 {
            let lead = cursor.read_u8(false);
            let width = match lead {
                0x00..=0x7f => 1,
                0xc0..=0xdf => 2,
                0xe0..=0xef => 3,
                _ => 4,
            };
            let bs = cursor.read_bytes(width.min(cursor.remaining()));
            result.extend_from_slice(bs);
            taken += 1;
        }
        if tag != BC_STRING_CHUNK || taken < chars || cursor.remaining() == 0 {
            break;
        }
    }
    String::from_utf8(result).ok()
}

pub mod consts {
    pub const BC_END: u8 = b'Z';
    pub const BC_NULL: u8 = b'N';

    pub const BC_STRING: u8 = b'S'; // final string
    pub const BC_STRING_CHUNK: u8 = b'R'; // non-final string
    pub const BC_STRING_DIRECT: u8 = 0x00;
    pub const STRING_DIRECT_MAX: u8 = 0x1f;
    pub const BC_STRING_SHORT: u8 = 0x30;
    pub const BC_STRING_SHORT_MAX: u8 = 0x33; // STRING_SHORT_MAX >> 8 | BC_STRING_SHORT
}
