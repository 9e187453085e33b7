// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Wrap-around aware comparisons of 32-bit TCP sequence numbers.
//!
//! Sequence numbers live on a circle of size 2^32. `a` is considered to be
//! after `b` when the forward distance from `b` to `a` is less than half the
//! circle. See RFC 1982 for the general serial number arithmetic.

/// Return true if sequence number `a` comes strictly before `b`.
#[inline]
pub fn before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Return true if sequence number `a` comes strictly after `b`.
#[inline]
pub fn after(a: u32, b: u32) -> bool {
    before(b, a)
}
