/*
 *  Copyright 2024 The WebRTC Project Authors. All rights reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

// Explicit Congestion Notification (ECN) codepoints, carried in two bits of
// every received entry of a feedback report.
// https://www.rfc-editor.org/rfc/rfc9331.html ECT stands for ECN-Capable
// Transport and CE stands for Congestion Experienced.

// RFC-3168, Section 5
// +-----+-----+
// | ECN FIELD |
// +-----+-----+
//   ECT   CE         [Obsolete] RFC 2481 names for the ECN bits.
//    0     0         Not-ECT
//    0     1         ECT(1)
//    1     0         ECT(0)
//    1     1         CE

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EcnMarking {
    #[default]
    NotEct = 0, // Not ECN-Capable Transport
    Ect1 = 1, // ECN-Capable Transport
    Ect0 = 2, // Not used by L4S
    Ce = 3,   // Congestion experienced
}

impl EcnMarking {
    /// Decodes the two-bit field; anything above 3 is not a codepoint.
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::NotEct),
            1 => Some(Self::Ect1),
            2 => Some(Self::Ect0),
            3 => Some(Self::Ce),
            _ => None,
        }
    }

    pub const fn bits(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn two_bit_codepoints() {
        for bits in 0..=3u8 {
            let marking = EcnMarking::from_bits(bits).expect("valid codepoint");
            assert_eq!(marking.bits(), bits);
        }
        assert_eq!(EcnMarking::from_bits(4), None);
        assert_eq!(EcnMarking::default(), EcnMarking::NotEct);
    }
}
