/*
 *  Copyright (c) 2013 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

const fn is_newer_16(value: u16, prev_value: u16) -> bool {
    // Half-way mark of the u16 space.
    const BREAKPOINT: u16 = (u16::MAX >> 1) + 1;
    // Values exactly BREAKPOINT apart: only the numerically larger one is newer.
    match value.wrapping_sub(prev_value) {
        0 => false,
        BREAKPOINT => value > prev_value,
        diff => diff < BREAKPOINT,
    }
}

// NB: Doesn't fulfill strict weak ordering requirements.
//     Mustn't be used as a BTreeMap ordering.
pub const fn is_newer_sequence_number(sequence_number: u16, prev_sequence_number: u16) -> bool {
    is_newer_16(sequence_number, prev_sequence_number)
}

pub const fn latest_sequence_number(sequence_number1: u16, sequence_number2: u16) -> u16 {
    if is_newer_sequence_number(sequence_number1, sequence_number2) {
        sequence_number1
    } else {
        sequence_number2
    }
}

/// Extends 16-bit sequence numbers into a monotonic i64 space, assuming
/// consecutive inputs are less than half the space apart.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequenceNumberUnwrapper {
    last_value: Option<i64>,
}

impl SequenceNumberUnwrapper {
    pub fn unwrap(&mut self, value: u16) -> i64 {
        let unwrapped = match self.last_value {
            None => value as i64,
            Some(last) => {
                let last_wrapped = last as u16;
                let forward = value.wrapping_sub(last_wrapped) as i64;
                if is_newer_sequence_number(value, last_wrapped) {
                    last + forward
                } else {
                    last - last_wrapped.wrapping_sub(value) as i64
                }
            }
        };
        self.last_value = Some(unwrapped);
        unwrapped
    }

    pub fn reset(&mut self) {
        self.last_value = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn is_newer_sequence_number_equal() {
        assert!(!is_newer_sequence_number(0x0001, 0x0001));
    }

    #[test]
    fn is_newer_sequence_number_no_wrap() {
        assert!(is_newer_sequence_number(0xFFFF, 0xFFFE));
        assert!(is_newer_sequence_number(0x0001, 0x0000));
        assert!(is_newer_sequence_number(0x0100, 0x00FF));
    }

    #[test]
    fn is_newer_sequence_number_forward_wrap() {
        assert!(is_newer_sequence_number(0x0000, 0xFFFF));
        assert!(is_newer_sequence_number(0x0000, 0xFF00));
        assert!(is_newer_sequence_number(0x00FF, 0xFFFF));
        assert!(is_newer_sequence_number(0x00FF, 0xFF00));
    }

    #[test]
    fn is_newer_sequence_number_backward_wrap() {
        assert!(!is_newer_sequence_number(0xFFFF, 0x0000));
        assert!(!is_newer_sequence_number(0xFF00, 0x0000));
        assert!(!is_newer_sequence_number(0xFFFF, 0x00FF));
        assert!(!is_newer_sequence_number(0xFF00, 0x00FF));
    }

    #[test]
    fn is_newer_sequence_number_half_way_apart() {
        assert!(is_newer_sequence_number(0x8000, 0x0000));
        assert!(!is_newer_sequence_number(0x0000, 0x8000));
    }

    #[test]
    fn latest_sequence_number_wrap() {
        assert_eq!(0x0000, latest_sequence_number(0x0000, 0xFFFF));
        assert_eq!(0x00FF, latest_sequence_number(0x00FF, 0xFF00));
        assert_eq!(0x0000, latest_sequence_number(0xFFFF, 0x0000));
        assert_eq!(0x0100, latest_sequence_number(0x00FF, 0x0100));
    }

    #[test]
    fn unwrapper_crosses_wrap() {
        let mut unwrapper = SequenceNumberUnwrapper::default();
        assert_eq!(unwrapper.unwrap(0xFFFE), 0xFFFE);
        assert_eq!(unwrapper.unwrap(0xFFFF), 0xFFFF);
        assert_eq!(unwrapper.unwrap(0x0001), 0x10001);
        assert_eq!(unwrapper.unwrap(0xFFFF), 0xFFFF);

        unwrapper.reset();
        assert_eq!(unwrapper.unwrap(7), 7);
    }
}
