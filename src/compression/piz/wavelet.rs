
//! Reversible two-dimensional wavelet transform of 16-bit integer planes.
//!
//! Each pass transforms pairs along rows, then along columns, recursing
//! to coarser levels while the shorter side is longer than one sample.
//! Values below `1 << 14` use the plain basis functions, which compress
//! slightly better; larger values use modulo arithmetic so the transform
//! stays exactly reversible over the full 16-bit range.

use crate::math::Vec2;


pub fn encode(
    buffer: &mut [u16],
    size: Vec2<usize>,    // samples per row, number of rows
    offset: Vec2<usize>,  // index distance between columns and between rows
    max_value: u16,
) {
    let is_14_bit = max_value < (1 << 14);
    let (count_x, count_y) = (size.x(), size.y());
    let (offset_x, offset_y) = (offset.x(), offset.y());

    let count = count_x.min(count_y);
    let mut p = 1;  // == 1 << level
    let mut p2 = 2; // == 1 << (level + 1)

    while p2 <= count {
        let mut position_y = 0;
        let end_y = offset_y * (count_y - p2);
        let (offset1_x, offset1_y) = (offset_x * p, offset_y * p);
        let (offset2_x, offset2_y) = (offset_x * p2, offset_y * p2);

        while position_y <= end_y {
            let mut position_x = position_y;
            let end_x = position_x + offset_x * (count_x - p2);

            while position_x <= end_x {
                // transform the quad of samples at the four corners
                let p01 = position_x + offset1_x;
                let p10 = position_x + offset1_y;
                let p11 = p10 + offset1_x;

                if is_14_bit {
                    let (i00, i01) = encode_14bit(buffer[position_x], buffer[p01]);
                    let (i10, i11) = encode_14bit(buffer[p10], buffer[p11]);

                    let (low, high) = encode_14bit(i00, i10);
                    buffer[position_x] = low;
                    buffer[p10] = high;

                    let (low, high) = encode_14bit(i01, i11);
                    buffer[p01] = low;
                    buffer[p11] = high;
                }
                else {
                    let (i00, i01) = encode_16bit(buffer[position_x], buffer[p01]);
                    let (i10, i11) = encode_16bit(buffer[p10], buffer[p11]);

                    let (low, high) = encode_16bit(i00, i10);
                    buffer[position_x] = low;
                    buffer[p10] = high;

                    let (low, high) = encode_16bit(i01, i11);
                    buffer[p01] = low;
                    buffer[p11] = high;
                }

                position_x += offset2_x;
            }

            // encode the odd remaining column of this level
            if count_x & p != 0 {
                let p10 = position_x + offset1_y;

                let (low, high) =
                    if is_14_bit { encode_14bit(buffer[position_x], buffer[p10]) }
                    else { encode_16bit(buffer[position_x], buffer[p10]) };

                buffer[position_x] = low;
                buffer[p10] = high;
            }

            position_y += offset2_y;
        }

        // encode the odd remaining row of this level
        if count_y & p != 0 {
            let mut position_x = position_y;
            let end_x = position_y + offset_x * (count_x - p2);

            while position_x <= end_x {
                let p01 = position_x + offset1_x;

                let (low, high) =
                    if is_14_bit { encode_14bit(buffer[position_x], buffer[p01]) }
                    else { encode_16bit(buffer[position_x], buffer[p01]) };

                buffer[position_x] = low;
                buffer[p01] = high;

                position_x += offset2_x;
            }
        }

        p = p2;
        p2 <<= 1;
    }
}


pub fn decode(
    buffer: &mut [u16],
    size: Vec2<usize>,
    offset: Vec2<usize>,
    max_value: u16,
) {
    let is_14_bit = max_value < (1 << 14);
    let (count_x, count_y) = (size.x(), size.y());
    let (offset_x, offset_y) = (offset.x(), offset.y());

    let count = count_x.min(count_y);
    let mut p = 1;
    let mut p2;

    // start at the coarsest level
    while p <= count { p <<= 1; }
    p >>= 1;
    p2 = p;
    p >>= 1;

    while p >= 1 {
        let mut position_y = 0;
        let end_y = offset_y * (count_y - p2);
        let (offset1_x, offset1_y) = (offset_x * p, offset_y * p);
        let (offset2_x, offset2_y) = (offset_x * p2, offset_y * p2);

        while position_y <= end_y {
            let mut position_x = position_y;
            let end_x = position_x + offset_x * (count_x - p2);

            while position_x <= end_x {
                let p01 = position_x + offset1_x;
                let p10 = position_x + offset1_y;
                let p11 = p10 + offset1_x;

                if is_14_bit {
                    let (i00, i10) = decode_14bit(buffer[position_x], buffer[p10]);
                    let (i01, i11) = decode_14bit(buffer[p01], buffer[p11]);

                    let (a, b) = decode_14bit(i00, i01);
                    buffer[position_x] = a;
                    buffer[p01] = b;

                    let (a, b) = decode_14bit(i10, i11);
                    buffer[p10] = a;
                    buffer[p11] = b;
                }
                else {
                    let (i00, i10) = decode_16bit(buffer[position_x], buffer[p10]);
                    let (i01, i11) = decode_16bit(buffer[p01], buffer[p11]);

                    let (a, b) = decode_16bit(i00, i01);
                    buffer[position_x] = a;
                    buffer[p01] = b;

                    let (a, b) = decode_16bit(i10, i11);
                    buffer[p10] = a;
                    buffer[p11] = b;
                }

                position_x += offset2_x;
            }

            if count_x & p != 0 {
                let p10 = position_x + offset1_y;

                let (a, b) =
                    if is_14_bit { decode_14bit(buffer[position_x], buffer[p10]) }
                    else { decode_16bit(buffer[position_x], buffer[p10]) };

                buffer[position_x] = a;
                buffer[p10] = b;
            }

            position_y += offset2_y;
        }

        if count_y & p != 0 {
            let mut position_x = position_y;
            let end_x = position_x + offset_x * (count_x - p2);

            while position_x <= end_x {
                let p01 = position_x + offset1_x;

                let (a, b) =
                    if is_14_bit { decode_14bit(buffer[position_x], buffer[p01]) }
                    else { decode_16bit(buffer[position_x], buffer[p01]) };

                buffer[position_x] = a;
                buffer[p01] = b;

                position_x += offset2_x;
            }
        }

        p2 = p;
        p >>= 1;
    }
}


// basis functions without modulo arithmetic, for values below 1 << 14

#[inline]
fn encode_14bit(a: u16, b: u16) -> (u16, u16) {
    let (a, b) = (a as i16, b as i16);

    let average = (a + b) >> 1;
    let difference = a - b;

    (average as u16, difference as u16)
}

#[inline]
fn decode_14bit(average: u16, difference: u16) -> (u16, u16) {
    let (average, difference) = (average as i16 as i32, difference as i16 as i32);

    let a = average + (difference & 1) + (difference >> 1);
    let b = a - difference;

    (a as i16 as u16, b as i16 as u16)
}


// basis functions with modulo arithmetic for the full 16-bit range

const BIT_COUNT: i32 = 16;
const OFFSET: i32 = 1 << (BIT_COUNT - 1);
const MOD_MASK: i32 = (1 << BIT_COUNT) - 1;

#[inline]
fn encode_16bit(a: u16, b: u16) -> (u16, u16) {
    let (a, b) = (a as i32, b as i32);

    let offset_a = (a + OFFSET) & MOD_MASK;
    let mut average = (offset_a + b) >> 1;
    let difference = offset_a - b;

    if difference < 0 { average = (average + OFFSET) & MOD_MASK; }
    let difference = difference & MOD_MASK;

    (average as u16, difference as u16)
}

#[inline]
fn decode_16bit(average: u16, difference: u16) -> (u16, u16) {
    let (average, difference) = (average as i32, difference as i32);

    let b = (average - (difference >> 1)) & MOD_MASK;
    let a = (difference + b - OFFSET) & MOD_MASK;

    (a as u16, b as u16)
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::math::Vec2;

    #[test]
    fn roundtrip_14bit_pairs() {
        let pairs = [
            (13, 54), (3, 123), (423, 53), (1, 23), (23, 515), (513, 43),
            (16374, 16381), (16284, 3), (2, 1), (0, 0), (0, 4), (3, 0),
        ];

        for &(a, b) in &pairs {
            let (low, high) = encode_14bit(a, b);
            assert_eq!(decode_14bit(low, high), (a, b));
        }
    }

    #[test]
    fn roundtrip_16bit_pairs() {
        let pairs = [
            (13, 54), (3, 123), (423, 53), (1, 23), (23, 515), (513, 43),
            (16385, 56384), (18384, 36384), (65535, 65535), (0, 65535), (3, 0),
        ];

        for &(a, b) in &pairs {
            let (low, high) = encode_16bit(a, b);
            assert_eq!(decode_16bit(low, high), (a, b));
        }
    }

    fn roundtrip_plane(width: usize, height: usize, max_value: u16) {
        let data: Vec<u16> = (0 .. width * height)
            .map(|_| rand::random::<u16>() % max_value.max(1))
            .collect();

        let max = data.iter().copied().max().unwrap_or(0);
        let mut transformed = data.clone();

        encode(&mut transformed, Vec2(width, height), Vec2(1, width), max);
        decode(&mut transformed, Vec2(width, height), Vec2(1, width), max);
        assert_eq!(data, transformed);
    }

    #[test]
    fn roundtrip_14bit_planes() {
        roundtrip_plane(6, 4, 1 << 14);
        roundtrip_plane(17, 9, 1 << 14);
        roundtrip_plane(32, 32, 1 << 14);
        roundtrip_plane(1, 25, 1 << 14);
        roundtrip_plane(25, 1, 1 << 14);
    }

    #[test]
    fn roundtrip_16bit_planes() {
        roundtrip_plane(6, 4, u16::MAX);
        roundtrip_plane(31, 33, u16::MAX);
        roundtrip_plane(64, 3, u16::MAX);
    }

    #[test]
    fn roundtrip_interleaved_planes() {
        // two interleaved planes, as produced by 32-bit samples
        let width = 12;
        let height = 8;

        let data: Vec<u16> = (0 .. width * height * 2).map(|_| rand::random()).collect();
        let mut transformed = data.clone();

        for offset in 0 .. 2 {
            encode(&mut transformed[offset ..], Vec2(width, height), Vec2(2, width * 2), u16::MAX);
        }

        for offset in 0 .. 2 {
            decode(&mut transformed[offset ..], Vec2(width, height), Vec2(2, width * 2), u16::MAX);
        }

        assert_eq!(data, transformed);
    }
}
