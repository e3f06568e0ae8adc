
//! The orthonormal 8×8 discrete cosine transform,
//! normalized so that the first coefficient equals the block mean.
//! Coefficients of f16 content therefore stay within the f16 range.

use std::sync::OnceLock;

pub const BLOCK_EDGE: usize = 8;
pub const BLOCK_SIZE: usize = BLOCK_EDGE * BLOCK_EDGE;

/// Coefficient read-out order, diagonal by ascending frequency.
pub const ZIGZAG: [usize; BLOCK_SIZE] = [
     0,  1,  8, 16,  9,  2,  3, 10,
    17, 24, 32, 25, 18, 11,  4,  5,
    12, 19, 26, 33, 40, 48, 41, 34,
    27, 20, 13,  6,  7, 14, 21, 28,
    35, 42, 49, 56, 57, 50, 43, 36,
    29, 22, 15, 23, 30, 37, 44, 51,
    58, 59, 52, 45, 38, 31, 39, 46,
    53, 60, 61, 54, 47, 55, 62, 63,
];

// basis[frequency][position] = a(frequency) · cos((2·position + 1) · frequency · π / 16),
// with a(0) = √(1/8) and a(k) = √(2/8)
fn basis() -> &'static [[f32; BLOCK_EDGE]; BLOCK_EDGE] {
    static BASIS: OnceLock<[[f32; BLOCK_EDGE]; BLOCK_EDGE]> = OnceLock::new();
    BASIS.get_or_init(|| {
        let mut basis = [[0.0_f32; BLOCK_EDGE]; BLOCK_EDGE];

        for frequency in 0 .. BLOCK_EDGE {
            let amplitude = if frequency == 0 { (1.0_f64 / 8.0).sqrt() } else { (2.0_f64 / 8.0).sqrt() };

            for position in 0 .. BLOCK_EDGE {
                let angle = (2 * position + 1) as f64 * frequency as f64 * std::f64::consts::PI / 16.0;
                basis[frequency][position] = (amplitude * angle.cos()) as f32;
            }
        }

        basis
    })
}

/// Transform one 8×8 block of samples into frequency coefficients, in place.
/// The extra 1/(2√2) scale keeps the first coefficient at the block mean.
pub fn forward(block: &mut [f32; BLOCK_SIZE]) {
    let basis = basis();
    let mut rows = [0.0_f32; BLOCK_SIZE];

    for y in 0 .. BLOCK_EDGE {
        for frequency in 0 .. BLOCK_EDGE {
            let mut sum = 0.0;
            for x in 0 .. BLOCK_EDGE {
                sum += block[y * BLOCK_EDGE + x] * basis[frequency][x];
            }

            rows[y * BLOCK_EDGE + frequency] = sum;
        }
    }

    for x in 0 .. BLOCK_EDGE {
        for frequency in 0 .. BLOCK_EDGE {
            let mut sum = 0.0;
            for y in 0 .. BLOCK_EDGE {
                sum += rows[y * BLOCK_EDGE + x] * basis[frequency][y];
            }

            // divide the orthonormal coefficient by eight,
            // so the first one equals the mean
            block[frequency * BLOCK_EDGE + x] = sum / 8.0;
        }
    }
}

/// Transform frequency coefficients back into samples, in place.
/// Exactly inverts `forward` up to float rounding.
pub fn inverse(block: &mut [f32; BLOCK_SIZE]) {
    let basis = basis();
    let mut columns = [0.0_f32; BLOCK_SIZE];

    for x in 0 .. BLOCK_EDGE {
        for y in 0 .. BLOCK_EDGE {
            let mut sum = 0.0;
            for frequency in 0 .. BLOCK_EDGE {
                sum += block[frequency * BLOCK_EDGE + x] * basis[frequency][y];
            }

            columns[y * BLOCK_EDGE + x] = sum;
        }
    }

    for y in 0 .. BLOCK_EDGE {
        for x in 0 .. BLOCK_EDGE {
            let mut sum = 0.0;
            for frequency in 0 .. BLOCK_EDGE {
                sum += columns[y * BLOCK_EDGE + frequency] * basis[frequency][x];
            }

            block[y * BLOCK_EDGE + x] = sum * 8.0;
        }
    }
}
