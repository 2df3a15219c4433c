//! Separable 3D transform engine.
//!
//! Each level applies three 1D passes (X, then Y, then Z) over the current
//! low-pass region. After a pass the line is stored deinterleaved: low-pass
//! coefficients in the leading half, high-pass in the trailing half, which
//! leaves the multi-level LLL corner at the origin of the buffer.

use super::lifting::{self, BoundaryExtension};
use super::{level_plan, LevelStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Axis {
    X,
    Y,
    Z,
}

/// Visit every line along `axis` inside `region` of a buffer with full
/// dimensions `dims`. The callback receives (base offset, stride, length).
pub(crate) fn for_each_line(
    dims: (usize, usize, usize),
    region: (usize, usize, usize),
    axis: Axis,
    mut f: impl FnMut(usize, usize, usize),
) {
    let (w, h, _d) = dims;
    let (rw, rh, rd) = region;
    let slab = w * h;
    match axis {
        Axis::X => {
            for z in 0..rd {
                for y in 0..rh {
                    f(z * slab + y * w, 1, rw);
                }
            }
        }
        Axis::Y => {
            for z in 0..rd {
                for x in 0..rw {
                    f(z * slab + x, w, rh);
                }
            }
        }
        Axis::Z => {
            for y in 0..rh {
                for x in 0..rw {
                    f(y * w + x, slab, rd);
                }
            }
        }
    }
}

/// Forward pass along one axis: lift each line and store it deinterleaved.
fn forward_axis<S: Copy + Default>(
    data: &mut [S],
    dims: (usize, usize, usize),
    region: (usize, usize, usize),
    axis: Axis,
    line_op: &impl Fn(&mut [S], &mut [S]),
) {
    for_each_line(dims, region, axis, |base, stride, len| {
        let ls = len.div_ceil(2);
        let mut e: Vec<S> = (0..ls).map(|j| data[base + 2 * j * stride]).collect();
        let mut o: Vec<S> = (0..len / 2)
            .map(|j| data[base + (2 * j + 1) * stride])
            .collect();
        line_op(&mut e, &mut o);
        for (j, &v) in e.iter().enumerate() {
            data[base + j * stride] = v;
        }
        for (j, &v) in o.iter().enumerate() {
            data[base + (ls + j) * stride] = v;
        }
    });
}

/// Inverse pass along one axis: read the deinterleaved halves, un-lift, and
/// store the line interleaved again.
fn inverse_axis<S: Copy + Default>(
    data: &mut [S],
    dims: (usize, usize, usize),
    region: (usize, usize, usize),
    axis: Axis,
    line_op: &impl Fn(&mut [S], &mut [S]),
) {
    for_each_line(dims, region, axis, |base, stride, len| {
        let ls = len.div_ceil(2);
        let mut e: Vec<S> = (0..ls).map(|j| data[base + j * stride]).collect();
        let mut o: Vec<S> = (0..len / 2).map(|j| data[base + (ls + j) * stride]).collect();
        line_op(&mut e, &mut o);
        for (j, &v) in e.iter().enumerate() {
            data[base + 2 * j * stride] = v;
        }
        for (j, &v) in o.iter().enumerate() {
            data[base + (2 * j + 1) * stride] = v;
        }
    });
}

fn forward_levels<S: Copy + Default>(
    data: &mut [S],
    dims: (usize, usize, usize),
    levels: (u8, u8, u8),
    line_op: &impl Fn(&mut [S], &mut [S]),
) {
    for step in level_plan(dims.0, dims.1, dims.2, levels) {
        let region = (step.cw, step.ch, step.cd);
        if step.do_x {
            forward_axis(data, dims, region, Axis::X, line_op);
        }
        if step.do_y {
            forward_axis(data, dims, region, Axis::Y, line_op);
        }
        if step.do_z {
            forward_axis(data, dims, region, Axis::Z, line_op);
        }
    }
}

/// Undo levels from the deepest down to (but not including) `keep`.
/// `keep == 0` is the full inverse.
fn inverse_levels_partial<S: Copy + Default>(
    data: &mut [S],
    dims: (usize, usize, usize),
    levels: (u8, u8, u8),
    keep: usize,
    line_op: &impl Fn(&mut [S], &mut [S]),
) {
    let plan = level_plan(dims.0, dims.1, dims.2, levels);
    for step in plan.iter().skip(keep).rev() {
        let LevelStep {
            cw,
            ch,
            cd,
            do_x,
            do_y,
            do_z,
        } = *step;
        let region = (cw, ch, cd);
        if do_z {
            inverse_axis(data, dims, region, Axis::Z, line_op);
        }
        if do_y {
            inverse_axis(data, dims, region, Axis::Y, line_op);
        }
        if do_x {
            inverse_axis(data, dims, region, Axis::X, line_op);
        }
    }
}

pub(crate) fn forward_53(
    data: &mut [i32],
    dims: (usize, usize, usize),
    levels: (u8, u8, u8),
    boundary: BoundaryExtension,
) {
    forward_levels(data, dims, levels, &|e: &mut [i32], o: &mut [i32]| {
        lifting::forward_53(e, o, boundary)
    });
}

pub(crate) fn inverse_53(
    data: &mut [i32],
    dims: (usize, usize, usize),
    levels: (u8, u8, u8),
    boundary: BoundaryExtension,
) {
    inverse_53_partial(data, dims, levels, boundary, 0);
}

pub(crate) fn inverse_53_partial(
    data: &mut [i32],
    dims: (usize, usize, usize),
    levels: (u8, u8, u8),
    boundary: BoundaryExtension,
    keep: usize,
) {
    inverse_levels_partial(data, dims, levels, keep, &|e: &mut [i32], o: &mut [i32]| {
        lifting::inverse_53(e, o, boundary)
    });
}

pub(crate) fn forward_97(
    data: &mut [f32],
    dims: (usize, usize, usize),
    levels: (u8, u8, u8),
    boundary: BoundaryExtension,
) {
    forward_levels(data, dims, levels, &|e: &mut [f32], o: &mut [f32]| {
        lifting::forward_97(e, o, boundary)
    });
}

pub(crate) fn inverse_97(
    data: &mut [f32],
    dims: (usize, usize, usize),
    levels: (u8, u8, u8),
    boundary: BoundaryExtension,
) {
    inverse_97_partial(data, dims, levels, boundary, 0);
}

pub(crate) fn inverse_97_partial(
    data: &mut [f32],
    dims: (usize, usize, usize),
    levels: (u8, u8, u8),
    boundary: BoundaryExtension,
    keep: usize,
) {
    inverse_levels_partial(data, dims, levels, keep, &|e: &mut [f32], o: &mut [f32]| {
        lifting::inverse_97(e, o, boundary)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_level_roundtrip_nonpow2() {
        let dims = (5, 3, 2);
        let data: Vec<i32> = (0..30).collect();
        let mut buf = data.clone();
        forward_53(&mut buf, dims, (1, 1, 1), BoundaryExtension::Symmetric);
        assert_ne!(buf, data);
        inverse_53(&mut buf, dims, (1, 1, 1), BoundaryExtension::Symmetric);
        assert_eq!(buf, data);
    }

    #[test]
    fn test_multi_level_roundtrip() {
        let dims = (9, 7, 5);
        let data: Vec<i32> = (0..(9 * 7 * 5)).map(|i| (i * 31) % 97).collect();
        for levels in [(1, 1, 1), (2, 2, 2), (3, 2, 1), (0, 2, 0)] {
            let mut buf = data.clone();
            forward_53(&mut buf, dims, levels, BoundaryExtension::Symmetric);
            inverse_53(&mut buf, dims, levels, BoundaryExtension::Symmetric);
            assert_eq!(buf, data, "levels {levels:?}");
        }
    }

    #[test]
    fn test_lll_corner_holds_average_like_values() {
        // The low corner of a constant volume stays constant.
        let dims = (8, 8, 8);
        let mut buf = vec![100i32; 8 * 8 * 8];
        forward_53(&mut buf, dims, (2, 2, 2), BoundaryExtension::Symmetric);
        for z in 0..2 {
            for y in 0..2 {
                for x in 0..2 {
                    assert_eq!(buf[(z * 8 + y) * 8 + x], 100);
                }
            }
        }
    }

    #[test]
    fn test_partial_inverse_keep_all_is_identity() {
        let dims = (8, 8, 8);
        let data: Vec<i32> = (0..512).map(|i| i % 251).collect();
        let mut buf = data.clone();
        forward_53(&mut buf, dims, (2, 2, 2), BoundaryExtension::Symmetric);
        let transformed = buf.clone();
        // keep == level count undoes nothing.
        inverse_53_partial(&mut buf, dims, (2, 2, 2), BoundaryExtension::Symmetric, 2);
        assert_eq!(buf, transformed);
    }

    #[test]
    fn test_partial_then_full_consistency() {
        // keep=0 after forward equals direct full inverse.
        let dims = (6, 4, 4);
        let data: Vec<i32> = (0..96).map(|i| (i * 7) % 61).collect();
        let mut a = data.clone();
        forward_53(&mut a, dims, (2, 1, 1), BoundaryExtension::Periodic);
        inverse_53_partial(&mut a, dims, (2, 1, 1), BoundaryExtension::Periodic, 0);
        assert_eq!(a, data);
    }
}
