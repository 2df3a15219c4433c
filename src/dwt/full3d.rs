//! Full-3D transform scheduling.
//!
//! Instead of completing one axis at a time, each lifting step runs across
//! all active axes before the next step begins, so a level is a single
//! interleaved pass over the 3D neighbourhood. Every step reads only the
//! opposite parity class along its own axis, so the reversible kernel stays
//! exactly invertible; coefficients differ from the separable schedule but
//! reconstructions agree.

use super::lifting::{self, BoundaryExtension, INV_K, K};
use super::separable::{for_each_line, Axis};
use super::{level_plan, LevelStep};

/// Apply `op` to each line along `axis`, gathering the split parity arrays
/// from the interleaved layout and scattering them back interleaved.
fn lift_axis<S: Copy + Default>(
    data: &mut [S],
    dims: (usize, usize, usize),
    region: (usize, usize, usize),
    axis: Axis,
    op: &impl Fn(&mut [S], &mut [S]),
) {
    for_each_line(dims, region, axis, |base, stride, len| {
        if len < 2 {
            return;
        }
        let ls = len.div_ceil(2);
        let mut e: Vec<S> = (0..ls).map(|j| data[base + 2 * j * stride]).collect();
        let mut o: Vec<S> = (0..len / 2)
            .map(|j| data[base + (2 * j + 1) * stride])
            .collect();
        op(&mut e, &mut o);
        for (j, &v) in e.iter().enumerate() {
            data[base + 2 * j * stride] = v;
        }
        for (j, &v) in o.iter().enumerate() {
            data[base + (2 * j + 1) * stride] = v;
        }
    });
}

/// Move a line from interleaved parity order to low/high halves.
fn deinterleave_axis<S: Copy + Default>(
    data: &mut [S],
    dims: (usize, usize, usize),
    region: (usize, usize, usize),
    axis: Axis,
) {
    for_each_line(dims, region, axis, |base, stride, len| {
        let ls = len.div_ceil(2);
        let line: Vec<S> = (0..len).map(|j| data[base + j * stride]).collect();
        for j in 0..ls {
            data[base + j * stride] = line[2 * j];
        }
        for j in 0..len / 2 {
            data[base + (ls + j) * stride] = line[2 * j + 1];
        }
    });
}

/// Move a line from low/high halves back to interleaved parity order.
fn interleave_axis<S: Copy + Default>(
    data: &mut [S],
    dims: (usize, usize, usize),
    region: (usize, usize, usize),
    axis: Axis,
) {
    for_each_line(dims, region, axis, |base, stride, len| {
        let ls = len.div_ceil(2);
        let line: Vec<S> = (0..len).map(|j| data[base + j * stride]).collect();
        for j in 0..ls {
            data[base + 2 * j * stride] = line[j];
        }
        for j in 0..len / 2 {
            data[base + (2 * j + 1) * stride] = line[ls + j];
        }
    });
}

fn active_axes(step: &LevelStep) -> Vec<Axis> {
    let mut axes = Vec::with_capacity(3);
    if step.do_x {
        axes.push(Axis::X);
    }
    if step.do_y {
        axes.push(Axis::Y);
    }
    if step.do_z {
        axes.push(Axis::Z);
    }
    axes
}

pub(crate) fn forward_53(
    data: &mut [i32],
    dims: (usize, usize, usize),
    levels: (u8, u8, u8),
    boundary: BoundaryExtension,
) {
    for step in level_plan(dims.0, dims.1, dims.2, levels) {
        let region = (step.cw, step.ch, step.cd);
        let axes = active_axes(&step);
        for &axis in &axes {
            lift_axis(data, dims, region, axis, &|e: &mut [i32], o: &mut [i32]| {
                lifting::predict_53(e, o, boundary)
            });
        }
        for &axis in &axes {
            lift_axis(data, dims, region, axis, &|e: &mut [i32], o: &mut [i32]| {
                lifting::update_53(e, o, boundary)
            });
        }
        for &axis in &axes {
            deinterleave_axis(data, dims, region, axis);
        }
    }
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
    let plan = level_plan(dims.0, dims.1, dims.2, levels);
    for step in plan.iter().skip(keep).rev() {
        let region = (step.cw, step.ch, step.cd);
        let axes = active_axes(step);
        for &axis in axes.iter().rev() {
            interleave_axis(data, dims, region, axis);
        }
        for &axis in axes.iter().rev() {
            lift_axis(data, dims, region, axis, &|e: &mut [i32], o: &mut [i32]| {
                lifting::unupdate_53(e, o, boundary)
            });
        }
        for &axis in axes.iter().rev() {
            lift_axis(data, dims, region, axis, &|e: &mut [i32], o: &mut [i32]| {
                lifting::unpredict_53(e, o, boundary)
            });
        }
    }
}

pub(crate) fn forward_97(
    data: &mut [f32],
    dims: (usize, usize, usize),
    levels: (u8, u8, u8),
    boundary: BoundaryExtension,
) {
    for step in level_plan(dims.0, dims.1, dims.2, levels) {
        let region = (step.cw, step.ch, step.cd);
        let axes = active_axes(&step);
        for (coef, odd_phase) in [
            (lifting::ALPHA, true),
            (lifting::BETA, false),
            (lifting::GAMMA, true),
            (lifting::DELTA, false),
        ] {
            for &axis in &axes {
                lift_axis(data, dims, region, axis, &|e: &mut [f32], o: &mut [f32]| {
                    if odd_phase {
                        lifting::lift_odd_97(e, o, coef, boundary);
                    } else {
                        lifting::lift_even_97(e, o, coef, boundary);
                    }
                });
            }
        }
        for &axis in &axes {
            lift_axis(data, dims, region, axis, &|e: &mut [f32], o: &mut [f32]| {
                for v in e.iter_mut() {
                    *v *= INV_K;
                }
                for v in o.iter_mut() {
                    *v *= K;
                }
            });
        }
        for &axis in &axes {
            deinterleave_axis(data, dims, region, axis);
        }
    }
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
    let plan = level_plan(dims.0, dims.1, dims.2, levels);
    for step in plan.iter().skip(keep).rev() {
        let region = (step.cw, step.ch, step.cd);
        let axes = active_axes(step);
        for &axis in axes.iter().rev() {
            interleave_axis(data, dims, region, axis);
        }
        for &axis in axes.iter().rev() {
            lift_axis(data, dims, region, axis, &|e: &mut [f32], o: &mut [f32]| {
                for v in e.iter_mut() {
                    *v *= K;
                }
                for v in o.iter_mut() {
                    *v *= INV_K;
                }
            });
        }
        for (coef, odd_phase) in [
            (lifting::DELTA, false),
            (lifting::GAMMA, true),
            (lifting::BETA, false),
            (lifting::ALPHA, true),
        ] {
            for &axis in axes.iter().rev() {
                lift_axis(data, dims, region, axis, &|e: &mut [f32], o: &mut [f32]| {
                    if odd_phase {
                        lifting::lift_odd_97(e, o, -coef, boundary);
                    } else {
                        lifting::lift_even_97(e, o, -coef, boundary);
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full3d_53_roundtrip() {
        let dims = (8, 8, 4);
        let data: Vec<i32> = (0..(8 * 8 * 4)).map(|i| (i * 13) % 211).collect();
        for levels in [(1, 1, 1), (2, 2, 2), (2, 1, 0)] {
            let mut buf = data.clone();
            forward_53(&mut buf, dims, levels, BoundaryExtension::Symmetric);
            inverse_53(&mut buf, dims, levels, BoundaryExtension::Symmetric);
            assert_eq!(buf, data, "levels {levels:?}");
        }
    }

    #[test]
    fn test_full3d_53_roundtrip_odd_dims() {
        let dims = (5, 7, 3);
        let data: Vec<i32> = (0..(5 * 7 * 3)).map(|i| (i * 17) % 127 - 60).collect();
        for boundary in [
            BoundaryExtension::Symmetric,
            BoundaryExtension::Periodic,
            BoundaryExtension::ZeroPadding,
        ] {
            let mut buf = data.clone();
            forward_53(&mut buf, dims, (2, 2, 1), boundary);
            inverse_53(&mut buf, dims, (2, 2, 1), boundary);
            assert_eq!(buf, data, "boundary {boundary:?}");
        }
    }

    #[test]
    fn test_full3d_97_roundtrip_close() {
        let dims = (8, 8, 8);
        let data: Vec<f32> = (0..512).map(|i| ((i * 7) % 255) as f32).collect();
        let mut buf = data.clone();
        forward_97(&mut buf, dims, (2, 2, 2), BoundaryExtension::Symmetric);
        inverse_97(&mut buf, dims, (2, 2, 2), BoundaryExtension::Symmetric);
        let max_err = data
            .iter()
            .zip(&buf)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_err <= 1e-3, "max abs error {max_err}");
    }

    #[test]
    fn test_full3d_coefficients_differ_from_separable() {
        // The interleaved schedule produces a different (still invertible)
        // coefficient set than the separable one.
        let dims = (8, 8, 2);
        let data: Vec<i32> = (0..128).map(|i| (i * 29) % 199).collect();
        let mut full = data.clone();
        forward_53(&mut full, dims, (1, 1, 1), BoundaryExtension::Symmetric);
        let mut sep = data.clone();
        super::super::separable::forward_53(&mut sep, dims, (1, 1, 1), BoundaryExtension::Symmetric);
        assert_ne!(full, sep);
    }
}
