//! 1D lifting kernels operating on split even/odd sample arrays.
//!
//! Working on the split arrays (rather than an interleaved line) keeps each
//! lifting step reading only the opposite parity class, which makes the
//! integer transform exactly invertible under every boundary mode.

/// Boundary extension applied past each edge of a 1D pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundaryExtension {
    /// Whole-sample mirror. The JPEG 2000 default.
    #[default]
    Symmetric,
    /// Wrap around.
    Periodic,
    /// Implicit zero samples.
    ZeroPadding,
}

/// Map an out-of-range index into `0..n`, or `None` for zero padding.
fn extend(i: isize, n: usize, mode: BoundaryExtension) -> Option<usize> {
    let n = n as isize;
    if n == 0 {
        return None;
    }
    if (0..n).contains(&i) {
        return Some(i as usize);
    }
    match mode {
        BoundaryExtension::Symmetric => {
            if n == 1 {
                return Some(0);
            }
            let period = 2 * (n - 1);
            let mut j = i.rem_euclid(period);
            if j >= n {
                j = period - j;
            }
            Some(j as usize)
        }
        BoundaryExtension::Periodic => Some(i.rem_euclid(n) as usize),
        BoundaryExtension::ZeroPadding => None,
    }
}

#[inline]
fn get_i32(v: &[i32], i: isize, mode: BoundaryExtension) -> i32 {
    extend(i, v.len(), mode).map_or(0, |j| v[j])
}

#[inline]
fn get_f32(v: &[f32], i: isize, mode: BoundaryExtension) -> f32 {
    extend(i, v.len(), mode).map_or(0.0, |j| v[j])
}

// ---------------------------------------------------------------------------
// Reversible 5/3
// ---------------------------------------------------------------------------

/// 5/3 predict: `o[j] -= floor((e[j] + e[j+1]) / 2)`.
pub fn predict_53(e: &[i32], o: &mut [i32], mode: BoundaryExtension) {
    for j in 0..o.len() {
        let a = get_i32(e, j as isize, mode);
        let b = get_i32(e, j as isize + 1, mode);
        o[j] -= (a + b) >> 1;
    }
}

/// 5/3 update: `e[j] += floor((o[j-1] + o[j] + 2) / 4)`.
pub fn update_53(e: &mut [i32], o: &[i32], mode: BoundaryExtension) {
    for j in 0..e.len() {
        let a = get_i32(o, j as isize - 1, mode);
        let b = get_i32(o, j as isize, mode);
        e[j] += (a + b + 2) >> 2;
    }
}

pub fn unpredict_53(e: &[i32], o: &mut [i32], mode: BoundaryExtension) {
    for j in 0..o.len() {
        let a = get_i32(e, j as isize, mode);
        let b = get_i32(e, j as isize + 1, mode);
        o[j] += (a + b) >> 1;
    }
}

pub fn unupdate_53(e: &mut [i32], o: &[i32], mode: BoundaryExtension) {
    for j in 0..e.len() {
        let a = get_i32(o, j as isize - 1, mode);
        let b = get_i32(o, j as isize, mode);
        e[j] -= (a + b + 2) >> 2;
    }
}

/// Full forward 5/3 pass over a split line.
pub fn forward_53(e: &mut [i32], o: &mut [i32], mode: BoundaryExtension) {
    if e.len() + o.len() < 2 {
        return;
    }
    predict_53(e, o, mode);
    update_53(e, o, mode);
}

/// Full inverse 5/3 pass over a split line.
pub fn inverse_53(e: &mut [i32], o: &mut [i32], mode: BoundaryExtension) {
    if e.len() + o.len() < 2 {
        return;
    }
    unupdate_53(e, o, mode);
    unpredict_53(e, o, mode);
}

// ---------------------------------------------------------------------------
// Irreversible 9/7
// ---------------------------------------------------------------------------

pub const ALPHA: f32 = -1.586_134_3;
pub const BETA: f32 = -0.052_980_118;
pub const GAMMA: f32 = 0.882_911_1;
pub const DELTA: f32 = 0.443_506_85;
pub const K: f32 = 1.230_174_1;
pub const INV_K: f32 = 1.0 / K;

/// 9/7 odd-sample lift: `o[j] += c * (e[j] + e[j+1])`.
pub fn lift_odd_97(e: &[f32], o: &mut [f32], c: f32, mode: BoundaryExtension) {
    for j in 0..o.len() {
        let a = get_f32(e, j as isize, mode);
        let b = get_f32(e, j as isize + 1, mode);
        o[j] += c * (a + b);
    }
}

/// 9/7 even-sample lift: `e[j] += c * (o[j-1] + o[j])`.
pub fn lift_even_97(e: &mut [f32], o: &[f32], c: f32, mode: BoundaryExtension) {
    for j in 0..e.len() {
        let a = get_f32(o, j as isize - 1, mode);
        let b = get_f32(o, j as isize, mode);
        e[j] += c * (a + b);
    }
}

/// Full forward 9/7 pass over a split line, including the K scaling.
pub fn forward_97(e: &mut [f32], o: &mut [f32], mode: BoundaryExtension) {
    if e.len() + o.len() < 2 {
        return;
    }
    lift_odd_97(e, o, ALPHA, mode);
    lift_even_97(e, o, BETA, mode);
    lift_odd_97(e, o, GAMMA, mode);
    lift_even_97(e, o, DELTA, mode);
    for v in e.iter_mut() {
        *v *= INV_K;
    }
    for v in o.iter_mut() {
        *v *= K;
    }
}

/// Full inverse 9/7 pass over a split line.
pub fn inverse_97(e: &mut [f32], o: &mut [f32], mode: BoundaryExtension) {
    if e.len() + o.len() < 2 {
        return;
    }
    for v in e.iter_mut() {
        *v *= K;
    }
    for v in o.iter_mut() {
        *v *= INV_K;
    }
    lift_even_97(e, o, -DELTA, mode);
    lift_odd_97(e, o, -GAMMA, mode);
    lift_even_97(e, o, -BETA, mode);
    lift_odd_97(e, o, -ALPHA, mode);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(line: &[i32]) -> (Vec<i32>, Vec<i32>) {
        let e = line.iter().step_by(2).copied().collect();
        let o = line.iter().skip(1).step_by(2).copied().collect();
        (e, o)
    }

    #[test]
    fn test_forward_inverse_53_even_length() {
        let line = [10, 20, 30, 40, 50, 60, 70, 80];
        for mode in [
            BoundaryExtension::Symmetric,
            BoundaryExtension::Periodic,
            BoundaryExtension::ZeroPadding,
        ] {
            let (mut e, mut o) = split(&line);
            forward_53(&mut e, &mut o, mode);
            inverse_53(&mut e, &mut o, mode);
            let (e0, o0) = split(&line);
            assert_eq!((e, o), (e0, o0), "mode {mode:?}");
        }
    }

    #[test]
    fn test_forward_inverse_53_odd_length() {
        let line = [3, 1, 4, 1, 5];
        for mode in [
            BoundaryExtension::Symmetric,
            BoundaryExtension::Periodic,
            BoundaryExtension::ZeroPadding,
        ] {
            let (mut e, mut o) = split(&line);
            forward_53(&mut e, &mut o, mode);
            inverse_53(&mut e, &mut o, mode);
            let (e0, o0) = split(&line);
            assert_eq!((e, o), (e0, o0), "mode {mode:?}");
        }
    }

    #[test]
    fn test_constant_line_highpass_is_zero() {
        // A constant signal has no detail under symmetric extension.
        let line = [9, 9, 9, 9, 9, 9];
        let (mut e, mut o) = split(&line);
        forward_53(&mut e, &mut o, BoundaryExtension::Symmetric);
        assert!(o.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_forward_inverse_97_close() {
        let line: Vec<f32> = (0..9).map(|i| (i * i) as f32).collect();
        let (mut e, mut o): (Vec<f32>, Vec<f32>) = (
            line.iter().step_by(2).copied().collect(),
            line.iter().skip(1).step_by(2).copied().collect(),
        );
        forward_97(&mut e, &mut o, BoundaryExtension::Symmetric);
        inverse_97(&mut e, &mut o, BoundaryExtension::Symmetric);
        for (j, &v) in e.iter().enumerate() {
            assert!((v - line[2 * j]).abs() < 1e-3);
        }
        for (j, &v) in o.iter().enumerate() {
            assert!((v - line[2 * j + 1]).abs() < 1e-3);
        }
    }

    #[test]
    fn test_extend_symmetric() {
        assert_eq!(extend(-1, 4, BoundaryExtension::Symmetric), Some(1));
        assert_eq!(extend(4, 4, BoundaryExtension::Symmetric), Some(2));
        assert_eq!(extend(-1, 1, BoundaryExtension::Symmetric), Some(0));
    }

    #[test]
    fn test_extend_periodic_and_zero() {
        assert_eq!(extend(-1, 4, BoundaryExtension::Periodic), Some(3));
        assert_eq!(extend(5, 4, BoundaryExtension::Periodic), Some(1));
        assert_eq!(extend(-1, 4, BoundaryExtension::ZeroPadding), None);
        assert_eq!(extend(2, 4, BoundaryExtension::ZeroPadding), Some(2));
    }
}
