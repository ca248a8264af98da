//! One-dimensional maximization for the Kelly bets.

/// Golden-section ratio `(sqrt(5) - 1) / 2`.
const INV_PHI: f64 = 0.618_033_988_749_894_9;

/// Result of a bracketed maximization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Maximum {
    pub point: f64,
    pub value: f64,
    pub evaluations: usize,
}

/// Maximizes a unimodal `f` on `[lo, hi]` by golden-section search.
///
/// Stops when the bracket is narrower than `tol` or after `max_eval`
/// evaluations. The end points are checked too, so a maximum sitting on the
/// boundary of the interval is found exactly.
pub fn golden_section_max<F>(f: F, lo: f64, hi: f64, tol: f64, max_eval: usize) -> Maximum
where
    F: Fn(f64) -> f64,
{
    let (mut a, mut b) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    let mut c = b - INV_PHI * (b - a);
    let mut d = a + INV_PHI * (b - a);
    let mut fc = f(c);
    let mut fd = f(d);
    let mut evaluations = 2;

    while (b - a).abs() > tol && evaluations < max_eval {
        if fc >= fd {
            b = d;
            d = c;
            fd = fc;
            c = b - INV_PHI * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + INV_PHI * (b - a);
            fd = f(d);
        }
        evaluations += 1;
    }

    let mid = (a + b) / 2.0;
    let mut best = Maximum {
        point: mid,
        value: f(mid),
        evaluations: evaluations + 1,
    };
    for edge in [lo, hi] {
        let value = f(edge);
        best.evaluations += 1;
        if value > best.value {
            best.point = edge;
            best.value = value;
        }
    }
    best
}
