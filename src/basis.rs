//! Legendre shape functions and Gauss-Legendre Quadrature rules
//!
//! All Solutions in this crate are expansions over tensor products of Legendre
//! Polynomials on `[-1, 1]` mapped affinely onto each rectangular `Elem`.

/// Maximum polynomial expansion order supported by the basis. p-Refinements will fail beyond this value.
pub const MAX_POLY_ORDER: u8 = 10;

/// Evaluate the Legendre Polynomial `P_n` at `x` via the Bonnet recurrence
pub fn legendre(n: usize, x: f64) -> f64 {
    match n {
        0 => 1.0,
        1 => x,
        _ => {
            let mut p_prev = 1.0;
            let mut p = x;
            for k in 1..n {
                let p_next = (((2 * k + 1) as f64) * x * p - (k as f64) * p_prev) / ((k + 1) as f64);
                p_prev = p;
                p = p_next;
            }
            p
        }
    }
}

/// Evaluate the derivative `P_n'` at `x`
///
/// Uses the identity `(1 - x²) P_n'(x) = n (P_{n-1}(x) - x P_n(x))` away from the
/// endpoints and the exact endpoint values `P_n'(±1) = (±1)^{n-1} n (n + 1) / 2`.
pub fn legendre_deriv(n: usize, x: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let one_m_x2 = 1.0 - x * x;
    if one_m_x2.abs() < 1e-12 {
        let sign = if x > 0.0 || n % 2 == 1 { 1.0 } else { -1.0 };
        sign * (n * (n + 1)) as f64 / 2.0
    } else {
        (n as f64) * (legendre(n - 1, x) - x * legendre(n, x)) / one_m_x2
    }
}

/// Values of `P_0 ..= P_n` at `x`
pub fn legendre_table(n: usize, x: f64) -> Vec<f64> {
    let mut table = Vec::with_capacity(n + 1);
    table.push(1.0);
    if n >= 1 {
        table.push(x);
    }
    for k in 1..n {
        let p_next = (((2 * k + 1) as f64) * x * table[k] - (k as f64) * table[k - 1]) / ((k + 1) as f64);
        table.push(p_next);
    }
    table
}

/// Squared L2 norm of `P_n` over `[-1, 1]`: `2 / (2n + 1)`
pub fn legendre_norm_squared(n: usize) -> f64 {
    2.0 / ((2 * n + 1) as f64)
}

/// A one-dimensional Gauss-Legendre Quadrature rule over `[-1, 1]`
#[derive(Debug, Clone)]
pub struct QuadRule {
    pub nodes: Vec<f64>,
    pub weights: Vec<f64>,
}

impl QuadRule {
    /// Number of evaluation points
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Construct the `n`-point Gauss-Legendre rule (exact for polynomials of degree `2n - 1`)
///
/// Nodes are found by Newton iteration on the roots of `P_n` starting from the
/// Chebyshev estimates. The computation is deterministic.
pub fn gauss_legendre(n: usize) -> QuadRule {
    assert!(n >= 1, "Quadrature rules must have at least one point!");

    let mut nodes = vec![0.0; n];
    let mut weights = vec![0.0; n];

    for i in 0..n {
        // chebyshev initial guess for the i'th root of P_n
        let mut x = -(std::f64::consts::PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();

        for _ in 0..100 {
            let f = legendre(n, x);
            let df = legendre_deriv(n, x);
            let dx = f / df;
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }

        let df = legendre_deriv(n, x);
        nodes[i] = x;
        weights[i] = 2.0 / ((1.0 - x * x) * df * df);
    }

    QuadRule { nodes, weights }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integrate<F: Fn(f64) -> f64>(rule: &QuadRule, f: F) -> f64 {
        rule.nodes
            .iter()
            .zip(rule.weights.iter())
            .map(|(x, w)| w * f(*x))
            .sum()
    }

    #[test]
    fn quadrature_is_exact_for_polynomials() {
        for n in 1..=12 {
            let rule = gauss_legendre(n);
            for k in 0..(2 * n) {
                let exact = if k % 2 == 0 {
                    2.0 / ((k + 1) as f64)
                } else {
                    0.0
                };
                let approx = integrate(&rule, |x| x.powi(k as i32));
                assert!(
                    (approx - exact).abs() < 1e-12,
                    "n = {}, k = {}: {} != {}",
                    n,
                    k,
                    approx,
                    exact
                );
            }
        }
    }

    #[test]
    fn legendre_polynomials_are_orthogonal() {
        let rule = gauss_legendre(12);
        for i in 0..=8_usize {
            for j in 0..=8_usize {
                let product = integrate(&rule, |x| legendre(i, x) * legendre(j, x));
                let exact = if i == j { legendre_norm_squared(i) } else { 0.0 };
                assert!((product - exact).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn derivative_matches_finite_differences() {
        let h = 1e-6;
        for n in 0..=6_usize {
            for &x in &[-0.73, -0.2, 0.0, 0.31, 0.95] {
                let fd = (legendre(n, x + h) - legendre(n, x - h)) / (2.0 * h);
                assert!((legendre_deriv(n, x) - fd).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn endpoint_derivatives() {
        for n in 1..=6_usize {
            let exact = (n * (n + 1)) as f64 / 2.0;
            assert!((legendre_deriv(n, 1.0) - exact).abs() < 1e-12);
            let sign = if n % 2 == 1 { 1.0 } else { -1.0 };
            assert!((legendre_deriv(n, -1.0) - sign * exact).abs() < 1e-12);
        }
    }
}
