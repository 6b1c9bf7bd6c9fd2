//! Standard normal quantiles.

const A: [f64; 6] = [
    -3.969683028665376e+01,
    2.209460984245205e+02,
    -2.759285104469687e+02,
    1.383577518672690e+02,
    -3.066479806614716e+01,
    2.506628277459239e+00,
];
const B: [f64; 5] = [
    -5.447609879822406e+01,
    1.615858368580409e+02,
    -1.556989798598866e+02,
    6.680131188771972e+01,
    -1.328068155288572e+01,
];
const C: [f64; 6] = [
    -7.784894002430293e-03,
    -3.223964580411365e-01,
    -2.400758277161838e+00,
    -2.549732539343734e+00,
    4.374664141464968e+00,
    2.938163982698783e+00,
];
const D: [f64; 4] = [
    7.784695709041462e-03,
    3.224671290700398e-01,
    2.445134137142996e+00,
    3.754408661907416e+00,
];
const P_LOW: f64 = 0.02425;

fn tail(q: f64) -> f64 {
    (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
        / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
}

/// Inverse of the standard normal CDF (Acklam's approximation,
/// relative error below 1.2e-9)
pub fn inverse_cdf(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

/// One-sided z score of an upper-tail p-value
pub fn p_to_z(p: f64) -> f64 {
    let p = p.clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON);
    -inverse_cdf(p)
}

/// `-log10(p)`, zero for `p >= 1`
pub fn neg_log10(p: f64) -> f64 {
    if p >= 1.0 {
        0.0
    } else {
        -p.max(f64::MIN_POSITIVE).log10()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_quantiles() {
        assert!((inverse_cdf(0.975) - 1.959964).abs() < 1e-5);
        assert!((inverse_cdf(0.01) + 2.326348).abs() < 1e-5);
        assert_eq!(inverse_cdf(0.5), 0.0);
    }

    #[test]
    fn test_p_to_z() {
        assert!((p_to_z(0.05) - 1.644854).abs() < 1e-5);
        assert!((p_to_z(0.001) - 3.090232).abs() < 1e-5);
        assert!(p_to_z(1e-30) > 11.0);
        assert!(p_to_z(1.0).is_finite());
        assert!(p_to_z(0.0).is_finite());
    }

    #[test]
    fn test_neg_log10() {
        assert_eq!(neg_log10(1.0), 0.0);
        assert!((neg_log10(0.01) - 2.0).abs() < 1e-12);
    }
}
