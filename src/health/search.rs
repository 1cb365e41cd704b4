//! Root-finding kernels shared by the sizing functions.
//!
//! Both kernels are pure and generic over an evaluator closure; they know
//! nothing about health caches. The evaluator is typically "clone the cache,
//! apply a delta of this size, return the resulting health ratio".

use fixed::types::I80F48;

use crate::error::{Error, Result};

/// Bisect between `left` and `right` for the largest amount whose value still
/// reaches `target_value`.
///
/// The bracket must straddle the target: one endpoint's value at or above it,
/// the other below. Terminates when the bracket width drops under `min_step`
/// (returning the conservative left end) or when the evaluated value is
/// within a small positive margin above the target (never below it).
///
/// If the iteration cap is exhausted the best estimate found is returned with
/// a loud diagnostic; the result is still usable, just less precise.
pub(crate) fn binary_approximation_search(
    mut left: I80F48,
    left_value: I80F48,
    mut right: I80F48,
    target_value: I80F48,
    min_step: I80F48,
    fun: impl Fn(I80F48) -> I80F48,
) -> Result<I80F48> {
    let max_iterations = 50;
    let target_error = I80F48::from_num(0.1);
    let right_value = fun(right);

    if (left_value < target_value && right_value < target_value)
        || (left_value > target_value && right_value > target_value)
    {
        return Err(Error::BracketTargetNotContained {
            left_value,
            right_value,
            target_value,
        });
    }

    let mut new_amount = left;
    for _ in 0..max_iterations {
        if (right - left).abs() < min_step {
            return Ok(left);
        }
        new_amount = (left + right) * I80F48::from_num(0.5);
        let new_value = fun(new_amount);
        let error = new_value - target_value;
        if error.is_positive() && error < target_error {
            return Ok(new_amount);
        }
        if (new_value > target_value) != (right_value > target_value) {
            left = new_amount;
        } else {
            right = new_amount;
        }
    }

    tracing::error!(
        "binary search could not reach target value {} within {} iterations, returning best estimate {}",
        target_value,
        max_iterations,
        new_amount,
    );
    Ok(new_amount)
}

/// Find the maximum of `fun` between `left` and `right`.
///
/// This is not a generic function: it assumes there is a unique maximum
/// between left and right.
pub(crate) fn find_maximum(
    mut left: I80F48,
    mut right: I80F48,
    min_step: I80F48,
    fun: impl Fn(I80F48) -> I80F48,
) -> (I80F48, I80F48) {
    assert!(right >= left);
    let half = I80F48::from_num(0.5);
    let mut mid = half * (left + right);
    let mut left_value = fun(left);
    let mut right_value = fun(right);
    let mut mid_value = fun(mid);
    while (right - left) > min_step {
        if left_value >= mid_value {
            // max must be between left and mid
            assert!(mid_value >= right_value);
            right = mid;
            right_value = mid_value;
            mid = half * (left + mid);
            mid_value = fun(mid);
        } else if mid_value <= right_value {
            // max must be between mid and right
            assert!(left_value <= mid_value);
            left = mid;
            left_value = mid_value;
            mid = half * (mid + right);
            mid_value = fun(mid);
        } else {
            // mid is larger than both left and right, max could be on either side
            let leftmid = half * (left + mid);
            let leftmid_value = fun(leftmid);
            assert!(leftmid_value >= left_value);
            if leftmid_value >= mid_value {
                // max between left and mid
                right = mid;
                right_value = mid_value;
                mid = leftmid;
                mid_value = leftmid_value;
                continue;
            }

            let rightmid = half * (mid + right);
            let rightmid_value = fun(rightmid);
            assert!(rightmid_value >= right_value);
            if rightmid_value >= mid_value {
                // max between mid and right
                left = mid;
                left_value = mid_value;
                mid = rightmid;
                mid_value = rightmid_value;
                continue;
            }

            // max between leftmid and rightmid
            left = leftmid;
            left_value = leftmid_value;
            right = rightmid;
            right_value = rightmid_value;
        }
    }

    if left_value >= mid_value {
        (left, left_value)
    } else if mid_value >= right_value {
        (mid, mid_value)
    } else {
        (right, right_value)
    }
}

/// Starting from `start`, keep doubling until `fun` drops to or below
/// `target`. Used to turn an analytic zero-health estimate into a guaranteed
/// right bracket end.
pub(crate) fn scan_right_until_less_than(
    start: I80F48,
    target: I80F48,
    fun: impl Fn(I80F48) -> I80F48,
) -> Result<I80F48> {
    let max_iterations = 20;
    let mut current = start;
    for _ in 0..max_iterations {
        if fun(current) <= target {
            return Ok(current);
        }
        current = current.max(I80F48::ONE) * I80F48::from(2);
    }
    Err(Error::ScanExhausted {
        target,
        iterations: max_iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_search_converges() {
        // linear function: value 100 at 0, decreasing by 1 per unit
        let fun = |x: I80F48| I80F48::from(100) - x;
        let amount = binary_approximation_search(
            I80F48::ZERO,
            fun(I80F48::ZERO),
            I80F48::from(100),
            I80F48::from(40),
            I80F48::from_num(0.001),
            fun,
        )
        .unwrap();
        // never below target
        assert!(fun(amount) >= I80F48::from(40));
        assert!((amount - I80F48::from(60)).abs() < I80F48::from_num(0.2));
    }

    #[test]
    fn test_binary_search_rejects_bad_bracket() {
        let fun = |x: I80F48| I80F48::from(100) - x;
        let res = binary_approximation_search(
            I80F48::ZERO,
            fun(I80F48::ZERO),
            I80F48::from(10),
            I80F48::from(40),
            I80F48::from_num(0.001),
            fun,
        );
        assert!(matches!(
            res,
            Err(Error::BracketTargetNotContained { .. })
        ));
    }

    #[test]
    fn test_find_maximum_interior_peak() {
        // peak at x = 30
        let fun = |x: I80F48| -(x - I80F48::from(30)) * (x - I80F48::from(30));
        let (arg, value) = find_maximum(
            I80F48::ZERO,
            I80F48::from(100),
            I80F48::from_num(0.01),
            fun,
        );
        assert!((arg - I80F48::from(30)).abs() < I80F48::from_num(0.1));
        assert!(value <= I80F48::ZERO);
    }

    #[test]
    fn test_find_maximum_at_edges() {
        let decreasing = |x: I80F48| -x;
        let (arg, _) = find_maximum(
            I80F48::ZERO,
            I80F48::from(100),
            I80F48::from_num(0.01),
            decreasing,
        );
        assert!(arg < I80F48::from_num(0.01));

        let increasing = |x: I80F48| x;
        let (arg, _) = find_maximum(
            I80F48::ZERO,
            I80F48::from(100),
            I80F48::from_num(0.01),
            increasing,
        );
        assert!(arg > I80F48::from_num(99.9));
    }

    #[test]
    fn test_scan_right() {
        let fun = |x: I80F48| I80F48::from(100) - x;
        let bound =
            scan_right_until_less_than(I80F48::ONE, I80F48::from(40), fun).unwrap();
        assert!(fun(bound) <= I80F48::from(40));

        // a function that never drops exhausts the scan
        let flat = |_x: I80F48| I80F48::from(100);
        assert!(matches!(
            scan_right_until_less_than(I80F48::ONE, I80F48::from(40), flat),
            Err(Error::ScanExhausted { .. })
        ));
    }
}
