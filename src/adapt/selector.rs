use crate::basis::MAX_POLY_ORDER;

/// The refinement applied to one flagged Elem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinementDecision {
    /// Raise the Elem's expansion order by one
    PRaise,
    /// Split the Elem into four children
    HSplit,
    /// No admissible refinement (order saturated and Elem not splittable)
    Skip,
}

/// Scores h-splits against p-raises for flagged Elems
///
/// The weights are preference multipliers on the Elem's error: the candidate
/// with the larger weighted error wins among the admissible ones, and a tie
/// goes to the order raise (cheaper in DOFs). With the uniform default
/// weights p-refinement is preferred; doubling the h-weight (the stall
/// response of the adaptivity controller) flips the preference to splits,
/// which reliably grow the DOF count once orders saturate.
#[derive(Debug, Clone)]
pub struct RefinementSelector {
    weight_h: f64,
    weight_p: f64,
    max_p_order: u8,
}

impl RefinementSelector {
    pub fn new(max_p_order: u8) -> Self {
        Self {
            weight_h: 1.0,
            weight_p: 1.0,
            max_p_order: max_p_order.min(MAX_POLY_ORDER),
        }
    }

    pub fn max_p_order(&self) -> u8 {
        self.max_p_order
    }

    pub fn error_weight_h(&self) -> f64 {
        self.weight_h
    }

    pub fn set_error_weights(&mut self, weight_h: f64, weight_p: f64) {
        assert!(
            weight_h > 0.0 && weight_p > 0.0,
            "Selector error weights must be positive!"
        );
        self.weight_h = weight_h;
        self.weight_p = weight_p;
    }

    /// Reset the weights to uniform (p-refinement preferred via the tie rule)
    pub fn reset_error_weights(&mut self) {
        self.weight_h = 1.0;
        self.weight_p = 1.0;
    }

    /// Choose a refinement for a flagged Elem
    pub fn select(&self, current_order: u8, h_refineable: bool) -> RefinementDecision {
        let p_admissible = current_order < self.max_p_order;
        match (p_admissible, h_refineable) {
            (false, false) => RefinementDecision::Skip,
            (true, false) => RefinementDecision::PRaise,
            (false, true) => RefinementDecision::HSplit,
            (true, true) => {
                if self.weight_p >= self.weight_h {
                    RefinementDecision::PRaise
                } else {
                    RefinementDecision::HSplit
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_prefer_order_raises() {
        let selector = RefinementSelector::new(4);
        assert_eq!(selector.select(1, true), RefinementDecision::PRaise);
    }

    #[test]
    fn h_weight_doubling_flips_to_splits() {
        let mut selector = RefinementSelector::new(4);
        selector.set_error_weights(2.0 * selector.error_weight_h(), 1.0);
        assert_eq!(selector.select(1, true), RefinementDecision::HSplit);

        selector.reset_error_weights();
        assert_eq!(selector.select(1, true), RefinementDecision::PRaise);
    }

    #[test]
    fn saturated_orders_fall_back_to_splits() {
        let selector = RefinementSelector::new(2);
        assert_eq!(selector.select(2, true), RefinementDecision::HSplit);
        assert_eq!(selector.select(2, false), RefinementDecision::Skip);
    }

    #[test]
    fn max_order_is_capped_by_the_basis() {
        let selector = RefinementSelector::new(200);
        assert_eq!(selector.max_p_order(), MAX_POLY_ORDER);
        assert_eq!(
            selector.select(MAX_POLY_ORDER, false),
            RefinementDecision::Skip
        );
    }
}
