use std::fmt;

/// Error type for h-refinement operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HRefError {
    ElemDoesntExist(usize),
    ElemHasChildren(usize),
    ElemIsPruned(usize),
    EdgeTooShort(usize),
}

impl fmt::Display for HRefError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ElemDoesntExist(elem_id) => {
                write!(f, "Elem {} does not exist; cannot h-refine!", elem_id)
            }
            Self::ElemHasChildren(elem_id) => {
                write!(f, "Elem {} already has children; cannot h-refine!", elem_id)
            }
            Self::ElemIsPruned(elem_id) => write!(
                f,
                "Elem {} was removed by de-refinement; cannot h-refine!",
                elem_id
            ),
            Self::EdgeTooShort(elem_id) => write!(
                f,
                "Elem {}'s edges are below the minimum edge length; cannot h-refine!",
                elem_id
            ),
        }
    }
}

impl std::error::Error for HRefError {}

/// Error type for p-refinement operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PRefError {
    ElemDoesntExist(usize),
    ExceededMaxExpansion(usize),
    NegExpansion(usize),
}

impl fmt::Display for PRefError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ElemDoesntExist(elem_id) => {
                write!(f, "Elem {} does not exist; cannot p-refine!", elem_id)
            }
            Self::ExceededMaxExpansion(elem_id) => write!(
                f,
                "p-Refinement on Elem {} would exceed the maximum expansion order; cannot p-refine!",
                elem_id
            ),
            Self::NegExpansion(elem_id) => write!(
                f,
                "p-Refinement on Elem {} would result in a negative expansion order; cannot p-refine!",
                elem_id
            ),
        }
    }
}

impl std::error::Error for PRefError {}
