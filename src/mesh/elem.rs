use super::refinement::HRefError;
use json::{array, object, JsonValue};
use smallvec::SmallVec;
use std::fmt;

/// The expected h-refinement depth. Determines the stack allocation size of the ancestor lists.
pub const EXPECTED_NUM_H_REFINEMENTS: usize = 8;

/// An axis-aligned rectangular region of the domain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Rect {
    pub const fn new(x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> Self {
        Self {
            x_min,
            x_max,
            y_min,
            y_max,
        }
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    /// Length of the shortest side
    pub fn min_side(&self) -> f64 {
        self.width().min(self.height())
    }

    pub fn center(&self) -> [f64; 2] {
        [
            (self.x_min + self.x_max) / 2.0,
            (self.y_min + self.y_max) / 2.0,
        ]
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Does the point lie inside this Rect (boundary inclusive)
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x_min && x <= self.x_max && y >= self.y_min && y <= self.y_max
    }

    /// The overlapping region between two Rects, if its area is non-degenerate
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x_min = self.x_min.max(other.x_min);
        let x_max = self.x_max.min(other.x_max);
        let y_min = self.y_min.max(other.y_min);
        let y_max = self.y_max.min(other.y_max);

        let tol = 1e-12 * self.min_side().max(other.min_side());
        if x_max - x_min > tol && y_max - y_min > tol {
            Some(Rect::new(x_min, x_max, y_min, y_max))
        } else {
            None
        }
    }

    /// Do two Rects touch along an edge segment of positive length
    pub fn shares_edge(&self, other: &Rect) -> bool {
        let tol = 1e-12 * self.min_side().max(other.min_side());

        let x_overlap = self.x_max.min(other.x_max) - self.x_min.max(other.x_min);
        let y_overlap = self.y_max.min(other.y_max) - self.y_min.max(other.y_min);

        let vertical_contact = ((self.x_max - other.x_min).abs() < tol
            || (self.x_min - other.x_max).abs() < tol)
            && y_overlap > tol;
        let horizontal_contact = ((self.y_max - other.y_min).abs() < tol
            || (self.y_min - other.y_max).abs() < tol)
            && x_overlap > tol;

        vertical_contact || horizontal_contact
    }

    /// Quadrant `k` of this Rect, ordered `[SW, SE, NW, NE]` to match the `Elem` node layout
    pub fn quadrant(&self, k: usize) -> Rect {
        let [xc, yc] = self.center();
        match k {
            0 => Rect::new(self.x_min, xc, self.y_min, yc),
            1 => Rect::new(xc, self.x_max, self.y_min, yc),
            2 => Rect::new(self.x_min, xc, yc, self.y_max),
            3 => Rect::new(xc, self.x_max, yc, self.y_max),
            _ => panic!("Rects only have 4 quadrants; cannot retrieve quadrant {}!", k),
        }
    }

    /// Map a physical point into this Rect's parametric space `[-1, 1]²`
    pub fn to_parametric(&self, x: f64, y: f64) -> [f64; 2] {
        [
            2.0 * (x - self.x_min) / self.width() - 1.0,
            2.0 * (y - self.y_min) / self.height() - 1.0,
        ]
    }

    /// Map a parametric point in `[-1, 1]²` to physical space
    pub fn from_parametric(&self, xi: f64, eta: f64) -> [f64; 2] {
        [
            self.x_min + (xi + 1.0) / 2.0 * self.width(),
            self.y_min + (eta + 1.0) / 2.0 * self.height(),
        ]
    }

    pub fn to_json(&self) -> JsonValue {
        array![self.x_min, self.x_max, self.y_min, self.y_max]
    }

    pub fn from_json(json: &JsonValue) -> Option<Rect> {
        Some(Rect::new(
            json[0].as_f64()?,
            json[1].as_f64()?,
            json[2].as_f64()?,
            json[3].as_f64()?,
        ))
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{:.6}, {:.6}] x [{:.6}, {:.6}]",
            self.x_min, self.x_max, self.y_min, self.y_max
        )
    }
}

/// A rectangular finite element in the quadtree `Mesh`
///
/// `Elem`s keep track of:
/// * their region of the domain (`rect`)
/// * their parent and child `Elem`s (h-refinement state)
/// * their h-refinement depth (`h_level`)
///
/// The four children produced by a split are ordered as follows:
/// ```text
///     2 --------- 3
///     |  2  |  3  |
///     |-----------|
///     |  0  |  1  |
///     0 --------- 1
/// ```
#[derive(Debug, Clone)]
pub struct Elem {
    pub id: usize,
    pub rect: Rect,
    pub h_level: u8,
    children: Option<SmallVec<[usize; 4]>>,
    ancestors: SmallVec<[usize; EXPECTED_NUM_H_REFINEMENTS]>,
    pruned: bool,
}

impl Elem {
    /// Construct a base-layer Elem
    pub fn new(id: usize, rect: Rect) -> Self {
        Self {
            id,
            rect,
            h_level: 0,
            children: None,
            ancestors: SmallVec::new(),
            pruned: false,
        }
    }

    /// Construct a child Elem covering quadrant `k` of its parent
    pub fn child_of(parent: &Elem, k: usize, id: usize) -> Self {
        let mut ancestors = parent.ancestors.clone();
        ancestors.push(parent.id);
        Self {
            id,
            rect: parent.rect.quadrant(k),
            h_level: parent.h_level + 1,
            children: None,
            ancestors,
            pruned: false,
        }
    }

    /// Has this Elem been h-refined
    pub fn has_children(&self) -> bool {
        self.children.is_some()
    }

    /// Ids of this Elem's children, if it has been h-refined
    pub fn child_ids(&self) -> Option<&SmallVec<[usize; 4]>> {
        self.children.as_ref()
    }

    /// Id of the parent Elem, if this Elem is not on the base layer
    pub fn parent_id(&self) -> Option<usize> {
        self.ancestors.last().copied()
    }

    /// The chain of ancestor ids back to the base layer (oldest first)
    pub fn ancestor_ids(&self) -> &[usize] {
        &self.ancestors
    }

    /// Is this Elem an active leaf of the quadtree (not refined, not pruned)
    pub fn is_leaf(&self) -> bool {
        !self.pruned && self.children.is_none()
    }

    /// Has this Elem been removed from the active tree by de-refinement
    pub fn is_pruned(&self) -> bool {
        self.pruned
    }

    pub(crate) fn set_children(&mut self, child_ids: SmallVec<[usize; 4]>) -> Result<(), HRefError> {
        if self.children.is_some() {
            Err(HRefError::ElemHasChildren(self.id))
        } else {
            self.children = Some(child_ids);
            Ok(())
        }
    }

    pub(crate) fn clear_children(&mut self) {
        self.children = None;
    }

    pub(crate) fn prune(&mut self) {
        self.pruned = true;
    }

    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "rect": self.rect.to_json(),
            "h_level": self.h_level,
            "parent": self.parent_id(),
            "ancestors": JsonValue::from(self.ancestors.to_vec()),
            "children": JsonValue::from(
                match &self.children {
                    Some(ids) => ids.to_vec(),
                    None => Vec::new(),
                }
            ),
            "pruned": self.pruned,
        }
    }

    pub fn from_json(json: &JsonValue) -> Option<Elem> {
        let children: Vec<usize> = json["children"]
            .members()
            .map(|v| v.as_usize())
            .collect::<Option<Vec<usize>>>()?;
        let ancestors: Vec<usize> = json["ancestors"]
            .members()
            .map(|v| v.as_usize())
            .collect::<Option<Vec<usize>>>()?;

        Some(Elem {
            id: json["id"].as_usize()?,
            rect: Rect::from_json(&json["rect"])?,
            h_level: json["h_level"].as_u8()?,
            children: if children.is_empty() {
                None
            } else {
                Some(SmallVec::from_vec(children))
            },
            ancestors: SmallVec::from_vec(ancestors),
            pruned: json["pruned"].as_bool()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quadrants_tile_the_parent() {
        let r = Rect::new(0.0, 2.0, -1.0, 1.0);
        let total_area: f64 = (0..4).map(|k| r.quadrant(k).area()).sum();
        assert!((total_area - r.area()).abs() < 1e-14);
        assert_eq!(r.quadrant(0), Rect::new(0.0, 1.0, -1.0, 0.0));
        assert_eq!(r.quadrant(3), Rect::new(1.0, 2.0, 0.0, 1.0));
    }

    #[test]
    fn parametric_round_trip() {
        let r = Rect::new(0.5, 1.5, 2.0, 4.0);
        let [xi, eta] = r.to_parametric(1.0, 3.0);
        assert!((xi - 0.0).abs() < 1e-14 && (eta - 0.0).abs() < 1e-14);
        let [x, y] = r.from_parametric(xi, eta);
        assert!((x - 1.0).abs() < 1e-14 && (y - 3.0).abs() < 1e-14);
    }

    #[test]
    fn edge_sharing() {
        let a = Rect::new(0.0, 1.0, 0.0, 1.0);
        let b = Rect::new(1.0, 2.0, 0.5, 1.5);
        let c = Rect::new(1.0, 2.0, 1.0, 2.0); // corner contact only
        let d = Rect::new(3.0, 4.0, 0.0, 1.0);
        assert!(a.shares_edge(&b));
        assert!(!a.shares_edge(&c));
        assert!(!a.shares_edge(&d));
    }

    #[test]
    fn elem_json_round_trip() {
        let parent = Elem::new(7, Rect::new(0.0, 1.0, 0.0, 1.0));
        let child = Elem::child_of(&parent, 2, 12);
        let restored = Elem::from_json(&child.to_json()).unwrap();
        assert_eq!(restored.id, 12);
        assert_eq!(restored.h_level, 1);
        assert_eq!(restored.parent_id(), Some(7));
        assert_eq!(restored.rect, parent.rect.quadrant(2));
    }
}
