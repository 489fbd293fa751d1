//! The geometric substrate: a rectangular quadtree mesh with local h-refinement and de-refinement

/// A rectangular finite element and its region of the domain
pub mod elem;
/// Error types for h- and p-refinement
pub mod refinement;

use elem::{Elem, Rect};
use json::{object, JsonValue};
use refinement::HRefError;
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::fmt;
use std::fs::{read_to_string, File};
use std::io::BufWriter;

/// Minimum Elem side length. h-Refinements will fail once an Elem's sides fall below this value.
pub const MIN_EDGE_LENGTH: f64 = 3.0518e-5; // 15ish refinement layers with unit sized cells

/// A partition of a rectangular 2D domain into `Elem`s, refined as a quadtree
///
/// Elem ids are stable across refinement and de-refinement: splitting appends
/// child Elems, and de-refinement tombstones them (`is_pruned`), so any
/// per-elem bookkeeping indexed by id (e.g. a `Space`'s expansion orders)
/// survives topology changes.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub elems: Vec<Elem>,
    base_ids: Vec<usize>,
}

impl Mesh {
    /// Construct a uniform `nx` by `ny` Mesh over a rectangular domain
    pub fn rectangle(bounds: Rect, nx: usize, ny: usize) -> Self {
        assert!(nx > 0 && ny > 0, "Meshes must have at least one Elem!");

        let dx = bounds.width() / nx as f64;
        let dy = bounds.height() / ny as f64;

        let mut elems = Vec::with_capacity(nx * ny);
        for j in 0..ny {
            for i in 0..nx {
                let rect = Rect::new(
                    bounds.x_min + i as f64 * dx,
                    bounds.x_min + (i + 1) as f64 * dx,
                    bounds.y_min + j as f64 * dy,
                    bounds.y_min + (j + 1) as f64 * dy,
                );
                elems.push(Elem::new(j * nx + i, rect));
            }
        }

        let base_ids = (0..elems.len()).collect();
        Self { elems, base_ids }
    }

    /// Construct a Mesh from a JSON file with the following format
    ///
    /// ```JSON
    /// {
    ///     "Nodes": [
    ///         [x_coordinate, y_coordinate],
    ///         [0.0, 0.0],
    ///         [1.0, 0.0],
    ///         [0.0, 0.5],
    ///         [1.0, 0.5]
    ///     ],
    ///     "Elems": [
    ///         { "node_ids": [node_0_id, node_1_id, node_2_id, node_3_id] },
    ///         { "node_ids": [0, 1, 2, 3] }
    ///     ]
    /// }
    /// ```
    ///
    /// Nodes are ordered `[SW, SE, NW, NE]` per Elem and must describe axis-aligned rectangles.
    pub fn from_file(path: impl AsRef<str>) -> Result<Self, MeshFileError> {
        let contents = read_to_string(path.as_ref())?;
        let mesh_json = json::parse(&contents)?;

        let nodes: Vec<[f64; 2]> = mesh_json["Nodes"]
            .members()
            .map(|n| match (n[0].as_f64(), n[1].as_f64()) {
                (Some(x), Some(y)) => Ok([x, y]),
                _ => Err(MeshFileError::BadFormat("Node coordinates must be numbers")),
            })
            .collect::<Result<_, _>>()?;

        let mut elems = Vec::new();
        for (elem_id, elem_json) in mesh_json["Elems"].members().enumerate() {
            let node_ids: Vec<usize> = elem_json["node_ids"]
                .members()
                .map(|v| {
                    v.as_usize()
                        .ok_or(MeshFileError::BadFormat("node_ids must be integers"))
                })
                .collect::<Result<_, _>>()?;
            if node_ids.len() != 4 {
                return Err(MeshFileError::BadFormat("Elems must have 4 node_ids"));
            }
            for node_id in node_ids.iter() {
                if *node_id >= nodes.len() {
                    return Err(MeshFileError::BadFormat("node_id out of range"));
                }
            }

            let [sw, se, nw, ne] = [
                nodes[node_ids[0]],
                nodes[node_ids[1]],
                nodes[node_ids[2]],
                nodes[node_ids[3]],
            ];
            let rect = Rect::new(sw[0], se[0], sw[1], nw[1]);
            let tol = 1e-12 * rect.min_side().abs().max(1.0);
            let rectangular = (sw[1] - se[1]).abs() < tol
                && (nw[1] - ne[1]).abs() < tol
                && (sw[0] - nw[0]).abs() < tol
                && (se[0] - ne[0]).abs() < tol
                && rect.width() > tol
                && rect.height() > tol;
            if !rectangular {
                return Err(MeshFileError::BadFormat(
                    "Elems must be axis-aligned rectangles",
                ));
            }

            elems.push(Elem::new(elem_id, rect));
        }

        if elems.is_empty() {
            return Err(MeshFileError::BadFormat("Mesh file has no Elems"));
        }

        let base_ids = (0..elems.len()).collect();
        Ok(Self { elems, base_ids })
    }

    // ----------------------------------------------------------------------------------------------------
    // General Data Retrieval
    // ----------------------------------------------------------------------------------------------------

    /// Ids of the active leaf `Elem`s in ascending id order
    pub fn leaf_ids(&self) -> Vec<usize> {
        self.elems
            .iter()
            .filter(|elem| elem.is_leaf())
            .map(|elem| elem.id)
            .collect()
    }

    /// Number of active leaf `Elem`s
    pub fn num_leaves(&self) -> usize {
        self.elems.iter().filter(|elem| elem.is_leaf()).count()
    }

    /// Deepest h-refinement level among active leaves
    pub fn max_h_level(&self) -> u8 {
        self.elems
            .iter()
            .filter(|elem| elem.is_leaf())
            .map(|elem| elem.h_level)
            .max()
            .unwrap_or(0)
    }

    /// Get a list of an [`Elem`]s descendant's ids (pruned descendants excluded)
    pub fn descendant_elems(
        &self,
        elem_id: usize,
        include_starting_elem: bool,
    ) -> Result<Vec<usize>, HRefError> {
        if elem_id >= self.elems.len() {
            Err(HRefError::ElemDoesntExist(elem_id))
        } else {
            let mut descendants = Vec::new();
            self.rec_descendant_elems(elem_id, include_starting_elem, &mut descendants);
            Ok(descendants)
        }
    }

    fn rec_descendant_elems(&self, elem_id: usize, include: bool, desc: &mut Vec<usize>) {
        if self.elems[elem_id].is_pruned() {
            return;
        }
        if include {
            desc.push(elem_id);
        }
        if let Some(child_elem_ids) = self.elems[elem_id].child_ids() {
            for cei in child_elem_ids {
                self.rec_descendant_elems(*cei, true, desc);
            }
        }
    }

    /// Get a list of an [`Elem`]s ancestors's ids
    pub fn ancestor_elems(
        &self,
        elem_id: usize,
        include_starting_elem: bool,
    ) -> Result<Vec<usize>, HRefError> {
        if elem_id >= self.elems.len() {
            Err(HRefError::ElemDoesntExist(elem_id))
        } else {
            let mut ancestors: Vec<usize> = self.elems[elem_id].ancestor_ids().to_vec();
            if include_starting_elem {
                ancestors.push(elem_id);
            }
            Ok(ancestors)
        }
    }

    /// The active leaf `Elem` containing a physical point, found by quadtree descent
    ///
    /// Points on shared Elem boundaries resolve to the lowest-id candidate.
    pub fn leaf_containing(&self, x: f64, y: f64) -> Option<usize> {
        let base = self
            .base_ids
            .iter()
            .find(|id| self.elems[**id].rect.contains(x, y))?;

        let mut current = *base;
        loop {
            let elem = &self.elems[current];
            if elem.is_leaf() {
                return Some(current);
            }
            let child_ids = elem.child_ids()?;
            let next = child_ids
                .iter()
                .find(|cid| self.elems[**cid].rect.contains(x, y))?;
            current = *next;
        }
    }

    /// Active leaves sharing an edge segment with the given leaf
    pub fn leaf_neighbors(&self, elem_id: usize) -> Result<Vec<usize>, HRefError> {
        if elem_id >= self.elems.len() {
            return Err(HRefError::ElemDoesntExist(elem_id));
        }
        let rect = self.elems[elem_id].rect;
        Ok(self
            .elems
            .iter()
            .filter(|other| other.is_leaf() && other.id != elem_id)
            .filter(|other| rect.shares_edge(&other.rect))
            .map(|other| other.id)
            .collect())
    }

    // ----------------------------------------------------------------------------------------------------
    // h-refinement methods
    // ----------------------------------------------------------------------------------------------------

    /// Determine if this Elem can be h-refined
    /// * returns false if the Elem already has children or was pruned
    /// * returns false if any of the Elem's sides are shorter than [MIN_EDGE_LENGTH] after a split
    /// * returns an `Err` if the Mesh doesn't have `elem_id`
    pub fn elem_is_h_refineable(&self, elem_id: usize) -> Result<bool, HRefError> {
        if elem_id >= self.elems.len() {
            Err(HRefError::ElemDoesntExist(elem_id))
        } else {
            let elem = &self.elems[elem_id];
            Ok(elem.is_leaf() && elem.rect.min_side() / 2.0 > MIN_EDGE_LENGTH)
        }
    }

    /// Execute h-refinements on the given leaf `Elem`s
    ///
    /// With `regularity >= 0`, coarser leaf neighbors are recursively split first so
    /// that no pair of adjacent leaves differs by more than `regularity` levels
    /// (at most `regularity`-level hanging nodes). `regularity < 0` permits
    /// arbitrary-level hanging nodes.
    pub fn execute_h_refinements(
        &mut self,
        elem_ids: Vec<usize>,
        regularity: i32,
    ) -> Result<(), HRefError> {
        let unique_ids: BTreeSet<usize> = elem_ids.into_iter().collect();
        for elem_id in unique_ids {
            if elem_id >= self.elems.len() {
                return Err(HRefError::ElemDoesntExist(elem_id));
            }
            if self.elems[elem_id].is_pruned() {
                return Err(HRefError::ElemIsPruned(elem_id));
            }
            if !self.elems[elem_id].is_leaf() {
                return Err(HRefError::ElemHasChildren(elem_id));
            }
            self.refine_leaf(elem_id, regularity)?;
        }
        Ok(())
    }

    // split one leaf, enforcing the hanging-node regularity constraint on its neighborhood
    fn refine_leaf(&mut self, elem_id: usize, regularity: i32) -> Result<(), HRefError> {
        if !self.elem_is_h_refineable(elem_id)? {
            return Err(HRefError::EdgeTooShort(elem_id));
        }

        if regularity >= 0 {
            let new_level = self.elems[elem_id].h_level as i32 + 1;
            loop {
                let too_coarse: Vec<usize> = self
                    .leaf_neighbors(elem_id)?
                    .into_iter()
                    .filter(|nb| new_level - self.elems[*nb].h_level as i32 > regularity)
                    .collect();
                if too_coarse.is_empty() {
                    break;
                }
                for nb in too_coarse {
                    self.refine_leaf(nb, regularity)?;
                }
            }
        }

        let first_child_id = self.elems.len();
        let children: Vec<Elem> = (0..4)
            .map(|k| Elem::child_of(&self.elems[elem_id], k, first_child_id + k))
            .collect();
        let child_ids: SmallVec<[usize; 4]> = children.iter().map(|c| c.id).collect();

        self.elems[elem_id].set_children(child_ids)?;
        self.elems.extend(children);

        Ok(())
    }

    /// h-refine every eligible leaf once
    pub fn global_h_refinement(&mut self) -> Result<(), HRefError> {
        let refineable: Vec<usize> = self
            .leaf_ids()
            .into_iter()
            .filter(|id| self.elem_is_h_refineable(*id).unwrap_or(false))
            .collect();
        self.execute_h_refinements(refineable, -1)
    }

    /// Perform `n` uniform refinements of the whole Mesh
    pub fn refine_all_elems(&mut self, n: usize) -> Result<(), HRefError> {
        for _ in 0..n {
            self.global_h_refinement()?;
        }
        self.assert_leaves_exist();
        Ok(())
    }

    /// h-refine leaves selected by an external filter function, `times` levels deep
    pub fn refine_towards<F>(&mut self, filt: F, times: usize) -> Result<(), HRefError>
    where
        F: Fn(&Elem) -> bool,
    {
        for _ in 0..times {
            let marked: Vec<usize> = self
                .elems
                .iter()
                .filter(|elem| elem.is_leaf() && filt(elem))
                .filter(|elem| self.elem_is_h_refineable(elem.id).unwrap_or(false))
                .map(|elem| elem.id)
                .collect();
            self.execute_h_refinements(marked, -1)?;
        }
        Ok(())
    }

    // ----------------------------------------------------------------------------------------------------
    // de-refinement
    // ----------------------------------------------------------------------------------------------------

    /// Merge one refinement level: every Elem whose children are all active leaves
    /// becomes a leaf again, and the children are tombstoned
    ///
    /// Returns the number of Elems merged.
    pub fn unrefine_all_elements(&mut self) -> usize {
        let merge_ids: Vec<usize> = self
            .elems
            .iter()
            .filter(|elem| !elem.is_pruned())
            .filter(|elem| match elem.child_ids() {
                Some(child_ids) => child_ids.iter().all(|cid| self.elems[*cid].is_leaf()),
                None => false,
            })
            .map(|elem| elem.id)
            .collect();

        for parent_id in merge_ids.iter() {
            let child_ids: Vec<usize> = self.elems[*parent_id]
                .child_ids()
                .map(|ids| ids.to_vec())
                .unwrap_or_default();
            for cid in child_ids {
                self.elems[cid].prune();
            }
            self.elems[*parent_id].clear_children();
        }

        self.assert_leaves_exist();
        merge_ids.len()
    }

    fn assert_leaves_exist(&self) {
        assert!(
            self.elems.iter().any(|elem| elem.is_leaf()),
            "Mesh has no active leaves; topology is corrupt!"
        );
    }

    // ----------------------------------------------------------------------------------------------------
    // serialization
    // ----------------------------------------------------------------------------------------------------

    /// Produce a Json Object describing the complete refinement tree (tombstones included)
    pub fn to_json(&self) -> JsonValue {
        object! {
            "Tree": JsonValue::from(self.elems.iter().map(|elem| elem.to_json()).collect::<Vec<_>>()),
            "Base": JsonValue::from(self.base_ids.clone()),
        }
    }

    /// Reconstruct a Mesh from [`Mesh::to_json`] output
    pub fn from_json(json: &JsonValue) -> Result<Self, MeshFileError> {
        let elems: Vec<Elem> = json["Tree"]
            .members()
            .map(|e| Elem::from_json(e).ok_or(MeshFileError::BadFormat("bad Elem record")))
            .collect::<Result<_, _>>()?;
        let base_ids: Vec<usize> = json["Base"]
            .members()
            .map(|v| v.as_usize().ok_or(MeshFileError::BadFormat("bad base id")))
            .collect::<Result<_, _>>()?;

        if elems.is_empty() || base_ids.is_empty() {
            return Err(MeshFileError::BadFormat("empty mesh record"));
        }
        for (idx, elem) in elems.iter().enumerate() {
            if elem.id != idx {
                return Err(MeshFileError::BadFormat("Elem ids must be contiguous"));
            }
        }

        Ok(Self { elems, base_ids })
    }

    /// Print the mesh to a JSON file specified by path
    pub fn export_to_json(&self, path: impl AsRef<str>) -> std::io::Result<()> {
        let f = File::create(path.as_ref())?;
        let mut w = BufWriter::new(&f);
        self.to_json().write_pretty(&mut w, 4)?;
        Ok(())
    }
}

/// Error type for Mesh file parsing
#[derive(Debug)]
pub enum MeshFileError {
    Io(std::io::Error),
    Parse(json::Error),
    BadFormat(&'static str),
}

impl fmt::Display for MeshFileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "Failed to read Mesh file: {}", err),
            Self::Parse(err) => write!(f, "Unable to parse Mesh file as JSON: {}", err),
            Self::BadFormat(what) => write!(f, "Malformed Mesh file: {}!", what),
        }
    }
}

impl std::error::Error for MeshFileError {}

impl From<std::io::Error> for MeshFileError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<json::Error> for MeshFileError {
    fn from(err: json::Error) -> Self {
        Self::Parse(err)
    }
}
