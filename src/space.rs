//! Per-field DOF bookkeeping over a shared `Mesh`
//!
//! One `Space` exists per physical field (e.g. density, x-momentum, ...). Many
//! Spaces reference the same Mesh; each carries its own per-Elem polynomial
//! expansion orders. The basis is the discontinuous tensor-Legendre (L2)
//! shapeset, so every active leaf Elem contributes an independent block of
//! `(order + 1)²` degrees of freedom.

use crate::basis::MAX_POLY_ORDER;
use crate::mesh::elem::Rect;
use crate::mesh::refinement::{HRefError, PRefError};
use crate::mesh::Mesh;

use json::{object, JsonValue};
use std::sync::{Arc, RwLock};

/// A Mesh shared between the Spaces of a coupled system
pub type SharedMesh = Arc<RwLock<Mesh>>;

/// Wrap a Mesh for sharing between Spaces
pub fn share_mesh(mesh: Mesh) -> SharedMesh {
    Arc::new(RwLock::new(mesh))
}

/// One Elem's block of DOFs in a [DofLayout]
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub elem_id: usize,
    pub rect: Rect,
    pub order: u8,
    pub offset: usize,
}

impl Patch {
    /// Number of DOFs in this patch: `(order + 1)²`
    pub fn num_dofs(&self) -> usize {
        let n = self.order as usize + 1;
        n * n
    }
}

/// The DOF numbering of a Space at one instant: active leaf patches in Elem-id order
#[derive(Debug, Clone, PartialEq)]
pub struct DofLayout {
    pub patches: Vec<Patch>,
    pub num_dofs: usize,
}

impl DofLayout {
    /// Do two layouts describe the same discretization (same patches, same orders)
    pub fn matches(&self, other: &DofLayout) -> bool {
        self.num_dofs == other.num_dofs && self.patches == other.patches
    }
}

/// DOF bookkeeping for a single physical field over a shared Mesh
#[derive(Debug, Clone)]
pub struct Space {
    mesh: SharedMesh,
    orders: Vec<u8>,
}

impl Space {
    /// Construct a Space over a shared Mesh with a uniform initial expansion order
    pub fn new(mesh: &SharedMesh, p_init: u8) -> Result<Self, PRefError> {
        if p_init > MAX_POLY_ORDER {
            return Err(PRefError::ExceededMaxExpansion(0));
        }
        let num_elems = mesh.read().expect("Shared Mesh lock was poisoned!").elems.len();
        Ok(Self {
            mesh: mesh.clone(),
            orders: vec![p_init; num_elems],
        })
    }

    /// Handle to the shared Mesh this Space is built on
    pub fn mesh(&self) -> SharedMesh {
        self.mesh.clone()
    }

    /// The expansion order on an Elem; Elems created after the last order
    /// mutation inherit their nearest recorded ancestor's order
    pub fn order_of(&self, mesh: &Mesh, elem_id: usize) -> u8 {
        if elem_id < self.orders.len() {
            self.orders[elem_id]
        } else {
            let recorded_ancestor = mesh.elems[elem_id]
                .ancestor_ids()
                .iter()
                .rev()
                .find(|aid| **aid < self.orders.len())
                .copied()
                .expect("Elem has no recorded ancestor; Space orders are corrupt!");
            self.orders[recorded_ancestor]
        }
    }

    // extend the order table to cover Elems created since the last mutation
    fn sync_orders(&mut self, mesh: &Mesh) {
        for elem_id in self.orders.len()..mesh.elems.len() {
            let inherited = self.order_of(mesh, elem_id);
            self.orders.push(inherited);
        }
    }

    /// Number of DOFs in this Space
    pub fn num_dofs(&self) -> usize {
        let mesh = self.mesh.read().expect("Shared Mesh lock was poisoned!");
        mesh.elems
            .iter()
            .filter(|elem| elem.is_leaf())
            .map(|elem| {
                let n = self.order_of(&mesh, elem.id) as usize + 1;
                n * n
            })
            .sum()
    }

    /// Snapshot the DOF numbering: one [Patch] per active leaf, in Elem-id order
    pub fn layout(&self) -> DofLayout {
        let mesh = self.mesh.read().expect("Shared Mesh lock was poisoned!");
        let mut patches = Vec::with_capacity(mesh.num_leaves());
        let mut offset = 0;
        for elem in mesh.elems.iter().filter(|elem| elem.is_leaf()) {
            let order = self.order_of(&mesh, elem.id);
            let patch = Patch {
                elem_id: elem.id,
                rect: elem.rect,
                order,
                offset,
            };
            offset += patch.num_dofs();
            patches.push(patch);
        }
        DofLayout {
            patches,
            num_dofs: offset,
        }
    }

    /// Set every Elem's expansion order to a uniform value
    pub fn set_uniform_order(&mut self, order: u8) -> Result<(), PRefError> {
        if order > MAX_POLY_ORDER {
            return Err(PRefError::ExceededMaxExpansion(0));
        }
        let num_elems = self.mesh.read().expect("Shared Mesh lock was poisoned!").elems.len();
        self.orders = vec![order; num_elems];
        Ok(())
    }

    /// Shift every Elem's expansion order by `delta`, never dropping below `floor`
    /// (or above [MAX_POLY_ORDER])
    pub fn adjust_element_order(&mut self, delta: i8, floor: u8) {
        let mesh = self.mesh.clone();
        let mesh = mesh.read().expect("Shared Mesh lock was poisoned!");
        self.sync_orders(&mesh);
        for order in self.orders.iter_mut() {
            let shifted = (*order as i16 + delta as i16).max(floor as i16);
            *order = (shifted as u8).min(MAX_POLY_ORDER);
        }
    }

    /// Copy another Space's expansion orders (both must share the same Mesh)
    pub fn copy_orders(&mut self, other: &Space) {
        assert!(
            Arc::ptr_eq(&self.mesh, &other.mesh),
            "Spaces are built on different Meshes; cannot copy orders!"
        );
        self.orders = other.orders.clone();
    }

    /// Raise the expansion order on specific Elems by `delta`
    ///
    /// Orders saturate at `cap` rather than erroring: the refinement selector is
    /// responsible for not proposing p-refinements past its own order limit.
    pub fn p_refine_elems(&mut self, elem_ids: &[usize], delta: u8, cap: u8) -> Result<(), PRefError> {
        let mesh = self.mesh.clone();
        let mesh = mesh.read().expect("Shared Mesh lock was poisoned!");
        self.sync_orders(&mesh);
        let cap = cap.min(MAX_POLY_ORDER);
        for elem_id in elem_ids {
            if *elem_id >= self.orders.len() {
                return Err(PRefError::ElemDoesntExist(*elem_id));
            }
            self.orders[*elem_id] = (self.orders[*elem_id] + delta).min(cap);
        }
        Ok(())
    }

    /// Split specific leaf Elems of the shared Mesh; children inherit the parent's order
    pub fn execute_h_refinements(
        &mut self,
        elem_ids: Vec<usize>,
        regularity: i32,
    ) -> Result<(), HRefError> {
        let mesh = self.mesh.clone();
        let mut mesh = mesh.write().expect("Shared Mesh lock was poisoned!");
        mesh.execute_h_refinements(elem_ids, regularity)
    }

    /// Merge one refinement level of the shared Mesh (see [`Mesh::unrefine_all_elements`])
    ///
    /// Returns the number of Elems merged. Sister Spaces see the same topology
    /// change through the shared Mesh; their orders need no adjustment because
    /// parent Elems retain their recorded orders.
    pub fn unrefine_all_mesh_elements(&mut self) -> usize {
        let mesh = self.mesh.clone();
        let mut mesh = mesh.write().expect("Shared Mesh lock was poisoned!");
        let merged = mesh.unrefine_all_elements();
        self.sync_orders(&mesh);
        merged
    }

    /// Serialize the order table (for checkpointing)
    pub fn to_json(&self) -> JsonValue {
        object! {
            "orders": JsonValue::from(self.orders.clone()),
        }
    }

    /// Restore the order table from [`Space::to_json`] output
    pub fn apply_json(&mut self, record: &JsonValue) -> Option<()> {
        let orders: Vec<u8> = record["orders"]
            .members()
            .map(|v| v.as_u8())
            .collect::<Option<Vec<u8>>>()?;
        self.orders = orders;
        Some(())
    }
}

/// Combined DOF count of a coupled system's Spaces
pub fn total_num_dofs(spaces: &[Space]) -> usize {
    spaces.iter().map(|space| space.num_dofs()).sum()
}

/// The per-iteration reference discretization: a finer copy of the coarse Mesh
/// plus one refined Space per field
///
/// Owns the reference Mesh. Dropping a `RefSpaces` releases the whole
/// reference discretization; the adaptivity loop relies on this to release its
/// per-iteration temporaries on every exit path.
#[derive(Debug)]
pub struct RefSpaces {
    mesh: SharedMesh,
    spaces: Vec<Space>,
}

impl RefSpaces {
    pub fn spaces(&self) -> &[Space] {
        &self.spaces
    }

    pub fn mesh(&self) -> &SharedMesh {
        &self.mesh
    }

    pub fn num_dofs(&self) -> usize {
        total_num_dofs(&self.spaces)
    }
}

/// Construct the reference Spaces for one adaptivity iteration: a deep copy of
/// the coarse Mesh refined one level, with every Elem's order raised by
/// `order_increase` (saturating at [MAX_POLY_ORDER])
pub fn construct_refined_spaces(
    coarse: &[Space],
    order_increase: u8,
) -> Result<RefSpaces, HRefError> {
    assert!(!coarse.is_empty(), "Cannot refine an empty set of Spaces!");

    let mut ref_mesh = coarse[0]
        .mesh
        .read()
        .expect("Shared Mesh lock was poisoned!")
        .clone();
    ref_mesh.global_h_refinement()?;
    let shared = share_mesh(ref_mesh);

    let spaces = coarse
        .iter()
        .map(|coarse_space| {
            let mesh = shared.read().expect("Shared Mesh lock was poisoned!");
            let orders: Vec<u8> = (0..mesh.elems.len())
                .map(|elem_id| {
                    let base = coarse_space.order_of(&mesh, elem_id);
                    (base + order_increase).min(MAX_POLY_ORDER)
                })
                .collect();
            drop(mesh);
            Space {
                mesh: shared.clone(),
                orders,
            }
        })
        .collect();

    Ok(RefSpaces {
        mesh: shared,
        spaces,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::elem::Rect;

    fn two_field_setup() -> (SharedMesh, Space, Space) {
        let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 2, 2));
        let a = Space::new(&mesh, 1).unwrap();
        let b = Space::new(&mesh, 2).unwrap();
        (mesh, a, b)
    }

    #[test]
    fn dof_counts() {
        let (_, a, b) = two_field_setup();
        assert_eq!(a.num_dofs(), 4 * 4); // 4 leaves, (1+1)²
        assert_eq!(b.num_dofs(), 4 * 9);
        assert_eq!(total_num_dofs(&[a, b]), 16 + 36);
    }

    #[test]
    fn children_inherit_orders() {
        let (_, mut a, _) = two_field_setup();
        a.p_refine_elems(&[0], 2, MAX_POLY_ORDER).unwrap(); // elem 0 now order 3
        a.execute_h_refinements(vec![0], -1).unwrap();

        let mesh = a.mesh();
        let mesh = mesh.read().unwrap();
        let child_ids = mesh.elems[0].child_ids().unwrap().clone();
        for cid in child_ids {
            assert_eq!(a.order_of(&mesh, cid), 3);
        }
        // elem 1 is untouched
        assert_eq!(a.order_of(&mesh, 1), 1);
    }

    #[test]
    fn layout_is_contiguous_and_ordered() {
        let (_, mut a, _) = two_field_setup();
        a.execute_h_refinements(vec![2], -1).unwrap();

        let layout = a.layout();
        assert_eq!(layout.num_dofs, a.num_dofs());

        let mut expected_offset = 0;
        let mut last_id = None;
        for patch in &layout.patches {
            assert_eq!(patch.offset, expected_offset);
            expected_offset += patch.num_dofs();
            if let Some(last) = last_id {
                assert!(patch.elem_id > last);
            }
            last_id = Some(patch.elem_id);
        }
    }

    #[test]
    fn adjust_element_order_respects_floor_and_cap() {
        let (_, mut a, _) = two_field_setup();
        a.adjust_element_order(-5, 1);
        let mesh = a.mesh();
        let mesh_guard = mesh.read().unwrap();
        assert_eq!(a.order_of(&mesh_guard, 0), 1);
        drop(mesh_guard);

        a.adjust_element_order(120, 0);
        let mesh_guard = mesh.read().unwrap();
        assert_eq!(a.order_of(&mesh_guard, 0), MAX_POLY_ORDER);
    }

    #[test]
    fn copy_orders_matches_fields() {
        let (_, mut a, mut b) = two_field_setup();
        a.p_refine_elems(&[1], 1, MAX_POLY_ORDER).unwrap();
        b.copy_orders(&a);
        assert_eq!(a.num_dofs(), b.num_dofs());
    }

    #[test]
    fn refined_spaces_have_more_dofs() {
        let (_, a, b) = two_field_setup();
        let coarse = vec![a, b];
        let coarse_ndof = total_num_dofs(&coarse);

        let refined = construct_refined_spaces(&coarse, 1).unwrap();
        assert!(refined.num_dofs() > coarse_ndof);

        // 16 leaves after the global refinement; orders raised by one
        assert_eq!(refined.num_dofs(), 16 * 9 + 16 * 16);

        // the coarse mesh is untouched
        assert_eq!(total_num_dofs(&coarse), coarse_ndof);
        assert_eq!(
            coarse[0].mesh().read().unwrap().num_leaves(),
            4
        );
    }

    #[test]
    fn unrefine_keeps_sister_spaces_consistent() {
        let (_, mut a, mut b) = two_field_setup();
        a.execute_h_refinements(vec![0, 1], -1).unwrap();
        let merged = a.unrefine_all_mesh_elements();
        assert_eq!(merged, 2);
        assert_eq!(a.num_dofs(), 4 * 4);
        assert_eq!(b.num_dofs(), 4 * 9);

        // orders survive a refine/unrefine cycle
        b.adjust_element_order(-1, 1);
        assert_eq!(b.num_dofs(), 4 * 4);
    }

    #[test]
    fn order_table_round_trips_through_json() {
        let (_, mut a, _) = two_field_setup();
        a.p_refine_elems(&[0, 3], 1, MAX_POLY_ORDER).unwrap();
        let record = a.to_json();

        let mesh = a.mesh();
        let mut restored = Space::new(&mesh, 1).unwrap();
        restored.apply_json(&record).unwrap();
        assert_eq!(restored.num_dofs(), a.num_dofs());
    }
}
