//! Discrete solutions: tensor-Legendre coefficient vectors over a snapshot of a Space
//!
//! A `Solution` captures the DOF layout of its Space at construction time, so it
//! remains evaluable after the underlying Mesh is refined or de-refined. The
//! relationship to its Mesh is made explicit by [MeshHandle]: a Solution either
//! shares a live Mesh or owns a private deep copy.

use crate::mesh::Mesh;
use crate::space::{DofLayout, SharedMesh, Space};

use crate::basis::{legendre_deriv, legendre_table};
use crate::mesh::elem::Rect;
use crate::space::Patch;

use json::{object, JsonValue};
use nalgebra::DVector;

/// A Solution's relationship to its Mesh
///
/// Reference solutions produced by the adaptivity loop are built over a
/// temporary fine Mesh. Committing one as the previous-time-step state hands it
/// a private copy of that Mesh (`Owned`), so the temporary can be dropped
/// without invalidating the Solution.
#[derive(Debug, Clone)]
pub enum MeshHandle {
    /// A private deep copy, dropped with the Solution
    Owned(Box<Mesh>),
    /// A live Mesh shared with the Spaces of the system
    Shared(SharedMesh),
}

impl MeshHandle {
    /// Run `f` against the underlying Mesh
    pub fn with_mesh<T>(&self, f: impl FnOnce(&Mesh) -> T) -> T {
        match self {
            Self::Owned(mesh) => f(mesh),
            Self::Shared(mesh) => f(&mesh.read().expect("Shared Mesh lock was poisoned!")),
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// Deep copy of the underlying Mesh, regardless of ownership
    pub fn mesh_snapshot(&self) -> Mesh {
        self.with_mesh(|mesh| mesh.clone())
    }
}

/// One field's discrete state: a [DofLayout] snapshot and its coefficient vector
///
/// Coefficients are ordered patch-by-patch. Within a patch of order `p`, the
/// coefficient of `P_i(ξ) P_j(η)` sits at `offset + i * (p + 1) + j`, where `i`
/// indexes the x-direction mode and `j` the y-direction mode.
#[derive(Debug, Clone)]
pub struct Solution {
    layout: DofLayout,
    coeffs: DVector<f64>,
    mesh: MeshHandle,
}

impl Solution {
    /// The zero Solution over a Space's current layout (shares the Space's Mesh)
    pub fn zero(space: &Space) -> Self {
        let layout = space.layout();
        let coeffs = DVector::zeros(layout.num_dofs);
        Self {
            layout,
            coeffs,
            mesh: MeshHandle::Shared(space.mesh()),
        }
    }

    /// Wrap a solved coefficient vector over a Space's current layout
    pub fn from_coeffs(space: &Space, coeffs: DVector<f64>) -> Self {
        let layout = space.layout();
        assert_eq!(
            coeffs.len(),
            layout.num_dofs,
            "Coefficient vector does not match the Space's DOF count!"
        );
        Self {
            layout,
            coeffs,
            mesh: MeshHandle::Shared(space.mesh()),
        }
    }

    pub fn layout(&self) -> &DofLayout {
        &self.layout
    }

    pub fn num_dofs(&self) -> usize {
        self.layout.num_dofs
    }

    pub fn coeffs(&self) -> &DVector<f64> {
        &self.coeffs
    }

    pub fn mesh_handle(&self) -> &MeshHandle {
        &self.mesh
    }

    /// Does this Solution own a private copy of its Mesh
    pub fn owns_mesh(&self) -> bool {
        self.mesh.is_owned()
    }

    /// Convert to a Solution which owns a private deep copy of its Mesh
    ///
    /// Consumes the shared handle; afterwards the Mesh this Solution was built
    /// over can be dropped or mutated freely by others.
    pub fn into_owned(self) -> Self {
        let mesh = match self.mesh {
            MeshHandle::Owned(mesh) => MeshHandle::Owned(mesh),
            MeshHandle::Shared(shared) => MeshHandle::Owned(Box::new(
                shared.read().expect("Shared Mesh lock was poisoned!").clone(),
            )),
        };
        Self { mesh, ..self }
    }

    /// The coefficient block of one patch
    pub fn patch_coeffs(&self, patch_idx: usize) -> &[f64] {
        let patch = &self.layout.patches[patch_idx];
        &self.coeffs.as_slice()[patch.offset..patch.offset + patch.num_dofs()]
    }

    /// Mutable access to the coefficient block of one patch
    pub fn patch_coeffs_mut(&mut self, patch_idx: usize) -> &mut [f64] {
        let patch = &self.layout.patches[patch_idx];
        let range = patch.offset..patch.offset + patch.num_dofs();
        &mut self.coeffs.as_mut_slice()[range]
    }

    /// Mean value of the field over a patch
    ///
    /// The `P_0 P_0` mode is constant 1 and all higher modes integrate to zero,
    /// so the mean is the patch's first coefficient.
    pub fn patch_mean(&self, patch_idx: usize) -> f64 {
        self.coeffs[self.layout.patches[patch_idx].offset]
    }

    /// Index of the patch built over an Elem, if the layout contains one
    pub fn patch_index_of_elem(&self, elem_id: usize) -> Option<usize> {
        self.layout
            .patches
            .binary_search_by_key(&elem_id, |patch| patch.elem_id)
            .ok()
    }

    /// Evaluate one patch's expansion at a parametric point in `[-1, 1]²`
    pub fn eval_on_patch(&self, patch_idx: usize, xi: f64, eta: f64) -> f64 {
        let patch = &self.layout.patches[patch_idx];
        let n = patch.order as usize;
        let px = legendre_table(n, xi);
        let py = legendre_table(n, eta);
        let coeffs = self.patch_coeffs(patch_idx);

        let mut value = 0.0;
        for i in 0..=n {
            for j in 0..=n {
                value += coeffs[i * (n + 1) + j] * px[i] * py[j];
            }
        }
        value
    }

    /// Physical-space gradient of one patch's expansion at a parametric point
    pub fn grad_on_patch(&self, patch_idx: usize, xi: f64, eta: f64) -> [f64; 2] {
        let patch = &self.layout.patches[patch_idx];
        let n = patch.order as usize;
        let px = legendre_table(n, xi);
        let py = legendre_table(n, eta);
        let coeffs = self.patch_coeffs(patch_idx);

        let mut dxi = 0.0;
        let mut deta = 0.0;
        for i in 0..=n {
            for j in 0..=n {
                let c = coeffs[i * (n + 1) + j];
                dxi += c * legendre_deriv(i, xi) * py[j];
                deta += c * px[i] * legendre_deriv(j, eta);
            }
        }
        [
            dxi * 2.0 / patch.rect.width(),
            deta * 2.0 / patch.rect.height(),
        ]
    }

    /// Evaluate the field at a physical point
    ///
    /// Returns `None` outside the domain covered by this Solution's patches.
    /// The patches are the ones captured at construction time, so evaluation
    /// stays valid after the live Mesh changes under a shared handle.
    pub fn eval(&self, x: f64, y: f64) -> Option<f64> {
        let patch_idx = self.locate_patch(x, y)?;
        let patch = &self.layout.patches[patch_idx];
        let [xi, eta] = patch.rect.to_parametric(x, y);
        Some(self.eval_on_patch(patch_idx, xi, eta))
    }

    /// Serialize this Solution's patches and coefficients
    ///
    /// Coefficients are stored as their raw f64 bit patterns so a round trip
    /// through [`Solution::from_json`] is bit-for-bit exact.
    pub fn to_json(&self) -> JsonValue {
        object! {
            "patches": JsonValue::from(
                self.layout
                    .patches
                    .iter()
                    .map(|patch| {
                        object! {
                            "elem_id": patch.elem_id,
                            "rect": patch.rect.to_json(),
                            "order": patch.order,
                            "offset": patch.offset,
                        }
                    })
                    .collect::<Vec<_>>()
            ),
            "coeff_bits": JsonValue::from(
                self.coeffs.iter().map(|c| c.to_bits()).collect::<Vec<u64>>()
            ),
        }
    }

    /// Reconstruct a Solution from [`Solution::to_json`] output
    ///
    /// The restored Solution holds a shared handle to `mesh`; its patches need
    /// not match the Mesh's current leaves (evaluation falls back to the
    /// self-contained patch list).
    pub fn from_json(record: &JsonValue, mesh: &SharedMesh) -> Option<Self> {
        let patches: Vec<Patch> = record["patches"]
            .members()
            .map(|p| {
                Some(Patch {
                    elem_id: p["elem_id"].as_usize()?,
                    rect: Rect::from_json(&p["rect"])?,
                    order: p["order"].as_u8()?,
                    offset: p["offset"].as_usize()?,
                })
            })
            .collect::<Option<Vec<Patch>>>()?;
        let coeffs: Vec<f64> = record["coeff_bits"]
            .members()
            .map(|v| v.as_u64().map(f64::from_bits))
            .collect::<Option<Vec<f64>>>()?;

        let num_dofs = patches.iter().map(|patch| patch.num_dofs()).sum::<usize>();
        if num_dofs != coeffs.len() {
            return None;
        }

        Some(Self {
            layout: DofLayout {
                patches,
                num_dofs,
            },
            coeffs: DVector::from_vec(coeffs),
            mesh: MeshHandle::Shared(mesh.clone()),
        })
    }

    // fast path through the live Mesh's quadtree; falls back to a patch scan
    // when the layout no longer matches the Mesh's active leaves
    fn locate_patch(&self, x: f64, y: f64) -> Option<usize> {
        let by_mesh = self.mesh.with_mesh(|mesh| {
            mesh.leaf_containing(x, y)
                .and_then(|elem_id| self.patch_index_of_elem(elem_id))
                .filter(|idx| self.layout.patches[*idx].rect.contains(x, y))
        });
        by_mesh.or_else(|| {
            self.layout
                .patches
                .iter()
                .position(|patch| patch.rect.contains(x, y))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::elem::Rect;
    use crate::space::share_mesh;
    use std::sync::Arc;

    fn setup() -> (SharedMesh, Space) {
        let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 2, 2));
        let space = Space::new(&mesh, 1).unwrap();
        (mesh, space)
    }

    #[test]
    fn constant_mode_evaluates_everywhere() {
        let (_, space) = setup();
        let mut sln = Solution::zero(&space);
        for idx in 0..sln.layout().patches.len() {
            sln.patch_coeffs_mut(idx)[0] = 3.5;
        }
        assert!((sln.eval(0.1, 0.9).unwrap() - 3.5).abs() < 1e-14);
        assert!((sln.eval(0.7, 0.2).unwrap() - 3.5).abs() < 1e-14);
        assert_eq!(sln.eval(1.5, 0.5), None);
        assert!((sln.patch_mean(0) - 3.5).abs() < 1e-14);
    }

    #[test]
    fn linear_mode_reproduces_parametric_coordinate() {
        let (_, space) = setup();
        let mut sln = Solution::zero(&space);
        // patch 0 covers [0, 0.5]²; set the P_1(ξ) mode (i = 1, j = 0)
        sln.patch_coeffs_mut(0)[2] = 1.0;
        // x = 0.375 maps to ξ = 0.5 on patch 0
        assert!((sln.eval(0.375, 0.25).unwrap() - 0.5).abs() < 1e-14);
        // the P_1 mode has zero mean
        assert!(sln.patch_mean(0).abs() < 1e-14);
    }

    #[test]
    fn survives_mesh_refinement_under_shared_handle() {
        let (mesh, space) = setup();
        let mut sln = Solution::zero(&space);
        for idx in 0..sln.layout().patches.len() {
            sln.patch_coeffs_mut(idx)[0] = 2.0;
        }

        mesh.write().unwrap().global_h_refinement().unwrap();

        // the snapshot layout still evaluates
        assert!((sln.eval(0.3, 0.3).unwrap() - 2.0).abs() < 1e-14);
    }

    #[test]
    fn into_owned_detaches_from_the_shared_mesh() {
        let (mesh, space) = setup();
        let sln = Solution::zero(&space);
        assert!(!sln.owns_mesh());

        let owned = sln.into_owned();
        assert!(owned.owns_mesh());
        assert_eq!(Arc::strong_count(&mesh), 2); // mesh + space; owned sln dropped its handle

        drop(space);
        drop(mesh);
        assert!(owned.eval(0.5, 0.5).is_some());
    }
}
