//! Visualization output: sampled solution fields and derived quantities as legacy-VTK files
//!
//! Each Solution patch is sampled on a uniform parametric grid and written as a
//! block of quad cells. Derived quantities (pressure, Mach number, entropy and
//! the like) are pointwise functions of the field state vector, recomputed from
//! the current solutions on every [`FieldExport::reinit`].

use crate::solution::Solution;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};

/// A scalar quantity computed pointwise from the field state vector
pub struct DerivedField {
    name: String,
    func: Box<dyn Fn(&[f64]) -> f64 + Send + Sync>,
}

impl DerivedField {
    pub fn new(name: impl Into<String>, func: impl Fn(&[f64]) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Samples a multi-field solution set for VTK export
///
/// Sampled values are cached between [`FieldExport::reinit`] calls, so one
/// sampling pass can serve several output files.
pub struct FieldExport {
    field_names: Vec<String>,
    derived: Vec<DerivedField>,
    densities: [usize; 2],
    parametric_points: [Vec<f64>; 2],
    quantities: Vec<FieldQuantity>,
    patch_rects: Vec<crate::mesh::elem::Rect>,
}

impl FieldExport {
    /// * `field_names`: one name per solution field, in field order
    /// * `densities`: evaluation points per patch in the x and y directions
    pub fn new(field_names: Vec<String>, densities: [usize; 2]) -> Self {
        assert!(
            densities[0] >= 2 && densities[1] >= 2,
            "Field sampling requires at least 2 points per direction!"
        );
        Self {
            field_names,
            derived: Vec::new(),
            densities,
            parametric_points: [
                uniform_range(-1.0, 1.0, densities[0]),
                uniform_range(-1.0, 1.0, densities[1]),
            ],
            quantities: Vec::new(),
            patch_rects: Vec::new(),
        }
    }

    pub fn add_derived(&mut self, derived: DerivedField) -> &mut Self {
        self.derived.push(derived);
        self
    }

    /// Resample every base and derived quantity from the given solutions
    pub fn reinit(&mut self, slns: &[Solution]) {
        assert_eq!(
            slns.len(),
            self.field_names.len(),
            "Number of Solutions must match the export's field names!"
        );

        let [nx, ny] = self.densities;
        let num_patches = slns[0].layout().patches.len();

        self.patch_rects = slns[0]
            .layout()
            .patches
            .iter()
            .map(|patch| patch.rect)
            .collect();

        let mut quantities: Vec<FieldQuantity> = self
            .field_names
            .iter()
            .map(|name| FieldQuantity::new(name))
            .chain(self.derived.iter().map(|d| FieldQuantity::new(&d.name)))
            .collect();

        for patch_idx in 0..num_patches {
            let mut values = vec![vec![vec![0.0; ny]; nx]; quantities.len()];
            for (a, xi) in self.parametric_points[0].iter().enumerate() {
                for (b, eta) in self.parametric_points[1].iter().enumerate() {
                    let state: Vec<f64> = slns
                        .iter()
                        .map(|sln| sln.eval_on_patch(patch_idx, *xi, *eta))
                        .collect();
                    for (f, s) in state.iter().enumerate() {
                        values[f][a][b] = *s;
                    }
                    for (d, derived) in self.derived.iter().enumerate() {
                        values[self.field_names.len() + d][a][b] = (derived.func)(&state);
                    }
                }
            }
            for (q, quantity) in quantities.iter_mut().enumerate() {
                quantity.insert_patch_values(patch_idx, std::mem::take(&mut values[q]));
            }
        }

        self.quantities = quantities;
    }

    /// Write every sampled quantity to a VTK file at `path`
    ///
    /// These files can be plotted using [Visit](https://wci.llnl.gov/simulation/computer-codes/visit)
    pub fn print_all_to_vtk(&self, path: impl AsRef<str>) -> std::io::Result<()> {
        assert!(
            !self.quantities.is_empty(),
            "FieldExport must be reinit-ed before printing!"
        );

        let output_file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(&output_file);

        let [nx, ny] = self.densities;
        let num_patches = self.patch_rects.len();

        // header
        writeln!(writer, "# vtk DataFile Version 3.0")?;
        writeln!(writer, "# File generated by hp_adapt_2d\n")?;
        writeln!(writer, "ASCII")?;
        writeln!(writer, "DATASET UNSTRUCTURED_GRID")?;

        // points
        let num_points = nx * ny * num_patches;
        writeln!(writer, "\nPOINTS {} double", num_points)?;
        for rect in self.patch_rects.iter() {
            for x in uniform_range(rect.x_min, rect.x_max, nx) {
                for y in uniform_range(rect.y_min, rect.y_max, ny) {
                    writeln!(writer, "{:.10} {:.10} 0.0", x, y)?;
                }
            }
        }

        // cells
        let num_cells = (nx - 1) * (ny - 1) * num_patches;
        writeln!(writer, "\nCELLS {} {}", num_cells, 5 * num_cells)?;
        for k in 0..num_patches {
            for a in 0..(nx - 1) {
                for b in 0..(ny - 1) {
                    let initial_pt = a * ny + b + (nx * ny) * k;
                    writeln!(
                        writer,
                        "4\t{}\t{}\t{}\t{}",
                        initial_pt,
                        initial_pt + ny,
                        initial_pt + ny + 1,
                        initial_pt + 1,
                    )?;
                }
            }
        }

        // cell types
        writeln!(writer, "\nCELL_TYPES {}", num_cells)?;
        for _ in 0..num_cells {
            write!(writer, " 9")?;
        }
        writeln!(writer)?;

        // field values
        writeln!(writer, "POINT_DATA {}", num_points)?;
        for quantity in self.quantities.iter() {
            quantity.write_vtk_quantity(&mut writer)?;
        }
        writeln!(writer)?;

        Ok(())
    }
}

struct FieldQuantity {
    values: BTreeMap<usize, Vec<Vec<f64>>>,
    name: String,
}

impl FieldQuantity {
    fn new(name: &str) -> Self {
        Self {
            values: BTreeMap::new(),
            name: name.to_string(),
        }
    }

    fn insert_patch_values(&mut self, patch_idx: usize, values: Vec<Vec<f64>>) {
        if self.values.insert(patch_idx, values).is_some() {
            panic!(
                "Field Quantity '{}' already had values for patch {}; cannot assign new values!",
                self.name, patch_idx
            );
        }
    }

    fn write_vtk_quantity(&self, writer: &mut BufWriter<&File>) -> std::io::Result<()> {
        writeln!(
            writer,
            "SCALARS {} double 1 \nLOOKUP_TABLE default",
            self.name
        )?;

        for (_, patch_values) in self.values.iter() {
            for row_values in patch_values {
                for value in row_values {
                    write!(writer, "{:.15} ", value)?;
                }
            }
        }
        writeln!(writer)?;

        Ok(())
    }
}

fn uniform_range(min: f64, max: f64, n: usize) -> Vec<f64> {
    let step = (max - min) / ((n - 1) as f64);
    (0..n).map(|i| (i as f64) * step + min).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::elem::Rect;
    use crate::mesh::Mesh;
    use crate::projection::project_fn;
    use crate::space::{share_mesh, Space};

    fn sample_export() -> (FieldExport, Vec<Solution>) {
        let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 2, 2));
        let space = Space::new(&mesh, 1).unwrap();
        let slns = vec![
            project_fn(&space, |x, _| 2.0 * x),
            project_fn(&space, |_, y| y + 1.0),
        ];

        let mut export = FieldExport::new(vec!["u".into(), "v".into()], [3, 3]);
        export.add_derived(DerivedField::new("sum", |state| state[0] + state[1]));
        export.reinit(&slns);
        (export, slns)
    }

    #[test]
    fn derived_quantities_follow_the_state() {
        let (export, _) = sample_export();
        let sum = export
            .quantities
            .iter()
            .find(|q| q.name == "sum")
            .unwrap();

        // at the SW corner of patch 0: u = 0, v = 1
        assert!((sum.values.get(&0).unwrap()[0][0] - 1.0).abs() < 1e-12);
        // at the NE corner of the last patch: u = 2, v = 2
        let last = sum.values.iter().next_back().unwrap().1;
        assert!((last[2][2] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn vtk_file_has_consistent_counts() {
        let (export, _) = sample_export();
        let path = std::env::temp_dir().join("hp_adapt_2d_fields_test.vtk");
        export.print_all_to_vtk(path.to_string_lossy()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        // 4 patches, 3x3 points each
        assert!(contents.contains("POINTS 36 double"));
        assert!(contents.contains("CELLS 16 80"));
        assert!(contents.contains("POINT_DATA 36"));
        assert!(contents.contains("SCALARS u double 1"));
        assert!(contents.contains("SCALARS sum double 1"));
    }
}
