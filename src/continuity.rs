//! Checkpoint records for resuming long runs
//!
//! A [Continuity] store manages numbered JSON records in one directory. Each
//! record captures a fully self-consistent run state: mesh, per-field space
//! orders, per-field solutions, step size, and simulation time. Records are
//! written to a temporary name and renamed into place, so a record is either
//! completely present or absent.

use crate::mesh::{Mesh, MeshFileError};
use crate::solution::Solution;
use crate::space::{SharedMesh, Space};

use json::{object, JsonValue};
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// One checkpoint's content, buffered in memory until committed
#[derive(Debug, Clone)]
pub struct Record {
    num: usize,
    time: f64,
    mesh: Option<JsonValue>,
    spaces: Vec<JsonValue>,
    solutions: Vec<JsonValue>,
    time_step_length: Option<f64>,
}

impl Record {
    pub fn new(num: usize, time: f64) -> Self {
        Self {
            num,
            time,
            mesh: None,
            spaces: Vec::new(),
            solutions: Vec::new(),
            time_step_length: None,
        }
    }

    pub fn get_num(&self) -> usize {
        self.num
    }

    pub fn get_time(&self) -> f64 {
        self.time
    }

    pub fn get_time_step_length(&self) -> Option<f64> {
        self.time_step_length
    }

    pub fn save_mesh(&mut self, mesh: &Mesh) -> &mut Self {
        self.mesh = Some(mesh.to_json());
        self
    }

    pub fn save_spaces(&mut self, spaces: &[Space]) -> &mut Self {
        self.spaces = spaces.iter().map(|space| space.to_json()).collect();
        self
    }

    pub fn save_solutions(&mut self, slns: &[Solution]) -> &mut Self {
        self.solutions = slns.iter().map(|sln| sln.to_json()).collect();
        self
    }

    pub fn save_time_step_length(&mut self, dt: f64) -> &mut Self {
        self.time_step_length = Some(dt);
        self
    }

    pub fn load_mesh(&self) -> Result<Mesh, ContinuityError> {
        match &self.mesh {
            Some(mesh_json) => Ok(Mesh::from_json(mesh_json)?),
            None => Err(ContinuityError::Incomplete("mesh")),
        }
    }

    /// Rebuild the Spaces over a (restored) shared Mesh
    pub fn load_spaces(&self, mesh: &SharedMesh) -> Result<Vec<Space>, ContinuityError> {
        if self.spaces.is_empty() {
            return Err(ContinuityError::Incomplete("spaces"));
        }
        self.spaces
            .iter()
            .map(|record| {
                let mut space =
                    Space::new(mesh, 0).map_err(|_| ContinuityError::Malformed("space"))?;
                space
                    .apply_json(record)
                    .ok_or(ContinuityError::Malformed("space"))?;
                Ok(space)
            })
            .collect()
    }

    /// Rebuild the Solutions, bound to a (restored) shared Mesh
    pub fn load_solutions(&self, mesh: &SharedMesh) -> Result<Vec<Solution>, ContinuityError> {
        if self.solutions.is_empty() {
            return Err(ContinuityError::Incomplete("solutions"));
        }
        self.solutions
            .iter()
            .map(|record| {
                Solution::from_json(record, mesh).ok_or(ContinuityError::Malformed("solution"))
            })
            .collect()
    }

    fn to_json(&self) -> JsonValue {
        object! {
            "num": self.num,
            "time": JsonValue::from(self.time.to_bits()),
            "time_step_length": JsonValue::from(self.time_step_length.map(f64::to_bits)),
            "mesh": self.mesh.clone().unwrap_or(JsonValue::Null),
            "spaces": JsonValue::from(self.spaces.clone()),
            "solutions": JsonValue::from(self.solutions.clone()),
        }
    }

    fn from_json(record: &JsonValue) -> Result<Self, ContinuityError> {
        let num = record["num"]
            .as_usize()
            .ok_or(ContinuityError::Malformed("num"))?;
        let time = record["time"]
            .as_u64()
            .map(f64::from_bits)
            .ok_or(ContinuityError::Malformed("time"))?;
        let time_step_length = record["time_step_length"].as_u64().map(f64::from_bits);

        Ok(Self {
            num,
            time,
            mesh: match &record["mesh"] {
                JsonValue::Null => None,
                mesh_json => Some(mesh_json.clone()),
            },
            spaces: record["spaces"].members().cloned().collect(),
            solutions: record["solutions"].members().cloned().collect(),
            time_step_length,
        })
    }
}

/// A directory of numbered checkpoint records
pub struct Continuity {
    dir: PathBuf,
}

impl Continuity {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, ContinuityError> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn record_path(&self, num: usize) -> PathBuf {
        self.dir.join(format!("record_{}.json", num))
    }

    /// Is there at least one complete record to resume from
    pub fn have_record_available(&self) -> bool {
        matches!(self.last_record_num(), Ok(Some(_)))
    }

    /// The number of the newest complete record
    pub fn last_record_num(&self) -> Result<Option<usize>, ContinuityError> {
        let mut newest = None;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(num) = name
                .strip_prefix("record_")
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|digits| digits.parse::<usize>().ok())
            {
                newest = Some(newest.map_or(num, |n: usize| n.max(num)));
            }
        }
        Ok(newest)
    }

    /// Commit a record: write to a temporary name, then rename into place
    pub fn add_record(&self, record: &Record) -> Result<(), ContinuityError> {
        let final_path = self.record_path(record.get_num());
        let tmp_path = final_path.with_extension("json.tmp");

        {
            let file = fs::File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            record.to_json().write(&mut writer)?;
            writer.flush()?;
        }
        fs::rename(&tmp_path, &final_path)?;

        info!(num = record.get_num(), time = record.get_time(), "checkpoint written");
        Ok(())
    }

    /// Load a record by number
    pub fn load_record(&self, num: usize) -> Result<Record, ContinuityError> {
        let contents = fs::read_to_string(self.record_path(num))?;
        Record::from_json(&json::parse(&contents)?)
    }

    /// Load the newest record
    pub fn last_record(&self) -> Result<Record, ContinuityError> {
        match self.last_record_num()? {
            Some(num) => self.load_record(num),
            None => Err(ContinuityError::NoRecords),
        }
    }
}

/// Error type for checkpoint persistence
#[derive(Debug)]
pub enum ContinuityError {
    Io(std::io::Error),
    Parse(json::Error),
    Mesh(MeshFileError),
    Incomplete(&'static str),
    Malformed(&'static str),
    NoRecords,
}

impl fmt::Display for ContinuityError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "Checkpoint I/O failed: {}", err),
            Self::Parse(err) => write!(f, "Unable to parse checkpoint record as JSON: {}", err),
            Self::Mesh(err) => write!(f, "Unable to restore Mesh from checkpoint: {}", err),
            Self::Incomplete(what) => {
                write!(f, "Checkpoint record is missing its {} section!", what)
            }
            Self::Malformed(what) => write!(f, "Malformed {} section in checkpoint record!", what),
            Self::NoRecords => write!(f, "No checkpoint records available to restore from!"),
        }
    }
}

impl std::error::Error for ContinuityError {}

impl From<std::io::Error> for ContinuityError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<json::Error> for ContinuityError {
    fn from(err: json::Error) -> Self {
        Self::Parse(err)
    }
}

impl From<MeshFileError> for ContinuityError {
    fn from(err: MeshFileError) -> Self {
        Self::Mesh(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::elem::Rect;
    use crate::projection::project_fn;
    use crate::space::share_mesh;

    fn tmp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("hp_adapt_2d_continuity_{}", tag));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn fresh_store_has_no_records() {
        let store = Continuity::new(tmp_dir("empty")).unwrap();
        assert!(!store.have_record_available());
        assert!(matches!(store.last_record(), Err(ContinuityError::NoRecords)));
    }

    #[test]
    fn record_round_trip_is_bit_exact() {
        let store = Continuity::new(tmp_dir("round_trip")).unwrap();

        let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 2, 2));
        mesh.write().unwrap().execute_h_refinements(vec![0], -1).unwrap();
        let mut space = Space::new(&mesh, 1).unwrap();
        space.p_refine_elems(&[1], 2, 4).unwrap();
        let sln = project_fn(&space, |x, y| (7.3 * x).sin() + y / 3.0);

        let dt = 0.1 + f64::EPSILON;
        let time = 2.0 / 3.0;
        let mut record = Record::new(5, time);
        record
            .save_mesh(&mesh.read().unwrap())
            .save_spaces(std::slice::from_ref(&space))
            .save_solutions(std::slice::from_ref(&sln))
            .save_time_step_length(dt);
        store.add_record(&record).unwrap();

        assert!(store.have_record_available());
        let restored = store.last_record().unwrap();
        assert_eq!(restored.get_num(), 5);
        assert_eq!(restored.get_time().to_bits(), time.to_bits());
        assert_eq!(
            restored.get_time_step_length().unwrap().to_bits(),
            dt.to_bits()
        );

        let r_mesh = share_mesh(restored.load_mesh().unwrap());
        assert_eq!(r_mesh.read().unwrap().leaf_ids(), mesh.read().unwrap().leaf_ids());

        let r_spaces = restored.load_spaces(&r_mesh).unwrap();
        assert_eq!(r_spaces[0].num_dofs(), space.num_dofs());

        let r_slns = restored.load_solutions(&r_mesh).unwrap();
        for (a, b) in sln.coeffs().iter().zip(r_slns[0].coeffs().iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn newest_record_wins() {
        let store = Continuity::new(tmp_dir("newest")).unwrap();
        let mesh = Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 1, 1);

        for num in [1_usize, 3, 2] {
            let mut record = Record::new(num, num as f64);
            record.save_mesh(&mesh).save_time_step_length(0.5);
            store.add_record(&record).unwrap();
        }

        let last = store.last_record().unwrap();
        assert_eq!(last.get_num(), 3);
        assert_eq!(last.get_time(), 3.0);
    }

    #[test]
    fn no_tmp_files_survive_a_commit() {
        let dir = tmp_dir("tmp_files");
        let store = Continuity::new(&dir).unwrap();
        let mesh = Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 1, 1);

        let mut record = Record::new(0, 0.0);
        record.save_mesh(&mesh);
        store.add_record(&record).unwrap();

        let leftovers: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
