//! Engine state files: the field and agent list at one instant.
//!
//! A sweep builds one `WorldState` per grid point (the master state) and
//! starts both paired runs from copies of it.

use crate::agent::Agent;
use crate::grid::Field;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

const MAGIC: &[u8; 4] = b"FGST";

/// Field and agents, without counters or RNG state
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    /// Version for compatibility checking
    pub version: u32,
    pub field: Field,
    pub agents: Vec<Agent>,
}

impl WorldState {
    /// Current state file version
    pub const VERSION: u32 = 1;

    pub fn new(field: Field, agents: Vec<Agent>) -> Self {
        Self {
            version: Self::VERSION,
            field,
            agents,
        }
    }

    /// Total energy held by field and agents
    pub fn total_energy(&self) -> f64 {
        self.field.total() + self.agents.iter().map(|a| a.energy).sum::<f64>()
    }

    /// Reject states the engine cannot step: a lattice whose shape
    /// disagrees with its size, negative or non-finite cells, and agents with
    /// non-finite kinematics or negative energy.
    pub fn validate(&self) -> Result<(), CheckpointError> {
        let n = self.field.size();
        let dim = self.field.values().dim();
        if dim != (n, n) {
            return Err(CheckpointError::InvalidFormat(format!(
                "field of size {} holds a {}x{} array",
                n, dim.0, dim.1
            )));
        }
        if let Some(cell) = self.field.values().iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(CheckpointError::InvalidFormat(format!("field cell value {}", cell)));
        }

        for (i, agent) in self.agents.iter().enumerate() {
            let finite = [agent.x, agent.y, agent.vx, agent.vy, agent.energy]
                .iter()
                .all(|v| v.is_finite());
            if !finite || agent.energy < 0.0 {
                return Err(CheckpointError::InvalidFormat(format!("agent {} is {:?}", i, agent)));
            }
        }

        Ok(())
    }

    /// Save state to binary file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(MAGIC)?;
        let encoded = bincode::serialize(self)?;
        writer.write_all(&encoded)?;
        writer.flush()?;

        Ok(())
    }

    /// Load state from binary file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(CheckpointError::InvalidFormat("invalid magic bytes".to_string()));
        }

        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        let state: WorldState = bincode::deserialize(&buffer)?;

        if state.version != Self::VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: Self::VERSION,
                found: state.version,
            });
        }
        state.validate()?;

        Ok(state)
    }
}

/// Errors that can occur while reading or writing state files
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    #[error("version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_state() -> WorldState {
        let mut field = Field::new(8);
        field.set(4, 4, 2.5);
        WorldState::new(field, vec![Agent::new(3.5, 4.0, 1.0), Agent::new(4.0, 4.5, 0.5)])
    }

    #[test]
    fn test_state_roundtrip() {
        let state = create_test_state();
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.bin");

        state.save(&path).unwrap();
        let loaded = WorldState::load(&path).unwrap();

        assert_eq!(loaded, state);
        assert_eq!(loaded.total_energy(), 4.0);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bogus.bin");
        std::fs::write(&path, b"NOPE1234").unwrap();

        assert!(matches!(
            WorldState::load(&path),
            Err(CheckpointError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_version_mismatch() {
        let mut state = create_test_state();
        state.version = 99;
        let dir = tempdir().unwrap();
        let path = dir.path().join("old.bin");
        state.save(&path).unwrap();

        assert!(matches!(
            WorldState::load(&path),
            Err(CheckpointError::VersionMismatch { expected: 1, found: 99 })
        ));
    }

    fn mismatched_field() -> Field {
        // Claims 5x5 but carries a 3x3 array
        serde_json::from_str(r#"{"grid_size":5,"values":{"v":1,"dim":[3,3],"data":[0,0,0,0,0,0,0,0,0]}}"#)
            .unwrap()
    }

    #[test]
    fn test_validate_rejects_shape_mismatch() {
        let state = WorldState::new(mismatched_field(), Vec::new());
        assert!(matches!(state.validate(), Err(CheckpointError::InvalidFormat(_))));
        assert!(create_test_state().validate().is_ok());
    }

    #[test]
    fn test_load_rejects_corrupt_contents() {
        let dir = tempdir().unwrap();

        let path = dir.path().join("shape.bin");
        WorldState::new(mismatched_field(), Vec::new()).save(&path).unwrap();
        assert!(matches!(WorldState::load(&path), Err(CheckpointError::InvalidFormat(_))));

        let mut state = create_test_state();
        state.field.set(1, 1, f64::NAN);
        let path = dir.path().join("nan.bin");
        state.save(&path).unwrap();
        assert!(WorldState::load(&path).is_err());

        let mut state = create_test_state();
        state.agents[0].energy = -1.0;
        let path = dir.path().join("agent.bin");
        state.save(&path).unwrap();
        assert!(WorldState::load(&path).is_err());
    }
}
