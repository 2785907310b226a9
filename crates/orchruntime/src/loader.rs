use orchcore::{ActionNode, EngineError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Action set as stored on disk: the nodes of one container plus the run
/// variables their conditions read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSetFile {
    pub container_id: String,
    pub actions: Vec<ActionNode>,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

impl ActionSetFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

pub fn load_request(path: impl AsRef<Path>) -> Result<orchcore::ErrorHandlingRequest, EngineError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
