//! Restartable checkpoints in JSON, bincode or MessagePack.

use crate::error::{Classified, ErrorClass};
use crate::population::{PopulationError, PopulationSnapshot};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint file {}: {source}", .path.display())]
    Io { path: PathBuf, source: std::io::Error },
    #[error("JSON checkpoint: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bincode checkpoint: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("MessagePack checkpoint: {0}")]
    MessagePackEncode(#[from] rmp_serde::encode::Error),
    #[error("MessagePack checkpoint: {0}")]
    MessagePackDecode(#[from] rmp_serde::decode::Error),
    #[error("unknown checkpoint format '{0}' (expected json, bincode or messagepack)")]
    UnknownFormat(String),
    #[error("checkpoint was written by rank {written} of {written_size} but is being read by rank {rank} of {size}")]
    RankMismatch { written: usize, written_size: usize, rank: usize, size: usize },
    #[error(transparent)]
    Population(#[from] PopulationError),
}

impl Classified for CheckpointError {
    fn class(&self) -> ErrorClass {
        match self {
            CheckpointError::Population(e) => e.class(),
            CheckpointError::RankMismatch { .. } => ErrorClass::Distributed,
            _ => ErrorClass::Configuration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointFormat {
    Json,
    Bincode,
    MessagePack,
}

impl CheckpointFormat {
    /// Parses the names used by `output.format`.
    pub fn from_name(name: &str) -> Result<Self, CheckpointError> {
        match name {
            "json" => Ok(Self::Json),
            "bincode" => Ok(Self::Bincode),
            "messagepack" | "msgpack" => Ok(Self::MessagePack),
            other => Err(CheckpointError::UnknownFormat(other.to_string())),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, CheckpointError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("bin") => Ok(Self::Bincode),
            Some("msgpack") => Ok(Self::MessagePack),
            other => Err(CheckpointError::UnknownFormat(other.unwrap_or("").to_string())),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Bincode => "bin",
            Self::MessagePack => "msgpack",
        }
    }
}

/// One rank's saved state: where the run was, and the population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint<S> {
    pub step: u32,
    pub time: f64,
    pub seed: u64,
    pub rank: usize,
    pub size: usize,
    pub population: PopulationSnapshot<S>,
}

/// File name of `rank`'s checkpoint.
pub fn checkpoint_path(directory: &Path, base_filename: &str, rank: usize, format: CheckpointFormat) -> PathBuf {
    directory.join(format!("{base_filename}_checkpoint_rank{rank}.{}", format.extension()))
}

pub fn save_checkpoint<S: Serialize>(path: &Path, format: CheckpointFormat, checkpoint: &Checkpoint<S>) -> Result<(), CheckpointError> {
    let io_error = |source| CheckpointError::Io { path: path.to_path_buf(), source };
    let mut writer = BufWriter::new(File::create(path).map_err(io_error)?);
    match format {
        CheckpointFormat::Json => serde_json::to_writer(&mut writer, checkpoint)?,
        CheckpointFormat::Bincode => bincode::serialize_into(&mut writer, checkpoint)?,
        CheckpointFormat::MessagePack => rmp_serde::encode::write_named(&mut writer, checkpoint)?,
    }
    writer.flush().map_err(|source| CheckpointError::Io { path: path.to_path_buf(), source })?;
    log::info!("Checkpoint for step {} saved to {}", checkpoint.step, path.display());
    Ok(())
}

pub fn load_checkpoint<S: DeserializeOwned>(path: &Path, format: CheckpointFormat) -> Result<Checkpoint<S>, CheckpointError> {
    let file = File::open(path).map_err(|source| CheckpointError::Io { path: path.to_path_buf(), source })?;
    let reader = BufReader::new(file);
    let checkpoint = match format {
        CheckpointFormat::Json => serde_json::from_reader(reader)?,
        CheckpointFormat::Bincode => bincode::deserialize_from(reader)?,
        CheckpointFormat::MessagePack => rmp_serde::decode::from_read(reader)?,
    };
    Ok(checkpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_round_trip_through_their_names() {
        for format in [CheckpointFormat::Json, CheckpointFormat::Bincode, CheckpointFormat::MessagePack] {
            let path = PathBuf::from(format!("x.{}", format.extension()));
            assert_eq!(CheckpointFormat::from_path(&path).unwrap(), format);
        }
        assert_eq!(CheckpointFormat::from_name("msgpack").unwrap(), CheckpointFormat::MessagePack);
        let err = CheckpointFormat::from_name("vtk").unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
    }
}
