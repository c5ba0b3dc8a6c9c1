use crate::error::{HarnessError, HarnessResult};
use crate::model::{RunResult, Scenario};
use crate::template::Script;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct ArtifactsWriterConfig {
    pub dir: PathBuf,
    pub overwrite: bool,
}

/// Writes the on-disk record of one scenario run.
///
/// Every file written is also listed with its checksum in `checksums.json`.
#[derive(Debug)]
pub struct ArtifactsWriter {
    dir: PathBuf,
    checksums: BTreeMap<String, String>,
}

impl ArtifactsWriter {
    pub fn new(config: ArtifactsWriterConfig) -> HarnessResult<Self> {
        if config.dir.exists() {
            if !config.overwrite {
                return Err(HarnessError::config(
                    "artifacts directory exists and overwrite is disabled",
                    serde_json::json!({ "dir": config.dir }),
                ));
            }
        } else {
            fs::create_dir_all(&config.dir)
                .map_err(|err| HarnessError::io("failed to create artifacts dir", err))?;
        }
        Ok(Self {
            dir: config.dir,
            checksums: BTreeMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_scenario(&mut self, scenario: &Scenario) -> HarnessResult<()> {
        self.write_json("scenario.json", scenario)
    }

    pub fn write_script(&mut self, script: &Script) -> HarnessResult<()> {
        self.write_json("script.json", script)
    }

    pub fn write_run_result(&mut self, run_result: &RunResult) -> HarnessResult<()> {
        self.write_json("run.json", run_result)
    }

    /// Session stream as the driver saw it.
    pub fn write_transcript(&mut self, bytes: &[u8]) -> HarnessResult<()> {
        self.write_bytes("transcript.log", bytes)
    }

    /// Raw output of the node process.
    pub fn write_instance_log(&mut self, bytes: &[u8]) -> HarnessResult<()> {
        self.write_bytes("instance.log", bytes)
    }

    pub fn write_instance_stderr(&mut self, bytes: &[u8]) -> HarnessResult<()> {
        self.write_bytes("instance.stderr.log", bytes)
    }

    fn write_json<T: Serialize>(&mut self, name: &str, value: &T) -> HarnessResult<()> {
        let data = serde_json::to_vec_pretty(value).map_err(|err| {
            HarnessError::protocol(
                "failed to serialize artifact",
                serde_json::json!({ "artifact": name, "source": err.to_string() }),
            )
        })?;
        self.write_bytes(name, &data)
    }

    fn write_bytes(&mut self, name: &str, data: &[u8]) -> HarnessResult<()> {
        let path = self.dir.join(name);
        fs::write(&path, data).map_err(|err| HarnessError::io("failed to write artifact", err))?;
        self.checksums
            .insert(name.to_string(), format!("{:016x}", fnv1a_hash(data)));
        self.write_checksums()
    }

    fn write_checksums(&self) -> HarnessResult<()> {
        let data = serde_json::to_vec_pretty(&self.checksums)
            .map_err(|err| HarnessError::io("failed to serialize checksums", err))?;
        fs::write(self.dir.join("checksums.json"), data)
            .map_err(|err| HarnessError::io("failed to write checksums", err))
    }
}

fn fnv1a_hash(data: &[u8]) -> u64 {
    // FNV-1a constants (64-bit)
    const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0100_0000_01b3;

    let mut hash: u64 = FNV_OFFSET_BASIS;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_existing_dir_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let err = ArtifactsWriter::new(ArtifactsWriterConfig {
            dir: dir.path().to_path_buf(),
            overwrite: false,
        })
        .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Config);
    }

    #[test]
    fn records_checksums_for_written_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        let mut writer = ArtifactsWriter::new(ArtifactsWriterConfig {
            dir: target.clone(),
            overwrite: false,
        })
        .unwrap();
        writer.write_transcript(b"> exit\n").unwrap();
        let checksums: BTreeMap<String, String> =
            serde_json::from_slice(&fs::read(target.join("checksums.json")).unwrap()).unwrap();
        assert!(checksums.contains_key("transcript.log"));
        assert_eq!(fs::read(target.join("transcript.log")).unwrap(), b"> exit\n");
    }
}
