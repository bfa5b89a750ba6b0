//! Model store: versioned, checksummed artifacts written atomically
//!
//! Layout:
//!
//! ```text
//! [0..4)  magic "FBML"
//! [4]     format version
//! [5..9)  CRC32 of the payload, little endian
//! [9..)   JSON payload (ModelBundle)
//! ```

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::data::SchemaDescriptor;
use crate::features::EncoderState;
use crate::model::TrainedModel;
use crate::{FootballError, Result, ScoreTarget, TaskKind};

const MAGIC: &[u8; 4] = b"FBML";
/// Current artifact format version
pub const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 9;

/// Encoder and model that always travel together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub schema_version: u32,
    pub encoder: EncoderState,
    pub model: TrainedModel,
    /// Quantity a regression model predicts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ScoreTarget>,
}

impl ModelBundle {
    pub fn new(
        encoder: EncoderState,
        model: TrainedModel,
        target: Option<ScoreTarget>,
    ) -> Result<Self> {
        let bundle = ModelBundle {
            schema_version: SchemaDescriptor::VERSION,
            encoder,
            model,
            target,
        };
        bundle.check().map_err(FootballError::Training)?;
        Ok(bundle)
    }

    pub fn task(&self) -> TaskKind {
        self.model.task()
    }

    /// Check that encoder and model belong together
    pub fn check(&self) -> std::result::Result<(), String> {
        self.encoder.check()?;
        self.model.check()?;
        if self.encoder.dimension() != self.model.input_dim() {
            return Err(format!(
                "encoder produces {} features but the model expects {}",
                self.encoder.dimension(),
                self.model.input_dim()
            ));
        }
        if self.encoder.fingerprint() != self.model.encoder_fingerprint() {
            return Err(format!(
                "model was trained under encoder {:08x}, bundle carries {:08x}",
                self.model.encoder_fingerprint(),
                self.encoder.fingerprint()
            ));
        }
        Ok(())
    }
}

/// Serialize a bundle to artifact bytes
pub fn encode(bundle: &ModelBundle) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(bundle).map_err(std::io::Error::from)?;
    let checksum = crc32fast::hash(&payload);

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(MAGIC);
    bytes.push(FORMAT_VERSION);
    bytes.extend_from_slice(&checksum.to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Parse artifact bytes back into a bundle
pub fn decode(bytes: &[u8]) -> Result<ModelBundle> {
    if bytes.len() < HEADER_LEN {
        return Err(FootballError::corrupt(
            None,
            format!("artifact is {} bytes, shorter than its header", bytes.len()),
        ));
    }
    if &bytes[0..4] != MAGIC {
        return Err(FootballError::corrupt(None, "not a model artifact (bad magic)"));
    }

    let version = bytes[4];
    if version != FORMAT_VERSION {
        return Err(FootballError::corrupt(
            Some(version as u32),
            format!("unsupported artifact format, expected {}", FORMAT_VERSION),
        ));
    }

    let stored = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
    let payload = &bytes[HEADER_LEN..];
    let actual = crc32fast::hash(payload);
    if stored != actual {
        return Err(FootballError::corrupt(
            Some(version as u32),
            format!(
                "payload checksum {:08x} does not match header {:08x}",
                actual, stored
            ),
        ));
    }

    let bundle: ModelBundle = serde_json::from_slice(payload).map_err(|e| {
        FootballError::corrupt(Some(version as u32), format!("invalid payload: {}", e))
    })?;

    if bundle.schema_version != SchemaDescriptor::VERSION {
        return Err(FootballError::corrupt(
            Some(bundle.schema_version),
            format!(
                "unsupported schema version, expected {}",
                SchemaDescriptor::VERSION
            ),
        ));
    }
    bundle
        .check()
        .map_err(|message| FootballError::corrupt(Some(version as u32), message))?;

    Ok(bundle)
}

/// Flush the directory entry so a completed rename survives power loss
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Write a bundle to `path`; readers never observe a partial file
///
/// Each call writes its own temporary file next to `path` and renames it
/// into place.
pub fn save(bundle: &ModelBundle, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let bytes = encode(bundle)?;

    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };

    // Dropping an unpersisted temp file removes it
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(&bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    sync_dir(dir)?;

    log::info!(
        "Saved {} model ({} bytes) to {}",
        bundle.task(),
        bytes.len(),
        path.display()
    );
    Ok(())
}

/// Read a bundle written by [`save`]
pub fn load(path: impl AsRef<Path>) -> Result<ModelBundle> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let bundle = decode(&bytes)?;
    log::info!(
        "Loaded {} model from {} (encoder {:08x}, {} features)",
        bundle.task(),
        path.display(),
        bundle.encoder.fingerprint(),
        bundle.encoder.dimension()
    );
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureEncoder;
    use crate::model::{ModelHead, ScoreNormalization};
    use crate::{FeatureSpec, Field, MatchRecord};

    fn bundle() -> ModelBundle {
        let records = vec![
            MatchRecord::fixture("A", "B"),
            MatchRecord::fixture("A", "C"),
            MatchRecord::fixture("B", "C"),
        ];
        let encoder = FeatureEncoder::new(vec![
            FeatureSpec::one_hot(Field::HomeTeam),
            FeatureSpec::one_hot(Field::AwayTeam),
        ])
        .fit(&records)
        .unwrap();
        let dim = encoder.dimension();
        let model = TrainedModel::new(
            ModelHead::Classification {
                labels: vec!["A".into(), "D".into(), "H".into()],
            },
            dim,
            encoder.fingerprint(),
            (0..dim * 3).map(|i| i as f32 * 0.1 - 0.5).collect(),
            vec![0.1, -0.2, 0.3],
        );
        ModelBundle::new(encoder, model, None).unwrap()
    }

    #[test]
    fn test_encode_decode() {
        let original = bundle();
        let decoded = decode(&encode(&original).unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_regression_bundle_keeps_target() {
        let original = bundle();
        let model = TrainedModel::new(
            ModelHead::Regression {
                normalization: ScoreNormalization { mean: 1.4, std: 1.1 },
            },
            original.encoder.dimension(),
            original.encoder.fingerprint(),
            vec![0.5; original.encoder.dimension()],
            vec![0.0],
        );
        let regression =
            ModelBundle::new(original.encoder, model, Some(ScoreTarget::TotalGoals)).unwrap();
        let decoded = decode(&encode(&regression).unwrap()).unwrap();
        assert_eq!(decoded.target, Some(ScoreTarget::TotalGoals));
        assert_eq!(decoded.task(), TaskKind::Regression);
    }

    #[test]
    fn test_save_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("model.fbml");
        let original = bundle();

        save(&original, &path).unwrap();
        assert_eq!(load(&path).unwrap(), original);

        // Only the final artifact remains
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("model.fbml")]);
    }

    #[test]
    fn test_concurrent_saves_never_expose_partial_file() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;
        use std::thread;

        let dir = tempfile::tempdir().unwrap();
        let path = Arc::new(dir.path().join("model.fbml"));
        let original = Arc::new(bundle());
        save(&original, path.as_path()).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let (path, original, done) = (path.clone(), original.clone(), done.clone());
            thread::spawn(move || {
                let mut reads = 0usize;
                while !done.load(Ordering::SeqCst) {
                    assert_eq!(load(path.as_path()).unwrap(), *original);
                    reads += 1;
                }
                reads
            })
        };

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let (path, original) = (path.clone(), original.clone());
                thread::spawn(move || {
                    for _ in 0..50 {
                        save(&original, path.as_path()).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
        assert!(reader.join().unwrap() > 0);

        // No temporary files are left behind
        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("model.fbml")]);
    }

    #[test]
    fn test_save_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.fbml");
        fs::write(&path, b"old").unwrap();

        save(&bundle(), &path).unwrap();
        assert!(load(&path).is_ok());
    }

    #[test]
    fn test_corrupt_version_byte() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.fbml");
        save(&bundle(), &path).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        bytes[4] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        match load(&path) {
            Err(FootballError::CorruptArtifact { version, .. }) => {
                assert_eq!(version, Some((FORMAT_VERSION ^ 0xFF) as u32));
            }
            other => panic!("expected corrupt artifact, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupt_payload() {
        let mut bytes = encode(&bundle()).unwrap();
        let last = bytes.len() - 2;
        bytes[last] ^= 0x01;
        assert!(matches!(
            decode(&bytes),
            Err(FootballError::CorruptArtifact { .. })
        ));
    }

    #[test]
    fn test_bad_magic_and_truncation() {
        let mut bytes = encode(&bundle()).unwrap();
        assert!(matches!(
            decode(&bytes[..5]),
            Err(FootballError::CorruptArtifact { .. })
        ));
        bytes[0] = b'X';
        assert!(matches!(
            decode(&bytes),
            Err(FootballError::CorruptArtifact { version: None, .. })
        ));
    }

    #[test]
    fn test_unknown_schema_version() {
        let mut original = bundle();
        original.schema_version = SchemaDescriptor::VERSION + 1;
        match decode(&encode(&original).unwrap()) {
            Err(FootballError::CorruptArtifact { version, .. }) => {
                assert_eq!(version, Some(SchemaDescriptor::VERSION + 1));
            }
            other => panic!("expected corrupt artifact, got {:?}", other),
        }
    }

    #[test]
    fn test_bundle_rejects_mismatched_model() {
        let original = bundle();
        let model = TrainedModel::new(
            ModelHead::Classification {
                labels: vec!["H".into()],
            },
            original.encoder.dimension() + 1,
            original.encoder.fingerprint(),
            vec![0.0; original.encoder.dimension() + 1],
            vec![0.0],
        );
        assert!(matches!(
            ModelBundle::new(original.encoder, model, None),
            Err(FootballError::Training(_))
        ));
    }
}
