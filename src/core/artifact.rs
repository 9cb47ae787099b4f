use super::network::{CharCrnn, NetworkConfig};
use super::registry::{self, OpSpec};
use burn::module::Module;
use burn::prelude::*;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tar::{Archive, Builder};

const TOPOLOGY_ENTRY: &str = "topology.json";
const WEIGHTS_ENTRY: &str = "weights.bin";

/// Everything needed to rebuild the graph before the weights are applied.
/// The custom-op manifest is embedded so a bundle can never be restored
/// against definitions other than the ones it was built with.
#[derive(Serialize, Deserialize, Debug)]
struct Topology {
    network: NetworkConfig,
    custom_ops: Vec<OpSpec>,
}

#[derive(Debug, thiserror::Error)]
pub enum ModelSaveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Could not record model weights: {0}")]
    Record(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Model bundle is missing entry \"{0}\"")]
    MissingEntry(&'static str),
    #[error(transparent)]
    Registry(#[from] registry::RegistryError),
    #[error("Could not restore model weights: {0}")]
    Record(String),
}

/// Persist a model as a single-file tar.gz bundle holding the topology
/// (with its custom-op manifest) and the recorded weights.
pub fn save<B: Backend>(
    model: &CharCrnn<B>,
    config: &NetworkConfig,
    path: &Path,
) -> Result<(), ModelSaveError> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let weights = recorder
        .record(model.clone().into_record(), ())
        .map_err(|err| ModelSaveError::Record(err.to_string()))?;

    let topology = Topology {
        network: config.clone(),
        custom_ops: config.custom_ops(),
    };
    let topology_json = serde_json::to_vec_pretty(&topology)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);

    append_entry(&mut builder, TOPOLOGY_ENTRY, &topology_json)?;
    append_entry(&mut builder, WEIGHTS_ENTRY, &weights)?;

    let encoder = builder.into_inner()?;
    encoder.finish()?;
    Ok(())
}

/// Restore a model bundle. The custom-op manifest is validated against the
/// registry before any weight is deserialized.
pub fn load<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<(CharCrnn<B>, NetworkConfig), ModelLoadError> {
    let file = File::open(path)?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let mut topology_json: Option<Vec<u8>> = None;
    let mut weights: Option<Vec<u8>> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;

        match name.as_str() {
            TOPOLOGY_ENTRY => topology_json = Some(bytes),
            WEIGHTS_ENTRY => weights = Some(bytes),
            _ => {}
        }
    }

    let topology_json = topology_json.ok_or(ModelLoadError::MissingEntry(TOPOLOGY_ENTRY))?;
    let weights = weights.ok_or(ModelLoadError::MissingEntry(WEIGHTS_ENTRY))?;

    let topology: Topology = serde_json::from_slice(&topology_json)?;
    for spec in &topology.custom_ops {
        registry::resolve(spec)?;
    }

    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let record = recorder
        .load(weights, device)
        .map_err(|err| ModelLoadError::Record(err.to_string()))?;

    let model = CharCrnn::new(&topology.network, device).load_record(record);
    Ok((model, topology.network))
}

pub(crate) fn append_entry<W: std::io::Write>(
    builder: &mut Builder<W>,
    name: &str,
    bytes: &[u8],
) -> Result<(), std::io::Error> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, bytes)
}
