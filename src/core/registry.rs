use burn::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown custom operation \"{0}\"")]
    Unknown(String),
    #[error("Custom operation \"{name}\" has version {got}, this build registers version {expected}")]
    VersionMismatch {
        name: String,
        got: u32,
        expected: u32,
    },
}

/// A custom operation reference as persisted in a model bundle.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OpSpec {
    pub name: String,
    pub version: u32,
}

/// A registered custom operation: a stable name, a version, and the
/// constructor for its executable definition. Persisted models name their
/// operations through [`OpSpec`]; reconstruction goes through this table
/// rather than through anything implicit in the weights file.
pub struct OpRegistration {
    pub name: &'static str,
    pub version: u32,
    pub build: fn() -> CollapseFrame,
}

impl OpRegistration {
    pub fn spec(&self) -> OpSpec {
        OpSpec {
            name: self.name.to_string(),
            version: self.version,
        }
    }
}

/// Removes the singleton frame axis so the 2-D image is exposed to the
/// convolution stack. This is the one non-standard step in the graph, so
/// a reloaded model is only valid against a matching registration.
#[derive(Module, Clone, Debug)]
pub struct CollapseFrame {
    dim: usize,
}

impl CollapseFrame {
    pub fn new(dim: usize) -> Self {
        CollapseFrame { dim }
    }

    pub fn forward<B: Backend>(&self, input: Tensor<B, 5>) -> Tensor<B, 4> {
        input.squeeze(self.dim)
    }
}

fn build_collapse_frame() -> CollapseFrame {
    CollapseFrame::new(1)
}

pub const COLLAPSE_LEADING: OpRegistration = OpRegistration {
    name: "collapse_leading_axis",
    version: 1,
    build: build_collapse_frame,
};

static REGISTRY: &[OpRegistration] = &[COLLAPSE_LEADING];

/// Resolve a persisted operation reference against the registered
/// definitions of this build.
pub fn resolve(spec: &OpSpec) -> Result<&'static OpRegistration, RegistryError> {
    let registration = REGISTRY
        .iter()
        .find(|registration| registration.name == spec.name)
        .ok_or_else(|| RegistryError::Unknown(spec.name.clone()))?;

    if registration.version != spec.version {
        return Err(RegistryError::VersionMismatch {
            name: spec.name.clone(),
            got: spec.version,
            expected: registration.version,
        });
    }

    Ok(registration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InnerBackend;

    #[test]
    fn test_registered_op_resolves() {
        let spec = COLLAPSE_LEADING.spec();
        let registration = resolve(&spec).expect("resolve failed");
        assert_eq!(registration.name, "collapse_leading_axis");
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        let spec = OpSpec {
            name: "reverse_time".to_string(),
            version: 1,
        };
        assert!(matches!(resolve(&spec), Err(RegistryError::Unknown(_))));
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let spec = OpSpec {
            name: COLLAPSE_LEADING.name.to_string(),
            version: COLLAPSE_LEADING.version + 1,
        };
        assert!(matches!(
            resolve(&spec),
            Err(RegistryError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_collapse_removes_frame_axis() {
        let device = Default::default();
        let input = Tensor::<InnerBackend, 5>::zeros([2, 1, 32, 32, 1], &device);
        let output = (COLLAPSE_LEADING.build)().forward(input);
        assert_eq!(output.dims(), [2, 32, 32, 1]);
    }
}
