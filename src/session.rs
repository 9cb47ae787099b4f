use crate::core::evaluate::TestMetrics;
use crate::core::network::{CharCrnn, NetworkConfig};
use crate::core::train::TrainingHistory;
use burn::prelude::*;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to clean up session artifacts: {0:?}")]
    Cleanup(Vec<PathBuf>),
}

/// Explicit state for one interactive pipeline run.
///
/// The model is single-owner and single-writer: training replaces it
/// wholesale, and readers borrow it only after training completes. File
/// artifacts registered here live as long as the session and are removed
/// by [`Session::clear`].
pub struct Session<B: Backend> {
    model: Option<(CharCrnn<B>, NetworkConfig)>,
    history: Option<TrainingHistory>,
    test_metrics: Option<TestMetrics>,
    artifacts: Vec<PathBuf>,
}

impl<B: Backend> Session<B> {
    pub fn new() -> Self {
        Session {
            model: None,
            history: None,
            test_metrics: None,
            artifacts: Vec::new(),
        }
    }

    pub fn model(&self) -> Option<(&CharCrnn<B>, &NetworkConfig)> {
        self.model.as_ref().map(|(model, config)| (model, config))
    }

    pub fn history(&self) -> Option<&TrainingHistory> {
        self.history.as_ref()
    }

    pub fn test_metrics(&self) -> Option<TestMetrics> {
        self.test_metrics
    }

    /// Install a freshly trained model together with its run history.
    /// Test metrics describe the previous model, so they are dropped.
    pub fn replace_model(
        &mut self,
        model: CharCrnn<B>,
        config: NetworkConfig,
        history: TrainingHistory,
    ) {
        self.model = Some((model, config));
        self.history = Some(history);
        self.test_metrics = None;
    }

    pub fn set_test_metrics(&mut self, metrics: TestMetrics) {
        self.test_metrics = Some(metrics);
    }

    /// Register a file whose lifetime is bound to this session.
    pub fn track_artifact(&mut self, path: impl Into<PathBuf>) {
        self.artifacts.push(path.into());
    }

    /// Drop all state and delete session-scoped files. Every removal
    /// failure is logged and the offending paths are reported back.
    pub fn clear(&mut self) -> Result<(), SessionError> {
        self.model = None;
        self.history = None;
        self.test_metrics = None;

        let mut failed = Vec::new();
        for path in self.artifacts.drain(..) {
            if let Err(err) = remove_artifact(&path) {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "Could not remove session artifact"
                );
                failed.push(path);
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(SessionError::Cleanup(failed))
        }
    }
}

fn remove_artifact(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        // A file that is already gone needs no cleanup.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl<B: Backend> Default for Session<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InnerBackend;

    fn temp_file(tag: &str) -> PathBuf {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "harfnet_session_test_{}_{}_{}",
            tag,
            std::process::id(),
            timestamp
        ));
        std::fs::write(&path, b"artifact").expect("write temp file");
        path
    }

    #[test]
    fn test_clear_removes_tracked_artifacts() {
        let mut session = Session::<InnerBackend>::new();
        let first = temp_file("first");
        let second = temp_file("second");
        session.track_artifact(&first);
        session.track_artifact(&second);

        session.clear().expect("clear failed");
        assert!(!first.exists());
        assert!(!second.exists());
    }

    #[test]
    fn test_clear_tolerates_already_missing_files() {
        let mut session = Session::<InnerBackend>::new();
        let path = temp_file("missing");
        std::fs::remove_file(&path).expect("remove failed");
        session.track_artifact(&path);

        assert!(session.clear().is_ok());
    }

    #[test]
    fn test_replace_model_drops_stale_test_metrics() {
        let mut session = Session::<InnerBackend>::new();
        session.set_test_metrics(TestMetrics {
            loss: 0.5,
            accuracy: 0.9,
        });

        let device = Default::default();
        let config = NetworkConfig::new(false);
        let model = CharCrnn::new(&config, &device);
        session.replace_model(model, config, TrainingHistory::default());

        assert!(session.test_metrics().is_none());
        assert!(session.model().is_some());
        assert!(session.history().is_some());
    }
}
