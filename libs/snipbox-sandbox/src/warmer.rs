//! Image warm-up.
//!
//! Makes sure every image in the catalog is present locally before the first
//! request needs it. One bad image never stops the others from being pulled.

use crate::catalog::ImageCatalog;
use crate::runtime::ContainerRuntime;
use tracing::{info, warn};

/// What happened to each catalog image during a warm-up pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmReport {
    /// Already available locally
    pub present: Vec<String>,
    /// Pulled during this pass
    pub pulled: Vec<String>,
    /// Image and the reason it could not be made available
    pub failed: Vec<(String, String)>,
}

impl WarmReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.present.len() + self.pulled.len() + self.failed.len()
    }
}

/// Check every catalog image and pull the ones that are missing
pub async fn warm_images<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    catalog: &ImageCatalog,
) -> WarmReport {
    let mut report = WarmReport::default();

    for image in catalog.images() {
        match runtime.image_exists(image).await {
            Ok(true) => {
                info!(image = image, "Image already present");
                report.present.push(image.to_string());
                continue;
            }
            Ok(false) => {}
            // Cannot tell; pulling is the only way to find out
            Err(e) => warn!(image = image, error = %e, "Image inspection failed"),
        }

        info!(image = image, "Pulling image");
        match runtime.pull_image(image).await {
            Ok(()) => {
                info!(image = image, "Image pulled");
                report.pulled.push(image.to_string());
            }
            Err(e) => {
                warn!(image = image, error = %e, "Failed to pull image");
                report.failed.push((image.to_string(), e.to_string()));
            }
        }
    }

    info!(
        present = report.present.len(),
        pulled = report.pulled.len(),
        failed = report.failed.len(),
        "Image warm-up finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, MockRuntime};

    #[tokio::test]
    async fn test_present_images_are_not_pulled() {
        let catalog = ImageCatalog::builtin();
        let all: Vec<&str> = catalog.images();
        let runtime = MockRuntime::new().with_local_images(&all);

        let report = warm_images(&runtime, &catalog).await;

        assert_eq!(report.present.len(), all.len());
        assert!(report.pulled.is_empty());
        assert!(report.is_complete());
        assert!(runtime.calls().iter().all(|c| c.kind() == "exists"));
    }

    #[tokio::test]
    async fn test_missing_images_are_pulled() {
        let catalog = ImageCatalog::builtin();
        let runtime = MockRuntime::new().with_local_images(&["python:3.9-slim"]);

        let report = warm_images(&runtime, &catalog).await;

        assert_eq!(report.present, vec!["python:3.9-slim".to_string()]);
        assert_eq!(report.pulled.len(), catalog.images().len() - 1);
        assert!(!runtime
            .calls()
            .contains(&Call::Pull("python:3.9-slim".to_string())));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_rest() {
        let catalog = ImageCatalog::builtin();
        let runtime = MockRuntime::new().failing_pull_for("golang:1.19-alpine");

        let report = warm_images(&runtime, &catalog).await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "golang:1.19-alpine");
        assert_eq!(report.pulled.len(), catalog.images().len() - 1);
        assert_eq!(report.total(), catalog.images().len());
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn test_inspection_failure_falls_through_to_pull() {
        let catalog = ImageCatalog::builtin();
        let runtime = MockRuntime::new().failing_inspect();

        let report = warm_images(&runtime, &catalog).await;

        assert_eq!(report.pulled.len(), catalog.images().len());
        assert!(report.present.is_empty());
    }
}
