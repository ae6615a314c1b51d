use crate::collector::{PodLister, collect_images, scopes};
use crate::config::Settings;
use crate::error::Error;
use crate::resolver::resolve_all;
use crate::targets::TargetFile;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub discovered: usize,
    pub excluded: usize,
    pub mapped: usize,
    pub unmapped: usize,
    pub failed_namespaces: Vec<String>,
    pub output_path: PathBuf,
}

/// One inventory pass: collect, filter, resolve, build and write the targets file.
pub async fn run<L: PodLister>(settings: &Settings, lister: &L) -> Result<RunSummary, Error> {
    let scopes = scopes(settings.namespaces.as_deref());
    let collection = collect_images(
        lister,
        &scopes,
        settings.policy.label_key(),
        &settings.collection,
    )
    .await?;

    let discovered = collection.images.len();
    info!("Discovered {} distinct images", discovered);

    let images = settings.exclusion_filter.exclude(collection.images);
    let excluded = discovered - images.len();

    let resolved = resolve_all(&images, &settings.policy);
    info!(
        "Mapped {} of {} images to Snyk targets",
        resolved.len(),
        images.len()
    );

    let target_file = TargetFile::from_resolved(&resolved, settings.target_name_style);
    target_file.write_to(&settings.targets_file_output_path)?;

    Ok(RunSummary {
        discovered,
        excluded,
        mapped: resolved.len(),
        unmapped: images.len() - resolved.len(),
        failed_namespaces: collection.failed_namespaces,
        output_path: settings.targets_file_output_path.clone(),
    })
}
