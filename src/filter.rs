use crate::error::ConfigError;
use crate::state::ImageIdentifier;
use regex::Regex;
use tracing::{debug, info};

/// Drops images whose reference matches the `image_filter_regex_exclude` pattern.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    pattern: Option<Regex>,
}

impl ExclusionFilter {
    pub fn new(pattern: Option<&str>) -> Result<Self, ConfigError> {
        let pattern = pattern
            .filter(|p| !p.is_empty())
            .map(|p| {
                Regex::new(p).map_err(|source| ConfigError::InvalidExcludePattern {
                    pattern: p.to_string(),
                    source,
                })
            })
            .transpose()?;
        Ok(Self { pattern })
    }

    pub fn is_excluded(&self, image: &str) -> bool {
        self.pattern.as_ref().is_some_and(|re| re.is_match(image))
    }

    pub fn exclude<T: ImageIdentifier>(&self, images: Vec<T>) -> Vec<T> {
        let Some(pattern) = &self.pattern else {
            return images;
        };

        let before = images.len();
        let kept: Vec<T> = images
            .into_iter()
            .filter(|image| {
                let excluded = self.is_excluded(image.image_identifier());
                if excluded {
                    debug!("Excluding image {}", image.image_identifier());
                }
                !excluded
            })
            .collect();

        info!(
            "Excluded {} of {} images matching pattern {}",
            before - kept.len(),
            before,
            pattern.as_str()
        );
        kept
    }
}
