use crate::image_reference::ImageReference;

/// An image observed in the cluster, with the context of the first pod it was seen in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub image_reference: ImageReference,
    pub namespace: String,
    pub label_value: Option<String>,
}

impl ImageRecord {
    pub fn same_context(&self, other: &ImageRecord) -> bool {
        self.namespace == other.namespace && self.label_value == other.label_value
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub image_reference: ImageReference,
    pub org_id: String,
    pub integration_id: String,
}

/// Anything the exclusion filter can match against.
pub trait ImageIdentifier {
    fn image_identifier(&self) -> &str;
}

impl ImageIdentifier for ImageRecord {
    fn image_identifier(&self) -> &str {
        self.image_reference.as_str()
    }
}

impl ImageIdentifier for String {
    fn image_identifier(&self) -> &str {
        self
    }
}
