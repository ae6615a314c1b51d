use crate::config::CollectionSettings;
use crate::error::{Error, ListFailure};
use crate::image_reference::ImageReference;
use crate::state::ImageRecord;
use k8s_openapi::api::core::v1::{Container, Pod};
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, ResourceExt};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub async fn create_client(kube_config: Option<&Path>) -> Result<Client, Error> {
    info!("Loading Kubernetes configuration");
    let client = match kube_config {
        Some(path) => {
            info!("Using provided kube config file {}", path.display());
            let kubeconfig =
                Kubeconfig::read_from(path).map_err(|e| Error::Connectivity(Box::new(e)))?;
            let config =
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| Error::Connectivity(Box::new(e)))?;
            Client::try_from(config).map_err(|e| Error::Connectivity(Box::new(e)))?
        }
        None => Client::try_default()
            .await
            .map_err(|e| Error::Connectivity(Box::new(e)))?,
    };

    let api_server_info = client
        .apiserver_version()
        .await
        .map_err(|e| Error::Connectivity(Box::new(e)))?;
    info!(
        "Connected to Kubernetes API server with version {}.{}",
        api_server_info.major, api_server_info.minor
    );
    Ok(client)
}

/// Which pods to list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    AllNamespaces,
    Namespace(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::AllNamespaces => write!(f, "all namespaces"),
            Scope::Namespace(namespace) => write!(f, "namespace {}", namespace),
        }
    }
}

pub fn scopes(namespaces: Option<&[String]>) -> Vec<Scope> {
    match namespaces {
        Some(namespaces) => namespaces
            .iter()
            .map(|ns| Scope::Namespace(ns.clone()))
            .collect(),
        None => vec![Scope::AllNamespaces],
    }
}

pub struct PodPage {
    pub pods: Vec<Pod>,
    pub continue_token: Option<String>,
}

/// Source of pods, one page per call.
pub trait PodLister {
    async fn list_pods(
        &self,
        scope: &Scope,
        page_size: u32,
        continue_token: Option<&str>,
    ) -> Result<PodPage, ListFailure>;
}

pub struct KubePodLister {
    client: Client,
}

impl KubePodLister {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl PodLister for KubePodLister {
    async fn list_pods(
        &self,
        scope: &Scope,
        page_size: u32,
        continue_token: Option<&str>,
    ) -> Result<PodPage, ListFailure> {
        let pods: Api<Pod> = match scope {
            Scope::AllNamespaces => Api::all(self.client.clone()),
            Scope::Namespace(namespace) => Api::namespaced(self.client.clone(), namespace),
        };

        let mut lp = ListParams::default().limit(page_size);
        if let Some(token) = continue_token {
            lp = lp.continue_token(token);
        }

        let pod_list = pods.list(&lp).await?;
        Ok(PodPage {
            continue_token: pod_list.metadata.continue_.filter(|t| !t.is_empty()),
            pods: pod_list.items,
        })
    }
}

/// Result of one collection pass.
#[derive(Debug, Default)]
pub struct Collection {
    pub images: Vec<ImageRecord>,
    pub failed_namespaces: Vec<String>,
}

/// Lists pods in every scope and returns one record per distinct image reference, in the
/// order the images were first seen.
pub async fn collect_images<L: PodLister>(
    lister: &L,
    scopes: &[Scope],
    label_key: Option<&str>,
    settings: &CollectionSettings,
) -> Result<Collection, Error> {
    let timeout = settings.timeout();
    tokio::time::timeout(timeout, collect_all(lister, scopes, label_key, settings))
        .await
        .map_err(|_| Error::CollectionTimeout(timeout))?
}

async fn collect_all<L: PodLister>(
    lister: &L,
    scopes: &[Scope],
    label_key: Option<&str>,
    settings: &CollectionSettings,
) -> Result<Collection, Error> {
    let mut inventory = Inventory::default();
    let mut failed_namespaces = Vec::new();

    for scope in scopes {
        info!("Listing pods in {}", scope);
        match collect_scope(lister, scope, label_key, settings, &mut inventory).await {
            Ok(pod_count) => info!("Found {} pods in {}", pod_count, scope),
            Err(source) => match scope {
                Scope::Namespace(namespace) if settings.tolerate_namespace_failures => {
                    warn!(
                        "Skipping namespace {} after failing to list its pods: {}",
                        namespace, source
                    );
                    failed_namespaces.push(namespace.clone());
                }
                _ => {
                    return Err(Error::Collection {
                        scope: scope.to_string(),
                        source,
                    });
                }
            },
        }
    }

    Ok(Collection {
        images: inventory.into_records(),
        failed_namespaces,
    })
}

/// Collects all pages of one scope into the inventory, returning the number of pods seen.
///
/// Records of a scope are only added once every page has been listed, so a namespace that
/// fails halfway contributes nothing.
async fn collect_scope<L: PodLister>(
    lister: &L,
    scope: &Scope,
    label_key: Option<&str>,
    settings: &CollectionSettings,
    inventory: &mut Inventory,
) -> Result<usize, ListFailure> {
    let mut records = Vec::new();
    let mut pod_count = 0;
    let mut continue_token: Option<String> = None;

    loop {
        let page = list_with_retry(lister, scope, continue_token.as_deref(), settings).await?;
        pod_count += page.pods.len();
        for pod in &page.pods {
            records.extend(records_from_pod(pod, label_key));
        }
        match page.continue_token {
            Some(token) => {
                debug!("Fetching next page of pods in {}", scope);
                continue_token = Some(token);
            }
            None => break,
        }
    }

    for record in records {
        inventory.add(record);
    }
    Ok(pod_count)
}

async fn list_with_retry<L: PodLister>(
    lister: &L,
    scope: &Scope,
    continue_token: Option<&str>,
    settings: &CollectionSettings,
) -> Result<PodPage, ListFailure> {
    let mut backoff = settings.initial_backoff();
    let mut attempt = 0;

    loop {
        match lister
            .list_pods(scope, settings.page_size, continue_token)
            .await
        {
            Ok(page) => return Ok(page),
            Err(e) if e.is_transient() && attempt < settings.max_retries => {
                attempt += 1;
                warn!(
                    "Listing pods in {} failed ({}), retrying in {:?} (attempt {} of {})",
                    scope, e, backoff, attempt, settings.max_retries
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            Err(e) => return Err(e),
        }
    }
}

/// One record per container and init container image of the pod.
pub fn records_from_pod(pod: &Pod, label_key: Option<&str>) -> Vec<ImageRecord> {
    let pod_name = pod.name_any();
    let Some(namespace) = pod.namespace() else {
        warn!("Skipping pod {} without namespace", pod_name);
        return Vec::new();
    };
    let Some(spec) = pod.spec.as_ref() else {
        debug!("Skipping pod {} in namespace {} without spec", pod_name, namespace);
        return Vec::new();
    };

    let label_value = label_key.and_then(|key| pod.labels().get(key).cloned());

    spec.containers
        .iter()
        .chain(spec.init_containers.iter().flatten())
        .filter_map(|container| image_of(container, &pod_name, &namespace))
        .map(|image_reference| ImageRecord {
            image_reference,
            namespace: namespace.clone(),
            label_value: label_value.clone(),
        })
        .collect()
}

fn image_of(container: &Container, pod_name: &str, namespace: &str) -> Option<ImageReference> {
    let image = container.image.as_deref().unwrap_or_default();
    match ImageReference::parse(image) {
        Ok(image_reference) => Some(image_reference),
        Err(e) => {
            warn!(
                "Skipping container {} in pod {} in namespace {}: {}",
                container.name, pod_name, namespace, e
            );
            None
        }
    }
}

/// Distinct images in first-seen order. The first context observed for an image wins.
#[derive(Debug, Default)]
struct Inventory {
    records: Vec<ImageRecord>,
    index: HashMap<ImageReference, usize>,
}

impl Inventory {
    fn add(&mut self, record: ImageRecord) {
        match self.index.get(&record.image_reference) {
            Some(&pos) => {
                let first = &self.records[pos];
                if first.same_context(&record) {
                    debug!("Image {} seen again", record.image_reference);
                } else {
                    warn!(
                        "Image {} is also used in namespace {} with label value {:?}, keeping first seen namespace {} with label value {:?}",
                        record.image_reference,
                        record.namespace,
                        record.label_value,
                        first.namespace,
                        first.label_value
                    );
                }
            }
            None => {
                self.index
                    .insert(record.image_reference.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    fn into_records(self) -> Vec<ImageRecord> {
        self.records
    }
}
