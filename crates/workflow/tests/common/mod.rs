#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use lookbook_core::catalog::{Gender, Model, ModelCatalog, Pose};
use lookbook_core::state::{GarmentImage, GarmentView};
use lookbook_genai::{CompositeRequest, GenerationError, GenerationRequest, ImageGenerator, ImagePart};
use lookbook_store::{BlobStore, MemoryBlobStore, StateStores, StoreError};
use lookbook_workflow::{WorkflowController, WorkflowDeps};

pub const OWNER: &str = "u1";

/// A minimal PNG signature followed by `tag`, so every image is distinct.
pub fn png(tag: u8) -> Vec<u8> {
    vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, tag]
}

/// A minimal JPEG signature followed by `tag`.
pub fn jpeg(tag: u8) -> Vec<u8> {
    vec![0xFF, 0xD8, 0xFF, 0xE0, 0, tag]
}

// ---------------------------------------------------------------------------
// Fake generator
// ---------------------------------------------------------------------------

/// Generator returning scripted results, or a fresh PNG when the script is
/// empty. Every request is recorded.
#[derive(Default)]
pub struct FakeGenerator {
    script: Mutex<VecDeque<Result<Vec<u8>, GenerationError>>>,
    pub requests: Mutex<Vec<GenerationRequest>>,
    pub composites: Mutex<Vec<CompositeRequest>>,
    counter: AtomicUsize,
    /// When set, each generate call waits for one permit.
    pub gate: Option<Arc<Semaphore>>,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn push_ok(&self, bytes: Vec<u8>) {
        self.script.lock().unwrap().push_back(Ok(bytes));
    }

    pub fn push_err(&self, err: GenerationError) {
        self.script.lock().unwrap().push_back(Err(err));
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> GenerationRequest {
        self.requests.lock().unwrap().last().cloned().expect("no generate request recorded")
    }

    fn next_image(&self) -> Vec<u8> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        png(100 + n as u8)
    }
}

#[async_trait]
impl ImageGenerator for FakeGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<ImagePart, GenerationError> {
        self.requests.lock().unwrap().push(request);
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        let scripted = self.script.lock().unwrap().pop_front();
        let bytes = match scripted {
            Some(result) => result?,
            None => self.next_image(),
        };
        Ok(ImagePart::new(bytes, "image/png"))
    }

    async fn compose(&self, request: CompositeRequest) -> Result<ImagePart, GenerationError> {
        self.composites.lock().unwrap().push(request);
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(ImagePart::new(jpeg(n as u8), "image/jpeg"))
    }
}

// ---------------------------------------------------------------------------
// Blob store with failing deletes
// ---------------------------------------------------------------------------

/// In-memory blob store whose deletes fail for keys containing a marker.
pub struct FlakyDeleteBlobStore {
    pub inner: MemoryBlobStore,
    pub fail_marker: String,
}

impl FlakyDeleteBlobStore {
    pub fn new(fail_marker: &str) -> Self {
        Self {
            inner: MemoryBlobStore::new(),
            fail_marker: fail_marker.to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for FlakyDeleteBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, mime_type: &str) -> Result<String, StoreError> {
        self.inner.put(key, bytes, mime_type).await
    }

    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.get(blob_ref).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        if key.contains(&self.fail_marker) {
            return Err(StoreError::Unavailable(format!("delete refused for {key}")));
        }
        self.inner.delete(key).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.keys_with_prefix(prefix).await
    }

    fn key_for_ref(&self, blob_ref: &str) -> Option<String> {
        self.inner.key_for_ref(blob_ref)
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

fn pose(id: &str, name: &str) -> Pose {
    Pose {
        id: id.to_string(),
        name: name.to_string(),
        reference_image: format!("poses/{id}.png"),
        category: "standing".to_string(),
        command: format!("Stand like {name}"),
    }
}

/// Two models: `m1` (female, poses `p1`, `p2`) and `m2` (male, pose `p3`).
pub fn catalog() -> ModelCatalog {
    ModelCatalog::new(vec![
        Model {
            id: "m1".to_string(),
            name: "Ava".to_string(),
            gender: Gender::Female,
            identity_images: vec!["models/m1.png".to_string()],
            poses: vec![pose("p1", "Hands On Hips"), pose("p2", "Side Profile")],
        },
        Model {
            id: "m2".to_string(),
            name: "Ben".to_string(),
            gender: Gender::Male,
            identity_images: vec!["models/m2.png".to_string()],
            poses: vec![pose("p3", "Walking")],
        },
    ])
    .expect("catalog should be valid")
}

/// Shared storage and collaborators; each `enter` is a fresh workflow entry
/// over the same stores.
pub struct Harness {
    pub catalog: Arc<ModelCatalog>,
    pub stores: StateStores,
    pub blobs: Arc<dyn BlobStore>,
    pub assets: Arc<MemoryBlobStore>,
    pub generator: Arc<FakeGenerator>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with(Arc::new(MemoryBlobStore::new()), FakeGenerator::new()).await
    }

    pub async fn with(blobs: Arc<dyn BlobStore>, generator: FakeGenerator) -> Self {
        let assets = Arc::new(MemoryBlobStore::new());
        for (key, tag) in [
            ("models/m1.png", 1),
            ("models/m2.png", 2),
            ("poses/p1.png", 11),
            ("poses/p2.png", 12),
            ("poses/p3.png", 13),
        ] {
            assets.put(key, png(tag), "image/png").await.expect("asset put should succeed");
        }
        Self {
            catalog: Arc::new(catalog()),
            stores: StateStores::in_memory(),
            blobs,
            assets,
            generator: Arc::new(generator),
        }
    }

    pub fn deps(&self) -> WorkflowDeps {
        WorkflowDeps {
            catalog: self.catalog.clone(),
            stores: self.stores.clone(),
            blobs: self.blobs.clone(),
            assets: self.assets.clone(),
            generator: self.generator.clone(),
        }
    }

    pub async fn enter(&self) -> WorkflowController {
        WorkflowController::enter(OWNER, self.deps())
            .await
            .expect("enter should succeed")
    }

    /// Enter, upload a front garment and select `m1`.
    pub async fn ready(&self) -> WorkflowController {
        let controller = self.enter().await;
        controller
            .upload_garment(GarmentView::Front, GarmentImage::from_upload(png(7), None))
            .await
            .expect("upload should succeed");
        controller.select_model("m1").await.expect("select should succeed");
        controller
    }
}
