//! Integration tests for the background handoff, the editor and export.

mod common;

use std::io::Cursor;
use std::sync::Arc;

use assert_matches::assert_matches;

use lookbook_core::collection::{Collection, CollectionItem, ORIGINAL_ITEM_ID};
use lookbook_core::state::{FinalImage, GarmentImage, GarmentView, PoseGenerationRecord};
use lookbook_genai::ImagePart;
use lookbook_store::{load_json, save_json, BlobStore, KeyValueStore, MemoryKvStore, StateStores};
use lookbook_workflow::{
    BackgroundEditor, HandoffChannel, SessionKeys, WorkflowController, WorkflowError,
};

use common::{jpeg, png, Harness, OWNER};

fn keys() -> SessionKeys {
    SessionKeys::new(OWNER).unwrap()
}

fn background(tag: u8) -> ImagePart {
    ImagePart::new(png(200 + tag), "image/png")
}

async fn open_editor(h: &Harness) -> BackgroundEditor {
    BackgroundEditor::open(keys(), &h.stores, h.blobs.clone(), h.generator.clone())
        .await
        .expect("open should succeed")
        .expect("a handoff should be pending")
}

// ---------------------------------------------------------------------------
// Test: full scenario
// ---------------------------------------------------------------------------

/// Upload, generate, change background, apply `bg3`, return.
#[tokio::test]
async fn campaign_scenario() {
    let h = Harness::new().await;
    let controller = h.enter().await;
    controller
        .upload_garment(GarmentView::Front, GarmentImage::from_upload(png(7), None))
        .await
        .unwrap();
    controller.select_model("m1").await.unwrap();
    let r1 = controller.generate("p1", GarmentView::Front).await.unwrap();

    assert_eq!(
        controller.final_images().await,
        vec![FinalImage {
            pose_id: "p1".to_string(),
            source_view: GarmentView::Front,
            image_ref: r1.clone(),
        }]
    );

    let payload = controller.change_background("p1").await.unwrap();
    assert_eq!(payload.source_image_ref, r1);
    drop(controller);

    let mut editor = open_editor(&h).await;
    let r2 = editor
        .apply_background("bg3", background(3))
        .await
        .unwrap()
        .image_ref
        .clone();
    let ret = editor.finish().await.unwrap();
    assert_eq!(ret.last_image_ref.as_deref(), Some(r2.as_str()));

    let controller = h.enter().await;
    assert_eq!(
        controller.collection("p1").await.unwrap(),
        Collection::from_items(vec![
            CollectionItem::original(r1.clone()),
            CollectionItem::variant("bg3", r2.clone()),
        ])
    );
    assert_eq!(
        controller.pose_state("p1").await.unwrap(),
        PoseGenerationRecord::success(r2.clone(), GarmentView::Front)
    );

    // The composite used the original image as its subject.
    let original_bytes = h.blobs.get(&r1).await.unwrap();
    let composites = h.generator.composites.lock().unwrap();
    assert_eq!(composites.len(), 1);
    assert_eq!(composites[0].subject.bytes, original_bytes);
    assert_eq!(composites[0].background.bytes, png(203));
}

// ---------------------------------------------------------------------------
// Test: handoff channel
// ---------------------------------------------------------------------------

/// A published handoff is consumed exactly once.
#[tokio::test]
async fn handoff_is_consumed_once() {
    let h = Harness::new().await;
    let controller = h.ready().await;
    controller.generate("p1", GarmentView::Front).await.unwrap();
    controller.change_background("p1").await.unwrap();

    let channel = HandoffChannel::new(keys(), h.stores.durable.clone());
    let payload = channel.consume().await.unwrap();
    assert_eq!(payload.map(|p| p.pose_id).as_deref(), Some("p1"));
    assert!(channel.consume().await.unwrap().is_none());
}

/// Change background puts exactly one `original` first, even when the
/// durable record already holds variants.
#[tokio::test]
async fn change_background_inserts_single_original_first() {
    let h = Harness::new().await;
    let controller = h.ready().await;
    let r1 = controller.generate("p1", GarmentView::Front).await.unwrap();
    drop(controller);

    save_json(
        h.stores.durable.as_ref(),
        "u1:collection_p1",
        &Collection::from_items(vec![CollectionItem::variant("bg1", "rb1")]),
    )
    .await
    .unwrap();

    let controller = h.enter().await;
    let payload = controller.change_background("p1").await.unwrap();
    let again = controller.change_background("p1").await.unwrap();

    for collection in [&payload.existing_collection, &again.existing_collection] {
        let originals = collection.iter().filter(|i| i.is_original()).count();
        assert_eq!(originals, 1);
        assert_eq!(collection.items()[0], CollectionItem::original(r1.clone()));
        assert_eq!(collection.len(), 2);
    }

    let stored: Option<Collection> = load_json(h.stores.durable.as_ref(), "u1:collection_p1")
        .await
        .unwrap();
    assert_eq!(stored.unwrap(), payload.existing_collection);
}

/// Generation alone never creates a collection.
#[tokio::test]
async fn generation_does_not_create_original() {
    let h = Harness::new().await;
    let controller = h.ready().await;
    controller.generate("p1", GarmentView::Front).await.unwrap();

    assert!(controller.collection("p1").await.is_none());
    assert!(h
        .stores
        .durable
        .keys_with_prefix("u1:collection_")
        .await
        .unwrap()
        .is_empty());
}

/// Change background needs a successful result.
#[tokio::test]
async fn change_background_requires_result() {
    let h = Harness::new().await;
    let controller = h.ready().await;

    assert_matches!(
        controller.change_background("p1").await,
        Err(WorkflowError::Validation(_))
    );
    assert!(h.stores.durable.load("u1:handoff_outbound").await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Test: background editor
// ---------------------------------------------------------------------------

/// Opening a handoff without an `original` writes one through before any
/// edit, so it survives an editor that never finishes.
#[tokio::test]
async fn editor_writes_original_through_on_open() {
    let h = Harness::new().await;
    let source = h.blobs.put("users/u1/poses/p1/src.png", png(50), "image/png").await.unwrap();
    let channel = HandoffChannel::new(keys(), h.stores.durable.clone());
    channel.publish("p1", &source, Collection::new()).await.unwrap();

    let editor = open_editor(&h).await;
    assert_eq!(editor.collection().items(), &[CollectionItem::original(source.clone())]);
    drop(editor);

    let stored: Option<Collection> = load_json(h.stores.durable.as_ref(), "u1:collection_p1")
        .await
        .unwrap();
    assert_eq!(stored.unwrap().original().unwrap().image_ref, source);

    // A crashed editor leaves no return; the workflow still sees the original.
    let controller = h.enter().await;
    assert!(controller.collection("p1").await.unwrap().has_original());
}

/// Nothing published means there is nothing to edit.
#[tokio::test]
async fn editor_without_handoff() {
    let h = Harness::new().await;
    let editor = BackgroundEditor::open(keys(), &h.stores, h.blobs.clone(), h.generator.clone())
        .await
        .unwrap();
    assert!(editor.is_none());
}

/// Re-applying a background replaces its item and moves it last. Variants
/// can be removed; the original cannot. Replaced blobs survive until the
/// workflow has merged the return.
#[tokio::test]
async fn editor_replaces_and_removes_variants() {
    let h = Harness::new().await;
    let controller = h.ready().await;
    controller.generate("p1", GarmentView::Front).await.unwrap();
    controller.change_background("p1").await.unwrap();
    drop(controller);

    let mut editor = open_editor(&h).await;
    let first = editor.apply_background("bg1", background(1)).await.unwrap().image_ref.clone();
    let bg2 = editor.apply_background("bg2", background(2)).await.unwrap().image_ref.clone();
    let replaced = editor.apply_background("bg1", background(1)).await.unwrap().image_ref.clone();

    let ids: Vec<&str> = editor.collection().iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec![ORIGINAL_ITEM_ID, "bg2", "bg1"]);
    assert_ne!(first, replaced);
    assert!(h.blobs.get(&first).await.is_ok());
    assert_eq!(h.blobs.get(&replaced).await.unwrap(), jpeg(3));

    assert!(editor.remove_variant("bg2").await.unwrap());
    assert!(!editor.remove_variant(ORIGINAL_ITEM_ID).await.unwrap());
    assert!(!editor.remove_variant("missing").await.unwrap());
    assert_matches!(
        editor.apply_background(ORIGINAL_ITEM_ID, background(9)).await,
        Err(WorkflowError::Validation(_))
    );
    assert_eq!(editor.collection().len(), 2);
    assert_eq!(editor.retired_refs(), &[first.clone(), bg2.clone()]);
    editor.finish().await.unwrap();

    let controller = h.enter().await;
    assert_eq!(controller.load_report().retired_blobs, 2);
    assert_eq!(
        controller.pose_state("p1").await.unwrap().result_ref(),
        Some(&replaced)
    );
    assert!(h.blobs.get(&first).await.is_err());
    assert!(h.blobs.get(&bg2).await.is_err());
    assert!(h.blobs.get(&replaced).await.is_ok());
}

/// An editor that re-applies the background behind the pose's current
/// result, then never finishes, leaves that result resolvable.
#[tokio::test]
async fn reapplied_background_survives_editor_crash() {
    let h = Harness::new().await;
    let controller = h.ready().await;
    controller.generate("p1", GarmentView::Front).await.unwrap();
    controller.change_background("p1").await.unwrap();
    drop(controller);

    let mut editor = open_editor(&h).await;
    let r2 = editor.apply_background("bg3", background(3)).await.unwrap().image_ref.clone();
    editor.finish().await.unwrap();

    let controller = h.enter().await;
    assert_eq!(controller.pose_state("p1").await.unwrap().result_ref(), Some(&r2));
    let payload = controller.change_background("p1").await.unwrap();
    assert_eq!(payload.source_image_ref, r2);
    drop(controller);

    let mut editor = open_editor(&h).await;
    editor.apply_background("bg3", background(4)).await.unwrap();
    assert!(editor.remove_variant("bg3").await.unwrap());
    drop(editor);

    let controller = h.enter().await;
    let record = controller.pose_state("p1").await.unwrap();
    assert_eq!(record.result_ref(), Some(&r2));
    for image in controller.final_images().await {
        assert!(h.blobs.get(&image.image_ref).await.is_ok());
    }
    assert!(h.blobs.get(&r2).await.is_ok());
}

/// The editor can run against a separate session of the same durable
/// stores, and its return is still applied.
#[tokio::test]
async fn editor_runs_in_a_separate_session() {
    let h = Harness::new().await;
    let controller = h.ready().await;
    let r1 = controller.generate("p1", GarmentView::Front).await.unwrap();
    controller.change_background("p1").await.unwrap();
    drop(controller);

    let editor_stores = StateStores::new(Arc::new(MemoryKvStore::new()), h.stores.durable.clone());
    let mut editor = BackgroundEditor::open(keys(), &editor_stores, h.blobs.clone(), h.generator.clone())
        .await
        .unwrap()
        .expect("a handoff should be pending");
    let r2 = editor.apply_background("bg1", background(1)).await.unwrap().image_ref.clone();
    editor.finish().await.unwrap();

    let mut deps = h.deps();
    deps.stores = StateStores::new(Arc::new(MemoryKvStore::new()), h.stores.durable.clone());
    let controller = WorkflowController::enter(OWNER, deps).await.unwrap();
    assert_eq!(controller.load_report().handoff_pose.as_deref(), Some("p1"));
    assert_eq!(
        controller.pose_state("p1").await.unwrap(),
        PoseGenerationRecord::success(r2.clone(), GarmentView::Front)
    );
    assert_eq!(
        controller.collection("p1").await.unwrap(),
        Collection::from_items(vec![
            CollectionItem::original(r1),
            CollectionItem::variant("bg1", r2),
        ])
    );
}

/// Finishing without a new variant leaves the pose result unchanged.
#[tokio::test]
async fn finish_without_edits_keeps_result() {
    let h = Harness::new().await;
    let controller = h.ready().await;
    let r1 = controller.generate("p1", GarmentView::Front).await.unwrap();
    controller.change_background("p1").await.unwrap();
    drop(controller);

    let ret = open_editor(&h).await.finish().await.unwrap();
    assert!(ret.last_image_ref.is_none());

    let controller = h.enter().await;
    assert_eq!(
        controller.pose_state("p1").await.unwrap(),
        PoseGenerationRecord::success(r1, GarmentView::Front)
    );
    assert_eq!(controller.collection("p1").await.unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Test: export
// ---------------------------------------------------------------------------

/// The archive holds every collection item under its deterministic name.
#[tokio::test]
async fn export_bundles_collection() {
    let h = Harness::new().await;
    let controller = h.ready().await;
    controller.generate("p1", GarmentView::Front).await.unwrap();
    controller.change_background("p1").await.unwrap();
    drop(controller);

    let mut editor = open_editor(&h).await;
    editor.apply_background("bg3", background(3)).await.unwrap();
    editor.finish().await.unwrap();

    let controller = h.enter().await;
    let bytes = controller.export_collection("p1").await.unwrap();
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert_eq!(
        names,
        vec![
            "hands_on_hips-original-variation-1.png",
            "hands_on_hips-bg3-variation-2.jpg",
        ]
    );
}

/// A pose that was never edited exports its result alone; a pose with no
/// result has nothing to export.
#[tokio::test]
async fn export_without_collection() {
    let h = Harness::new().await;
    let controller = h.ready().await;
    controller.generate("p2", GarmentView::Front).await.unwrap();

    let bytes = controller.export_collection("p2").await.unwrap();
    let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.len(), 1);
    assert!(controller.collection("p2").await.is_none());

    assert_matches!(
        controller.export_collection("p1").await,
        Err(WorkflowError::Validation(_))
    );
}
