//! `lookbook`: drive one campaign workflow from the command line.
//!
//! Every invocation is one workflow entry: persisted state is merged on
//! start, the intent runs, and the result is saved under the data dir.
//! `edit` is the exception: it runs the background editor on the pose
//! handed over by `background`, and the next entry merges its result.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lookbook_core::catalog::{Gender, ModelCatalog};
use lookbook_core::naming::image_mime_type;
use lookbook_core::state::{GarmentImage, GarmentView};
use lookbook_genai::{GenerationApi, ImagePart};
use lookbook_store::{FsBlobStore, FsKvStore, MemoryKvStore, StateStores};
use lookbook_workflow::{BackgroundEditor, SessionKeys, WorkflowController, WorkflowDeps};

use config::LookbookConfig;

#[derive(Debug, Parser)]
#[command(name = "lookbook", about = "Garment campaign workflow")]
struct Cli {
    /// Override `LOOKBOOK_USER_ID`.
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload a garment image for one view.
    Upload { view: GarmentView, path: PathBuf },
    /// Remove the garment image for one view.
    Clear { view: GarmentView },
    /// Select the model gender (male or female).
    Gender { gender: String },
    /// Select a model from the catalog.
    Model { model_id: String },
    /// Generate a pose from a garment view.
    Generate {
        pose_id: String,
        #[arg(long, default_value = "front")]
        view: GarmentView,
    },
    /// Regenerate a pose with a correction.
    Fix { pose_id: String, instruction: String },
    /// Hand a pose over to the background editor.
    Background { pose_id: String },
    /// Edit the handed-over pose: apply backgrounds given as
    /// `<background-id>=<image path>`, then return it to the workflow.
    Edit {
        #[arg(value_parser = parse_background)]
        backgrounds: Vec<(String, PathBuf)>,
        /// Remove the variant for a background id.
        #[arg(long = "remove")]
        remove: Vec<String>,
    },
    /// Print the current workflow state.
    Status,
    /// Write a pose's collection as a ZIP archive.
    Export {
        pose_id: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete every stored image and record for the user.
    StartOver,
}

fn parse_background(value: &str) -> Result<(String, PathBuf), String> {
    let (id, path) = value
        .split_once('=')
        .ok_or_else(|| format!("expected <background-id>=<path>, got '{value}'"))?;
    if id.is_empty() || path.is_empty() {
        return Err(format!("expected <background-id>=<path>, got '{value}'"));
    }
    Ok((id.to_string(), PathBuf::from(path)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lookbook=info,lookbook_workflow=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // --- Configuration ---
    let mut config = LookbookConfig::from_env()?;
    if let Some(user) = cli.user {
        config.user_id = user;
    }
    tracing::info!(
        user_id = %config.user_id,
        data_dir = %config.data_dir.display(),
        catalog = %config.catalog_path.display(),
        "Loaded configuration",
    );

    let deps = build_deps(&config).await?;
    run(cli.command, &config, deps).await
}

async fn build_deps(config: &LookbookConfig) -> anyhow::Result<WorkflowDeps> {
    let catalog_json = tokio::fs::read_to_string(&config.catalog_path)
        .await
        .with_context(|| format!("Failed to read catalog {}", config.catalog_path.display()))?;
    let catalog = ModelCatalog::from_json(&catalog_json)?;
    tracing::info!(models = catalog.models.len(), "Model catalog loaded");

    let durable = FsKvStore::open(config.data_dir.join("state")).await?;
    let blobs = FsBlobStore::open(config.data_dir.join("blobs")).await?;
    let assets = FsBlobStore::open(config.assets_dir()).await?;
    let generator = GenerationApi::new(config.generation.clone())?;

    Ok(WorkflowDeps {
        catalog: Arc::new(catalog),
        // Each invocation is its own session; the handoff lives in the
        // durable tier.
        stores: StateStores::new(Arc::new(MemoryKvStore::new()), Arc::new(durable)),
        blobs: Arc::new(blobs),
        assets: Arc::new(assets),
        generator: Arc::new(generator),
    })
}

async fn run(command: Command, config: &LookbookConfig, deps: WorkflowDeps) -> anyhow::Result<()> {
    // The editor is its own screen and does not enter the workflow.
    if let Command::Edit { backgrounds, remove } = command {
        return edit_backgrounds(config, &deps, backgrounds, remove).await;
    }

    let controller = WorkflowController::enter(&config.user_id, deps).await?;

    match command {
        Command::Upload { view, path } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            controller
                .upload_garment(view, GarmentImage::from_upload(bytes, file_name))
                .await?;
            println!("Uploaded {view} garment");
        }
        Command::Clear { view } => {
            controller.clear_garment(view).await?;
            println!("Cleared {view} garment");
        }
        Command::Gender { gender } => {
            controller.select_gender(Gender::parse(&gender)?).await?;
        }
        Command::Model { model_id } => {
            controller.select_model(&model_id).await?;
        }
        Command::Generate { pose_id, view } => {
            report(controller.generate(&pose_id, view).await)?;
        }
        Command::Fix {
            pose_id,
            instruction,
        } => {
            report(controller.regenerate(&pose_id, &instruction).await)?;
        }
        Command::Background { pose_id } => {
            let payload = controller.change_background(&pose_id).await?;
            for item in &payload.existing_collection {
                println!("{}\t{}", item.id, item.image_ref);
            }
            println!("Handed {pose_id} to the background editor; run `lookbook edit`");
        }
        // Handled before entering the workflow.
        Command::Edit { .. } => {}
        Command::Status => {
            let state = controller.state().await;
            let status = serde_json::json!({
                "user_id": controller.owner_id(),
                "garment_front": state.garment_front.is_some(),
                "garment_back": state.garment_back.is_some(),
                "gender": state.gender,
                "model_id": state.model_id,
                "poses": state.pose_states,
                "collections": state.collections,
                "final_images": controller.final_images().await,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Export { pose_id, out } => {
            let archive = controller.export_collection(&pose_id).await?;
            let out = out.unwrap_or_else(|| PathBuf::from(format!("{pose_id}.zip")));
            tokio::fs::write(&out, &archive)
                .await
                .with_context(|| format!("Failed to write {}", out.display()))?;
            println!("Wrote {} ({} bytes)", out.display(), archive.len());
        }
        Command::StartOver => {
            let report = controller.start_over().await;
            println!(
                "Deleted {} images and {} records ({} failures)",
                report.blobs_deleted, report.keys_removed, report.failures
            );
        }
    }
    Ok(())
}

/// Run the background editor over every requested background.
///
/// The return is applied by the next command that enters the workflow.
async fn edit_backgrounds(
    config: &LookbookConfig,
    deps: &WorkflowDeps,
    backgrounds: Vec<(String, PathBuf)>,
    remove: Vec<String>,
) -> anyhow::Result<()> {
    let keys = SessionKeys::new(&config.user_id)?;
    let mut editor = BackgroundEditor::open(keys, &deps.stores, deps.blobs.clone(), deps.generator.clone())
        .await?
        .context("No background handoff was published")?;

    for (background_id, path) in backgrounds {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mime_type = image_mime_type(&bytes);
        match editor
            .apply_background(&background_id, ImagePart::new(bytes, mime_type))
            .await
        {
            Ok(item) => println!("Applied {background_id}: {}", item.image_ref),
            Err(e) => eprintln!("Background {background_id} failed: {}", e.user_message()),
        }
    }
    for background_id in remove {
        if editor.remove_variant(&background_id).await? {
            println!("Removed {background_id}");
        } else {
            eprintln!("No variant for {background_id}");
        }
    }
    let ret = editor.finish().await?;
    println!("Returned {} with {} images", ret.pose_id, ret.collection.len());
    Ok(())
}

fn report(result: Result<String, lookbook_workflow::WorkflowError>) -> anyhow::Result<()> {
    match result {
        Ok(image_ref) => {
            println!("{image_ref}");
            Ok(())
        }
        Err(e) => anyhow::bail!(e.user_message()),
    }
}
