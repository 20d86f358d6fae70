use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use image::ImageFormat;
use inkmark_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use inkmark_contracts::events::{payload as event_payload, EventLog};
use inkmark_contracts::session::{GeneratedImage, MarkerColor, SessionId, SessionStore};
use inkmark_engine::{
    EditOrchestrator, EngineConfig, EngineError, EnvCredentials, GenerationClient, HttpTransport,
    LiveOrchestrator, OverlayCanvas, RasterCanvas, RasterCompositor,
};
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "inkmark", version, about = "Mask-driven image generation and editing")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive multi-session editor.
    Chat(ChatArgs),
    /// Generate one image from a prompt.
    Generate(GenerateArgs),
    /// Generate (or load) a base image, then apply one masked edit.
    Edit(EditArgs),
}

#[derive(Debug, Args)]
struct ModelArgs {
    #[arg(long)]
    image_model: Option<String>,
    #[arg(long)]
    vision_model: Option<String>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long, default_value = "inkmark-run")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    models: ModelArgs,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    models: ModelArgs,
}

#[derive(Debug, Parser)]
struct EditArgs {
    /// Prompt for the base image.
    #[arg(long, required_unless_present = "source", conflicts_with = "source")]
    prompt: Option<String>,
    /// Existing image to edit instead of generating one.
    #[arg(long)]
    source: Option<PathBuf>,
    /// PNG overlay with marker strokes.
    #[arg(long)]
    overlay: Option<PathBuf>,
    /// Region instruction as `color=text`; repeatable.
    #[arg(long = "region", value_parser = parse_region_arg)]
    regions: Vec<(MarkerColor, String)>,
    #[arg(long)]
    global: Option<String>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    models: ModelArgs,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("inkmark error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Generate(args) => run_generate(args),
        Command::Edit(args) => run_edit(args),
    }
}

/// Engine pieces shared by every command.
struct Workspace {
    config: EngineConfig,
    store: SessionStore,
    events: EventLog,
}

impl Workspace {
    fn open(run_dir: &Path, events_path: Option<PathBuf>, models: &ModelArgs) -> Result<Self> {
        fs::create_dir_all(run_dir)
            .with_context(|| format!("failed to create {}", run_dir.display()))?;
        let run_id = run_dir
            .file_name()
            .and_then(|value| value.to_str())
            .filter(|value| !value.is_empty())
            .unwrap_or("inkmark-run")
            .to_string();
        let events_path = events_path.unwrap_or_else(|| run_dir.join("events.jsonl"));

        let (mut config, mut warnings) = EngineConfig::from_env();
        warnings.extend(
            config.select_models(models.image_model.as_deref(), models.vision_model.as_deref()),
        );
        for warning in &warnings {
            warn!("{warning}");
        }
        let events = EventLog::new(events_path, run_id);
        info!(
            image_model = %config.image_model,
            vision_model = %config.vision_model,
            run_id = events.run_id(),
            events = %events.path().display(),
            "engine configured"
        );

        Ok(Self {
            config,
            store: SessionStore::new(),
            events,
        })
    }

    fn orchestrator(&self) -> Arc<LiveOrchestrator> {
        let client = GenerationClient::new(
            &self.config,
            HttpTransport::new(&self.config),
            EnvCredentials,
        );
        Arc::new(
            EditOrchestrator::new(
                client,
                RasterCompositor::from_config(&self.config),
                self.store.clone(),
            )
            .with_events(self.events.clone()),
        )
    }

    fn load_overlay(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let mut canvas = RasterCanvas::new(self.config.canvas_resolution)?;
        canvas
            .load_overlay_file(path)
            .with_context(|| format!("failed to load overlay {}", path.display()))?;
        Ok(canvas.capture_overlay()?)
    }

    /// Paints one stroke on top of `existing` and returns the new overlay.
    fn draw_stroke(
        &self,
        existing: Option<&[u8]>,
        color: MarkerColor,
        radius: f32,
        points: &[(f32, f32)],
    ) -> Result<Option<Vec<u8>>> {
        let mut canvas = RasterCanvas::new(self.config.canvas_resolution)?;
        if let Some(existing) = existing {
            canvas.restore_overlay(existing)?;
        }
        canvas.paint_stroke(color, points, radius);
        Ok(canvas.capture_overlay()?)
    }

    fn record(&self, event_type: &str, payload: Value) -> bool {
        record_event(&self.events, event_type, payload)
    }
}

/// Writes a CLI-level event. A log that cannot be written is reported and
/// otherwise ignored.
fn record_event(events: &EventLog, event_type: &str, payload: Value) -> bool {
    match events.emit(event_type, event_payload(payload)) {
        Ok(_) => true,
        Err(err) => {
            warn!(event_type, error = %err, "failed to write event");
            false
        }
    }
}

fn session_summaries(store: &SessionStore) -> Value {
    let summaries: Vec<_> = store.snapshot().iter().map(|session| session.summary()).collect();
    serde_json::to_value(summaries).unwrap_or_else(|err| {
        warn!(error = %err, "failed to serialize session summaries");
        Value::Array(Vec::new())
    })
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let run_dir = parent_dir(&args.out);
    let workspace = Workspace::open(&run_dir, args.events, &args.models)?;
    let orchestrator = workspace.orchestrator();
    let id = workspace.store.active_id();

    let image = orchestrator.generate(id, &args.prompt)?;
    save_image(&image, &args.out)?;
    println!("Saved {} ({})", args.out.display(), image.fingerprint());
    Ok(0)
}

fn run_edit(args: EditArgs) -> Result<i32> {
    let run_dir = parent_dir(&args.out);
    let workspace = Workspace::open(&run_dir, args.events, &args.models)?;
    let orchestrator = workspace.orchestrator();
    let store = &workspace.store;
    let id = store.active_id();

    match (&args.source, &args.prompt) {
        (Some(source), _) => {
            let image = read_image(source)?;
            store.update(id, |session| session.image = Some(image))?;
        }
        (None, Some(prompt)) => {
            let image = orchestrator.generate(id, prompt)?;
            println!("Base image generated ({})", image.fingerprint());
        }
        (None, None) => bail!("either --prompt or --source is required"),
    }

    if let Some(global) = &args.global {
        store.set_global_instruction(id, global.as_str())?;
    }
    for (color, text) in &args.regions {
        store.set_region_instruction(id, *color, text.as_str())?;
    }
    if let Some(path) = &args.overlay {
        store.set_pending_overlay(id, workspace.load_overlay(path)?)?;
    }

    let report = orchestrator.edit(id)?;
    save_image(&report.image, &args.out)?;
    println!(
        "Saved {} ({}, cleanup: {})",
        args.out.display(),
        report.image.fingerprint(),
        report.outcome.as_str()
    );
    Ok(0)
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let mut workspace = Workspace::open(&args.out, args.events, &args.models)?;
    let mut orchestrator = workspace.orchestrator();
    let store = workspace.store.clone();
    let mut workers: Vec<JoinHandle<()>> = Vec::new();

    let stdin = io::stdin();
    let mut line = String::new();

    workspace.record(
        "chat_started",
        json!({
            "image_model": orchestrator.service().image_model(),
            "vision_model": orchestrator.service().vision_model(),
        }),
    );
    println!(
        "Inkmark chat started (events: {}). Type /help for commands.",
        workspace.events.path().display()
    );

    loop {
        workers.retain(|worker| !worker.is_finished());
        let active = store.active();
        print!("[{}] > ", active.title);
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        let active_id = active.id;
        match intent.action.as_str() {
            "noop" => {}
            "help" => println!("Commands: {}", CHAT_HELP_COMMANDS.join(" ")),
            "quit" => break,
            "generate" => {
                let prompt = intent.prompt.clone().unwrap_or_default();
                workers.push(spawn_generate(
                    orchestrator.clone(),
                    active_id,
                    prompt,
                    args.out.clone(),
                ));
            }
            "edit" => {
                workers.push(spawn_edit(orchestrator.clone(), active_id, args.out.clone()));
            }
            "new_session" => {
                let id = store.create_session();
                println!("Created {}", store.active().title);
                workspace.record("session_created", json!({ "session_id": id.to_string() }));
            }
            "list_sessions" => print_sessions(&store),
            "switch_session" => match resolve_target(&store, &intent) {
                Some(id) => {
                    store.switch_to(id)?;
                    println!("Switched to {}", store.active().title);
                }
                None => println!("/switch requires a session number or id prefix"),
            },
            "delete_session" => {
                let target = match intent.arg("target") {
                    Some(_) => resolve_target(&store, &intent),
                    None => Some(active_id),
                };
                match target {
                    Some(id) => {
                        store.delete_session(id)?;
                        println!("Deleted. Active session: {}", store.active().title);
                        workspace.record("session_deleted", json!({ "session_id": id.to_string() }));
                    }
                    None => println!("No session matches that selector"),
                }
            }
            "set_global" => {
                let text = intent.arg("text").unwrap_or_default().to_string();
                store.set_global_instruction(active_id, text.as_str())?;
                if text.is_empty() {
                    println!("Global instruction cleared");
                } else {
                    println!("Global instruction set");
                }
            }
            "set_region" => {
                let Some(color) = intent
                    .arg("color")
                    .and_then(|raw| raw.parse::<MarkerColor>().ok())
                else {
                    println!("/region requires a color");
                    continue;
                };
                let text = intent.arg("text").unwrap_or_default().to_string();
                store.set_region_instruction(active_id, color, text.as_str())?;
                if text.is_empty() {
                    println!("{color} instruction cleared");
                } else {
                    println!("{color} instruction set");
                }
            }
            "load_overlay" => {
                let Some(path) = intent.arg("path") else {
                    println!("/overlay requires a path");
                    continue;
                };
                match workspace.load_overlay(Path::new(path)) {
                    Ok(Some(overlay)) => {
                        store.set_pending_overlay(active_id, Some(overlay))?;
                        println!("Overlay loaded from {path}");
                    }
                    Ok(None) => {
                        store.set_pending_overlay(active_id, None)?;
                        println!("Overlay {path} has no marker strokes; nothing to composite");
                    }
                    Err(err) => println!("Overlay failed: {err:#}"),
                }
            }
            "draw_stroke" => {
                let Some(color) = intent
                    .arg("color")
                    .and_then(|raw| raw.parse::<MarkerColor>().ok())
                else {
                    println!("/draw requires a color");
                    continue;
                };
                let radius = intent.number("radius").unwrap_or(1.0) as f32;
                let points = intent.points();
                match workspace.draw_stroke(active.pending_overlay.as_deref(), color, radius, &points) {
                    Ok(overlay) => {
                        store.set_pending_overlay(active_id, overlay)?;
                        println!("{color} stroke drawn ({} point(s))", points.len());
                    }
                    Err(err) => println!("Draw failed: {err:#}"),
                }
            }
            "clear_overlay" => {
                store.set_pending_overlay(active_id, None)?;
                println!("Overlay cleared");
            }
            "save_image" => {
                let Some(image) = active.image.as_ref() else {
                    println!("Nothing to save yet");
                    continue;
                };
                let path = match intent.arg("path") {
                    Some(path) => PathBuf::from(path),
                    None => default_image_path(&args.out, active_id, image),
                };
                match save_image(image, &path) {
                    Ok(()) => println!("Saved {}", path.display()),
                    Err(err) => println!("Save failed: {err:#}"),
                }
            }
            "status" => print_status(&store, active_id),
            "set_image_model" | "set_vision_model" => {
                let Some(model) = intent.arg("model") else {
                    println!(
                        "Image model: {}  Vision model: {}",
                        orchestrator.service().image_model(),
                        orchestrator.service().vision_model()
                    );
                    continue;
                };
                let warnings = if intent.action == "set_image_model" {
                    workspace.config.select_models(Some(model), None)
                } else {
                    workspace.config.select_models(None, Some(model))
                };
                for warning in warnings {
                    println!("{warning}");
                }
                // running workers keep the orchestrator they started with
                orchestrator = workspace.orchestrator();
                println!(
                    "Image model: {}  Vision model: {}",
                    orchestrator.service().image_model(),
                    orchestrator.service().vision_model()
                );
            }
            "invalid" => println!("{}", intent.arg("error").unwrap_or("Invalid command")),
            "unknown" => println!(
                "Unknown command /{}. Type /help for commands.",
                intent.arg("command").unwrap_or_default()
            ),
            other => println!("Unhandled action: {other}"),
        }
    }

    workers.retain(|worker| !worker.is_finished());
    if !workers.is_empty() {
        println!("Waiting for {} running operation(s)...", workers.len());
    }
    for worker in workers {
        if worker.join().is_err() {
            warn!("worker thread panicked");
        }
    }
    workspace.record("chat_finished", json!({ "sessions": session_summaries(&store) }));
    Ok(())
}

fn spawn_generate(
    orchestrator: Arc<LiveOrchestrator>,
    id: SessionId,
    prompt: String,
    out_dir: PathBuf,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let title = session_title(orchestrator.store(), id);
        match orchestrator.generate(id, &prompt) {
            Ok(image) => announce_image(&title, "generated", id, &image, &out_dir),
            Err(err) => announce_failure(&title, "generate", &err),
        }
    })
}

fn spawn_edit(orchestrator: Arc<LiveOrchestrator>, id: SessionId, out_dir: PathBuf) -> JoinHandle<()> {
    thread::spawn(move || {
        let title = session_title(orchestrator.store(), id);
        match orchestrator.edit(id) {
            Ok(report) => {
                let what = format!("edited (cleanup: {})", report.outcome.as_str());
                announce_image(&title, &what, id, &report.image, &out_dir);
            }
            Err(err) => announce_failure(&title, "edit", &err),
        }
    })
}

fn session_title(store: &SessionStore, id: SessionId) -> String {
    store
        .get(id)
        .map(|session| session.title)
        .unwrap_or_else(|| id.short())
}

fn announce_image(title: &str, what: &str, id: SessionId, image: &GeneratedImage, out_dir: &Path) {
    let path = default_image_path(out_dir, id, image);
    match save_image(image, &path) {
        Ok(()) => println!("\n{title}: image {what} -> {}", path.display()),
        Err(err) => println!("\n{title}: image {what} ({}) but saving failed: {err:#}", image.fingerprint()),
    }
}

fn announce_failure(title: &str, operation: &str, err: &EngineError) {
    if err.is_rejection() {
        println!("\n{title}: {operation} not started: {err}");
    } else {
        println!("\n{title}: {operation} failed: {}", err.session_message());
    }
}

fn resolve_target(store: &SessionStore, intent: &Intent) -> Option<SessionId> {
    intent.arg("target").and_then(|target| store.resolve(target))
}

fn print_sessions(store: &SessionStore) {
    let active = store.active_id();
    for (idx, session) in store.snapshot().iter().enumerate() {
        let summary = session.summary();
        let marker = if session.id == active { "*" } else { " " };
        let prompt = if summary.base_prompt.is_empty() {
            "-".to_string()
        } else {
            summary.base_prompt.clone()
        };
        println!(
            "{marker} {}. {} [{}] {} {} {}",
            idx + 1,
            summary.title,
            summary.status,
            summary.id.short(),
            session.created_at.format("%H:%M:%S"),
            prompt
        );
    }
}

fn print_status(store: &SessionStore, id: SessionId) {
    let Some(session) = store.get(id) else {
        println!("Session not found");
        return;
    };
    let summary = session.summary();
    println!("{} ({}) [{}]", summary.title, summary.id.short(), summary.status);
    match &session.image {
        Some(image) => {
            let size = image
                .dimensions()
                .map(|(width, height)| format!("{width}x{height}"))
                .unwrap_or_else(|| "unknown size".to_string());
            println!("  image: {} {} {size}", image.fingerprint(), image.media_type());
        }
        None => println!("  image: none"),
    }
    if !summary.base_prompt.is_empty() {
        println!("  prompt: {}", summary.base_prompt);
    }
    if !session.global_instruction.trim().is_empty() {
        println!("  global: {}", session.global_instruction.trim());
    }
    for region in session.active_instructions() {
        println!("  {}", region.prompt_line());
    }
    println!("  overlay: {}", if summary.has_overlay { "loaded" } else { "none" });
    if let Some(error) = &summary.last_error {
        println!("  last error: {error}");
    }
    println!("  can edit: {}", if session.can_edit() { "yes" } else { "no" });
}

fn parse_region_arg(raw: &str) -> Result<(MarkerColor, String), String> {
    let (color, text) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected color=text, got '{raw}'"))?;
    let color = color.parse::<MarkerColor>()?;
    let text = text.trim();
    if text.is_empty() {
        return Err(format!("region instruction for {color} is empty"));
    }
    Ok((color, text.to_string()))
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn default_image_path(out_dir: &Path, id: SessionId, image: &GeneratedImage) -> PathBuf {
    out_dir.join(format!(
        "{}-{}.{}",
        id.short(),
        image.fingerprint(),
        image.file_extension()
    ))
}

fn read_image(path: &Path) -> Result<GeneratedImage> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let media_type = ImageFormat::from_path(path)
        .map(|format| format.to_mime_type())
        .unwrap_or("image/png");
    Ok(GeneratedImage::new(bytes, media_type))
}

fn save_image(image: &GeneratedImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, image.payload()).with_context(|| format!("failed to write {}", path.display()))
}
