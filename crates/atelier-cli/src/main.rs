use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use atelier_contracts::catalog::Branch;
use atelier_contracts::history::ImageArtifact;
use atelier_contracts::options::{axis_choices, TechOptions};
use atelier_contracts::prompts::{AnalysisMode, PromptPair};
use atelier_contracts::ratio::AspectRatio;
use atelier_engine::{
    CompositeRequest, DryrunGateway, FaceSwapRequest, FaceSwapSource, GeminiStudio,
    GenerationSettings, IdeaRequest, InlineImage, RestoreSubject, StudioSession,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Local;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "atelier", version, about = "Bilingual prompt studio CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Expand a text idea into a bilingual prompt pair and generate images
    Idea(IdeaArgs),
    /// Generate images from a finished prompt, skipping composition
    Prompt(PromptArgs),
    /// Describe an uploaded image and generate from the description
    Analyze(AnalyzeArgs),
    /// Edit an image with a custom instruction, fanning out variants
    Edit(EditArgs),
    /// Place the face from a portrait into a synthesized scene
    FaceSwap(FaceSwapArgs),
    /// Composite character images into a single coherent scene
    Composite(CompositeArgs),
    /// Restore an old or damaged photo
    Restore(RestoreArgs),
    /// Upscale an image without changing its content
    Upscale(UpscaleArgs),
    /// Compose a cinematic text-to-video prompt
    Video(VideoArgs),
    /// List catalog branches, structure slots, and preference choices
    Catalog,
}

#[derive(Debug, Args)]
struct TechFlags {
    #[arg(long)]
    style: Option<String>,
    #[arg(long)]
    layout: Option<String>,
    #[arg(long)]
    angle: Option<String>,
    #[arg(long)]
    quality: Option<String>,
}

impl TechFlags {
    fn to_options(&self) -> TechOptions {
        TechOptions {
            style: self.style.clone(),
            layout: self.layout.clone(),
            angle: self.angle.clone(),
            quality: self.quality.clone(),
        }
    }
}

#[derive(Debug, Args)]
struct GenFlags {
    /// Number of variants to produce (1-4)
    #[arg(long, default_value_t = 1)]
    count: u32,
    /// auto, 1:1, 16:9, 9:16, 4:3, or 3:4
    #[arg(long, default_value = "auto")]
    aspect_ratio: AspectRatio,
    /// Directory artifacts are written into
    #[arg(long, default_value = "artifacts")]
    out: PathBuf,
    /// Use the offline deterministic backend instead of the remote API
    #[arg(long)]
    dry_run: bool,
}

impl GenFlags {
    fn settings(&self) -> GenerationSettings {
        GenerationSettings {
            count: self.count,
            ratio: self.aspect_ratio,
        }
    }
}

#[derive(Debug, Args)]
struct IdeaArgs {
    idea: String,
    #[arg(long, default_value = "freestyle")]
    mode: String,
    #[arg(long)]
    branch: Option<String>,
    #[command(flatten)]
    tech: TechFlags,
    /// Print the prompt pair without generating images
    #[arg(long)]
    prompt_only: bool,
    #[command(flatten)]
    gen: GenFlags,
}

#[derive(Debug, Args)]
struct PromptArgs {
    prompt: String,
    #[command(flatten)]
    gen: GenFlags,
}

#[derive(Debug, Args)]
struct AnalyzeArgs {
    image: PathBuf,
    #[arg(long, default_value = "freestyle")]
    mode: String,
    #[command(flatten)]
    tech: TechFlags,
    /// Print the prompt pair without generating images
    #[arg(long)]
    prompt_only: bool,
    #[command(flatten)]
    gen: GenFlags,
}

#[derive(Debug, Args)]
struct EditArgs {
    image: PathBuf,
    /// What to change about the image
    #[arg(long)]
    instruction: String,
    #[command(flatten)]
    gen: GenFlags,
}

#[derive(Debug, Args)]
struct FaceSwapArgs {
    /// Portrait whose face must be preserved
    portrait: PathBuf,
    /// Text description of the target scene
    #[arg(long, conflicts_with = "style_image")]
    scene: Option<String>,
    /// Reference image whose scene is analyzed and reused
    #[arg(long)]
    style_image: Option<PathBuf>,
    #[arg(long, default_value = "freestyle")]
    mode: String,
    #[command(flatten)]
    tech: TechFlags,
    #[command(flatten)]
    gen: GenFlags,
}

#[derive(Debug, Args)]
struct CompositeArgs {
    /// Character image; repeat for each character
    #[arg(long = "character", required = true)]
    characters: Vec<PathBuf>,
    #[arg(long)]
    background: Option<PathBuf>,
    /// What the characters are doing in the scene
    #[arg(long)]
    description: String,
    #[arg(long, default_value = "freestyle")]
    mode: String,
    #[command(flatten)]
    tech: TechFlags,
    #[command(flatten)]
    gen: GenFlags,
}

#[derive(Debug, Args)]
struct RestoreArgs {
    image: PathBuf,
    /// The photo contains multiple people
    #[arg(long)]
    multiple: bool,
    #[arg(long)]
    gender: Option<String>,
    #[arg(long)]
    age: Option<String>,
    /// Extra details about the person or scene
    #[arg(long)]
    details: Option<String>,
    #[arg(long, default_value = "artifacts")]
    out: PathBuf,
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct UpscaleArgs {
    image: PathBuf,
    #[arg(long, default_value = "artifacts")]
    out: PathBuf,
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct VideoArgs {
    idea: String,
    #[arg(long, default_value = "freestyle")]
    mode: String,
    /// Previous scene's prompt; switches to continuation composition
    #[arg(long)]
    previous: Option<String>,
    #[arg(long)]
    dry_run: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("atelier error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Idea(args) => run_idea(args),
        Command::Prompt(args) => run_prompt(args),
        Command::Analyze(args) => run_analyze(args),
        Command::Edit(args) => run_edit(args),
        Command::FaceSwap(args) => run_face_swap(args),
        Command::Composite(args) => run_composite(args),
        Command::Restore(args) => run_restore(args),
        Command::Upscale(args) => run_upscale(args),
        Command::Video(args) => run_video(args),
        Command::Catalog => run_catalog(),
    }
}

fn build_session(dry_run: bool) -> StudioSession {
    if dry_run {
        StudioSession::new(Box::new(DryrunGateway))
    } else {
        StudioSession::new(Box::new(GeminiStudio::new()))
    }
}

fn parse_mode(raw: &str) -> Result<AnalysisMode> {
    AnalysisMode::from_key(raw)
        .with_context(|| format!("unknown mode '{raw}' (expected freestyle, focused, in_depth, or super)"))
}

fn parse_branch(raw: Option<&str>) -> Result<Option<Branch>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let branch = Branch::from_key(raw).with_context(|| {
        let keys: Vec<&str> = Branch::ALL.iter().map(|branch| branch.key()).collect();
        format!("unknown branch '{raw}' (expected one of: {})", keys.join(", "))
    })?;
    Ok(Some(branch))
}

fn load_image(path: &Path) -> Result<InlineImage> {
    InlineImage::from_path(path).with_context(|| format!("loading {}", path.display()))
}

fn run_idea(args: IdeaArgs) -> Result<()> {
    let mode = parse_mode(&args.mode)?;
    let request = IdeaRequest {
        idea: args.idea.clone(),
        branch: parse_branch(args.branch.as_deref())?,
        options: args.tech.to_options(),
        mode,
    };
    let mut session = build_session(args.gen.dry_run);
    if args.prompt_only {
        let pair = session.prompts_from_idea(&request)?;
        print_prompts(&pair);
        return Ok(());
    }
    let outcome = session.create_from_idea(&request, &args.gen.settings())?;
    if let Some(pair) = &outcome.prompts {
        print_prompts(pair);
    }
    report_saved(&save_artifacts(&args.gen.out, &outcome.artifacts)?);
    Ok(())
}

fn run_prompt(args: PromptArgs) -> Result<()> {
    let mut session = build_session(args.gen.dry_run);
    let outcome = session.create_from_prompt(&args.prompt, &args.gen.settings())?;
    report_saved(&save_artifacts(&args.gen.out, &outcome.artifacts)?);
    Ok(())
}

fn run_analyze(args: AnalyzeArgs) -> Result<()> {
    let mode = parse_mode(&args.mode)?;
    let image = load_image(&args.image)?;
    let options = args.tech.to_options();
    let mut session = build_session(args.gen.dry_run);
    if args.prompt_only {
        let pair = session.analyze_image(&image, mode, &options)?;
        print_prompts(&pair);
        return Ok(());
    }
    let outcome = session.create_from_image(&image, mode, &options, &args.gen.settings())?;
    if let Some(pair) = &outcome.prompts {
        print_prompts(pair);
    }
    report_saved(&save_artifacts(&args.gen.out, &outcome.artifacts)?);
    Ok(())
}

fn run_edit(args: EditArgs) -> Result<()> {
    let image = load_image(&args.image)?;
    let mut session = build_session(args.gen.dry_run);
    let artifacts = session.edit(&image, &args.instruction, &args.gen.settings())?;
    report_saved(&save_artifacts(&args.gen.out, &artifacts)?);
    Ok(())
}

fn run_face_swap(args: FaceSwapArgs) -> Result<()> {
    let source = match (&args.scene, &args.style_image) {
        (Some(scene), None) => FaceSwapSource::Description(scene.clone()),
        (None, Some(path)) => FaceSwapSource::StyleImage(load_image(path)?),
        _ => bail!("provide exactly one of --scene or --style-image"),
    };
    let request = FaceSwapRequest {
        portrait: load_image(&args.portrait)?,
        source,
        options: args.tech.to_options(),
        mode: parse_mode(&args.mode)?,
    };
    let mut session = build_session(args.gen.dry_run);
    let outcome = session.face_swap(&request, &args.gen.settings())?;
    if let Some(pair) = &outcome.prompts {
        print_prompts(pair);
    }
    report_saved(&save_artifacts(&args.gen.out, &outcome.artifacts)?);
    Ok(())
}

fn run_composite(args: CompositeArgs) -> Result<()> {
    let characters = args
        .characters
        .iter()
        .map(|path| load_image(path))
        .collect::<Result<Vec<_>>>()?;
    let background = match &args.background {
        Some(path) => Some(load_image(path)?),
        None => None,
    };
    let request = CompositeRequest {
        characters,
        background,
        description: args.description.clone(),
        options: args.tech.to_options(),
        mode: parse_mode(&args.mode)?,
    };
    let mut session = build_session(args.gen.dry_run);
    let outcome = session.composite(&request, &args.gen.settings())?;
    if let Some(pair) = &outcome.prompts {
        print_prompts(pair);
    }
    report_saved(&save_artifacts(&args.gen.out, &outcome.artifacts)?);
    Ok(())
}

fn run_restore(args: RestoreArgs) -> Result<()> {
    let image = load_image(&args.image)?;
    let subject = if args.multiple {
        RestoreSubject::MultiplePeople {
            description: args.details.clone(),
        }
    } else {
        RestoreSubject::SinglePerson {
            gender: args.gender.clone(),
            age: args.age.clone(),
            description: args.details.clone(),
        }
    };
    let mut session = build_session(args.dry_run);
    let artifacts = session.restore(&image, &subject)?;
    report_saved(&save_artifacts(&args.out, &artifacts)?);
    Ok(())
}

fn run_upscale(args: UpscaleArgs) -> Result<()> {
    let image = load_image(&args.image)?;
    let mut session = build_session(args.dry_run);
    let artifacts = session.upscale(&image)?;
    report_saved(&save_artifacts(&args.out, &artifacts)?);
    Ok(())
}

fn run_video(args: VideoArgs) -> Result<()> {
    let mode = parse_mode(&args.mode)?;
    let mut session = build_session(args.dry_run);
    let prompt = match &args.previous {
        Some(previous) => session.continuation_prompt(previous, &args.idea, mode)?,
        None => session.video_prompt(&args.idea, mode)?,
    };
    println!("{prompt}");
    Ok(())
}

fn run_catalog() -> Result<()> {
    for branch in Branch::ALL {
        println!("{} ({})", branch.key(), branch.label_vi());
        for (slot, hint) in branch.slot_hints() {
            println!("  {slot}: {hint}");
        }
    }
    println!();
    for (axis, choices) in axis_choices() {
        println!("{axis}: {choices}", choices = choices.join(", "));
    }
    Ok(())
}

fn print_prompts(pair: &PromptPair) {
    println!("EN: {}", pair.english);
    println!("VI: {}", pair.vietnamese);
}

fn report_saved(paths: &[PathBuf]) {
    for path in paths {
        println!("saved {}", path.display());
    }
}

/// Writes artifacts as `artifact-{stamp}-{idx:02}.png` under `out`,
/// creating the directory if needed.
fn save_artifacts(out: &Path, artifacts: &[ImageArtifact]) -> Result<Vec<PathBuf>> {
    if artifacts.is_empty() {
        return Ok(Vec::new());
    }
    fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let mut saved = Vec::with_capacity(artifacts.len());
    for (idx, artifact) in artifacts.iter().enumerate() {
        let bytes = BASE64
            .decode(artifact.data.as_bytes())
            .context("artifact payload was not valid base64")?;
        let path = out.join(format!("artifact-{stamp}-{idx:02}.png"));
        fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
        saved.push(path);
    }
    Ok(saved)
}
