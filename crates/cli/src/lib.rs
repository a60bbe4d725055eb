use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use doc_model::{Annotation, EngineSettings};
use log::{debug, LevelFilter};
use pdf_engine::{recover, session, LopdfEngine, PdfService};
use serde::Serialize;
use simple_logger::SimpleLogger;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use storage::Storage;

#[derive(Debug, Parser)]
#[command(name = "smartdoc-cli")]
#[command(about = "SmartDoc annotation engine CLI")]
pub struct Cli {
    /// Directory holding the annotation and OCR fonts.
    #[arg(long, global = true, env = "SMARTDOC_FONT_DIR", value_name = "DIR")]
    font_dir: Option<PathBuf>,
    /// Directory for settings and reading history.
    #[arg(long, global = true, env = "SMARTDOC_DATA_DIR", value_name = "DIR")]
    data_dir: Option<PathBuf>,
    /// Log more; repeat for debug output.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable PDF metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Print the editable annotations stored in a PDF as JSON.
    Annotations {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Ignore the stored sidecar and rebuild from native annotations.
        #[arg(long)]
        recover: bool,
    },
    /// Bake annotations from a JSON file into a PDF.
    Bake {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// JSON array of annotation records.
        #[arg(long, value_name = "JSON")]
        annotations: PathBuf,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Remove a page.
    DeletePage {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// 1-based page number.
        #[arg(long)]
        page: u32,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Insert a blank page of the configured default size.
    AddBlankPage {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[command(flatten)]
        position: PositionArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Insert a page showing an image.
    AddImagePage {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
        #[command(flatten)]
        position: PositionArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Read or record the last viewed page of a document.
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Subcommand)]
enum HistoryCommand {
    Get {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    Set {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(value_name = "PAGE")]
        page: u32,
    },
}

#[derive(Debug, Args)]
struct OutputArgs {
    /// Where to write the result. Defaults to rewriting the input.
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct PositionArgs {
    /// Insert before this 1-based page. Appends when omitted.
    #[arg(long, value_name = "PAGE")]
    before: Option<u32>,
}

impl PositionArgs {
    fn insert_index(&self) -> i32 {
        self.before.map_or(-1, |page| page as i32 - 1)
    }
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: u32,
    page_sizes_pt: Vec<PageSizeOutput>,
    has_sidecar: bool,
}

#[derive(Debug, Serialize)]
struct PageSizeOutput {
    width: f32,
    height: f32,
}

#[derive(Debug, Serialize)]
struct BakeOutput {
    path: String,
    baked: usize,
    skipped: usize,
    dropped: usize,
    ocr_words: usize,
}

#[derive(Debug, Serialize)]
struct HistoryOutput {
    path: String,
    page: u32,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Info { file } => run_info(file),
        Commands::Annotations { file, recover } => run_annotations(file, *recover),
        Commands::Bake { file, annotations, output } => {
            let engine = build_engine(&cli);
            run_bake(&engine, file, annotations, output.output.as_deref())
        }
        Commands::DeletePage { file, page, output } => {
            if *page == 0 {
                anyhow::bail!("--page is 1-based and must be >= 1");
            }
            let engine = build_engine(&cli);
            rewrite(file, output.output.as_deref(), |pdf| {
                engine.delete_page(pdf, *page as i32 - 1).context("failed to delete page")
            })
        }
        Commands::AddBlankPage { file, position, output } => {
            let engine = build_engine(&cli);
            rewrite(file, output.output.as_deref(), |pdf| {
                engine.add_blank_page(pdf, position.insert_index()).context("failed to add page")
            })
        }
        Commands::AddImagePage { file, image, position, output } => {
            let engine = build_engine(&cli);
            let image_bytes = fs::read(image)
                .with_context(|| format!("failed to read image {}", image.display()))?;
            rewrite(file, output.output.as_deref(), |pdf| {
                engine
                    .add_image_page(pdf, &image_bytes, position.insert_index())
                    .context("failed to add image page")
            })
        }
        Commands::History { command } => run_history(&storage(&cli)?, command),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };

    if let Err(err) = SimpleLogger::new().with_level(level).init() {
        eprintln!("logging disabled: {err}");
    }
}

fn storage(cli: &Cli) -> Result<Storage> {
    match &cli.data_dir {
        Some(root) => Ok(Storage::with_root(root.clone())),
        None => Storage::from_default_project().context("failed to locate data directory"),
    }
}

/// Engine built from the stored settings, with `--font-dir` taking
/// precedence. Unusable settings fall back to the defaults.
fn build_engine(cli: &Cli) -> LopdfEngine {
    let settings = storage(cli).and_then(|store| store.load_settings().map_err(anyhow::Error::from));
    let mut settings = match settings {
        Ok(settings) => settings,
        Err(err) => {
            debug!("using default settings: {err:#}");
            EngineSettings::default()
        }
    };
    if let Some(font_dir) = &cli.font_dir {
        settings.font_dir = Some(font_dir.clone());
    }

    LopdfEngine::new(settings)
}

fn run_info(file: &Path) -> Result<()> {
    let bytes = read_pdf(file)?;
    let info = session::inspect(&bytes).context("failed to open PDF")?;

    let payload = InfoOutput {
        path: file.display().to_string(),
        page_count: info.page_count,
        page_sizes_pt: info
            .page_sizes
            .iter()
            .map(|size| PageSizeOutput { width: size.width_pt, height: size.height_pt })
            .collect(),
        has_sidecar: info.has_sidecar,
    };

    print_json(&payload)
}

fn run_annotations(file: &Path, recover_native: bool) -> Result<()> {
    let bytes = read_pdf(file)?;
    session::inspect(&bytes).context("failed to open PDF")?;

    let annotations = if recover_native {
        recover::recover_annotations(&bytes)
    } else {
        recover::load_annotations(&bytes)
    };

    print_json(&annotations)
}

fn run_bake(
    engine: &LopdfEngine,
    file: &Path,
    annotations: &Path,
    output: Option<&Path>,
) -> Result<()> {
    let bytes = read_pdf(file)?;
    let records = fs::read(annotations)
        .with_context(|| format!("failed to read annotations {}", annotations.display()))?;
    let annotations: Vec<Annotation> =
        serde_json::from_slice(&records).context("annotations file is not a JSON record array")?;

    let outcome = engine.bake_with_report(&bytes, &annotations).context("failed to bake PDF")?;
    let target = output.unwrap_or(file);
    write_pdf(target, &outcome.bytes)?;

    print_json(&BakeOutput {
        path: target.display().to_string(),
        baked: outcome.report.baked,
        skipped: outcome.report.skipped,
        dropped: outcome.report.dropped,
        ocr_words: outcome.report.ocr_words,
    })
}

fn run_history(storage: &Storage, command: &HistoryCommand) -> Result<()> {
    let mut history = storage.history();

    let (file, page) = match command {
        HistoryCommand::Get { file } => (file, history.last_page(file)),
        HistoryCommand::Set { file, page } => {
            if *page == 0 {
                anyhow::bail!("page is 1-based and must be >= 1");
            }
            history.record_page(file, *page).context("failed to record history")?;
            (file, *page)
        }
    };

    print_json(&HistoryOutput { path: file.display().to_string(), page })
}

fn rewrite<F>(file: &Path, output: Option<&Path>, edit: F) -> Result<()>
where
    F: FnOnce(&[u8]) -> Result<Vec<u8>>,
{
    let bytes = read_pdf(file)?;
    let edited = edit(&bytes)?;
    let target = output.unwrap_or(file);
    write_pdf(target, &edited)?;

    println!("{}", target.display());
    Ok(())
}

fn read_pdf(path: &Path) -> Result<Vec<u8>> {
    ensure_pdf_exists(path)?;
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn write_pdf(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write PDF to {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(payload: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(payload)?;
    println!("{json}");
    Ok(())
}

fn ensure_pdf_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}
