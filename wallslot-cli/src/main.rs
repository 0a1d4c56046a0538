use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use wallslot_common::{
    order_monitors, reconcile, Delivery, ErrorReporting, HyprctlSource, MaterializeQueue,
    Materializer, Monitor, MonitorSource, Reconciliation, SelectionRecord, Slot, SlotStatus,
    StateDocument, StateStore, ThemeCatalog, WallslotError,
};
use wallslot_config::Config;

#[derive(Parser)]
#[command(name = "wallslot")]
#[command(about = "wallslot (per-monitor wallpaper slots)")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List live monitors and the slot each is bound to
    Monitors,

    /// List themes
    Themes,

    /// List the images of a theme
    Images { theme: String },

    /// Show slots, bindings and selections against the live monitors
    Status,

    /// Set the number of active slots
    Resize {
        /// Defaults to the number of connected monitors
        count: Option<u32>,
    },

    /// Bind a monitor to a slot
    Bind { slot: Slot, monitor: String },

    /// Clear a slot's binding
    Unbind { slot: Slot },

    /// Bind every unbound connected monitor to a free slot
    Autofill,

    /// Convert a theme image and write it to the slot's output
    Apply {
        slot: Slot,
        theme: String,
        /// Path relative to the theme folder
        image: String,
    },

    /// Like `apply`, for a file path inside the theme root
    ApplyFile { slot: Slot, path: PathBuf },

    /// Interactive mode; conversions run in the background
    Shell,
}

#[derive(Parser)]
#[command(no_binary_name = true, disable_version_flag = true)]
struct ShellLine {
    #[command(subcommand)]
    command: ShellCommand,
}

#[derive(Subcommand)]
enum ShellCommand {
    #[command(flatten)]
    Common(Commands),

    /// Cancel the running conversion for a slot
    Cancel { slot: Slot },

    /// Leave the shell
    #[command(alias = "exit")]
    Quit,
}

struct App {
    catalog: ThemeCatalog,
    registry: HyprctlSource,
    store: Arc<StateStore>,
    materializer: Arc<Materializer>,
}

fn friendly(context: &str) -> impl Fn(WallslotError) -> anyhow::Error + '_ {
    move |e| {
        e.log_error(context);
        anyhow::anyhow!("{}: {}", context, e.user_friendly_message())
    }
}

impl App {
    fn open() -> Result<Self> {
        let config = Config::load().map_err(friendly("Configuration error"))?;
        let paths = config.resolve_paths().map_err(friendly("Configuration error"))?;
        log::info!("Using data root {:?}", paths.data_root());

        let store = Arc::new(StateStore::open(&paths).map_err(friendly("Failed to load state"))?);
        if let Some(warning) = store.take_load_warning() {
            eprintln!("⚠ {}", WallslotError::from(warning).user_friendly_message());
        }

        let materializer = Arc::new(Materializer::new(Arc::clone(&store)));
        Ok(Self {
            catalog: materializer.catalog().clone(),
            registry: HyprctlSource::new(config.monitor_query()),
            store,
            materializer,
        })
    }

    /// Live monitors, or `None` when the host cannot be queried.
    async fn live_monitors(&self) -> Option<Vec<Monitor>> {
        match self.registry.list_monitors().await {
            Ok(monitors) => Some(monitors),
            Err(e) => {
                e.log_error("Monitor query");
                eprintln!("⚠ {}", e.user_friendly_message());
                None
            }
        }
    }

    async fn require_monitors(&self) -> Result<Vec<Monitor>> {
        self.registry
            .list_monitors()
            .await
            .map_err(friendly("Monitor query failed"))
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let result = match App::open() {
        Ok(app) => match cli.command {
            Commands::Shell => shell(&app).await,
            command => run(&app, command).await,
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("✗ Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(app: &App, command: Commands) -> Result<()> {
    match command {
        Commands::Monitors => {
            let doc = app.store.snapshot();
            match app.live_monitors().await {
                Some(monitors) => print_monitors(&doc, &monitors),
                None => print_stored_bindings(&doc),
            }
        }

        Commands::Themes => {
            let themes = app.catalog.list_themes().map_err(friendly("Failed to list themes"))?;
            if themes.is_empty() {
                println!("No themes found in {:?}", app.catalog.root());
            }
            for theme in themes {
                println!("{}", theme);
            }
        }

        Commands::Images { theme } => {
            let theme_dir = app.catalog.root().join(&theme);
            let images = app
                .catalog
                .list_images(&theme)
                .map_err(friendly("Failed to list images"))?;
            if images.is_empty() {
                println!("No images in {}", theme);
            }
            for image in images {
                println!("{}", image.strip_prefix(&theme_dir).unwrap_or(image.as_path()).display());
            }
        }

        Commands::Status => {
            let doc = app.store.snapshot();
            match app.live_monitors().await {
                Some(monitors) => print_status(&reconcile(&doc, &monitors)),
                None => print_stored_bindings(&doc),
            }
        }

        Commands::Resize { count } => {
            let count = match count {
                Some(count) => count,
                None => connected_count(&app.require_monitors().await?)?,
            };
            app.store.resize(count).map_err(friendly("Resize failed"))?;
            println!("✓ Active slots: {}", count);
        }

        Commands::Bind { slot, monitor } => {
            app.store.bind(slot, &monitor).map_err(friendly("Bind failed"))?;
            println!("✓ {} bound to slot {}", monitor.trim(), slot);
        }

        Commands::Unbind { slot } => {
            app.store.unbind(slot).map_err(friendly("Unbind failed"))?;
            println!("✓ Slot {} unbound", slot);
        }

        Commands::Autofill => {
            let monitors = app.require_monitors().await?;
            if app.store.snapshot().slot_count() == 0 {
                let count = connected_count(&monitors)?;
                app.store.resize(count).map_err(friendly("Resize failed"))?;
                println!("✓ Active slots: {}", count);
            }
            let (_, assigned) = app.store.autofill(&monitors).map_err(friendly("Autofill failed"))?;
            if assigned.is_empty() {
                println!("Nothing to assign");
            }
            for (slot, name) in assigned {
                println!("✓ {} bound to slot {}", name, slot);
            }
        }

        Commands::Apply { slot, theme, image } => {
            let mut queue = MaterializeQueue::new(Arc::clone(&app.materializer));
            queue.submit(slot, theme, image);
            while let Some(delivery) = queue.next().await {
                match delivery {
                    Delivery::Failed { error, .. } => return Err(friendly("Apply failed")(error)),
                    other => print_delivery(&other),
                }
            }
        }

        Commands::ApplyFile { slot, path } => {
            let materializer = Arc::clone(&app.materializer);
            let source = absolute(&path)?;
            let task = tokio::task::spawn_blocking(move || materializer.materialize(slot, &source));
            let output = task.await?.map_err(friendly("Apply failed"))?;
            println!("✓ Slot {} <- {} ({})", slot, path.display(), output.display());
        }

        Commands::Shell => println!("Already in the shell"),
    }

    Ok(())
}

enum ShellFlow {
    Continue,
    Quit,
}

async fn shell(app: &App) -> Result<()> {
    let mut queue = MaterializeQueue::new(Arc::clone(&app.materializer));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("wallslot shell. Type `help` for commands, `quit` to leave.");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match handle_line(app, &mut queue, &line).await {
                    Ok(ShellFlow::Continue) => {}
                    Ok(ShellFlow::Quit) => break,
                    Err(e) => eprintln!("✗ Error: {:#}", e),
                }
            }
            Some(delivery) = queue.next(), if queue.pending() > 0 => print_delivery(&delivery),
        }
    }

    if queue.cancel_all() > 0 {
        println!("Cancelling running conversions...");
    }
    while let Some(delivery) = queue.next().await {
        log::debug!("Dropped delivery for job {} on exit", delivery.id());
    }
    Ok(())
}

async fn handle_line(app: &App, queue: &mut MaterializeQueue, line: &str) -> Result<ShellFlow> {
    let words = split_words(line)?;
    if words.is_empty() {
        return Ok(ShellFlow::Continue);
    }

    let parsed = match ShellLine::try_parse_from(words) {
        Ok(parsed) => parsed,
        Err(e) => {
            // Help output and usage errors alike.
            let _ = e.print();
            return Ok(ShellFlow::Continue);
        }
    };

    match parsed.command {
        ShellCommand::Quit => return Ok(ShellFlow::Quit),
        ShellCommand::Cancel { slot } => {
            if queue.cancel(slot) {
                println!("✓ Cancelled slot {}", slot);
            } else {
                println!("Nothing running for slot {}", slot);
            }
        }
        ShellCommand::Common(Commands::Apply { slot, theme, image }) => {
            let id = queue.submit(slot, theme, image);
            println!("… job {} started for slot {}", id, slot);
        }
        ShellCommand::Common(Commands::ApplyFile { slot, path }) => {
            let (theme, image) = app
                .catalog
                .selection_for(&absolute(&path)?)
                .map_err(friendly("Apply failed"))?;
            let id = queue.submit(slot, theme, image);
            println!("… job {} started for slot {}", id, slot);
        }
        ShellCommand::Common(command) => run(app, command).await?,
    }
    Ok(ShellFlow::Continue)
}

/// Splits a shell line on whitespace; double quotes group words.
fn split_words(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                in_word = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if in_quotes {
        anyhow::bail!("unterminated quote");
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(std::path::absolute(path)?)
}

fn connected_count(monitors: &[Monitor]) -> Result<u32> {
    let count = monitors.iter().filter(|m| m.is_connected).count();
    if count == 0 {
        anyhow::bail!("No connected monitors reported; pass a slot count explicitly");
    }
    Ok(u32::try_from(count)?)
}

fn selection_label(theme: Option<&str>, image: Option<&str>) -> String {
    match (theme, image) {
        (Some(theme), Some(image)) => format!("{}/{}", theme, image),
        _ => "-".to_string(),
    }
}

fn record_line(record: &SelectionRecord) -> String {
    format!(
        "{}: {} | {}",
        record.slot,
        record.monitor_name.as_deref().unwrap_or("(unassigned)"),
        selection_label(record.theme_name.as_deref(), record.image_relpath.as_deref())
    )
}

fn print_monitors(doc: &StateDocument, monitors: &[Monitor]) {
    if monitors.is_empty() {
        println!("No monitors reported");
        return;
    }

    for monitor in order_monitors(doc, monitors) {
        let slot = doc
            .slot_of(&monitor.name)
            .map(|s| format!("slot {}", s))
            .unwrap_or_else(|| "unbound".to_string());
        let state = if monitor.is_connected { "" } else { " [disabled]" };
        match &monitor.description {
            Some(description) => println!("{}{} | {} | {}", monitor.name, state, slot, description),
            None => println!("{}{} | {}", monitor.name, state, slot),
        }
    }
}

fn print_stored_bindings(doc: &StateDocument) {
    println!("Stored bindings (monitor status unknown):");
    if doc.slot_count() == 0 {
        println!("No slots yet");
    }
    for record in doc.active_records() {
        println!("{}", record_line(record));
    }
}

fn print_status(view: &Reconciliation) {
    println!("wallslot Status:");
    println!("================");
    println!(
        "Slots: {} active, {} monitors connected",
        view.slot_count, view.connected_count
    );
    if view.count_mismatch() {
        println!("⚠ Slot count differs from the monitor count. Run `wallslot resize` to match.");
    }
    println!();

    for slot in &view.slots {
        let status = match slot.status {
            SlotStatus::Present => "present",
            SlotStatus::Disconnected => "disconnected",
            SlotStatus::Unassigned => "unassigned",
        };
        println!(
            "{}: {} [{}] | {}",
            slot.slot,
            slot.monitor_name.as_deref().unwrap_or("-"),
            status,
            selection_label(slot.theme_name.as_deref(), slot.image_relpath.as_deref())
        );
        if slot.output_missing {
            println!("   ⚠ output file is missing; apply the image again");
        }
    }

    if !view.unassigned_monitors.is_empty() {
        let names: Vec<&str> = view.unassigned_monitors.iter().map(|m| m.name.as_str()).collect();
        println!();
        println!("Unassigned monitors: {}", names.join(", "));
    }

    if !view.retained.is_empty() {
        println!();
        println!("Retained (inactive) slots:");
        for record in &view.retained {
            println!("{}", record_line(record));
        }
    }
}

fn print_delivery(delivery: &Delivery) {
    match delivery {
        Delivery::Completed { id, slot, output } => {
            println!("✓ Job {}: slot {} written to {}", id, slot, output.display());
        }
        Delivery::Failed { id, slot, error } => {
            eprintln!("✗ Job {} for slot {} failed: {}", id, slot, error.user_friendly_message());
        }
        Delivery::Discarded { id, slot, committed } => {
            if *committed {
                println!("Job {} for slot {} was cancelled after it finished writing", id, slot);
            } else {
                println!("Job {} for slot {} cancelled", id, slot);
            }
        }
    }
}
