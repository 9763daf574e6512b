use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use macro_recorder::capability::{KeyHook, KeyInjector};
use macro_recorder::config::{parse_duration, AppConfig};
use macro_recorder::{legacy, MacroEngine, PlaybackOutcome, SettingsSnapshot, Slot, SlotStore, SLOT_COUNT};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mrec", version, about = "Record and replay keyboard macros")]
struct Cli {
    /// Slot file to use instead of the configured one
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the macro slots
    Slots,
    /// Print the events stored in a slot
    Show(SlotArg),
    /// Record into a slot until Enter or Ctrl-C
    Record(SlotArg),
    /// Replay a slot
    Play(PlayArgs),
    /// Import the old flat text macro file
    ImportLegacy {
        path: PathBuf,
        /// Overwrite an existing slot file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct SlotArg {
    /// Slot number (1-3)
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=SLOT_COUNT as i64))]
    slot: u8,
}

#[derive(Args, Debug)]
struct PlayArgs {
    #[command(flatten)]
    slot: SlotArg,

    /// Repetitions for this run
    #[arg(short, long)]
    repetitions: Option<u32>,

    /// Delay after keys without a recorded duration, e.g. "10ms"
    #[arg(long)]
    regular_delay: Option<String>,

    /// Delay after Tab/Alt without a recorded duration, e.g. "300ms"
    #[arg(long)]
    alt_tab_delay: Option<String>,
}

impl SlotArg {
    fn index(&self) -> usize {
        usize::from(self.slot) - 1
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    config.validate()?;
    init_logging(&config, cli.verbose);

    let store_path = match &cli.store {
        Some(path) => path.clone(),
        None => config.resolved_store_path()?,
    };
    let (hook, injector) = input_capabilities();
    let engine = MacroEngine::new(SlotStore::new(store_path), hook, injector)
        .with_capture_buffer(config.capture_buffer)
        .with_settings(config.defaults.clone());

    match cli.command {
        Command::Slots => list_slots(&engine),
        Command::Show(slot) => show_slot(&engine, slot.index()),
        Command::Record(slot) => record(&engine, slot.index()).await,
        Command::Play(args) => play(&engine, &args).await,
        Command::ImportLegacy { path, force } => {
            let filled = legacy::import(&path, engine.store(), force)
                .with_context(|| format!("importing {}", path.display()))?;
            println!(
                "📥 Imported {} slot(s) into {}",
                filled,
                engine.store().path().display()
            );
            Ok(())
        }
    }
}

fn init_logging(config: &AppConfig, verbose: bool) {
    let fallback = if verbose { "debug" } else { config.log_filter.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(feature = "native-input")]
fn input_capabilities() -> (Arc<dyn KeyHook>, Arc<dyn KeyInjector>) {
    use macro_recorder::backend::{RdevHook, RdevInjector};
    (Arc::new(RdevHook::new()), Arc::new(RdevInjector::new()))
}

#[cfg(not(feature = "native-input"))]
fn input_capabilities() -> (Arc<dyn KeyHook>, Arc<dyn KeyInjector>) {
    use macro_recorder::capability::Unavailable;
    (Arc::new(Unavailable), Arc::new(Unavailable))
}

fn list_slots(engine: &MacroEngine) -> Result<()> {
    let slots = engine.load_slots()?;
    println!("{}", format!("Macro slots ({})", engine.store().path().display()).bold());

    for (index, slot) in slots.iter().enumerate() {
        println!("  Slot {}: {}", index + 1, describe(slot));
    }
    Ok(())
}

fn describe(slot: &Slot) -> String {
    let Some(events) = slot.playable_events() else {
        return "empty".dimmed().to_string();
    };

    let mut text = format!("{} events", events.len()).green().to_string();
    if let Some(settings) = &slot.settings {
        let mut parts = Vec::new();
        if let Some(r) = settings.repetitions {
            parts.push(format!("repetitions={r}"));
        }
        if let Some(d) = settings.regular_delay {
            parts.push(format!("regular_delay={d}s"));
        }
        if let Some(d) = settings.alt_tab_delay {
            parts.push(format!("alt_tab_delay={d}s"));
        }
        if !parts.is_empty() {
            text.push_str(&format!(" ({})", parts.join(", ")));
        }
    }
    text
}

fn show_slot(engine: &MacroEngine, index: usize) -> Result<()> {
    let slots = engine.load_slots()?;
    let Some(events) = slots[index].playable_events() else {
        println!("Slot {} is empty", index + 1);
        return Ok(());
    };

    for event in events {
        match event.duration {
            Some(d) => println!("{} {} ({:.3}s)", event.key, event.action, d),
            None => println!("{} {}", event.key, event.action),
        }
    }
    Ok(())
}

async fn record(engine: &MacroEngine, index: usize) -> Result<()> {
    engine.toggle_recording(index).await?;
    println!(
        "{} Recording into slot {} - press Enter or Ctrl-C to stop",
        "⏺️ ".red(),
        index + 1
    );

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    tokio::select! {
        _ = stdin.next_line() => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    if let Err(e) = engine.toggle_recording(index).await {
        if let Some(unsaved) = engine.take_unsaved() {
            // Last chance to keep the events before the process exits
            eprintln!("{} {e}; recorded events follow", "❌ Save failed:".red());
            println!("{}", serde_json::to_string_pretty(&unsaved.events)?);
        }
        return Err(e.into());
    }
    let slots = engine.load_slots()?;
    let count = slots[index].events.as_ref().map_or(0, Vec::len);
    println!("💾 Saved {} events to slot {}", count, index + 1);
    Ok(())
}

async fn play(engine: &MacroEngine, args: &PlayArgs) -> Result<()> {
    let overrides = SettingsSnapshot {
        repetitions: args.repetitions,
        regular_delay: parse_delay(args.regular_delay.as_deref())?,
        alt_tab_delay: parse_delay(args.alt_tab_delay.as_deref())?,
    };

    let index = args.slot.index();
    let handle = engine.play_with(index, overrides)?;
    let canceller = handle.canceller();
    println!("▶️  Playing slot {} (Ctrl-C to stop)", index + 1);

    let run = handle.wait();
    tokio::pin!(run);
    let outcome = tokio::select! {
        outcome = &mut run => outcome?,
        _ = tokio::signal::ctrl_c() => {
            canceller.cancel();
            run.await?
        }
    };

    match outcome {
        PlaybackOutcome::Completed {
            repetitions,
            injected,
        } => println!(
            "{} {} key events over {} repetition(s)",
            "✅ Done:".green(),
            injected,
            repetitions
        ),
        PlaybackOutcome::EmptySlot => println!("No events recorded in slot {}.", index + 1),
        PlaybackOutcome::Cancelled { injected } => {
            println!("{} after {} key events", "⏹️  Stopped".yellow(), injected)
        }
    }
    Ok(())
}

fn parse_delay(value: Option<&str>) -> Result<Option<f64>> {
    value
        .map(|raw| parse_duration(raw).map(|d| d.as_secs_f64()))
        .transpose()
        .map_err(Into::into)
}
