// SPDX-License-Identifier: PMPL-1.0-or-later

//! die-recovery: fail tracking and recovery decisions for partially failing dies
//!
//! Loads tracker, rule and decoder catalogs, keeps tracker state in timestamped
//! snapshots under a state directory, and exposes the tracker, rule and
//! decoder operations as subcommands.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use die_recovery::catalog::{self, CatalogPaths};
use die_recovery::datalog::MemorySink;
use die_recovery::report::{self, ReportFormatter};
use die_recovery::storage::{self, MemoryStore};
use die_recovery::tester::{CapturedExecution, OfflinePlists, RecordingPatConfig, TesterServices};
use die_recovery::{
    BitVector, DieRecoveryTracker, DownBinPolicy, InputType, RecoveryContext, UpdateMode,
    UpdateRequest,
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "die-recovery")]
#[command(version = "0.1.0")]
#[command(about = "Die recovery fail tracking and defeature decisions")]
#[command(long_about = None)]
struct Cli {
    /// Tracker catalog (json/yaml)
    #[arg(long, global = true)]
    trackers: Option<PathBuf>,

    /// Rule catalog (json/yaml)
    #[arg(long, global = true)]
    rules: Option<PathBuf>,

    /// Decoder catalog (json/yaml)
    #[arg(long, global = true)]
    decoders: Option<PathBuf>,

    /// Directory holding state snapshots
    #[arg(long, global = true, default_value = ".die-recovery")]
    state_dir: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate catalogs and set the down-bin policy
    Configure {
        /// allowed, disallowed, or a number of permitted down-bins
        #[arg(long, default_value = "allowed")]
        down_bins: String,
    },

    /// Update one or more trackers
    Update {
        /// Comma-separated tracker names
        #[arg(value_name = "TRACKERS")]
        names: String,

        /// Bit string, or a token resolved through --input-type
        #[arg(value_name = "VALUE")]
        value: String,

        #[arg(short, long, value_enum, default_value = "merge")]
        mode: ModeArg,

        #[arg(short, long, value_enum, default_value = "literal")]
        input_type: InputTypeArg,

        /// Bits whose current value is kept
        #[arg(long)]
        mask: Option<String>,

        /// Test outcome written to the datalog record
        #[arg(long)]
        result: Option<String>,
    },

    /// Show tracker state
    Show {
        #[arg(value_name = "TRACKERS")]
        names: String,
    },

    /// Copy a tracker's state onto another tracker
    Clone {
        source: String,
        destination: String,
    },

    /// Run a defeature rule
    Rule {
        rule: String,

        /// Tracker whose state is checked
        #[arg(long, conflicts_with = "bits")]
        tracker: Option<String>,

        /// Explicit fail bits
        #[arg(long)]
        bits: Option<String>,
    },

    /// Decode a captured execution through a pin map
    Decode {
        /// Comma-separated decoder names
        #[arg(value_name = "PINMAP")]
        pin_map: String,

        /// Captured execution (json/yaml)
        #[arg(long)]
        capture: PathBuf,

        /// Pattern lists referenced by the capture (json/yaml)
        #[arg(long)]
        plists: Option<PathBuf>,

        /// Slice under test for single-slice decoders
        #[arg(long)]
        slice: Option<usize>,

        /// Merge the decoded vector into these trackers
        #[arg(long)]
        update: Option<String>,
    },

    /// Pins to mask for a tracker's state
    Mask {
        #[arg(value_name = "PINMAP")]
        pin_map: String,

        #[arg(value_name = "TRACKERS")]
        names: String,

        #[arg(long)]
        plists: Option<PathBuf>,
    },

    /// Print every tracker, decoder and rule
    Dump,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ModeArg {
    Merge,
    Overwrite,
}

impl From<ModeArg> for UpdateMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Merge => UpdateMode::Merge,
            ModeArg::Overwrite => UpdateMode::Overwrite,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum InputTypeArg {
    Literal,
    SharedStorage,
    Gsds,
    UserVar,
}

impl From<InputTypeArg> for InputType {
    fn from(arg: InputTypeArg) -> Self {
        match arg {
            InputTypeArg::Literal => InputType::Literal,
            InputTypeArg::SharedStorage => InputType::SharedStorage,
            InputTypeArg::Gsds => InputType::Gsds,
            InputTypeArg::UserVar => InputType::UserVar,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_store(state_dir: &Path) -> Result<MemoryStore> {
    match storage::latest_snapshot(state_dir)? {
        Some(path) => {
            info!(snapshot = %path.display(), "loading state");
            MemoryStore::load(&path).with_context(|| format!("loading {}", path.display()))
        }
        None => Ok(MemoryStore::new()),
    }
}

fn load_plists(path: Option<&Path>) -> Result<OfflinePlists> {
    match path {
        Some(path) => catalog::read_document(path).with_context(|| format!("parsing {}", path.display())),
        None => Ok(OfflinePlists::new()),
    }
}

fn parse_bits(value: &str) -> Result<BitVector> {
    BitVector::parse(value).with_context(|| format!("invalid bit string [{}]", value))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let store = load_store(&cli.state_dir)?;
    let mut ctx = RecoveryContext::new(store, MemorySink::new());
    catalog::install(
        &mut ctx,
        CatalogPaths {
            trackers: cli.trackers.as_deref(),
            rules: cli.rules.as_deref(),
            decoders: cli.decoders.as_deref(),
        },
    )
    .context("loading catalogs")?;

    let formatter = ReportFormatter::new();
    let mut dirty = false;

    match cli.command {
        Commands::Configure { down_bins } => {
            let policy = DownBinPolicy::parse(&down_bins)
                .ok_or_else(|| anyhow!("invalid down-bin policy [{}]", down_bins))?;
            ctx.configure_down_bins(policy);
            println!(
                "Configured {} trackers, {} rules, {} decoders (down-bins: {})",
                ctx.definitions().count(),
                ctx.rules().count(),
                ctx.decoders().len(),
                down_bins
            );
            dirty = true;
        }

        Commands::Update {
            names,
            value,
            mode,
            input_type,
            mask,
            result,
        } => {
            let tracker = ctx.tracker(&names)?;
            let mask = mask.as_deref().map(parse_bits).transpose()?;
            let result = result.as_deref().map(parse_bits).transpose()?;
            let accepted =
                tracker.update_from_input(&mut ctx, input_type.into(), &value, mode.into(), mask, result)?;
            formatter.print_update(&tracker.names(), accepted);
            formatter.print_records(ctx.sink().records());
            dirty = true;
        }

        Commands::Show { names } => {
            let tracker = ctx.tracker(&names)?;
            let state = tracker.state(&ctx)?;
            let bits = tracker.stored_bits(&ctx)?.map(|bits| bits.to_string());
            formatter.print_state(&tracker.names(), state, bits.as_deref());
        }

        Commands::Clone {
            source,
            destination,
        } => {
            ctx.clone_tracker(&source, &destination)?;
            println!("Cloned {} -> {}", source, destination);
            dirty = true;
        }

        Commands::Rule {
            rule,
            tracker,
            bits,
        } => {
            let matches = match (tracker, bits) {
                (Some(names), _) => ctx.tracker(&names)?.run_rule(&ctx, &rule)?,
                (None, Some(bits)) => DieRecoveryTracker::run_rule_on(&ctx, &parse_bits(&bits)?, &rule)?,
                (None, None) => return Err(anyhow!("rule needs --tracker or --bits")),
            };
            formatter.print_matches(&rule, &matches);
        }

        Commands::Decode {
            pin_map,
            capture,
            plists,
            slice,
            update,
        } => {
            let exec: CapturedExecution = catalog::read_document(&capture)
                .with_context(|| format!("parsing {}", capture.display()))?;
            let mut plists = load_plists(plists.as_deref())?;
            let mut pat_config = RecordingPatConfig::new();
            let mut pin_map = ctx.pin_map(&pin_map)?;
            let bits = {
                let mut services = TesterServices::new(&mut plists, &mut pat_config, ctx.store_mut());
                pin_map.decode_failures(&exec, slice, &mut services)?
            };
            println!("{} {}", pin_map.names(), bits);

            if let Some(names) = update {
                let tracker = ctx.tracker(&names)?;
                let accepted = tracker.update_tracking_structure(&mut ctx, UpdateRequest::merge(bits))?;
                formatter.print_update(&tracker.names(), accepted);
                formatter.print_records(ctx.sink().records());
            }
            dirty = true;
        }

        Commands::Mask {
            pin_map,
            names,
            plists,
        } => {
            let bits = ctx.tracker(&names)?.mask_bits(&ctx)?;
            let mut plists = load_plists(plists.as_deref())?;
            let mut pat_config = RecordingPatConfig::new();
            let mut pin_map = ctx.pin_map(&pin_map)?;
            let mut exec = CapturedExecution::new("").with_start_pattern(None);
            let mut services = TesterServices::new(&mut plists, &mut pat_config, ctx.store_mut());
            let pins = pin_map.mask_pins(&bits, &mut exec, &mut services)?;
            println!("{}", pins.join(","));
        }

        Commands::Dump => {
            print!("{}", report::format_tables(&ctx));
        }
    }

    if dirty {
        let (store, _) = ctx.into_parts();
        let path = storage::persist_snapshot(&store, &cli.state_dir)?;
        info!(snapshot = %path.display(), "state saved");
    }

    Ok(())
}
