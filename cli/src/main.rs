use clap::{Parser, Subcommand};
use pcb_common::db::core::Board;
use pcb_common::util::check::{self, CheckReport, CheckRules};
use pcb_common::util::config::{Config, Strategy};
use pcb_common::util::{generator, logger, visualization};
use pcb_router::{Progress, RoutingResult};
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Route a board and write the routes as TOML.
    Route {
        #[arg(long)]
        board: Option<String>,
        #[arg(long)]
        strategy: Option<Strategy>,
        #[arg(long)]
        output: Option<String>,
        #[arg(long)]
        image: Option<String>,
    },
    /// Write a random benchmark board.
    Generate {
        #[arg(long, default_value_t = 200)]
        pads: usize,
        #[arg(long, default_value_t = 80)]
        nets: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value = "inputs/board.toml")]
        output: String,
    },
    /// Clearance and connectivity check of previously written routes.
    Check {
        #[arg(long)]
        board: Option<String>,
        #[arg(long)]
        routes: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    logger::init();
    let args = Args::parse();

    let config: Config = if args.config.exists() {
        log::info!("Loading configuration from {:?}", args.config);
        read_toml(&args.config)?
    } else {
        log::warn!(
            "Configuration file {:?} not found. Using internal defaults.",
            args.config
        );
        Config::default()
    };
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let command = args.command.unwrap_or(Commands::Route {
        board: None,
        strategy: None,
        output: None,
        image: None,
    });

    match command {
        Commands::Generate {
            pads,
            nets,
            seed,
            output,
        } => {
            prepare_output_dir(&output)?;
            log::info!(
                "Generating random benchmark (Pads: {}, Nets: {}, Seed: {})...",
                pads,
                nets,
                seed
            );
            let board = generator::generate_random_board(pads, nets, seed);
            write_toml(&board, &output)?;
            log::info!("Generated: {}", output);
        }
        Commands::Route {
            board,
            strategy,
            output,
            image,
        } => {
            let mut config = config;
            if let Some(strategy) = strategy {
                config.session.strategy = strategy;
            }
            if let Some(board) = board {
                config.input.board_file = board;
            }
            if let Some(output) = output {
                config.input.output_file = output;
            }
            if image.is_some() {
                config.input.image_file = image;
            }
            let clean = run_routing(&config)?;
            if !clean {
                std::process::exit(1);
            }
        }
        Commands::Check { board, routes } => {
            let board_file = board.unwrap_or_else(|| config.input.board_file.clone());
            let routes_file = routes.unwrap_or_else(|| config.input.output_file.clone());
            let board: Board = read_toml(Path::new(&board_file))?;
            let result: RoutingResult = read_toml(Path::new(&routes_file))?;
            let report = check::run(
                &board,
                &result.routes,
                &CheckRules::from_config(&board, &config),
            );
            if !log_report(&board, &report) {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn read_toml<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    if !path.exists() {
        return Err(anyhow::anyhow!("Input file missing: {:?}", path));
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {:?}: {}", path, e))?;
    toml::from_str(&text).map_err(|e| anyhow::anyhow!("Failed to parse TOML in {:?}: {}", path, e))
}

fn write_toml<T: serde::Serialize>(value: &T, path: &str) -> anyhow::Result<()> {
    let text = toml::to_string(value)
        .map_err(|e| anyhow::anyhow!("Failed to serialize {}: {}", path, e))?;
    std::fs::write(path, text).map_err(|e| anyhow::anyhow!("Failed to write {}: {}", path, e))
}

fn prepare_output_dir(path_str: &str) -> anyhow::Result<()> {
    if let Some(parent) = Path::new(path_str).parent()
        && !parent.exists()
        && !parent.as_os_str().is_empty()
    {
        log::info!("Creating output directory: {:?}", parent);
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Routes the configured board. Returns whether the design check came back clean.
fn run_routing(config: &Config) -> anyhow::Result<bool> {
    let input = &config.input;
    log::info!("Parsing board: {}", input.board_file);
    let board: Board = read_toml(Path::new(&input.board_file))?;
    let layers: Vec<String> = (0..board.layer_count).map(|l| board.layer_name(l)).collect();
    log::info!(
        "Board: {:.1}x{:.1}mm, layers [{}], {} pads, {} nets",
        board.bounds.width(),
        board.bounds.height(),
        layers.join(", "),
        board.pads.len(),
        board.nets.len()
    );

    let start_time = Instant::now();
    let mut print_progress = |fraction: f64, message: &str, continuable: bool| {
        if continuable {
            eprint!(
                "\r\x1b[36m[{:>3.0}%] {} Time: {:.1}s\x1b[0m\x1b[K",
                fraction * 100.0,
                message,
                start_time.elapsed().as_secs_f32()
            );
        } else {
            eprint!("\r\x1b[K");
        }
        let _ = std::io::stderr().flush();
        true
    };
    let mut progress = Progress::new(Some(&mut print_progress), config.session.timeout_secs);

    log::info!("Starting Routing ({:?})...", config.session.strategy);
    let result = pcb_router::route(&board, config, &mut progress).map_err(|e| anyhow::anyhow!(e))?;

    for failure in &result.failures {
        log::warn!(
            "Net {} failed: {:?} ({})",
            failure.net_name,
            failure.cause,
            failure.message
        );
    }
    if result.stats.timed_out {
        log::warn!("Routing stopped at the deadline; writing partial result");
    }

    prepare_output_dir(&input.output_file)?;
    log::info!("Writing routes to {}", input.output_file);
    write_toml(&result, &input.output_file)?;

    if let Some(image) = &input.image_file {
        prepare_output_dir(image)?;
        log::info!("Generating routed visualization...");
        visualization::draw_routed_board(&board, &result.routes, image, input.image_size)
            .map_err(|e| anyhow::anyhow!("Failed to render {}: {}", image, e))?;
    }

    let report = check::run(
        &board,
        &result.routes,
        &CheckRules::from_config(&board, config),
    );
    Ok(log_report(&board, &report))
}

fn log_report(board: &Board, report: &CheckReport) -> bool {
    let name = |net| {
        board
            .net(net)
            .map_or_else(|| net.to_string(), |n| n.name.clone())
    };
    for v in &report.violations {
        log::error!(
            "Clearance: {} to {} at ({:.3}, {:.3}): gap {:.3}mm < {:.3}mm",
            name(v.net),
            name(v.other_net),
            v.location.x,
            v.location.y,
            v.gap,
            v.required
        );
    }
    for &net in &report.opens {
        log::error!("Open: {} has copper but disconnected pads", name(net));
    }
    if !report.unrouted.is_empty() {
        log::warn!("{} net(s) left unrouted", report.unrouted.len());
    }
    if report.is_clean() {
        log::info!("Design check passed.");
    } else {
        log::error!(
            "Design check failed: {} violation(s), {} open net(s)",
            report.violations.len(),
            report.opens.len()
        );
    }
    report.is_clean()
}
