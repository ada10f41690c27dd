//! Build automation tasks for the desk clock firmware.
//!
//! Run with: `cargo xtask <command>`

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use std::process::{Command, ExitCode};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation for the desk clock firmware", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all checks: build lib and firmware, run host tests, generate docs
    CheckAll,
    /// Build library with specified features
    Build {
        #[arg(long, default_value = "pico1")]
        board: Board,
        #[arg(long)]
        no_wifi: bool,
    },
    /// Build a firmware binary from demos/
    Example {
        /// Binary name (desk_clock or display_check)
        name: String,
        #[arg(long, default_value = "pico1")]
        board: Board,
        #[arg(long)]
        no_wifi: bool,
    },
    /// Build UF2 firmware file for flashing to Pico
    Uf2 {
        /// Binary name (desk_clock or display_check)
        name: String,
        #[arg(long, default_value = "pico1")]
        board: Board,
        #[arg(long)]
        no_wifi: bool,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Board {
    /// Pico W (RP2040)
    Pico1,
    /// Pico 2 W (RP2350, ARM cores)
    Pico2,
}

impl std::fmt::Display for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Board::Pico1 => write!(f, "pico1"),
            Board::Pico2 => write!(f, "pico2"),
        }
    }
}

impl Board {
    fn target(self) -> &'static str {
        match self {
            Board::Pico1 => "thumbv6m-none-eabi",
            Board::Pico2 => "thumbv8m.main-none-eabihf",
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckAll => check_all(),
        Commands::Build { board, no_wifi } => build_lib(board, !no_wifi),
        Commands::Example {
            name,
            board,
            no_wifi,
        } => build_example(&name, board, !no_wifi),
        Commands::Uf2 {
            name,
            board,
            no_wifi,
        } => build_uf2(&name, board, !no_wifi),
    }
}

fn check_all() -> ExitCode {
    for board in [Board::Pico1, Board::Pico2] {
        let target = board.target();
        let features_no_wifi = build_features(board, false);
        let features_wifi = build_features(board, true);

        println!("{}", format!("==> Building library ({board})...").cyan());
        if !cargo(&["build", "--lib", "--target", target], &features_no_wifi)
            || !cargo(&["build", "--lib", "--target", target], &features_wifi)
        {
            return ExitCode::FAILURE;
        }

        println!("\n{}", format!("==> Building firmware ({board})...").cyan());
        for (example, features) in [
            ("display_check", &features_no_wifi),
            ("desk_clock", &features_wifi),
        ] {
            println!("  {}", format!("- {example}").bright_black());
            if !cargo(&["build", "--example", example, "--target", target], features) {
                return ExitCode::FAILURE;
            }
        }
    }

    println!("\n{}", "==> Running host tests...".cyan());
    let host_target = host_target();
    match host_target.as_deref() {
        Some(target) => {
            println!(
                "  {}",
                format!("Using host target: {target}").bright_black()
            );
        }
        None => {
            println!(
                "{}",
                "  Unable to detect host target; relying on cargo default.".bright_black()
            );
        }
    }

    let mut test_cmd = Command::new("cargo");
    test_cmd
        .current_dir(workspace_root())
        .args(["test", "--lib", "--tests"]);
    if let Some(target) = host_target {
        test_cmd.arg("--target").arg(target);
    }
    test_cmd.args(["--no-default-features", "--features", "host"]);
    if !run_command(&mut test_cmd) {
        return ExitCode::FAILURE;
    }

    println!("\n{}", "==> Building documentation...".cyan());
    if !cargo(
        &["doc", "--target", Board::Pico1.target(), "--no-deps"],
        &build_features(Board::Pico1, true),
    ) {
        return ExitCode::FAILURE;
    }

    println!("\n{}", "==> All checks passed!".green().bold());
    ExitCode::SUCCESS
}

fn build_lib(board: Board, wifi: bool) -> ExitCode {
    let features = build_features(board, wifi);
    println!(
        "{}",
        format!("Building library with features: {features}").cyan()
    );

    if cargo(&["build", "--lib", "--target", board.target()], &features) {
        println!("{}", "Build successful!".green());
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn build_example(name: &str, board: Board, wifi: bool) -> ExitCode {
    let features = build_features(board, wifi);
    println!(
        "{}",
        format!("Building '{name}' with features: {features}").cyan()
    );

    if cargo(&["build", "--example", name, "--target", board.target()], &features) {
        println!("{}", "Build successful!".green());
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn build_uf2(name: &str, board: Board, wifi: bool) -> ExitCode {
    let target = board.target();
    let features = build_features(board, wifi);

    println!("{}", format!("Building UF2 for '{name}' ({board})").cyan());
    println!("  Features: {}", features.bright_black());
    println!("  Target: {}", target.bright_black());

    if !cargo(
        &["build", "--example", name, "--release", "--target", target],
        &features,
    ) {
        return ExitCode::FAILURE;
    }

    let elf_path = format!("target/{target}/release/examples/{name}");
    let uf2_path = format!("{name}.uf2");

    println!("\n{}", "Converting to UF2 format...".cyan());

    if run_command(
        Command::new("elf2uf2-rs")
            .current_dir(workspace_root())
            .args([&elf_path, &uf2_path]),
    ) {
        println!("{}", format!("UF2 created: {uf2_path}").green().bold());
        println!(
            "{}",
            "The image starts after the bootloader; flash embassy-boot-rp once before the first UF2."
                .bright_black()
        );
        ExitCode::SUCCESS
    } else {
        println!(
            "{}",
            "Note: Install elf2uf2-rs with: cargo install elf2uf2-rs".yellow()
        );
        ExitCode::FAILURE
    }
}

fn build_features(board: Board, wifi: bool) -> String {
    let mut features = vec![board.to_string(), "defmt".to_string(), "arm".to_string()];
    if wifi {
        features.push("wifi".to_string());
    }
    features.join(",")
}

/// Run `cargo <args> --features <features> --no-default-features` from the workspace root.
fn cargo(args: &[&str], features: &str) -> bool {
    run_command(
        Command::new("cargo")
            .current_dir(workspace_root())
            .args(args)
            .args(["--features", features, "--no-default-features"]),
    )
}

fn workspace_root() -> std::path::PathBuf {
    std::env::current_dir().expect("Failed to get current directory")
}

fn host_target() -> Option<String> {
    let output = Command::new("rustc").arg("-vV").output().ok()?;
    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if let Some(host) = line.strip_prefix("host: ") {
            return Some(host.trim().to_string());
        }
    }
    None
}

fn run_command(cmd: &mut Command) -> bool {
    match cmd.status() {
        Ok(status) => status.success(),
        Err(e) => {
            eprintln!("{}", format!("Failed to execute command: {e}").red());
            false
        }
    }
}
