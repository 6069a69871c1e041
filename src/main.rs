use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{ArgGroup, Parser, Subcommand};
use colored::Colorize;

use ropcombo::catalog::Catalog;
use ropcombo::combo::RoleBinding;
use ropcombo::config::TargetConfig;
use ropcombo::emit::Payload;
use ropcombo::importsc::ImportShellcode;
use ropcombo::octet::OctetSequence;
use ropcombo::ropmaker::{Mode, RopMaker};
use ropcombo::script::{self, ScriptOptions};
use ropcombo::types::Arch;

#[derive(Parser)]
#[command(name = "ropcombo", version, about = "Return-oriented chain builder for x86 / x86-64")]
struct Cli {
    /// Target description (TOML, or JSON with a .json extension)
    #[arg(short, long, global = true)]
    target: Option<PathBuf>,

    /// Gadget listing, overriding the one named in the target file
    #[arg(short, long, global = true)]
    gadgets: Option<PathBuf>,

    /// Write the result here instead of stdout
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Emit raw payload bytes instead of a Python fragment
    #[arg(long, global = true)]
    raw: bool,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write argv into .data and call execve
    Execve {
        /// Program and arguments (default: argv from the target file)
        args: Vec<String>,
    },
    /// Copy shellcode into .got byte by byte and jump to it
    #[command(group(ArgGroup::new("source").required(true).args(["shellcode", "hex"])))]
    Import {
        /// Raw shellcode file
        #[arg(long)]
        shellcode: Option<PathBuf>,
        /// Shellcode as a hex string
        #[arg(long)]
        hex: Option<String>,
    },
    /// Show which gadget fills each role
    Bind {
        /// Bind the import template instead of the execve one
        #[arg(long)]
        import: bool,
    },
    /// Write a sample target file
    Init {
        /// Path of the new target file
        path: PathBuf,
        /// Register model
        #[arg(long, value_enum, default_value = "x86")]
        arch: Arch,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .init();

    if let Err(e) = run(&cli) {
        eprintln!("{}: {:#}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    if let Command::Init { path, arch } = &cli.command {
        TargetConfig::sample(*arch).save(path)?;
        eprintln!("{} wrote {}", "ropcombo".bold().cyan(), path.display());
        return Ok(());
    }

    let Some(target_path) = &cli.target else {
        bail!("no target file given (use --target, or `ropcombo init` to create one)");
    };
    let target = TargetConfig::load(target_path)
        .with_context(|| format!("loading target '{}'", target_path.display()))?;
    let catalog = load_catalog(cli, &target)?;
    eprintln!(
        "{} {} gadget(s) for {}",
        "ropcombo".bold().cyan(),
        catalog.len(),
        target.arch
    );
    let maker = RopMaker::new(&catalog, target.sections());

    match &cli.command {
        Command::Execve { args } => {
            let argv = if args.is_empty() {
                target.argv.clone()
            } else {
                args.clone()
            };
            let payload = maker.generate(&Mode::Execve { argv })?;
            write_payload(cli, &payload)
        }
        Command::Import { shellcode, hex } => {
            let bytes = match (shellcode, hex) {
                (Some(path), _) => std::fs::read(path)
                    .with_context(|| format!("reading shellcode '{}'", path.display()))?,
                (None, Some(h)) => ::hex::decode(h.trim()).context("decoding --hex")?,
                (None, None) => bail!("give --shellcode or --hex"),
            };
            let regions = target.code_regions()?;
            let octets = OctetSequence::locate(&bytes, &regions);
            let missing = octets.missing().count();
            if missing > 0 {
                eprintln!(
                    "  {} {} of {} byte(s) not found in code",
                    "!".yellow(),
                    missing,
                    octets.len()
                );
            }
            let import = ImportShellcode::new(octets, target.capacity());
            let payload = maker.generate(&Mode::ImportShellcode(import))?;
            write_payload(cli, &payload)
        }
        Command::Bind { import } => {
            if *import {
                print_binding("import", &maker.bind_import()?);
            } else {
                let binding = maker.bind_execve()?;
                print_binding("execve", &binding.main);
                if let Some(args) = &binding.syscall_args {
                    print_binding("syscall arguments", args);
                }
            }
            Ok(())
        }
        Command::Init { .. } => Ok(()),
    }
}

fn load_catalog(cli: &Cli, target: &TargetConfig) -> anyhow::Result<Catalog> {
    let path: &Path = match (&cli.gadgets, &target.gadgets) {
        (Some(p), _) | (None, Some(p)) => p,
        (None, None) => bail!("no gadget listing (set `gadgets` in the target file or use --gadgets)"),
    };
    let catalog = Catalog::load(path, target.arch)
        .with_context(|| format!("loading gadgets '{}'", path.display()))?;
    if catalog.is_empty() {
        bail!("gadget listing '{}' is empty", path.display());
    }
    Ok(catalog)
}

fn print_binding(title: &str, binding: &RoleBinding) {
    println!("{} ({})", title.bold(), binding.arch());
    for (role, bound) in binding.iter() {
        println!(
            "  {:<12} {}  {}",
            role.to_string().green(),
            bound.insn.to_string().cyan(),
            format!("[{}]", bound.component).dimmed()
        );
    }
    for role in binding.degenerate() {
        println!("  {:<12} {}", role.to_string().yellow(), "(self copy, skipped)".dimmed());
    }
}

fn write_payload(cli: &Cli, payload: &Payload) -> anyhow::Result<()> {
    let content = if cli.raw {
        payload.to_bytes()
    } else {
        script::render(payload, &ScriptOptions::default()).into_bytes()
    };
    match &cli.output {
        Some(path) => {
            std::fs::write(path, &content)
                .with_context(|| format!("writing '{}'", path.display()))?;
            eprintln!(
                "{} {} step(s), {} byte payload -> {}",
                "ropcombo".bold().cyan(),
                payload.step_count(),
                payload.size(),
                path.display()
            );
        }
        None => {
            let mut out = std::io::stdout().lock();
            out.write_all(&content)?;
            out.flush()?;
        }
    }
    Ok(())
}
