use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use unweave_bytecode::{asm, BytecodeVersion};
use unweave_core::{tree, DebugConfig, DecompileContext, Pipeline, Settings};

#[derive(Parser)]
#[command(name = "unweave", about = "Recover structured control flow from GameMaker VM bytecode")]
struct Cli {
    /// Assembler listing of one code entry
    input: PathBuf,

    /// Code entry name (defaults to the file stem)
    #[arg(long)]
    name: Option<String>,

    /// Bytecode format version, which selects the compiler idioms to expect
    #[arg(long, default_value_t = BytecodeVersion::LATEST.0)]
    bytecode_version: u8,

    /// Stop after the named pass and dump the structure tree
    #[arg(long, value_name = "PASS")]
    dump_after: Option<String>,

    /// Only dump entries whose name matches (`=name` for an exact match)
    #[arg(long)]
    filter: Option<String>,

    /// Print the structure tree as JSON
    #[arg(long)]
    json: bool,

    /// Skip the edge check after every pass
    #[arg(long)]
    no_verify: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto)
        .context("failed to initialize logging")?;

    let debug = DebugConfig {
        function_filter: cli.filter.clone(),
        dump_after: cli.dump_after.clone(),
        verify_each_pass: !cli.no_verify,
    };
    debug.validate()?;

    let text = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    let name = match &cli.name {
        Some(name) => name.clone(),
        None => cli
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "entry".to_string()),
    };
    let code = asm::parse(&name, &text)
        .with_context(|| format!("failed to assemble {}", cli.input.display()))?;

    let settings = Settings::for_version(BytecodeVersion(cli.bytecode_version));

    let mut ctx = DecompileContext::new(&code, settings);
    let output = Pipeline::standard()
        .run_with_debug(&mut ctx, &debug)
        .with_context(|| format!("failed to structure `{name}`"))?;
    log::debug!("changed: {}", output.changed.join(", "));
    if output.stopped_early {
        return Ok(());
    }

    let Some(root) = tree::build(&ctx) else {
        bail!("`{name}` produced no fragment tree");
    };
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&root)?);
    } else {
        print!("{root}");
    }
    Ok(())
}
