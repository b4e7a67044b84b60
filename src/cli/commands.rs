//! Command implementations for the indexio CLI.

use std::fs;

use log::info;

use crate::cli::args::*;
use crate::cli::output::*;
use crate::error::Result;
use crate::flags::IoFlags;
use crate::io::{
    read_index_binary_with_config, read_index_with_config, read_is_mv_path, write_index,
    write_index_binary,
};
use crate::storage::file::{FileReader, FileWriter};
use crate::storage::mmap::MappingScope;
use crate::storage::traits::IoWriter;

/// Execute a CLI command.
pub fn execute_command(args: IndexioArgs) -> Result<()> {
    match &args.command {
        Command::Inspect(inspect_args) => inspect(inspect_args, &args),
        Command::ProbeMv(probe_args) => probe_mv(probe_args, &args),
        Command::Rewrite(rewrite_args) => rewrite(rewrite_args, &args),
    }
}

/// Decode an index and print its structure.
fn inspect(args: &InspectArgs, cli_args: &IndexioArgs) -> Result<()> {
    let config = cli_args.io_config();
    let flags = args.flags();
    info!("inspecting {} with {flags:?}", args.path.display());

    // Mapped views only live as long as the scope, so summarize before it drops.
    let scope = MappingScope::new();
    let mut reader = FileReader::open(&args.path, &config)?;
    let summary = if args.binary {
        let index = read_index_binary_with_config(&mut reader, flags, &config, Some(&scope))?;
        IndexSummary::from_binary(&index)
    } else {
        let index = read_index_with_config(&mut reader, flags, &config, Some(&scope))?;
        IndexSummary::from_index(&index)
    };
    if !scope.is_empty() {
        info!("{} file(s) mapped", scope.len());
    }

    output_result(
        &format!("Index at {}", args.path.display()),
        &summary,
        cli_args,
    )
}

/// Report whether a file starts with the multi-vector marker.
fn probe_mv(args: &ProbeMvArgs, cli_args: &IndexioArgs) -> Result<()> {
    let multi_vector = read_is_mv_path(&args.path)?;
    output_result(
        "Multi-vector probe",
        &ProbeResult {
            path: args.path.to_string_lossy().to_string(),
            multi_vector,
        },
        cli_args,
    )
}

/// Decode an index and encode it again.
fn rewrite(args: &RewriteArgs, cli_args: &IndexioArgs) -> Result<()> {
    let config = cli_args.io_config();
    let write_flags = if args.skip_storage {
        IoFlags::SKIP_STORAGE
    } else {
        IoFlags::NONE
    };

    let mut reader = FileReader::open(&args.input, &config)?;
    let mut writer = FileWriter::create(&args.output, &config)?;
    let tag = if args.binary {
        let index = read_index_binary_with_config(&mut reader, IoFlags::NONE, &config, None)?;
        write_index_binary(&index, &mut writer, write_flags)?;
        index.tag().to_string()
    } else {
        let index = read_index_with_config(&mut reader, IoFlags::NONE, &config, None)?;
        write_index(&index, &mut writer, write_flags)?;
        index.tag().to_string()
    };
    writer.flush_and_sync()?;
    drop(writer);

    let bytes_written = fs::metadata(&args.output)?.len();
    info!(
        "rewrote {} as {} ({})",
        args.input.display(),
        args.output.display(),
        format_bytes(bytes_written)
    );

    output_result(
        "Index rewritten",
        &RewriteResult {
            input: args.input.to_string_lossy().to_string(),
            output: args.output.to_string_lossy().to_string(),
            tag,
            bytes_written,
        },
        cli_args,
    )
}
