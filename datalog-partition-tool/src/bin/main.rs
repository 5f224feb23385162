use std::fs::File;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use datalog_partition_tool::{DEFAULT_BLOCK_SIZE, parse_image, write_csv};

#[derive(Parser)]
#[command(name = "datalog-partition-tool")]
#[command(about = "Data log partition image dump and export tool", long_about = None)]
struct Cli {
    /// Block size used by the device, in bytes
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, value_parser = parse_size)]
    block_size: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every entry of a partition image
    Dump {
        /// Input image file path
        input: PathBuf,
    },
    /// Export the rows of one table as CSV
    Export {
        /// Input image file path
        input: PathBuf,

        /// Output CSV file path
        output: PathBuf,

        /// Name of the table to export
        #[arg(long)]
        table: String,
    },
}

fn parse_size(s: &str) -> Result<usize, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        usize::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        s.parse::<usize>().map_err(|e| e.to_string())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Dump { input } => {
            let data = std::fs::read(&input)?;
            let image = parse_image(&data, cli.block_size)?;
            println!(
                "{}: {} blocks, {} entries",
                input.display(),
                image.blocks.len(),
                image.entries.len()
            );

            for block in &image.blocks {
                println!("block #{} seq {:#010x}", block.slot, block.sequence);
            }
            for entry in &image.entries {
                println!(
                    "seq {:#06x} @{:#08x} {}",
                    entry.sequence, entry.offset, entry.body
                );
            }

            Ok(())
        }
        Commands::Export {
            input,
            output,
            table,
        } => {
            let data = std::fs::read(&input)?;
            let image = parse_image(&data, cli.block_size)?;

            let out = File::create(&output)?;
            let rows = write_csv(out, &image, &table)?;
            println!("Wrote {} rows of '{}' to {}", rows, table, output.display());

            Ok(())
        }
    }
}
