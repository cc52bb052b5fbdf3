use std::fs;
use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use colored::Colorize;
use miette::IntoDiagnostic;

/// Assemble CHIP-8 assembly source into a ROM image.
#[derive(Parser)]
#[command(version)]
struct Args {
    /// Assembly source file
    infile: PathBuf,
    /// Destination for the ROM image
    outfile: PathBuf,
}

fn main() -> miette::Result<()> {
    let args = Args::parse();

    let mut src = fs::read_to_string(&args.infile).into_diagnostic()?;
    // The last statement still needs its terminating newline.
    if !src.ends_with('\n') {
        src.push('\n');
    }

    println!(
        "{:>12} {}",
        "Assembling".green().bold(),
        args.infile.display()
    );

    let rom = match c8::assemble(&src) {
        Ok(rom) => rom,
        Err(reports) => {
            let count = reports.len();
            for report in &reports {
                eprintln!("{report:?}");
            }
            eprintln!("{:>12} with {count} error(s)", "Failed".red().bold());
            exit(1);
        }
    };

    fs::write(&args.outfile, &rom).into_diagnostic()?;
    println!(
        "{:>12} {} ({} bytes)",
        "Finished".green().bold(),
        args.outfile.display(),
        rom.len()
    );
    Ok(())
}
