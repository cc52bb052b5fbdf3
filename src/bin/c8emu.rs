use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use colored::Colorize;
use miette::IntoDiagnostic;

use c8::{DecodedIns, Emulator};

/// Run a CHIP-8 ROM image headlessly.
///
/// Graphics, sound and input belong to a frontend; this driver only paces
/// the machine at its 60 Hz tick and reports how it stopped.
#[derive(Parser)]
#[command(version)]
struct Args {
    /// ROM image to run
    rom: PathBuf,
    /// Stop cleanly after this many steps
    #[arg(long)]
    steps: Option<u64>,
    /// Instructions executed per 60 Hz tick
    #[arg(long, default_value_t = 5)]
    ipf: u32,
    /// Print each decoded instruction before it runs
    #[arg(long)]
    trace: bool,
    /// Print a decoded listing of the ROM and exit without running
    #[arg(long)]
    list: bool,
}

fn main() -> miette::Result<()> {
    let args = Args::parse();

    let rom = fs::read(&args.rom).into_diagnostic()?;
    if args.list {
        for line in c8::disasm::disassemble(&rom) {
            println!("{line}");
        }
        return Ok(());
    }

    let mut emu = Emulator::new(&rom).into_diagnostic()?;
    println!(
        "{:>12} {} ({} bytes)",
        "Running".green().bold(),
        args.rom.display(),
        rom.len()
    );

    let tick = Duration::from_secs_f64(1.0 / 60.0);
    let mut executed: u64 = 0;
    loop {
        let frame_start = Instant::now();

        for _ in 0..args.ipf {
            if args.steps.is_some_and(|max| executed >= max) {
                println!("{:>12} after {executed} steps", "Stopped".green().bold());
                return Ok(());
            }
            if args.trace {
                let word = emu.fetch_word(emu.pc);
                eprintln!("PC {:#05X}  {}", emu.pc, DecodedIns::new(word));
            }
            emu.step().into_diagnostic()?;
            executed += 1;
        }

        if let Some(pause) = tick.checked_sub(frame_start.elapsed()) {
            thread::sleep(pause);
        }
    }
}
