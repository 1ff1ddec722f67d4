use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use famicore::nes::Nes;
use sha1::{Digest, Sha1};

#[derive(Debug, Clone)]
struct Config {
    rom: PathBuf,
    frames: u32,
    sample_rate: u32,
    strict: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rom: PathBuf::new(),
            frames: 600,
            sample_rate: 44_100,
            strict: false,
        }
    }
}

fn parse_args() -> Result<Config> {
    let mut cfg = Config::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--rom" => {
                let value = args
                    .next()
                    .context("--rom requires a path, e.g. --rom games/smb.nes")?;
                cfg.rom = PathBuf::from(value);
            }
            "--frames" => {
                let value = args
                    .next()
                    .context("--frames requires an integer, e.g. --frames 600")?;
                cfg.frames = value
                    .parse::<u32>()
                    .with_context(|| format!("invalid --frames value: {value}"))?;
            }
            "--sample-rate" => {
                let value = args
                    .next()
                    .context("--sample-rate requires an integer, e.g. --sample-rate 48000")?;
                cfg.sample_rate = value
                    .parse::<u32>()
                    .with_context(|| format!("invalid --sample-rate value: {value}"))?;
            }
            "--strict" => {
                cfg.strict = true;
            }
            other => {
                anyhow::bail!(
                    "unknown argument {other}; expected --rom <path> [--frames N] [--sample-rate HZ] [--strict]"
                );
            }
        }
    }

    if cfg.rom.as_os_str().is_empty() {
        anyhow::bail!("missing required --rom <path>");
    }
    Ok(cfg)
}

fn main() -> Result<()> {
    env_logger::init();
    let cfg = parse_args()?;

    let mut nes = Nes::new();
    let header = nes
        .load_rom_file(&cfg.rom)
        .with_context(|| format!("failed to load ROM {}", cfg.rom.display()))?;
    nes.set_audio_sample_rate(cfg.sample_rate);
    nes.set_strict_opcodes(cfg.strict);

    println!(
        "{}: mapper {} ({}), {}x16K PRG, {}x8K CHR, {:?} mirroring",
        cfg.rom.display(),
        header.mapper_id,
        nes.mapper_name(),
        header.prg_banks,
        header.chr_banks,
        header.mirroring,
    );

    let started = Instant::now();
    let mut audio_samples = 0usize;
    for _ in 0..cfg.frames {
        nes.execute_frame(false);
        audio_samples += nes.take_audio_samples().len();
    }
    let elapsed = started.elapsed();

    let mut hasher = Sha1::new();
    hasher.update(nes.frame_buffer());
    let framebuffer_sha1 = hasher.finalize();

    let (_, _, _, _, _, pc) = nes.cpu_registers();
    println!("frames:          {}", cfg.frames);
    println!("cpu cycles:      {}", nes.total_cycles());
    println!("pc:              ${pc:04X}{}", if nes.halted() { " (halted)" } else { "" });
    println!("audio samples:   {audio_samples}");
    println!("framebuffer:     {framebuffer_sha1:x}");
    println!(
        "wall time:       {:.2}s ({:.1} fps)",
        elapsed.as_secs_f64(),
        cfg.frames as f64 / elapsed.as_secs_f64().max(1e-9),
    );

    nes.flush_save_ram(|bytes| {
        println!("save ram:        {} dirty bytes not persisted (headless)", bytes.len());
    });

    Ok(())
}
