//! jp3d CLI - volumetric JPEG 2000 codec command-line utility.
//!
//! Encodes raw voxel data to a volumetric codestream, decodes codestreams
//! (optionally a region of interest or a reduced resolution/quality), and
//! prints codestream metadata.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use jp3d_rs::codestream::CodestreamParser;
use jp3d_rs::progressive::{ProgressiveDecoder, ProgressiveMode};
use jp3d_rs::rate::CompressionMode;
use jp3d_rs::tiling::TilingConfig;
use jp3d_rs::volume::{Region, Volume};
use jp3d_rs::{Decoder, DecoderConfig, Encoder, EncoderConfig, J3kError};

/// Volumetric JPEG 2000 codec with HTJ2K and progressive decoding
#[derive(Parser)]
#[command(name = "jp3d")]
#[command(version)]
#[command(about = "Encode, decode, and inspect volumetric JPEG 2000 codestreams", long_about = None)]
#[command(after_help = "EXAMPLES:
    jp3d encode scan.raw scan.j3k --width 256 --height 256 --depth 64 --lossless
    jp3d encode scan.raw scan.j3k -W 256 -H 256 -D 64 --psnr 42 --htj2k
    jp3d decode scan.j3k out.raw --roi 0,0,0,64,64,16
    jp3d decode scan.j3k out.raw --res 1 --layers 2
    jp3d info scan.j3k")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode raw voxel data to a codestream
    ///
    /// Input must be raw 8-bit samples in x-fastest order, one component.
    #[command(visible_alias = "e")]
    Encode {
        /// Input raw voxel file
        input: PathBuf,

        /// Output codestream file
        output: PathBuf,

        /// Volume width in voxels
        #[arg(short = 'W', long)]
        width: u32,

        /// Volume height in voxels
        #[arg(short = 'H', long)]
        height: u32,

        /// Volume depth in voxels
        #[arg(short = 'D', long)]
        depth: u32,

        /// Lossless (reversible 5/3) compression; the default
        #[arg(long, conflicts_with_all = ["quality", "psnr"])]
        lossless: bool,

        /// Quality 1-100, mapped onto a PSNR target
        #[arg(short, long, conflicts_with = "psnr")]
        quality: Option<u8>,

        /// Explicit PSNR target in dB
        #[arg(short, long)]
        psnr: Option<f32>,

        /// Use the high-throughput block coder
        #[arg(long)]
        htj2k: bool,

        /// Tile dimensions as X,Y,Z
        #[arg(short, long, value_parser = parse_triple)]
        tile: Option<(u32, u32, u32)>,
    },

    /// Decode a codestream to raw voxels
    #[command(visible_alias = "d")]
    Decode {
        /// Input codestream file
        input: PathBuf,

        /// Output raw voxel file
        output: PathBuf,

        /// Region of interest as x,y,z,w,h,d
        #[arg(long, value_parser = parse_roi)]
        roi: Option<Region>,

        /// Stop at this resolution step (0 = coarsest)
        #[arg(long)]
        res: Option<u8>,

        /// Decode only this many quality layers
        #[arg(long)]
        layers: Option<u16>,

        /// Continue past malformed tiles
        #[arg(long)]
        tolerant: bool,
    },

    /// Print codestream metadata
    #[command(visible_alias = "i")]
    Info {
        /// Input codestream file
        input: PathBuf,
    },
}

fn parse_triple(s: &str) -> Result<(u32, u32, u32), String> {
    let parts: Vec<u32> = s
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("bad tile spec {s:?}: {e}"))?;
    match parts.as_slice() {
        [x, y, z] => Ok((*x, *y, *z)),
        _ => Err(format!("tile spec {s:?} needs exactly three values")),
    }
}

fn parse_roi(s: &str) -> Result<Region, String> {
    let parts: Vec<u32> = s
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("bad ROI spec {s:?}: {e}"))?;
    match parts.as_slice() {
        [x, y, z, w, h, d] => Ok(Region::from_size(*x, *y, *z, *w, *h, *d)),
        _ => Err(format!("ROI spec {s:?} needs exactly six values")),
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Exit codes: 0 success, 2 usage, 3 parse error, 4 I/O error, 5 cancelled.
fn exit_code(e: &J3kError) -> u8 {
    match e {
        J3kError::Io(_) => 4,
        J3kError::Cancelled => 5,
        e if e.is_data_error() => 3,
        _ => 2,
    }
}

fn run(cli: Cli) -> Result<(), J3kError> {
    match cli.command {
        Commands::Encode {
            input,
            output,
            width,
            height,
            depth,
            lossless: _,
            quality,
            psnr,
            htj2k,
            tile,
        } => {
            let data = fs::read(&input)?;
            let volume = Volume::monochrome(width, height, depth, data)?;

            let psnr = psnr.or_else(|| quality.map(|q| 30.0 + q.min(100) as f32 * 0.25));
            let mode = match (psnr, htj2k) {
                (None, false) => CompressionMode::Lossless,
                (None, true) => CompressionMode::LosslessHtj2k,
                (Some(p), false) => CompressionMode::Lossy { psnr: p },
                (Some(p), true) => CompressionMode::LossyHtj2k { psnr: p },
            };
            let mut config = EncoderConfig::default().with_mode(mode);
            if let Some((tx, ty, tz)) = tile {
                config = config.with_tiling(TilingConfig::new(tx, ty, tz));
            }
            let result = Encoder::new(config).encode(&volume)?;
            fs::write(&output, &result.bytes)?;
            println!(
                "encoded {}x{}x{} -> {} bytes ({:.2}x, {})",
                width,
                height,
                depth,
                result.bytes.len(),
                result.compression_ratio,
                if result.is_lossless { "lossless" } else { "lossy" }
            );
            Ok(())
        }

        Commands::Decode {
            input,
            output,
            roi,
            res,
            layers,
            tolerant,
        } => {
            let bytes = fs::read(&input)?;

            // Reduced-resolution and layer-limited decodes go through the
            // progressive decoder, stopping at the requested step.
            if let Some(stop) = res {
                return decode_progressive(
                    &bytes,
                    &output,
                    ProgressiveMode::Resolution,
                    stop as usize,
                    tolerant,
                );
            }
            if let Some(stop) = layers {
                return decode_progressive(
                    &bytes,
                    &output,
                    ProgressiveMode::Quality,
                    stop.saturating_sub(1) as usize,
                    tolerant,
                );
            }

            let decoder = Decoder::new(DecoderConfig { tolerant });
            let result = match roi {
                Some(region) => decoder.decode_region(&bytes, region)?,
                None => decoder.decode(&bytes)?,
            };
            for w in &result.warnings {
                log::warn!("{w}");
            }
            fs::write(&output, &result.volume.components[0].data)?;
            println!(
                "decoded {}x{}x{} ({} of {} tiles{})",
                result.volume.width,
                result.volume.height,
                result.volume.depth,
                result.tiles_decoded,
                result.tiles_total,
                if result.is_partial { ", partial" } else { "" }
            );
            Ok(())
        }

        Commands::Info { input } => {
            let bytes = fs::read(&input)?;
            let parsed = CodestreamParser::new(&bytes).with_tolerance(true).parse()?;
            println!(
                "volume:      {}x{}x{}",
                parsed.siz.width, parsed.siz.height, parsed.siz.depth
            );
            println!(
                "tiles:       {}x{}x{} ({} tile-parts)",
                parsed.siz.tile_w,
                parsed.siz.tile_h,
                parsed.siz.tile_d,
                parsed.tiles.len()
            );
            println!("components:  {}", parsed.siz.components.len());
            for c in &parsed.siz.components {
                println!(
                    "  {} bit {}, subsampling {}x{}x{}",
                    c.bit_depth,
                    if c.signed { "signed" } else { "unsigned" },
                    c.sub_x,
                    c.sub_y,
                    c.sub_z
                );
            }
            println!(
                "coding:      {:?}, {} layer(s), levels ({},{},{}), filter {:?}",
                parsed.cod.progression,
                parsed.cod.layers,
                parsed.cod.levels_x,
                parsed.cod.levels_y,
                parsed.cod.levels_z,
                parsed.cod.filter
            );
            if let Some(cap) = parsed.cap {
                println!(
                    "htj2k:       signalled (mixed tiles {})",
                    if cap.allows_mixed_tiles() {
                        "allowed"
                    } else {
                        "not allowed"
                    }
                );
            }
            if parsed.contains_htj2k_tiles() {
                println!(
                    "ht tiles:    present{}",
                    if parsed.is_hybrid_htj2k() {
                        " (hybrid)"
                    } else {
                        ""
                    }
                );
            }
            if parsed.is_partial {
                println!("warnings:    {}", parsed.warnings.len());
            }
            Ok(())
        }
    }
}

fn decode_progressive(
    bytes: &[u8],
    output: &PathBuf,
    mode: ProgressiveMode,
    stop_step: usize,
    tolerant: bool,
) -> Result<(), J3kError> {
    let mut decoder = ProgressiveDecoder::new(mode).with_tolerance(tolerant);
    let mut chosen: Option<Volume> = None;
    decoder.decode_with(bytes, |step| {
        let keep_going = step.step < stop_step && !step.is_final;
        if step.step == stop_step || step.is_final {
            chosen = Some(step.volume.clone());
        }
        keep_going
    })?;
    let volume = chosen.ok_or_else(|| J3kError::Corrupted("no progressive step emitted".into()))?;
    fs::write(output, &volume.components[0].data)?;
    println!(
        "decoded step {} -> {}x{}x{}",
        stop_step, volume.width, volume.height, volume.depth
    );
    Ok(())
}
