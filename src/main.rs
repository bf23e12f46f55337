mod cli;

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use clap::Parser as _;
use cli::{Cli, Commands};
use log::{error, info, warn};
use npk_tool::{
    FrameDescriptor, NpkEditor, NpkError, NpkPath, NpkReader, NpkResult, PixelFrame, ReadOptions,
    pixels::pack_rgba,
};
use path_absolutize::Absolutize;
use rayon::prelude::*;
use tap::Tap;
use walkdir::WalkDir;

fn main() -> Result<(), NpkError> {
    _ = pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .parse_default_env()
        .try_init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List { npk, sounds } => {
            let reader = NpkReader::open(absolute(&npk)?)?;
            let mut paths: Vec<&NpkPath> = if sounds {
                reader.sound_paths().collect()
            } else {
                reader.sprite_paths().collect()
            };
            paths.sort();
            for path in paths {
                println!("{path}");
            }
        }
        Commands::Frames { npk, img } => {
            let mut reader = NpkReader::open(absolute(&npk)?)?;
            for (i, frame) in reader.frames(&NpkPath::new(&img))?.iter().enumerate() {
                match frame {
                    FrameDescriptor::Link { target_index } => println!("{i}: link -> {target_index}"),
                    FrameDescriptor::Pixels(p) => println!(
                        "{i}: {} {}x{}{} at ({}, {}), max {}x{}",
                        p.format,
                        p.width,
                        p.height,
                        if p.compressed { " compressed" } else { "" },
                        p.location_x,
                        p.location_y,
                        p.max_width,
                        p.max_height
                    ),
                }
            }
        }
        Commands::Dump {
            npk,
            img,
            frame,
            output,
        } => {
            let npk = absolute(&npk)?;
            // Default output: <npk>.<frame>.rgba next to the archive
            let output_path = output.unwrap_or_else(|| {
                PathBuf::from(
                    npk.as_os_str()
                        .to_owned()
                        .tap_mut(|x| x.push(format!(".{frame}.rgba"))),
                )
            });
            let mut reader = NpkReader::open(&npk)?;
            let image = reader.get_image(&NpkPath::new(&img), frame)?;
            fs::write(&output_path, &image.pixels)?;
            info!(
                "Wrote {}x{} RGBA to {:?}",
                image.attributes.width, image.attributes.height, output_path
            );
        }
        Commands::Validate { paths } => {
            let archives = collect_archives(&paths)?;
            if archives.is_empty() {
                warn!("No .npk files found");
            }
            let failed = archives
                .par_iter()
                .map(|path| validate_archive(path))
                .filter(|ok| !ok)
                .count();
            info!("{} of {} archives passed", archives.len() - failed, archives.len());
            if failed > 0 {
                std::process::exit(1);
            }
        }
        Commands::Replace {
            npk,
            img,
            frame,
            input,
            width,
            height,
            format,
            compress,
            x,
            y,
        } => {
            let img = NpkPath::new(&img);
            let mut editor = NpkEditor::default();
            editor.open(absolute(&npk)?)?;

            let frames = editor.reader()?.frames(&img)?;
            let old = frames
                .get(frame)
                .copied()
                .ok_or_else(|| NpkError::FrameNotFound {
                    img: img.clone(),
                    index: frame,
                    count: frames.len(),
                })?;
            let (old_x, old_y, max_width, max_height) = match old {
                FrameDescriptor::Pixels(p) => (p.location_x, p.location_y, p.max_width, p.max_height),
                FrameDescriptor::Link { .. } => (0, 0, width, height),
            };

            let rgba = fs::read(&input)?;
            let expected = width as u64 * height as u64 * 4;
            if rgba.len() as u64 != expected {
                return Err(NpkError::InvalidArgument(format!(
                    "{:?} is {} bytes, a {width}x{height} RGBA image is {expected}",
                    input,
                    rgba.len()
                )));
            }
            let descriptor = FrameDescriptor::Pixels(PixelFrame {
                format,
                compressed: compress,
                compressed_length: 0,
                width,
                height,
                location_x: x.unwrap_or(old_x),
                location_y: y.unwrap_or(old_y),
                max_width,
                max_height,
            });
            editor.edit_frame(&img, frame, descriptor, pack_rgba(&rgba, format).as_slice())?;
        }
        Commands::Link {
            npk,
            img,
            frame,
            target,
        } => {
            let mut editor = NpkEditor::default();
            editor.open(absolute(&npk)?)?;
            editor.edit_frame(
                &NpkPath::new(&img),
                frame,
                FrameDescriptor::Link {
                    target_index: target,
                },
                io::empty(),
            )?;
        }
    }

    Ok(())
}

/// The editor writes its temp file next to the archive, so relative paths
/// are resolved up front.
fn absolute(path: &Path) -> NpkResult<PathBuf> {
    Ok(path.absolutize()?.into_owned())
}

fn collect_archives(paths: &[PathBuf]) -> NpkResult<Vec<PathBuf>> {
    let mut archives = Vec::new();
    for path in paths {
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry?;
            let is_npk = entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("npk"));
            if entry.file_type().is_file() && is_npk {
                archives.push(entry.into_path());
            }
        }
    }
    Ok(archives)
}

/// Opens `path` in strict mode and decodes every frame of every img.
fn validate_archive(path: &Path) -> bool {
    let diagnostics = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&diagnostics);
    let options = ReadOptions::strict(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    match decode_all(path, options) {
        Ok(frames) => match diagnostics.load(Ordering::Relaxed) {
            0 => {
                info!("{:?}: OK, {frames} frames", path);
                true
            }
            n => {
                warn!("{:?}: decoded {frames} frames with {n} diagnostics", path);
                false
            }
        },
        Err(e) => {
            error!("{:?}: {e}", path);
            false
        }
    }
}

fn decode_all(path: &Path, options: ReadOptions) -> NpkResult<usize> {
    let mut reader = NpkReader::open_with(path, options)?;
    let mut imgs: Vec<NpkPath> = reader.sprite_paths().cloned().collect();
    imgs.sort();

    let mut frames = 0;
    for img in &imgs {
        let count = reader.get_or_load(img)?.frame_count();
        for i in 0..count {
            reader.get_image(img, i)?;
        }
        frames += count;
    }
    Ok(frames)
}
