// ============================================================================
// roi-mask CLI: headless mask derivation via command-line arguments
// ============================================================================
//
// Usage examples:
//   roi-mask --input leaf.jpg --layer leaf_strokes.png
//   roi-mask -i leaf.jpg --layer strokes.png --output-dir masks/ --threshold 40
//   roi-mask -i "plates/*.jpg" --layer-dir strokes/ --output-dir masks/
//   roi-mask -i scan.tif                              (writes an empty mask)
//
// A paint layer may be at the image's original resolution or at the display
// resolution the GUI edits at (--max-display-size); either way the mask is
// written at the original resolution. No GUI is opened in CLI mode.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::export::{ExportRequest, export_mask, unix_now};
use crate::io::display_size;
use crate::settings::MaskSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// roi-mask headless mask exporter.
///
/// Turns painted overlays into binary ROI masks (0 = background, 255 = ROI)
/// at the source image's resolution.
#[derive(Parser, Debug)]
#[command(
    name = "roi-mask",
    about = "roi-mask headless binary mask exporter",
    long_about = "Threshold painted overlay images into binary region-of-interest masks\n\
                  without opening the GUI. Masks are single-channel PNGs at the\n\
                  source image's resolution, named <stem>_mask.png.\n\n\
                  Example:\n  \
                  roi-mask --input leaf.jpg --layer leaf_strokes.png --output-dir masks/"
)]
pub struct CliArgs {
    /// Source image(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Paint layer (RGBA PNG) for a single input. Omit to write an empty mask.
    #[arg(short, long, value_name = "LAYER.png", conflicts_with = "layer_dir")]
    pub layer: Option<PathBuf>,

    /// Directory holding one paint layer per input, named <input stem>.png.
    #[arg(long, value_name = "DIR")]
    pub layer_dir: Option<PathBuf>,

    /// Output directory. Defaults to the configured output folder.
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Paint intensity a pixel must exceed to count as ROI (default: configured value).
    #[arg(short, long, value_name = "0-254")]
    pub threshold: Option<u8>,

    /// Longest edge of the GUI's editing copy, used to recognise display-sized
    /// layers. 0 disables downscaling (default: configured value).
    #[arg(long, value_name = "PIXELS")]
    pub max_display_size: Option<u32>,

    /// Print per-file timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Returns `true` when any CLI-mode flag is present in the real process arguments.
    /// Used by `main()` to route before creating an eframe window.
    pub fn is_cli_mode() -> bool {
        std::env::args().any(|a| a == "--input" || a == "-i")
    }

    /// Configured settings with this invocation's overrides applied.
    pub fn effective_settings(&self, base: MaskSettings) -> MaskSettings {
        let mut s = base;
        if let Some(t) = self.threshold {
            s.mask_threshold = t;
        }
        if let Some(m) = self.max_display_size {
            s.max_display_size = m;
        }
        if let Some(ref dir) = self.output_dir {
            s.output_dir = Some(dir.clone());
        }
        s
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    run_with_settings(args, MaskSettings::load())
}

/// [`run`] against explicit base settings instead of the saved ones.
pub fn run_with_settings(args: CliArgs, base: MaskSettings) -> ExitCode {
    let settings = args.effective_settings(base);

    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.layer.is_some() {
        eprintln!(
            "error: {} input files given but --layer only pairs with a single input.\n\
             Use --layer-dir to supply one layer per input.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let output_dir = settings.resolved_output_dir();
    if let Err(e) = std::fs::create_dir_all(&output_dir) {
        eprintln!(
            "error: could not create output directory '{}': {}",
            output_dir.display(),
            e
        );
        return ExitCode::FAILURE;
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        let layer_path = match (&args.layer, &args.layer_dir) {
            (Some(layer), _) => Some(layer.clone()),
            (None, Some(dir)) => match layer_path_in_dir(input_path, dir) {
                Some(p) => Some(p),
                None => {
                    eprintln!("  error: no layer for '{}' in '{}'.", input_path.display(), dir.display());
                    any_failure = true;
                    continue;
                }
            },
            (None, None) => None,
        };

        match run_one(input_path, layer_path.as_deref(), &output_dir, &settings) {
            Ok(out) => {
                if args.verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        out.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                } else {
                    println!("{}", out.display());
                }
            }
            Err(e) => {
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

fn run_one(
    input: &Path,
    layer: Option<&Path>,
    output_dir: &Path,
    settings: &MaskSettings,
) -> Result<PathBuf, String> {
    // -- Step 1: Original size -------------------------------------------
    let original_size = image::image_dimensions(input)
        .map_err(|e| format!("load failed: {}", e))?;

    // -- Step 2: Paint layer (optional) ----------------------------------
    let layer_img = match layer {
        Some(path) => Some(
            image::open(path)
                .map_err(|e| format!("layer load failed: {}", e))?
                .to_rgba8(),
        ),
        None => None,
    };

    let edit_size = match layer_img {
        Some(ref l) => check_layer_size(l.dimensions(), original_size, settings.max_display_size)?,
        None => display_size(original_size.0, original_size.1, settings.max_display_size),
    };
    let editor = match layer_img {
        Some(l) => Some(
            layer_editor(l).map_err(|e| format!("invalid layer: {}", e))?,
        ),
        None => None,
    };

    // -- Step 3: Derive, reconcile, write --------------------------------
    let req = ExportRequest {
        editor: editor.as_ref(),
        display_size: edit_size,
        original_size,
        source_path: Some(input),
        output_dir,
        threshold: settings.mask_threshold,
        unix_secs: unix_now(),
    };
    let out = export_mask(&req).map_err(|e| format!("export failed: {}", e))?;
    Ok(out.path)
}

/// Wrap a loaded layer in an editor surface (a blank background of the same size).
fn layer_editor(layer: image::RgbaImage) -> Result<crate::canvas::EditorState, crate::canvas::EditorError> {
    let (w, h) = layer.dimensions();
    let background = image::RgbaImage::new(w, h);
    crate::canvas::EditorState::from_parts(
        background,
        vec![crate::canvas::PaintLayer {
            name: "Sketch".to_string(),
            pixels: layer,
        }],
        None,
        None,
    )
}

/// A layer must match either the original or the display size.
fn check_layer_size(
    layer: (u32, u32),
    original: (u32, u32),
    max_display_size: u32,
) -> Result<(u32, u32), String> {
    let display = display_size(original.0, original.1, max_display_size);
    if layer == original || layer == display {
        Ok(layer)
    } else {
        Err(format!(
            "layer is {}x{} but the image is {}x{} (display {}x{})",
            layer.0, layer.1, original.0, original.1, display.0, display.1
        ))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// `<dir>/<input stem>.png`, if it exists.
fn layer_path_in_dir(input: &Path, dir: &Path) -> Option<PathBuf> {
    let stem = input.file_stem()?;
    let candidate = dir.join(stem).with_extension("png");
    candidate.exists().then_some(candidate)
}

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::{is_binary, roi_pixel_count};
    use image::{Rgba, RgbaImage};

    #[test]
    fn args_parse_and_override_settings() {
        let args = CliArgs::try_parse_from([
            "roi-mask", "-i", "a.png", "b.png", "--threshold", "40", "--max-display-size", "0",
            "-o", "out",
        ])
        .unwrap();
        assert_eq!(args.input, vec!["a.png", "b.png"]);
        let s = args.effective_settings(MaskSettings::default());
        assert_eq!(s.mask_threshold, 40);
        assert_eq!(s.max_display_size, 0);
        assert_eq!(s.output_dir, Some(PathBuf::from("out")));
    }

    #[test]
    fn layer_and_layer_dir_conflict() {
        let r = CliArgs::try_parse_from(["roi-mask", "-i", "a.png", "-l", "x.png", "--layer-dir", "d"]);
        assert!(r.is_err());
    }

    #[test]
    fn layer_size_must_match_original_or_display() {
        assert_eq!(check_layer_size((4000, 3000), (4000, 3000), 1024), Ok((4000, 3000)));
        assert_eq!(check_layer_size((1024, 768), (4000, 3000), 1024), Ok((1024, 768)));
        assert!(check_layer_size((1000, 750), (4000, 3000), 1024).is_err());
    }

    #[test]
    fn resolve_inputs_dedups_literal_paths() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.png");
        std::fs::write(&p, b"x").unwrap();
        let s = p.to_string_lossy().into_owned();
        assert_eq!(resolve_inputs(&[s.clone(), s]), vec![p]);
    }

    #[test]
    fn display_sized_layer_is_written_at_original_size() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("plate.png");
        RgbaImage::from_pixel(400, 200, Rgba([10, 20, 30, 255])).save(&input).unwrap();

        let mut layer = RgbaImage::new(100, 50);
        for x in 10..40 {
            layer.put_pixel(x, 20, Rgba([255, 255, 255, 255]));
        }
        let layer_path = dir.path().join("strokes.png");
        layer.save(&layer_path).unwrap();

        let out_dir = dir.path().join("masks");
        std::fs::create_dir_all(&out_dir).unwrap();
        let settings = MaskSettings {
            max_display_size: 100,
            ..MaskSettings::default()
        };
        let out = run_one(&input, Some(&layer_path), &out_dir, &settings).unwrap();

        assert_eq!(out, out_dir.join("plate_mask.png"));
        let mask = image::open(&out).unwrap().to_luma8();
        assert_eq!(mask.dimensions(), (400, 200));
        assert!(is_binary(&mask));
        assert_eq!(roi_pixel_count(&mask), 30 * 4 * 4);
    }

    #[test]
    fn missing_layer_writes_empty_mask() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("scan.png");
        RgbaImage::from_pixel(30, 20, Rgba([0, 0, 0, 255])).save(&input).unwrap();
        let out = run_one(&input, None, dir.path(), &MaskSettings::default()).unwrap();
        let mask = image::open(&out).unwrap().to_luma8();
        assert_eq!(mask.dimensions(), (30, 20));
        assert_eq!(roi_pixel_count(&mask), 0);
    }

    fn run_args(args: &[&str]) -> ExitCode {
        let mut argv = vec!["roi-mask"];
        argv.extend_from_slice(args);
        run_with_settings(CliArgs::try_parse_from(argv).unwrap(), MaskSettings::default())
    }

    fn write_image(path: &Path, w: u32, h: u32) -> String {
        RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 255])).save(path).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn exit_code_reflects_every_input() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_image(&dir.path().join("a.png"), 16, 16);
        let b = write_image(&dir.path().join("b.png"), 16, 16);
        let layers = dir.path().join("layers");
        std::fs::create_dir_all(&layers).unwrap();
        write_image(&layers.join("a.png"), 16, 16);
        let out = dir.path().join("out");
        let out_s = out.to_string_lossy().into_owned();
        let layers_s = layers.to_string_lossy().into_owned();

        // b has no layer in the layer dir; a is still written.
        let code = run_args(&["-i", &a, &b, "--layer-dir", &layers_s, "-o", &out_s]);
        assert_eq!(code, ExitCode::FAILURE);
        assert!(out.join("a_mask.png").exists());
        assert!(!out.join("b_mask.png").exists());

        // One --layer cannot serve several inputs.
        let layer_a = layers.join("a.png").to_string_lossy().into_owned();
        assert_eq!(
            run_args(&["-i", &a, &b, "--layer", &layer_a, "-o", &out_s]),
            ExitCode::FAILURE
        );

        let missing = dir.path().join("nothing_*.png").to_string_lossy().into_owned();
        assert_eq!(run_args(&["-i", &missing, "-o", &out_s]), ExitCode::FAILURE);

        assert_eq!(run_args(&["-i", &a, &b, "-o", &out_s]), ExitCode::SUCCESS);
        assert!(out.join("b_mask.png").exists());
    }

    #[test]
    fn layer_dir_lookup_uses_input_stem() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("leaf.png"), b"x").unwrap();
        assert_eq!(
            layer_path_in_dir(Path::new("/photos/leaf.jpg"), dir.path()),
            Some(dir.path().join("leaf.png"))
        );
        assert_eq!(layer_path_in_dir(Path::new("/photos/stem.jpg"), dir.path()), None);
    }
}
