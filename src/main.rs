#![allow(clippy::too_many_arguments)]

use eframe::egui;
use roimask::app::RoiMaskApp;
use roimask::{cli, logger};

fn main() -> Result<(), eframe::Error> {
    // -- CLI / headless mode ---------------------------------------------
    if cli::CliArgs::is_cli_mode() {
        use clap::Parser;
        let args = cli::CliArgs::parse();
        let code = cli::run(args);
        std::process::exit(if code == std::process::ExitCode::SUCCESS {
            0
        } else {
            1
        });
    }

    // -- GUI mode -----------------------------------------------------

    // Initialize session log (overwrites previous session log)
    logger::init();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 800.0])
            .with_min_inner_size([640.0, 480.0])
            .with_title("roi-mask"),
        ..Default::default()
    };

    eframe::run_native(
        "roi-mask",
        options,
        Box::new(|cc| Box::new(RoiMaskApp::new(cc))),
    )
}
