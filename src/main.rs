use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use voicepack_export::{Args, Exporter, Settings};

fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::load().context("Problem while loading settings")?;

    tracing_subscriber::fmt()
        .with_max_level(settings.log.level)
        .with_writer(std::io::stderr)
        .init();

    let report = Exporter::new(settings.export.precision)
        .run(&args.input, &args.output)
        .context("Problem while exporting voice pack")?;
    info!(
        "exported pack {:?} ({} bytes)",
        report.shape, report.bytes_written
    );
    Ok(())
}
