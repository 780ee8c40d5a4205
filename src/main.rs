// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

// Use library instead of local modules
use geopoint_editor::{csv_codec, EditorConfig, EditorSession, HeadlessSurface};

fn config_path() -> PathBuf {
    env::var("GEOPOINT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("geopoint.json"))
}

fn init_logging(default_level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

/// Batch commands report progress; the TUI owns the terminal, so only warnings
fn default_log_level(command: Option<&str>) -> &'static str {
    match command {
        Some("import") | Some("export") => "info",
        _ => "warn",
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str);

    init_logging(default_log_level(command));
    let config = EditorConfig::load(&config_path())?;

    match command {
        Some("import") => {
            let file = args.get(2).context("usage: geopoint-editor import <file.csv>")?;
            run_import(Path::new(file), &config)?;
        }
        Some("export") => {
            let (input, output) = match (args.get(2), args.get(3)) {
                (Some(input), Some(output)) => (input, output),
                _ => anyhow::bail!("usage: geopoint-editor export <in.csv> <out.csv>"),
            };
            run_export(Path::new(input), Path::new(output), &config)?;
        }
        preload => {
            run_ui_mode(preload.map(Path::new), &config)?;
        }
    }

    Ok(())
}

fn import_into(session: &mut EditorSession<HeadlessSurface>, file: &Path) -> Result<()> {
    if !file.exists() {
        eprintln!("❌ File not found: {}", file.display());
        std::process::exit(1);
    }

    let batch = csv_codec::read_file(file)?;
    let summary = session.import_batch(batch);

    println!("✓ Added {} points from {}", summary.added, file.display());
    if summary.skipped() > 0 {
        println!(
            "  Skipped: {} duplicates, {} invalid, {} malformed rows",
            summary.duplicates,
            summary.invalid,
            summary.malformed.len()
        );
        for row in &summary.malformed {
            println!("    line {}: {}", row.line, row.reason);
        }
    }

    Ok(())
}

fn run_import(file: &Path, config: &EditorConfig) -> Result<()> {
    println!("📍 Geo Point Editor - CSV import");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut session = EditorSession::new(HeadlessSurface::new(), config);
    import_into(&mut session, file)?;

    println!("\n{:<40} {:>12} {:>12}", "name", "lat", "lon");
    for point in session.store().points() {
        println!("{:<40} {:>12} {:>12}", point.name, point.lat, point.lon);
    }
    println!("\n✅ {} points in store", session.store().len());

    Ok(())
}

fn run_export(input: &Path, output: &Path, config: &EditorConfig) -> Result<()> {
    println!("📤 Geo Point Editor - normalize & export");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut session = EditorSession::new(HeadlessSurface::new(), config);
    import_into(&mut session, input)?;
    csv_codec::write_file(output, session.store().points())?;

    println!("✅ Wrote {} points to {}", session.store().len(), output.display());
    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(preload: Option<&Path>, config: &EditorConfig) -> Result<()> {
    use geopoint_editor::{GeocodeEnricher, NominatimGeocoder};
    use std::sync::Arc;

    println!("🗺️  Loading Geo Point Editor UI...\n");

    // Lookups run on this runtime while the UI loop stays synchronous
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    let mut session = EditorSession::new(HeadlessSurface::new(), config);
    if config.geocode.enabled {
        let geocoder = NominatimGeocoder::new(&config.geocode)?;
        session = session.with_enricher(GeocodeEnricher::new(
            Arc::new(geocoder),
            runtime.handle().clone(),
        ));
    }

    if let Some(file) = preload {
        import_into(&mut session, file)?;
    }

    println!("Starting UI... (Press 'q' to quit)\n");

    let mut app = ui::App::new(session, config.clone());
    ui::run_ui(&mut app)?;

    println!("\n✅ UI closed successfully");

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_preload: Option<&Path>, _config: &EditorConfig) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API: cargo run --bin geopoint-server --features server");
    std::process::exit(1);
}
