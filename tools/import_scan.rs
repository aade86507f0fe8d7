use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use clap::Parser;
use library::{Library, ScanOptions};
use tracing_subscriber::EnvFilter;

/// Scans a media root into a catalog database, then drops rows whose files
/// are gone.
#[derive(Parser)]
#[command(name = "import_scan")]
struct Args {
    /// Media root to scan.
    #[arg(env = "SPINDLE_MEDIA")]
    media: PathBuf,

    /// Catalog database file.
    #[arg(env = "SPINDLE_DB", default_value = "data/library.redb")]
    db: PathBuf,

    /// Re-read tags of files modified since the last scan.
    #[arg(long)]
    refresh: bool,

    /// Skip the orphan pass.
    #[arg(long)]
    no_orphans: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    if let Some(parent) = args.db.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let library = Library::open(args.media, &args.db)?;
    let cancel = AtomicBool::new(false);
    let options = ScanOptions {
        refresh_modified: args.refresh,
    };
    let scan = library.scan(options, &cancel)?;
    println!(
        "Scanned: {} artists, {} albums, {} songs ({} updated, {} skipped) in {} ms",
        scan.artists_added,
        scan.albums_added,
        scan.songs_added,
        scan.songs_updated,
        scan.files_skipped,
        scan.elapsed_ms
    );

    if !args.no_orphans {
        let orphans = library.collect_orphans(None, &cancel)?;
        println!(
            "Removed: {} songs, {} albums, {} artists, {} folders, {} art",
            orphans.songs, orphans.albums, orphans.artists, orphans.folders, orphans.arts
        );
    }

    let counts = library.catalog().counts()?;
    println!(
        "Catalog: {} artists, {} albums, {} songs, {} folders",
        counts.artists, counts.albums, counts.songs, counts.folders
    );
    Ok(())
}
