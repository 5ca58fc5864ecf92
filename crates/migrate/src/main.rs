#![forbid(unsafe_code)]

mod legacy;
mod report;
mod run;

use lx_storage::SqliteStore;
use report::MigrationSummary;
use run::RunOptions;
use std::path::PathBuf;

#[derive(Debug)]
struct MigrateConfig {
    storage_dir: PathBuf,
    session: Option<String>,
    dry_run: bool,
}

fn usage() -> &'static str {
    "lx_migrate — normalize legacy embedded-branch chat history\n\n\
USAGE:\n\
  lx_migrate --storage-dir DIR [--session ID] [--dry-run]\n\n\
NOTES:\n\
  - Reads every message that still carries a legacy branches payload and\n\
    writes normalized message rows plus one migration snapshot per anchor.\n\
  - Safe to re-run: rows that already exist are skipped, and an anchor that\n\
    already has a migration snapshot does not get a second one.\n\
  - Per-item failures are logged and counted; they do not abort the run.\n\
  - The legacy columns are left untouched; dropping them is a separate,\n\
    manual schema step once the counts come back clean.\n\n\
ENVIRONMENT:\n\
  LX_STORAGE_DIR   default for --storage-dir\n\
  LX_SESSION       default for --session\n"
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_args(args: &[String]) -> Result<MigrateConfig, String> {
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print!("{}", usage());
        std::process::exit(0);
    }

    let mut storage_dir: Option<PathBuf> = env_var("LX_STORAGE_DIR").map(PathBuf::from);
    let mut session: Option<String> = env_var("LX_SESSION");
    let mut dry_run = false;

    let mut i = 0usize;
    while i < args.len() {
        let a = args[i].as_str();
        match a {
            "--storage-dir" => {
                i += 1;
                let v = args.get(i).ok_or("--storage-dir requires DIR")?;
                storage_dir = Some(PathBuf::from(v));
            }
            "--session" => {
                i += 1;
                let v = args.get(i).ok_or("--session requires ID")?;
                session = Some(v.to_string());
            }
            "--dry-run" => {
                dry_run = true;
            }
            other => {
                return Err(format!("unknown argument: {other}\n\n{}", usage()));
            }
        }
        i += 1;
    }

    let storage_dir =
        storage_dir.ok_or("--storage-dir is required (or set LX_STORAGE_DIR)")?;

    Ok(MigrateConfig {
        storage_dir,
        session,
        dry_run,
    })
}

fn main() {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let cfg = parse_args(&args).unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(2);
    });

    let mut store = SqliteStore::open(&cfg.storage_dir).unwrap_or_else(|e| {
        eprintln!("cannot open store: {e}");
        std::process::exit(1);
    });

    // The anchor set is fixed up front: anchors appearing mid-run wait for
    // the next invocation.
    let anchors = match store.list_legacy_anchors(cfg.session.as_deref()) {
        Ok(anchors) => anchors,
        Err(e) => {
            eprintln!("cannot fetch legacy anchors: {e}");
            // exit() skips destructors; close the connection first.
            drop(store);
            std::process::exit(1);
        }
    };

    let mut summary = MigrationSummary {
        anchors_total: anchors.len(),
        ..Default::default()
    };
    run::migrate_anchors(
        &mut store,
        &anchors,
        &RunOptions {
            dry_run: cfg.dry_run,
        },
        &mut summary,
    );

    let rendered = summary.render(cfg.dry_run);
    print!("{rendered}");
    report::write_last_run(store.storage_dir(), &rendered, cfg.dry_run);
}
