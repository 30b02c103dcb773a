//! `vellum purge`: delete rendered artifacts and, optionally, originals.

use crate::{session, GlobalArgs, PurgeArgs};

/// Runs the `vellum purge` command.
pub fn run(args: &PurgeArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let session = session::open(global)?;
    let renders = session.cache.renders().purge()?;
    let originals = if args.renders_only {
        0
    } else {
        session.cache.originals().purge()?
    };

    tracing::info!(renders, originals, "purged cache");
    if !global.quiet {
        eprintln!("    Removed {renders} artifact(s) and {originals} original(s)");
    }
    Ok(0)
}
