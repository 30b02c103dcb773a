//! `vellum import`: copy an image file into the original store.

use vellum_cache::{IgnoreReason, PutOutcome};

use crate::{session, GlobalArgs, ImportArgs};

/// Runs the `vellum import` command.
///
/// Returns exit code 0 when the file was stored and 1 when it was skipped or
/// could not be copied.
pub fn run(args: &ImportArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let session = session::open(global)?;
    let outcome = session.cache.originals().put_file(&args.file, &args.key);

    let (code, message) = match outcome {
        PutOutcome::Stored => (
            0,
            format!(
                "     Stored {} as '{}'",
                args.file.display(),
                args.key
            ),
        ),
        PutOutcome::Ignored(IgnoreReason::NotAFile) => (
            1,
            format!("warning: {} is not a regular file", args.file.display()),
        ),
        PutOutcome::Ignored(IgnoreReason::NotAnImage) => (
            1,
            format!("warning: {} is not a recognized image", args.file.display()),
        ),
        PutOutcome::Failed => (1, format!("error: failed to import {}", args.file.display())),
    };
    if code != 0 || !global.quiet {
        eprintln!("{message}");
    }
    Ok(code)
}
